//! Media library scan
//!
//! Pairs each file in the media directory with a preview image of the same
//! stem from the thumbnails directory, producing the initial playlist.

use super::MediaAsset;
use std::path::Path;
use std::sync::Arc;

/// Image extensions probed when pairing a thumbnail with a media file.
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Scan `media_dir` and return one asset per regular file, sorted by file
/// name. A media file without a matching thumbnail still gets an asset; the
/// dangling thumbnail path degrades to the placeholder frame at play time.
pub fn scan_media_library(media_dir: &Path, thumbnails_dir: &Path) -> Vec<Arc<MediaAsset>> {
    let entries = match std::fs::read_dir(media_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                dir = %media_dir.display(),
                error = %e,
                "media directory not readable, starting with an empty playlist"
            );
            return Vec::new();
        }
    };

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    files
        .into_iter()
        .map(|path| {
            let thumbnail = find_thumbnail(&path, thumbnails_dir);
            MediaAsset::new(path, thumbnail)
        })
        .collect()
}

fn find_thumbnail(media: &Path, thumbnails_dir: &Path) -> std::path::PathBuf {
    let stem = media
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for ext in THUMBNAIL_EXTENSIONS {
        let candidate = thumbnails_dir.join(format!("{stem}.{ext}"));
        if candidate.exists() {
            return candidate;
        }
    }
    thumbnails_dir.join(format!("{stem}.jpg"))
}
