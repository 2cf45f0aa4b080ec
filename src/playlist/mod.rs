#![allow(dead_code)]

//! Playlist and cursor state machine
//!
//! This module owns the mutable playlist the command front-end manipulates
//! and the broadcaster consumes:
//! - an ordered list of [`MediaAsset`] entries behind one mutex
//! - a cursor that is either none or a valid index
//! - the cursor policy applied when a track finishes
//! - the visual policy and the play/pause flag
//!
//! Cursor writes are funneled through a single `_locked` setter: under
//! `LoopPlaylist` any value is normalized modulo the playlist size, under the
//! other policies out-of-range values coerce to none. No lock is held across
//! I/O; readers snapshot under the lock.

mod scan;

pub use scan::scan_media_library;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// An entry of the playlist: a media file plus its preview image.
///
/// Entries are compared by identity (`Arc::ptr_eq`), never by path: the
/// producer uses identity to notice that the cursor moved to a different
/// entry even when both entries point at the same file on disk.
#[derive(Debug)]
pub struct MediaAsset {
    pub mediafile: PathBuf,
    pub thumbnail: PathBuf,
}

impl MediaAsset {
    pub fn new(mediafile: impl Into<PathBuf>, thumbnail: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            mediafile: mediafile.into(),
            thumbnail: thumbnail.into(),
        })
    }

    /// Both files are present on disk.
    pub fn exists(&self) -> bool {
        self.mediafile.exists() && self.thumbnail.exists()
    }
}

/// What happens to the cursor when a track finishes playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMode {
    /// Play the current entry, then drop it from the playlist.
    PlayAndDelete,
    /// Play through the list once and stop at the end.
    PlayAndStop,
    /// Wrap around to the start when the end is reached.
    LoopPlaylist,
}

/// What image data accompanies the current track's audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    /// The track's own video frames.
    Content,
    /// The track's preview image.
    Thumbnail,
    /// The configured placeholder image.
    Placeholder,
}

struct State {
    playlist: Vec<Arc<MediaAsset>>,
    cursor: Option<usize>,
    cursor_mode: CursorMode,
    visual_mode: VisualMode,
    is_playing: bool,
}

impl State {
    /// Validated cursor: a stored value that fell out of range (the list
    /// shrank under it) is lazily coerced to none.
    fn cursor(&mut self) -> Option<usize> {
        match self.cursor {
            Some(c) if c < self.playlist.len() => Some(c),
            _ => {
                self.cursor = None;
                None
            }
        }
    }

    /// Every cursor write goes through here.
    fn set_cursor(&mut self, value: Option<i64>) {
        let size = self.playlist.len() as i64;
        let Some(value) = value else {
            self.cursor = None;
            return;
        };
        if size == 0 {
            self.cursor = None;
            return;
        }
        self.cursor = if self.cursor_mode == CursorMode::LoopPlaylist {
            Some(value.rem_euclid(size) as usize)
        } else if (0..size).contains(&value) {
            Some(value as usize)
        } else {
            None
        };
    }

    fn select(&mut self, index: i64) {
        let mut step = 0i64;
        let deleting = self.cursor_mode == CursorMode::PlayAndDelete;
        if deleting {
            if let Some(current) = self.cursor() {
                self.playlist.remove(current);
                if index >= current as i64 {
                    step = -1;
                }
            }
        }

        let target = index + step;
        if deleting {
            // Out-of-range target keeps the post-deletion cursor; it is
            // re-validated lazily on the next read.
            if (0..self.playlist.len() as i64).contains(&target) {
                self.set_cursor(Some(target));
            }
        } else {
            self.set_cursor(Some(target));
        }
    }
}

/// Thread-safe playlist with a cursor, a cursor policy, a visual policy and
/// a play/pause flag.
pub struct Player {
    state: Mutex<State>,
}

impl Player {
    pub fn new(visual_mode: VisualMode, cursor_mode: CursorMode) -> Self {
        Self {
            state: Mutex::new(State {
                playlist: Vec::new(),
                cursor: None,
                cursor_mode,
                visual_mode,
                is_playing: true,
            }),
        }
    }

    /// Append an entry; an empty-to-non-empty transition places the cursor
    /// on the new entry.
    pub fn append(&self, media: Arc<MediaAsset>) {
        let mut state = self.state.lock();
        state.playlist.push(media);
        if state.cursor().is_none() {
            state.set_cursor(Some(0));
        }
    }

    /// Remove the entry at `index`, sliding the cursor so it keeps pointing
    /// at the same entry when possible.
    pub fn remove(&self, index: usize) {
        let mut state = self.state.lock();
        if index >= state.playlist.len() {
            return;
        }
        // validate against the pre-removal size, then adjust
        let cursor = state.cursor();
        state.playlist.remove(index);
        let Some(cursor) = cursor else {
            return;
        };
        if index < cursor {
            state.set_cursor(Some(cursor as i64 - 1));
        } else if index == cursor {
            let last = state.playlist.len() as i64 - 1;
            state.set_cursor(Some((cursor as i64).min(last)));
        }
    }

    /// Reposition the cursor. Under `PlayAndDelete` the current entry is
    /// dropped first and `index` renumbered accordingly.
    pub fn select(&self, index: i64) {
        self.state.lock().select(index);
    }

    /// Move the entry at `from` to position `to`, sliding the cursor with it.
    pub fn move_item(&self, from: usize, to: usize) {
        let mut state = self.state.lock();
        let size = state.playlist.len();
        if from >= size || to >= size {
            return;
        }
        let Some(cursor) = state.cursor() else {
            return;
        };

        let item = state.playlist.remove(from);
        state.playlist.insert(to, item);

        if from == cursor {
            state.set_cursor(Some(to as i64));
        } else if from < cursor && cursor <= to {
            state.set_cursor(Some(cursor as i64 - 1));
        } else if to <= cursor && cursor < from {
            state.set_cursor(Some(cursor as i64 + 1));
        }
    }

    /// Step the cursor by `step` positions (`select` semantics).
    pub fn step_by(&self, step: i64) {
        let mut state = self.state.lock();
        let base = state.cursor().unwrap_or(0) as i64;
        state.select(base + step);
    }

    /// Advance to the next entry.
    pub fn next(&self) {
        self.step_by(1);
    }

    /// Step back to the previous entry.
    pub fn prev(&self) {
        self.step_by(-1);
    }

    /// The entry at `cursor + step`, wrapping under `LoopPlaylist`.
    pub fn get_at_offset(&self, step: i64) -> Option<Arc<MediaAsset>> {
        let mut state = self.state.lock();
        let cursor = state.cursor()? as i64;
        let size = state.playlist.len() as i64;
        if size == 0 {
            return None;
        }

        let mut index = cursor + step;
        if !(0..size).contains(&index) {
            if state.cursor_mode == CursorMode::LoopPlaylist {
                index = index.rem_euclid(size);
            } else {
                return None;
            }
        }
        state.playlist.get(index as usize).cloned()
    }

    /// The entry under the cursor.
    pub fn get_current(&self) -> Option<Arc<MediaAsset>> {
        self.get_at_offset(0)
    }

    pub fn get_next(&self) -> Option<Arc<MediaAsset>> {
        self.get_at_offset(1)
    }

    pub fn get_prev(&self) -> Option<Arc<MediaAsset>> {
        self.get_at_offset(-1)
    }

    /// Snapshot of the playlist.
    pub fn get_playlist(&self) -> Vec<Arc<MediaAsset>> {
        self.state.lock().playlist.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().playlist.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.state.lock().cursor()
    }

    pub fn cursor_mode(&self) -> CursorMode {
        self.state.lock().cursor_mode
    }

    pub fn set_cursor_mode(&self, mode: CursorMode) {
        self.state.lock().cursor_mode = mode;
    }

    pub fn visual_mode(&self) -> VisualMode {
        self.state.lock().visual_mode
    }

    pub fn set_visual_mode(&self, mode: VisualMode) {
        self.state.lock().visual_mode = mode;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().is_playing
    }

    pub fn set_is_playing(&self, playing: bool) {
        self.state.lock().is_playing = playing;
    }

    pub fn pause(&self) {
        self.set_is_playing(false);
    }

    pub fn resume(&self) {
        self.set_is_playing(true);
    }

    /// Empty the playlist; the cursor becomes none.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.playlist.clear();
        state.cursor = None;
    }
}
