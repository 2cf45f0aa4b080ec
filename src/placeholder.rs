//! Placeholder frame cache and frame preparation
//!
//! At broadcaster start exactly two frames are produced: a silent stereo
//! audio frame and a still video frame decoded from the configured image.
//! Both already match what the output encoders consume, so the producer
//! hands out clones tagged as cached and the encoder context skips the
//! normalization graphs for them.

use crate::encode::fifo::{self, SAMPLE_FORMAT};
use crate::encode::{AUDIO_FRAME_SIZE, AUDIO_RATE};
use crate::error::{BroadcastError, FfmpegError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::software::scaling;
use ffmpeg::util::channel_layout::ChannelLayout;
use std::path::Path;

/// The two cached frames filling idle and pause intervals.
pub struct PlaceholderCache {
    silence: ffmpeg::util::frame::Audio,
    still: ffmpeg::util::frame::Video,
}

impl PlaceholderCache {
    /// Build the cache from the placeholder image on disk. A missing or
    /// undecodable image is fatal; the broadcaster refuses to start.
    pub fn load(image_path: &Path, width: u32, height: u32) -> Result<Self> {
        let still = video_frame_from_image(image_path, width, height)?;
        tracing::info!(image = %image_path.display(), "placeholder frames cached");
        Ok(Self {
            silence: silence_frame(),
            still,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_frames(
        silence: ffmpeg::util::frame::Audio,
        still: ffmpeg::util::frame::Video,
    ) -> Self {
        Self { silence, still }
    }

    /// A fresh clone of the silent audio frame.
    pub fn silence(&self) -> ffmpeg::util::frame::Audio {
        self.silence.clone()
    }

    /// A fresh clone of the still video frame.
    pub fn still(&self) -> ffmpeg::util::frame::Video {
        self.still.clone()
    }
}

/// 1024 samples of planar-f32 stereo silence at 48 kHz.
pub fn silence_frame() -> ffmpeg::util::frame::Audio {
    let mut frame = ffmpeg::util::frame::Audio::new(
        SAMPLE_FORMAT,
        AUDIO_FRAME_SIZE,
        ChannelLayout::STEREO,
    );
    frame.set_rate(AUDIO_RATE);
    for ch in 0..2 {
        if let Some(values) = fifo::channel_samples_mut(&mut frame, ch, AUDIO_FRAME_SIZE) {
            values.fill(0.0);
        }
    }
    frame
}

/// Decode an image from disk, resize it to the output geometry (Lanczos) and
/// convert it to a `yuv420p` video frame.
pub fn video_frame_from_image(path: &Path, width: u32, height: u32) -> Result<ffmpeg::util::frame::Video> {
    if !path.exists() {
        return Err(BroadcastError::PlaceholderMissing(path.to_path_buf()));
    }
    let rgb = image::open(path)
        .map_err(|e| BroadcastError::PlaceholderDecode(format!("{}: {}", path.display(), e)))?
        .into_rgb8();
    let rgb = if rgb.dimensions() == (width, height) {
        rgb
    } else {
        image::imageops::resize(&rgb, width, height, image::imageops::FilterType::Lanczos3)
    };
    rgb_to_yuv_frame(&rgb, width, height)
}

/// Re-scale an already decoded frame to the output geometry and pixel
/// format. Used to hold the last decoded frame on screen during pause.
pub fn normalize_video_frame(
    frame: &ffmpeg::util::frame::Video,
    width: u32,
    height: u32,
) -> Result<ffmpeg::util::frame::Video> {
    let mut scaler = scaling::Context::get(
        frame.format(),
        frame.width(),
        frame.height(),
        ffmpeg::format::Pixel::YUV420P,
        width,
        height,
        scaling::Flags::BILINEAR,
    )
    .map_err(|e| FfmpegError::ScalerCreate(format!("{}", e)))?;

    let mut out = ffmpeg::util::frame::Video::empty();
    scaler
        .run(frame, &mut out)
        .map_err(|e| FfmpegError::ScalerCreate(format!("scale: {}", e)))?;
    Ok(out)
}

fn rgb_to_yuv_frame(rgb: &image::RgbImage, width: u32, height: u32) -> Result<ffmpeg::util::frame::Video> {
    let mut src = ffmpeg::util::frame::Video::new(ffmpeg::format::Pixel::RGB24, width, height);
    let stride = src.stride(0);
    let row_bytes = width as usize * 3;
    {
        let data = src.data_mut(0);
        let raw = rgb.as_raw();
        for y in 0..height as usize {
            data[y * stride..y * stride + row_bytes]
                .copy_from_slice(&raw[y * row_bytes..(y + 1) * row_bytes]);
        }
    }

    let mut scaler = scaling::Context::get(
        ffmpeg::format::Pixel::RGB24,
        width,
        height,
        ffmpeg::format::Pixel::YUV420P,
        width,
        height,
        scaling::Flags::LANCZOS,
    )
    .map_err(|e| FfmpegError::ScalerCreate(format!("{}", e)))?;

    let mut out = ffmpeg::util::frame::Video::empty();
    scaler
        .run(&src, &mut out)
        .map_err(|e| FfmpegError::ScalerCreate(format!("rgb->yuv: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_image(dir: &tempfile::TempDir, name: &str, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([200, 40, 40]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_silence_frame_shape() {
        crate::ffmpeg::init().unwrap();
        let frame = silence_frame();
        assert_eq!(frame.samples(), AUDIO_FRAME_SIZE);
        assert_eq!(frame.rate(), AUDIO_RATE);
        for ch in 0..2 {
            let values = fifo::channel_samples(&frame, ch, AUDIO_FRAME_SIZE).unwrap();
            assert!(values.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_image_is_resized_and_converted() {
        crate::ffmpeg::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "placeholder.png", 64, 48);

        let frame = video_frame_from_image(&path, 320, 240).unwrap();
        assert_eq!(frame.width(), 320);
        assert_eq!(frame.height(), 240);
        assert_eq!(frame.format(), ffmpeg::format::Pixel::YUV420P);
    }

    #[test]
    fn test_missing_image_is_fatal() {
        let err = video_frame_from_image(Path::new("/nonexistent.jpg"), 320, 240);
        assert!(matches!(err, Err(BroadcastError::PlaceholderMissing(_))));
    }

    #[test]
    fn test_normalize_video_frame_changes_geometry() {
        crate::ffmpeg::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "frame.png", 100, 80);
        let frame = video_frame_from_image(&path, 100, 80).unwrap();

        let normalized = normalize_video_frame(&frame, 320, 240).unwrap();
        assert_eq!(normalized.width(), 320);
        assert_eq!(normalized.height(), 240);
        assert_eq!(normalized.format(), ffmpeg::format::Pixel::YUV420P);
    }

    #[test]
    fn test_cache_hands_out_clones() {
        crate::ffmpeg::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "placeholder.png", 32, 32);
        let cache = PlaceholderCache::load(&path, 320, 240).unwrap();

        let a = cache.silence();
        let b = cache.silence();
        assert_eq!(a.samples(), b.samples());
        assert_eq!(cache.still().width(), 320);
    }
}
