//! Encoding pipeline
//!
//! This module owns the output side of the broadcast:
//! - the encoder context (FLV muxer, H.264 + AAC encoders, PTS offsets)
//! - the per-track normalization filter graphs
//! - the planar sample FIFO feeding the AAC encoder

pub mod context;
pub mod fifo;
pub mod graph;

pub use context::EncoderContext;

use crate::error::Result;
use ffmpeg_next as ffmpeg;
use ffmpeg::Rational;

/// Output audio: AAC-LC, 48 kHz, stereo, planar float, 128 kbps.
pub const AUDIO_RATE: u32 = 48000;
pub const AUDIO_FRAME_SIZE: usize = 1024;
pub const AUDIO_BITRATE: usize = 128_000;
pub const AUDIO_TIME_BASE: Rational = Rational(1, 48000);

/// Output video: H.264, 30000/1001 fps, yuv420p, 2 Mbps.
pub const VIDEO_RATE: Rational = Rational(30000, 1001);
pub const VIDEO_TIME_BASE: Rational = Rational(1001, 30000);
pub const VIDEO_BITRATE: usize = 2_000_000;

/// Audio and video lanes count as in sync while their accumulated durations
/// differ by no more than this.
pub const SYNC_TOLERANCE_SECS: f64 = 0.050;

/// Seconds per tick of a time base.
pub(crate) fn timebase_secs(tb: Rational) -> f64 {
    tb.numerator() as f64 / tb.denominator() as f64
}

/// Keyframe interval: two seconds of output frames.
pub(crate) fn gop_size() -> u32 {
    (VIDEO_RATE.numerator() as i64 * 2 / VIDEO_RATE.denominator() as i64) as u32
}

/// Capability surface the frame producer and the broadcast loop need from
/// the output side. `EncoderContext` is the one production implementation;
/// tests drive the producer against a stub.
pub trait MediaSink {
    /// Build a video normalization graph templated on an input stream.
    fn create_video_graph(
        &mut self,
        decoder: &ffmpeg::decoder::Video,
        time_base: Rational,
    ) -> Result<()>;

    /// Build an audio normalization graph templated on an input stream.
    fn create_audio_graph(
        &mut self,
        decoder: &ffmpeg::decoder::Audio,
        time_base: Rational,
    ) -> Result<()>;

    /// Encode one video frame. `None` drains the graph end-of-stream without
    /// flushing the encoder. `apply_filters=false` bypasses the graph and
    /// re-stamps the frame directly (the cached-frame path).
    fn encode_video(
        &mut self,
        frame: Option<ffmpeg::util::frame::Video>,
        apply_filters: bool,
    ) -> Result<()>;

    /// Audio counterpart of [`MediaSink::encode_video`].
    fn encode_audio(
        &mut self,
        frame: Option<ffmpeg::util::frame::Audio>,
        apply_filters: bool,
    ) -> Result<()>;

    /// Accumulated video duration in seconds.
    fn video_duration_secs(&self) -> f64;

    /// Accumulated audio duration in seconds.
    fn audio_duration_secs(&self) -> f64;

    /// Stream duration: the further of the two lanes.
    fn duration_secs(&self) -> f64 {
        self.video_duration_secs().max(self.audio_duration_secs())
    }

    fn is_av_synced(&self) -> bool {
        (self.audio_duration_secs() - self.video_duration_secs()).abs() <= SYNC_TOLERANCE_SECS
    }

    /// Drain and release both graphs. The encoders keep their internal state
    /// so the PTS offsets stay valid for the next track.
    fn flush(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timebase_secs() {
        assert_eq!(timebase_secs(AUDIO_TIME_BASE), 1.0 / 48000.0);
        let video_tick = timebase_secs(VIDEO_TIME_BASE);
        assert!((video_tick - 1001.0 / 30000.0).abs() < 1e-12);
    }

    #[test]
    fn test_gop_size_is_two_seconds_of_frames() {
        assert_eq!(gop_size(), 59);
    }
}
