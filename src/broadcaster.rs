//! Broadcaster runner
//!
//! Owns one broadcast session: opens the FLV output at the RTMP(S) URL,
//! builds the encoder context and the placeholder cache, and drives the
//! produce → encode → pace loop on the calling thread until the producer
//! returns or the shutdown latch trips. The output container is closed
//! exactly once, on every exit path.

use crate::config::BroadcastConfig;
use crate::encode::{EncoderContext, MediaSink};
use crate::error::Result;
use crate::placeholder::PlaceholderCache;
use crate::playlist::Player;
use crate::producer::{Frame, FrameProducer, FrameSource};
use crate::shutdown::ShutdownLatch;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Skip sleeps shorter than this; the scheduler cannot honor them anyway.
const MIN_PACE_DELAY: f64 = 0.001;

/// Never sleep longer than this in one step, so shutdown stays responsive
/// and a long encode blip cannot stall the stream.
const MAX_PACE_DELAY: f64 = 0.050;

/// Wall-clock pacer: keeps the encoder 0–50 ms ahead of real time.
pub struct Pacer {
    start: Instant,
    shutdown: ShutdownLatch,
}

impl Pacer {
    pub fn new(shutdown: ShutdownLatch) -> Self {
        Self {
            start: Instant::now(),
            shutdown,
        }
    }

    /// Sleep off the lead the encoder has over wall time, on a cancellable
    /// wait against the shutdown latch.
    pub fn pace(&self, stream_duration_secs: f64) {
        let elapsed = self.start.elapsed().as_secs_f64();
        if let Some(delay) = pace_delay(stream_duration_secs, elapsed) {
            self.shutdown.wait_timeout(Duration::from_secs_f64(delay));
        }
    }
}

/// How long to sleep after a frame, if at all.
fn pace_delay(stream_secs: f64, elapsed_secs: f64) -> Option<f64> {
    let delay = stream_secs - elapsed_secs;
    if delay > MIN_PACE_DELAY {
        Some(delay.min(MAX_PACE_DELAY))
    } else {
        None
    }
}

pub struct Broadcaster {
    config: BroadcastConfig,
    player: Arc<Player>,
    shutdown: ShutdownLatch,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig, player: Arc<Player>, shutdown: ShutdownLatch) -> Self {
        Self {
            config,
            player,
            shutdown,
        }
    }

    /// Run the broadcast session to completion. Blocks the calling thread.
    pub fn run(&self) -> Result<()> {
        let url = self.config.rtmp_url();
        tracing::info!(
            endpoint = %self.config.stream.base_link,
            width = self.config.video.width,
            height = self.config.video.height,
            "starting broadcast"
        );

        let cache = PlaceholderCache::load(
            &self.config.assets.placeholder_image,
            self.config.video.width,
            self.config.video.height,
        )?;
        let mut context = EncoderContext::open(&url, &self.config.video)?;
        let mut producer = FrameProducer::new(
            self.player.clone(),
            self.shutdown.clone(),
            cache,
            self.config.video.width,
            self.config.video.height,
        );
        let pacer = Pacer::new(self.shutdown.clone());

        let result = match self.stream_loop(&mut context, &mut producer, &pacer) {
            Ok(()) => Ok(()),
            Err(e) if self.shutdown.is_running() => {
                tracing::error!(error = %e, "broadcast terminated");
                Err(e)
            }
            Err(e) => {
                // the latch is already set; failures here are expected
                tracing::debug!(error = %e, "ignoring error during shutdown");
                Ok(())
            }
        };
        self.shutdown.trip();

        if let Err(e) = context.close() {
            // the endpoint is usually gone by now; nothing actionable
            tracing::debug!(error = %e, "error while closing output");
        }
        tracing::info!("broadcast stopped");
        result
    }

    /// Trip the shutdown latch. Idempotent.
    pub fn stop(&self) {
        if self.shutdown.is_running() {
            tracing::info!("stopping broadcaster");
            self.shutdown.trip();
        } else {
            tracing::debug!("broadcaster already stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    fn stream_loop(
        &self,
        context: &mut EncoderContext,
        producer: &mut FrameProducer,
        pacer: &Pacer,
    ) -> Result<()> {
        while self.shutdown.is_running() {
            let Some(produced) = producer.next_frame(context)? else {
                break;
            };
            let apply_filters = produced.source == FrameSource::Decoded;
            match produced.frame {
                Frame::Audio(frame) => context.encode_audio(Some(frame), apply_filters)?,
                Frame::Video(frame) => context.encode_video(Some(frame), apply_filters)?,
            }
            pacer.pace(context.duration_secs());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;
    use crate::playlist::{CursorMode, VisualMode};
    use ffmpeg_next as ffmpeg;

    #[test]
    fn test_pace_delay_skips_sub_millisecond() {
        assert_eq!(pace_delay(10.0, 10.0), None);
        assert_eq!(pace_delay(10.0, 10.5), None);
        assert_eq!(pace_delay(10.0005, 10.0), None);
    }

    #[test]
    fn test_pace_delay_caps_at_fifty_millis() {
        assert_eq!(pace_delay(20.0, 10.0), Some(MAX_PACE_DELAY));
    }

    #[test]
    fn test_pace_delay_passes_small_leads_through() {
        let delay = pace_delay(10.030, 10.0).unwrap();
        assert!((delay - 0.030).abs() < 1e-9);
    }

    #[test]
    fn test_pacer_wakes_on_shutdown() {
        let shutdown = ShutdownLatch::new();
        let pacer = Pacer::new(shutdown.clone());
        shutdown.trip();
        let start = Instant::now();
        pacer.pace(1000.0);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    fn codecs_available() -> bool {
        ffmpeg::codec::encoder::find(ffmpeg::codec::Id::H264).is_some()
            && ffmpeg::codec::encoder::find(ffmpeg::codec::Id::AAC).is_some()
    }

    /// Idle session against a file-backed FLV container: the keep-alive path
    /// alone keeps both lanes advancing, in sync and strictly timestamped.
    #[test]
    fn test_idle_session_keeps_lanes_synced() {
        if !codecs_available() {
            return;
        }
        crate::ffmpeg::init().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("standby.png");
        image::RgbImage::from_pixel(64, 64, image::Rgb([10, 20, 30]))
            .save(&image)
            .unwrap();

        let video = VideoConfig {
            width: 320,
            height: 240,
            low_latency: true,
        };
        let cache = PlaceholderCache::load(&image, video.width, video.height).unwrap();
        let out = dir.path().join("idle.flv");
        let mut context = EncoderContext::open(out.to_str().unwrap(), &video).unwrap();

        let player = Arc::new(Player::new(VisualMode::Content, CursorMode::PlayAndStop));
        let shutdown = ShutdownLatch::new();
        let mut producer = FrameProducer::new(
            player,
            shutdown.clone(),
            cache,
            video.width,
            video.height,
        );

        for _ in 0..120 {
            let produced = producer.next_frame(&mut context).unwrap().unwrap();
            let apply_filters = produced.source == FrameSource::Decoded;
            match produced.frame {
                Frame::Audio(frame) => context.encode_audio(Some(frame), apply_filters).unwrap(),
                Frame::Video(frame) => context.encode_video(Some(frame), apply_filters).unwrap(),
            }
            assert!(
                (context.audio_duration_secs() - context.video_duration_secs()).abs() < 0.1
            );
        }

        assert!(context.video_pts() > 0);
        assert!(context.audio_pts() > 0);
        assert!(context.duration_secs() > 1.0);
        assert!(context.is_av_synced());

        shutdown.trip();
        assert!(producer.next_frame(&mut context).unwrap().is_none());
        context.close().unwrap();
        assert!(std::fs::metadata(&out).unwrap().len() > 0);
    }
}
