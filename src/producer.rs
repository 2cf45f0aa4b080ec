//! Frame producer
//!
//! A pull-driven sequence of frames that, consumed in order by the encoder
//! context, yields a gapless, continuously A/V-advancing stream:
//!
//! - with no current track, cached placeholder frames keep both lanes moving
//!   (whichever lane lags is fed next, ties go to video);
//! - while paused, the last decoded video frame is held on screen against
//!   silent audio;
//! - with a current track, demuxed frames are decoded and emitted, the video
//!   lane substituted per the live visual mode.
//!
//! Cursor and mode changes take effect at the next frame boundary: the
//! producer re-reads the playlist per tick and compares the current asset by
//! identity with the one it opened.

use crate::encode::{MediaSink, SYNC_TOLERANCE_SECS};
use crate::error::Result;
use crate::placeholder::{self, PlaceholderCache};
use crate::playlist::{MediaAsset, Player, VisualMode};
use crate::shutdown::ShutdownLatch;
use ffmpeg_next as ffmpeg;
use std::collections::VecDeque;
use std::sync::Arc;

/// Where a produced frame came from. Cached frames already match the output
/// format and bypass the normalization graphs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSource {
    Decoded,
    Cached,
}

/// One decoded or cached frame, tagged with its lane.
pub enum Frame {
    Audio(ffmpeg::util::frame::Audio),
    Video(ffmpeg::util::frame::Video),
}

/// What the producer hands to the broadcast loop each tick.
pub struct Produced {
    pub frame: Frame,
    pub source: FrameSource,
}

enum TickResult {
    Emit(Produced),
    Finished,
}

enum DecodedFrame {
    Audio(ffmpeg::util::frame::Audio),
    Video(ffmpeg::util::frame::Video),
}

struct TrackState {
    asset: Arc<MediaAsset>,
    input: ffmpeg::format::context::Input,
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
    video_decoder: Option<ffmpeg::decoder::Video>,
    audio_decoder: Option<ffmpeg::decoder::Audio>,
    thumbnail: Option<ffmpeg::util::frame::Video>,
    pending: VecDeque<DecodedFrame>,
    demux_done: bool,
}

pub struct FrameProducer {
    player: Arc<Player>,
    shutdown: ShutdownLatch,
    cache: PlaceholderCache,
    width: u32,
    height: u32,
    track: Option<TrackState>,
    pause_hold: Option<ffmpeg::util::frame::Video>,
}

impl FrameProducer {
    pub fn new(
        player: Arc<Player>,
        shutdown: ShutdownLatch,
        cache: PlaceholderCache,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            player,
            shutdown,
            cache,
            width,
            height,
            track: None,
            pause_hold: None,
        }
    }

    /// Produce the next frame, or `None` once the shutdown latch is tripped.
    pub fn next_frame(&mut self, sink: &mut dyn MediaSink) -> Result<Option<Produced>> {
        loop {
            if self.shutdown.is_tripped() {
                if let Some(track) = self.track.take() {
                    self.close_track(track, sink)?;
                }
                return Ok(None);
            }

            if let Some(mut track) = self.track.take() {
                match self.track_tick(&mut track, sink)? {
                    TickResult::Emit(produced) => {
                        self.track = Some(track);
                        return Ok(Some(produced));
                    }
                    TickResult::Finished => {
                        self.close_track(track, sink)?;
                        continue;
                    }
                }
            }

            // between tracks: close any residual A/V gap before moving on
            if !sink.is_av_synced() {
                return Ok(Some(self.keepalive(&*sink, None)));
            }
            match self.player.get_current() {
                Some(asset) => {
                    if !self.open_track(asset, sink)? {
                        // skipped a bad track; one filler frame paces retries
                        return Ok(Some(self.keepalive(&*sink, None)));
                    }
                }
                None => return Ok(Some(self.keepalive(&*sink, None))),
            }
        }
    }

    /// Emit whichever cached lane lags, ties going to video.
    /// `video_override` substitutes the held pause frame for the still image.
    fn keepalive(
        &self,
        sink: &dyn MediaSink,
        video_override: Option<&ffmpeg::util::frame::Video>,
    ) -> Produced {
        if sink.video_duration_secs() <= sink.audio_duration_secs() {
            let frame = match video_override {
                Some(frame) => frame.clone(),
                None => self.cache.still(),
            };
            Produced {
                frame: Frame::Video(frame),
                source: FrameSource::Cached,
            }
        } else {
            Produced {
                frame: Frame::Audio(self.cache.silence()),
                source: FrameSource::Cached,
            }
        }
    }

    /// Open the current track and build its graphs. Returns `false` when the
    /// track is unusable; the cursor has then already advanced per policy.
    fn open_track(&mut self, asset: Arc<MediaAsset>, sink: &mut dyn MediaSink) -> Result<bool> {
        let input = match ffmpeg::format::input(&asset.mediafile) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(
                    media = %asset.mediafile.display(),
                    error = %e,
                    "cannot open track, treating as empty"
                );
                self.player.next();
                return Ok(false);
            }
        };

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .map(|s| (s.index(), s.time_base()));
        let audio_stream = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .map(|s| (s.index(), s.time_base()));

        let video_decoder = video_stream.and_then(|(index, _)| open_video_decoder(&input, index));
        let audio_decoder = audio_stream.and_then(|(index, _)| open_audio_decoder(&input, index));

        if video_decoder.is_none() && audio_decoder.is_none() {
            tracing::warn!(
                media = %asset.mediafile.display(),
                "track has no decodable stream, skipping"
            );
            self.player.next();
            return Ok(false);
        }

        let graphs = (|| -> Result<()> {
            if let (Some(decoder), Some((_, tb))) = (&video_decoder, video_stream) {
                sink.create_video_graph(decoder, tb)?;
            }
            if let (Some(decoder), Some((_, tb))) = (&audio_decoder, audio_stream) {
                sink.create_audio_graph(decoder, tb)?;
            }
            Ok(())
        })();
        if let Err(e) = graphs {
            tracing::warn!(
                media = %asset.mediafile.display(),
                error = %e,
                "cannot build filter graphs for track, skipping"
            );
            sink.flush()?;
            self.player.next();
            return Ok(false);
        }

        tracing::info!(
            media = %asset.mediafile.display(),
            has_video = video_decoder.is_some(),
            has_audio = audio_decoder.is_some(),
            "track opened"
        );

        let thumbnail = self.load_thumbnail(&asset);
        self.track = Some(TrackState {
            asset,
            input,
            video_stream: video_stream.map(|(index, _)| index),
            audio_stream: audio_stream.map(|(index, _)| index),
            video_decoder,
            audio_decoder,
            thumbnail,
            pending: VecDeque::new(),
            demux_done: false,
        });
        Ok(true)
    }

    fn load_thumbnail(&self, asset: &MediaAsset) -> Option<ffmpeg::util::frame::Video> {
        if !asset.thumbnail.exists() {
            return None;
        }
        match placeholder::video_frame_from_image(&asset.thumbnail, self.width, self.height) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(
                    thumbnail = %asset.thumbnail.display(),
                    error = %e,
                    "thumbnail unusable, substituting placeholder"
                );
                None
            }
        }
    }

    fn track_tick(
        &mut self,
        track: &mut TrackState,
        sink: &mut dyn MediaSink,
    ) -> Result<TickResult> {
        loop {
            if self.shutdown.is_tripped() {
                return Ok(TickResult::Finished);
            }
            // the cursor moved under us at a frame boundary
            match self.player.get_current() {
                Some(current) if Arc::ptr_eq(&current, &track.asset) => {}
                _ => return Ok(TickResult::Finished),
            }

            // a lane with no stream in this track is kept alive with fillers
            if track.audio_decoder.is_none()
                && sink.audio_duration_secs() + SYNC_TOLERANCE_SECS < sink.video_duration_secs()
            {
                return Ok(TickResult::Emit(Produced {
                    frame: Frame::Audio(self.cache.silence()),
                    source: FrameSource::Cached,
                }));
            }
            if track.video_decoder.is_none()
                && sink.video_duration_secs() + SYNC_TOLERANCE_SECS < sink.audio_duration_secs()
            {
                let frame = track
                    .thumbnail
                    .clone()
                    .unwrap_or_else(|| self.cache.still());
                return Ok(TickResult::Emit(Produced {
                    frame: Frame::Video(frame),
                    source: FrameSource::Cached,
                }));
            }

            if let Some(front) = track.pending.pop_front() {
                match front {
                    DecodedFrame::Audio(frame) => {
                        return Ok(TickResult::Emit(Produced {
                            frame: Frame::Audio(frame),
                            source: FrameSource::Decoded,
                        }));
                    }
                    DecodedFrame::Video(frame) => {
                        if !self.player.is_playing() {
                            if self.pause_hold.is_none() {
                                self.pause_hold = Some(self.hold_frame(&frame));
                            }
                            track.pending.push_front(DecodedFrame::Video(frame));
                            let produced = self.keepalive(&*sink, self.pause_hold.as_ref());
                            return Ok(TickResult::Emit(produced));
                        }
                        self.pause_hold = None;
                        return Ok(TickResult::Emit(self.visual_frame(frame, track)));
                    }
                }
            }

            if !pump(track)? {
                return Ok(TickResult::Finished);
            }
        }
    }

    /// Normalize the frame the viewer keeps seeing while paused; fall back to
    /// the placeholder image if the scaler rejects it.
    fn hold_frame(&self, frame: &ffmpeg::util::frame::Video) -> ffmpeg::util::frame::Video {
        match placeholder::normalize_video_frame(frame, self.width, self.height) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!(error = %e, "cannot hold paused frame, using placeholder");
                self.cache.still()
            }
        }
    }

    /// Map a decoded video frame through the live visual mode.
    fn visual_frame(&self, decoded: ffmpeg::util::frame::Video, track: &TrackState) -> Produced {
        match self.player.visual_mode() {
            VisualMode::Placeholder => Produced {
                frame: Frame::Video(self.cache.still()),
                source: FrameSource::Cached,
            },
            VisualMode::Thumbnail => Produced {
                frame: Frame::Video(
                    track
                        .thumbnail
                        .clone()
                        .unwrap_or_else(|| self.cache.still()),
                ),
                source: FrameSource::Cached,
            },
            VisualMode::Content => Produced {
                frame: Frame::Video(decoded),
                source: FrameSource::Decoded,
            },
        }
    }

    /// Release the track: drain the graphs and apply the cursor policy, but
    /// only when the asset we played is still current — if the cursor moved
    /// mid-track, the mover already repositioned it.
    fn close_track(&mut self, track: TrackState, sink: &mut dyn MediaSink) -> Result<()> {
        self.pause_hold = None;
        sink.flush()?;
        let still_current = self
            .player
            .get_current()
            .map_or(false, |current| Arc::ptr_eq(&current, &track.asset));
        if still_current {
            self.player.next();
        }
        tracing::info!(media = %track.asset.mediafile.display(), "track closed");
        Ok(())
    }
}

fn open_video_decoder(
    input: &ffmpeg::format::context::Input,
    index: usize,
) -> Option<ffmpeg::decoder::Video> {
    let stream = input.stream(index)?;
    let context = match ffmpeg::codec::Context::from_parameters(stream.parameters()) {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!(stream = index, error = %e, "video codec context failed");
            return None;
        }
    };
    match context.decoder().video() {
        Ok(decoder) => Some(decoder),
        Err(e) => {
            tracing::warn!(stream = index, error = %e, "video decoder failed to open");
            None
        }
    }
}

fn open_audio_decoder(
    input: &ffmpeg::format::context::Input,
    index: usize,
) -> Option<ffmpeg::decoder::Audio> {
    let stream = input.stream(index)?;
    let context = match ffmpeg::codec::Context::from_parameters(stream.parameters()) {
        Ok(context) => context,
        Err(e) => {
            tracing::warn!(stream = index, error = %e, "audio codec context failed");
            return None;
        }
    };
    match context.decoder().audio() {
        Ok(decoder) => Some(decoder),
        Err(e) => {
            tracing::warn!(stream = index, error = %e, "audio decoder failed to open");
            None
        }
    }
}

/// Demux and decode until at least one frame is pending. Returns `false`
/// once the input and both decoders are fully drained.
fn pump(track: &mut TrackState) -> Result<bool> {
    while track.pending.is_empty() {
        if track.demux_done {
            return Ok(false);
        }

        let next = track.input.packets().next().map(|(s, p)| (s.index(), p));
        match next {
            Some((index, packet)) => {
                if Some(index) == track.video_stream {
                    if let Some(decoder) = &mut track.video_decoder {
                        send_packet(decoder, &packet, &mut track.demux_done);
                        receive_video(decoder, &mut track.pending);
                    }
                } else if Some(index) == track.audio_stream {
                    if let Some(decoder) = &mut track.audio_decoder {
                        send_packet(decoder, &packet, &mut track.demux_done);
                        receive_audio(decoder, &mut track.pending);
                    }
                }
            }
            None => {
                // end of input: flush both decoders
                if let Some(decoder) = &mut track.video_decoder {
                    let _ = decoder.send_eof();
                    receive_video(decoder, &mut track.pending);
                }
                if let Some(decoder) = &mut track.audio_decoder {
                    let _ = decoder.send_eof();
                    receive_audio(decoder, &mut track.pending);
                }
                track.demux_done = true;
            }
        }
    }
    Ok(true)
}

fn send_packet<D>(decoder: &mut D, packet: &ffmpeg::Packet, abort: &mut bool)
where
    D: std::ops::DerefMut<Target = ffmpeg::decoder::Opened>,
{
    match decoder.send_packet(packet) {
        Ok(()) => {}
        // corrupt or pre-roll data: skip the packet and keep going
        Err(ffmpeg::Error::InvalidData) => {
            tracing::debug!("skipping invalid packet");
        }
        Err(e) => {
            tracing::warn!(error = %e, "decoder rejected packet, ending track");
            *abort = true;
        }
    }
}

fn receive_video(
    decoder: &mut ffmpeg::decoder::Video,
    pending: &mut VecDeque<DecodedFrame>,
) {
    loop {
        let mut frame = ffmpeg::util::frame::Video::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => pending.push_back(DecodedFrame::Video(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "video decode error");
                break;
            }
        }
    }
}

fn receive_audio(
    decoder: &mut ffmpeg::decoder::Audio,
    pending: &mut VecDeque<DecodedFrame>,
) {
    loop {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => pending.push_back(DecodedFrame::Audio(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "audio decode error");
                break;
            }
        }
    }
}
