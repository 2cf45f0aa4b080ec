//! Output encoder context
//!
//! Owns the FLV muxer, the H.264 and AAC encoders, the per-stream PTS
//! offsets and the per-track normalization graphs. Outgoing timestamps are
//! derived from the offset counters alone; input timestamps never cross the
//! encoder boundary, so output PTS stay strictly increasing across every
//! track boundary of the session.
//!
//! `flush()` drains and drops the graphs but leaves the encoders alone: an
//! encoder flush would emit a terminal packet and invalidate reference
//! frames mid-stream. The encoders are only flushed once, in `close()`.

use crate::config::VideoConfig;
use crate::error::{FfmpegError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::{codec, Rational};

use super::fifo::{SampleFifo, SAMPLE_FORMAT};
use super::graph::FilterGraph;
use super::{
    gop_size, timebase_secs, MediaSink, AUDIO_BITRATE, AUDIO_FRAME_SIZE, AUDIO_RATE,
    AUDIO_TIME_BASE, VIDEO_BITRATE, VIDEO_RATE, VIDEO_TIME_BASE,
};

pub struct EncoderContext {
    octx: ffmpeg::format::context::Output,

    video_encoder: ffmpeg::encoder::Video,
    audio_encoder: ffmpeg::encoder::Audio,
    video_stream_index: usize,
    audio_stream_index: usize,
    video_stream_tb: Rational,
    audio_stream_tb: Rational,

    video_graph: Option<FilterGraph>,
    audio_graph: Option<FilterGraph>,
    audio_fifo: SampleFifo,
    audio_frame_size: usize,

    offset_video_pts: i64,
    offset_audio_pts: i64,

    width: u32,
    height: u32,
}

impl EncoderContext {
    /// Open the output container at `url` in FLV mode and set up both
    /// encoders. The container header is written before this returns.
    pub fn open(url: &str, video: &VideoConfig) -> Result<Self> {
        let mut octx = ffmpeg::format::output_as(&url, "flv")
            .map_err(|e| FfmpegError::OpenOutput(format!("{}", e)))?;

        let (video_encoder, video_stream_index) = setup_video_stream(&mut octx, video)?;
        let (audio_encoder, audio_frame_size, audio_stream_index) =
            setup_audio_stream(&mut octx)?;

        octx.write_header()
            .map_err(|e| FfmpegError::WriteHeader(format!("{}", e)))?;

        // the muxer is free to rewrite stream time bases in write_header
        let video_stream_tb = stream_time_base(&octx, video_stream_index, VIDEO_TIME_BASE);
        let audio_stream_tb = stream_time_base(&octx, audio_stream_index, AUDIO_TIME_BASE);

        tracing::info!(
            width = video.width,
            height = video.height,
            fps = %format!("{}/{}", VIDEO_RATE.numerator(), VIDEO_RATE.denominator()),
            "output container opened"
        );

        Ok(Self {
            octx,
            video_encoder,
            audio_encoder,
            video_stream_index,
            audio_stream_index,
            video_stream_tb,
            audio_stream_tb,
            video_graph: None,
            audio_graph: None,
            audio_fifo: SampleFifo::new(),
            audio_frame_size,
            offset_video_pts: 0,
            offset_audio_pts: 0,
            width: video.width,
            height: video.height,
        })
    }

    /// Video PTS ticks muxed so far.
    pub fn video_pts(&self) -> i64 {
        self.offset_video_pts
    }

    /// Audio PTS ticks (samples) muxed so far.
    pub fn audio_pts(&self) -> i64 {
        self.offset_audio_pts
    }

    /// Flush both graphs, the audio FIFO tail and both encoders, then write
    /// the container trailer.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;

        if let Some(mut tail) = self.audio_fifo.drain_padded(self.audio_frame_size) {
            self.push_audio(&mut tail)?;
        }
        match self.audio_encoder.send_eof() {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
            Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(FfmpegError::EncodeFrame(format!("AAC send_eof: {}", e)).into()),
        }
        self.drain_audio_packets()?;

        match self.video_encoder.send_eof() {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
            Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(FfmpegError::EncodeFrame(format!("H264 send_eof: {}", e)).into()),
        }
        self.drain_video_packets()?;

        self.octx
            .write_trailer()
            .map_err(|e| FfmpegError::WriteTrailer(format!("{}", e)))?;
        tracing::info!(
            video_pts = self.offset_video_pts,
            audio_pts = self.offset_audio_pts,
            "output container closed"
        );
        Ok(())
    }

    /// Stamp the frame with the next video PTS and run it through the
    /// encoder, muxing every emitted packet.
    fn push_video(&mut self, frame: &mut ffmpeg::util::frame::Video) -> Result<()> {
        self.offset_video_pts += 1;
        frame.set_pts(Some(self.offset_video_pts));
        frame.set_kind(ffmpeg::picture::Type::None);
        self.video_encoder
            .send_frame(frame)
            .map_err(|e| FfmpegError::EncodeFrame(format!("H264 send_frame: {}", e)))?;
        self.drain_video_packets()
    }

    fn push_audio(&mut self, frame: &mut ffmpeg::util::frame::Audio) -> Result<()> {
        self.offset_audio_pts += frame.samples() as i64;
        frame.set_pts(Some(self.offset_audio_pts));
        self.audio_encoder
            .send_frame(frame)
            .map_err(|e| FfmpegError::EncodeFrame(format!("AAC send_frame: {}", e)))?;
        self.drain_audio_packets()
    }

    fn drain_video_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.video_encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.video_stream_index);
                    packet.rescale_ts(VIDEO_TIME_BASE, self.video_stream_tb);
                    packet
                        .write_interleaved(&mut self.octx)
                        .map_err(|e| FfmpegError::WritePacket(format!("video: {}", e)))?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(
                        FfmpegError::EncodeFrame(format!("H264 receive_packet: {}", e)).into()
                    )
                }
            }
        }
        Ok(())
    }

    fn drain_audio_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.audio_encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.audio_stream_index);
                    packet.rescale_ts(AUDIO_TIME_BASE, self.audio_stream_tb);
                    packet
                        .write_interleaved(&mut self.octx)
                        .map_err(|e| FfmpegError::WritePacket(format!("audio: {}", e)))?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(
                        FfmpegError::EncodeFrame(format!("AAC receive_packet: {}", e)).into()
                    )
                }
            }
        }
        Ok(())
    }

    /// Encode every full FIFO frame currently buffered.
    fn drain_audio_fifo(&mut self) -> Result<()> {
        while let Some(mut frame) = self.audio_fifo.pop_frame(self.audio_frame_size) {
            self.push_audio(&mut frame)?;
        }
        Ok(())
    }
}

impl MediaSink for EncoderContext {
    fn create_video_graph(
        &mut self,
        decoder: &ffmpeg::decoder::Video,
        time_base: Rational,
    ) -> Result<()> {
        self.video_graph = Some(FilterGraph::video(
            decoder,
            time_base,
            self.width,
            self.height,
        )?);
        Ok(())
    }

    fn create_audio_graph(
        &mut self,
        decoder: &ffmpeg::decoder::Audio,
        time_base: Rational,
    ) -> Result<()> {
        self.audio_graph = Some(FilterGraph::audio(decoder, time_base)?);
        Ok(())
    }

    fn encode_video(
        &mut self,
        frame: Option<ffmpeg::util::frame::Video>,
        apply_filters: bool,
    ) -> Result<()> {
        if apply_filters {
            if let Some(mut graph) = self.video_graph.take() {
                let result = (|| {
                    graph.push(frame.as_deref())?;
                    loop {
                        let mut filtered = ffmpeg::util::frame::Video::empty();
                        if !graph.pull(&mut filtered)? {
                            break;
                        }
                        if filtered.pts().is_none() {
                            continue;
                        }
                        self.push_video(&mut filtered)?;
                    }
                    Ok(())
                })();
                self.video_graph = Some(graph);
                return result;
            }
        }
        if let Some(mut frame) = frame {
            self.push_video(&mut frame)?;
        }
        Ok(())
    }

    fn encode_audio(
        &mut self,
        frame: Option<ffmpeg::util::frame::Audio>,
        apply_filters: bool,
    ) -> Result<()> {
        if apply_filters {
            if let Some(mut graph) = self.audio_graph.take() {
                let result = (|| {
                    graph.push(frame.as_deref())?;
                    loop {
                        let mut filtered = ffmpeg::util::frame::Audio::empty();
                        if !graph.pull(&mut filtered)? {
                            break;
                        }
                        if filtered.pts().is_none() {
                            continue;
                        }
                        self.audio_fifo.push(&filtered);
                    }
                    Ok(())
                })();
                self.audio_graph = Some(graph);
                result?;
                return self.drain_audio_fifo();
            }
        }
        if let Some(frame) = frame {
            self.audio_fifo.push(&frame);
            self.drain_audio_fifo()?;
        }
        Ok(())
    }

    fn video_duration_secs(&self) -> f64 {
        self.offset_video_pts as f64 * timebase_secs(VIDEO_TIME_BASE)
    }

    fn audio_duration_secs(&self) -> f64 {
        self.offset_audio_pts as f64 * timebase_secs(AUDIO_TIME_BASE)
    }

    fn flush(&mut self) -> Result<()> {
        if self.audio_graph.is_some() {
            self.encode_audio(None, true)?;
            self.audio_graph = None;
        }
        if self.video_graph.is_some() {
            self.encode_video(None, true)?;
            self.video_graph = None;
        }
        Ok(())
    }
}

fn setup_video_stream(
    octx: &mut ffmpeg::format::context::Output,
    cfg: &VideoConfig,
) -> Result<(ffmpeg::encoder::Video, usize)> {
    let codec = codec::encoder::find(codec::Id::H264)
        .ok_or_else(|| FfmpegError::EncoderNotFound("H264".into()))?;

    let mut ost = octx
        .add_stream(codec)
        .map_err(|e| FfmpegError::OpenOutput(format!("add video stream: {}", e)))?;
    let index = ost.index();

    let mut context = codec::Context::new_with_codec(codec);
    context.set_time_base(VIDEO_TIME_BASE);

    let mut video = context.encoder().video().map_err(|e| {
        FfmpegError::EncoderConfigure(format!("cannot get video encoder handle: {}", e))
    })?;
    video.set_width(cfg.width);
    video.set_height(cfg.height);
    video.set_format(ffmpeg::format::Pixel::YUV420P);
    video.set_frame_rate(Some(VIDEO_RATE));
    video.set_bit_rate(VIDEO_BITRATE);
    video.set_gop(gop_size());
    // FLV carries codec config out of band
    video.set_flags(codec::Flags::GLOBAL_HEADER);

    let opened = if cfg.low_latency {
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", "ultrafast");
        opts.set("tune", "zerolatency");
        opts.set("profile", "baseline");
        video.open_with(opts)
    } else {
        video.open()
    }
    .map_err(|e| FfmpegError::EncoderConfigure(format!("failed to open H264 encoder: {}", e)))?;

    attach_encoder_parameters(&mut ost, &opened);

    Ok((opened, index))
}

fn setup_audio_stream(
    octx: &mut ffmpeg::format::context::Output,
) -> Result<(ffmpeg::encoder::Audio, usize, usize)> {
    let codec = codec::encoder::find(codec::Id::AAC)
        .ok_or_else(|| FfmpegError::EncoderNotFound("AAC".into()))?;

    let mut ost = octx
        .add_stream(codec)
        .map_err(|e| FfmpegError::OpenOutput(format!("add audio stream: {}", e)))?;
    let index = ost.index();

    let mut context = codec::Context::new_with_codec(codec);
    context.set_time_base(AUDIO_TIME_BASE);

    let mut audio = context.encoder().audio().map_err(|e| {
        FfmpegError::EncoderConfigure(format!("cannot get audio encoder handle: {}", e))
    })?;
    audio.set_rate(AUDIO_RATE as i32);
    audio.set_format(SAMPLE_FORMAT);
    audio.set_channel_layout(ChannelLayout::STEREO);
    audio.set_bit_rate(AUDIO_BITRATE);
    audio.set_flags(codec::Flags::GLOBAL_HEADER);

    let opened = audio
        .open_as(codec)
        .map_err(|e| FfmpegError::EncoderConfigure(format!("failed to open AAC encoder: {}", e)))?;

    let frame_size = opened.frame_size() as usize;
    let frame_size = if frame_size == 0 {
        AUDIO_FRAME_SIZE
    } else {
        frame_size
    };

    attach_encoder_parameters(&mut ost, &opened);

    Ok((opened, frame_size, index))
}

/// Copy an opened encoder's configuration onto its output stream and clear
/// the inherited codec tag, so `write_header` tags the stream for FLV
/// itself. Neither step has a safe path through `ffmpeg-next`.
fn attach_encoder_parameters(
    ost: &mut ffmpeg::format::stream::StreamMut,
    encoder: &ffmpeg::codec::Context,
) {
    use std::rc::Rc;
    // SAFETY: `avcodec_parameters_alloc` either returns a valid allocation
    // or null under OOM, which is unrecoverable here. `encoder.as_ptr()` is
    // a live, opened codec context, which is exactly what
    // `avcodec_parameters_from_context` expects to read. `wrap` takes
    // ownership of the allocation and frees it with the `Parameters` value.
    let params = unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, encoder.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    };
    ost.set_parameters(params);

    // SAFETY: `codecpar` is non-null once `set_parameters` has run, and
    // `codec_tag` is a plain integer field. A tag copied from the encoder
    // belongs to no container; left in place, the FLV muxer rejects the
    // stream at `write_header`.
    unsafe {
        (*(*ost.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

fn stream_time_base(
    octx: &ffmpeg::format::context::Output,
    index: usize,
    fallback: Rational,
) -> Rational {
    match octx.stream(index) {
        Some(stream) => {
            let tb = stream.time_base();
            if tb.numerator() == 0 {
                fallback
            } else {
                tb
            }
        }
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codecs_available() -> bool {
        codec::encoder::find(codec::Id::H264).is_some()
            && codec::encoder::find(codec::Id::AAC).is_some()
    }

    fn silence() -> ffmpeg::util::frame::Audio {
        crate::placeholder::silence_frame()
    }

    fn black(width: u32, height: u32) -> ffmpeg::util::frame::Video {
        let mut frame =
            ffmpeg::util::frame::Video::new(ffmpeg::format::Pixel::YUV420P, width, height);
        for plane in 0..3 {
            let fill = if plane == 0 { 16 } else { 128 };
            for b in frame.data_mut(plane).iter_mut() {
                *b = fill;
            }
        }
        frame
    }

    fn open_test_context(dir: &tempfile::TempDir) -> EncoderContext {
        crate::ffmpeg::init().unwrap();
        let out = dir.path().join("out.flv");
        let cfg = VideoConfig {
            width: 320,
            height: 240,
            low_latency: true,
        };
        EncoderContext::open(out.to_str().unwrap(), &cfg).unwrap()
    }

    #[test]
    fn test_open_and_close_writes_flv() {
        if !codecs_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = open_test_context(&dir);
        assert_eq!(ctx.video_pts(), 0);
        assert_eq!(ctx.audio_pts(), 0);
        ctx.close().unwrap();
        let metadata = std::fs::metadata(dir.path().join("out.flv")).unwrap();
        assert!(metadata.len() > 0);
    }

    #[test]
    fn test_bypass_path_advances_offsets() {
        if !codecs_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = open_test_context(&dir);

        for _ in 0..10 {
            ctx.encode_video(Some(black(320, 240)), false).unwrap();
            ctx.encode_audio(Some(silence()), false)
                .unwrap();
        }

        assert_eq!(ctx.video_pts(), 10);
        assert_eq!(ctx.audio_pts(), 10 * AUDIO_FRAME_SIZE as i64);
        assert!(ctx.is_av_synced());
        ctx.close().unwrap();
    }

    #[test]
    fn test_durations_follow_offsets() {
        if !codecs_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = open_test_context(&dir);

        for _ in 0..30 {
            ctx.encode_video(Some(black(320, 240)), false).unwrap();
        }
        let expected = 30.0 * 1001.0 / 30000.0;
        assert!((ctx.video_duration_secs() - expected).abs() < 1e-9);
        assert!(!ctx.is_av_synced());

        // close the gap with audio
        while ctx.audio_duration_secs() + 0.05 < ctx.video_duration_secs() {
            ctx.encode_audio(Some(silence()), false)
                .unwrap();
        }
        assert!(ctx.is_av_synced());
        ctx.close().unwrap();
    }

    #[test]
    fn test_flush_without_graphs_is_noop() {
        if !codecs_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = open_test_context(&dir);
        ctx.flush().unwrap();
        ctx.flush().unwrap();
        ctx.close().unwrap();
    }
}
