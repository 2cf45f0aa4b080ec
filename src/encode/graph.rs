//! Normalization filter graphs
//!
//! Each input track gets a fresh pair of graphs that absorb its resolution,
//! frame rate, pixel format, sample rate and channel layout:
//!
//! - video: `buffer → scale → fps → format → setpts=PTS-STARTPTS → buffersink`
//! - audio: `abuffer → aformat → asetpts=PTS-STARTPTS → abuffersink`
//!
//! `setpts`/`asetpts` rebase each track's timestamps to zero; the encoder
//! context's offset counters then provide the global timeline.

use crate::error::{FfmpegError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type};
use ffmpeg::{filter, Rational};

use super::{AUDIO_RATE, VIDEO_RATE};

const SRC: &str = "in";
const SINK: &str = "out";

/// A configured graph with one buffer source and one buffer sink.
pub struct FilterGraph {
    graph: filter::Graph,
}

impl FilterGraph {
    /// Video normalization graph templated on the input stream's decoder and
    /// time base.
    pub fn video(
        decoder: &ffmpeg::decoder::Video,
        time_base: Rational,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let args = video_buffer_args(decoder, time_base);
        let spec = video_filter_spec(width, height);

        let mut graph = filter::Graph::new();
        let buffer = filter::find("buffer")
            .ok_or_else(|| FfmpegError::GraphBuild("buffer filter not available".into()))?;
        let buffersink = filter::find("buffersink")
            .ok_or_else(|| FfmpegError::GraphBuild("buffersink filter not available".into()))?;

        graph
            .add(&buffer, SRC, &args)
            .map_err(|e| FfmpegError::GraphBuild(format!("buffer({}): {}", args, e)))?;
        graph
            .add(&buffersink, SINK, "")
            .map_err(|e| FfmpegError::GraphBuild(format!("buffersink: {}", e)))?;
        if let Some(mut sink) = graph.get(SINK) {
            sink.set_pixel_format(ffmpeg::format::Pixel::YUV420P);
        }

        Self::link(graph, &spec)
    }

    /// Audio normalization graph templated on the input stream's decoder and
    /// time base.
    pub fn audio(decoder: &ffmpeg::decoder::Audio, time_base: Rational) -> Result<Self> {
        let args = audio_buffer_args(decoder, time_base);
        let spec = audio_filter_spec();

        let mut graph = filter::Graph::new();
        let abuffer = filter::find("abuffer")
            .ok_or_else(|| FfmpegError::GraphBuild("abuffer filter not available".into()))?;
        let abuffersink = filter::find("abuffersink")
            .ok_or_else(|| FfmpegError::GraphBuild("abuffersink filter not available".into()))?;

        graph
            .add(&abuffer, SRC, &args)
            .map_err(|e| FfmpegError::GraphBuild(format!("abuffer({}): {}", args, e)))?;
        graph
            .add(&abuffersink, SINK, "")
            .map_err(|e| FfmpegError::GraphBuild(format!("abuffersink: {}", e)))?;
        if let Some(mut sink) = graph.get(SINK) {
            sink.set_sample_format(Sample::F32(Type::Planar));
            sink.set_channel_layout(ChannelLayout::STEREO);
            sink.set_sample_rate(AUDIO_RATE);
        }

        Self::link(graph, &spec)
    }

    fn link(mut graph: filter::Graph, spec: &str) -> Result<Self> {
        graph
            .output(SRC, 0)
            .and_then(|o| o.input(SINK, 0))
            .and_then(|i| i.parse(spec))
            .map_err(|e| FfmpegError::GraphBuild(format!("parse({}): {}", spec, e)))?;
        graph
            .validate()
            .map_err(|e| FfmpegError::GraphBuild(format!("validate: {}", e)))?;
        Ok(Self { graph })
    }

    /// Push one frame into the source, or end-of-stream when `None`.
    pub fn push(&mut self, frame: Option<&ffmpeg::Frame>) -> Result<()> {
        let Some(mut src) = self.graph.get(SRC) else {
            return Err(FfmpegError::GraphProcess("buffer source missing".into()).into());
        };
        let result = match frame {
            Some(frame) => src.source().add(frame),
            None => src.source().flush(),
        };
        result.map_err(|e| FfmpegError::GraphProcess(format!("push: {}", e)).into())
    }

    /// Pull the next filtered frame into `out`. Returns `false` when the
    /// graph needs more input or reached end-of-stream.
    pub fn pull(&mut self, out: &mut ffmpeg::Frame) -> Result<bool> {
        let Some(mut sink) = self.graph.get(SINK) else {
            return Err(FfmpegError::GraphProcess("buffer sink missing".into()).into());
        };
        match sink.sink().frame(out) {
            Ok(()) => Ok(true),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
            Err(ffmpeg::Error::Eof) => Ok(false),
            Err(e) => Err(FfmpegError::GraphProcess(format!("pull: {}", e)).into()),
        }
    }
}

fn video_buffer_args(decoder: &ffmpeg::decoder::Video, time_base: Rational) -> String {
    let mut pixel_aspect = decoder.aspect_ratio();
    if pixel_aspect.numerator() == 0 {
        pixel_aspect = Rational(1, 1);
    }
    format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        decoder.width(),
        decoder.height(),
        <ffmpeg::format::Pixel as Into<ffmpeg::ffi::AVPixelFormat>>::into(decoder.format()) as i32,
        time_base.numerator(),
        time_base.denominator(),
        pixel_aspect.numerator(),
        pixel_aspect.denominator(),
    )
}

fn audio_buffer_args(decoder: &ffmpeg::decoder::Audio, time_base: Rational) -> String {
    let layout = decoder.channel_layout();
    let layout = if layout.bits() == 0 {
        // no layout in the stream parameters; fall back on the channel count
        match decoder.channels() {
            1 => ChannelLayout::MONO,
            _ => ChannelLayout::STEREO,
        }
    } else {
        layout
    };
    format!(
        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
        time_base.numerator(),
        time_base.denominator(),
        decoder.rate(),
        decoder.format().name(),
        layout.bits(),
    )
}

/// The video chain between source and sink.
pub(crate) fn video_filter_spec(width: u32, height: u32) -> String {
    format!(
        "scale={}:{},fps={}/{},format=pix_fmts=yuv420p,setpts=PTS-STARTPTS",
        width,
        height,
        VIDEO_RATE.numerator(),
        VIDEO_RATE.denominator(),
    )
}

/// The audio chain between source and sink.
pub(crate) fn audio_filter_spec() -> String {
    format!(
        "aformat=sample_fmts=fltp:channel_layouts=stereo:sample_rates={},asetpts=PTS-STARTPTS",
        AUDIO_RATE,
    )
}
