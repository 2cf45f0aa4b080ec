//! Planar sample FIFO feeding the AAC encoder
//!
//! The AAC encoder consumes exactly 1024 samples per frame, while the
//! normalization graph emits whatever chunk size the source decoder produced
//! (Opus decodes 960 samples per frame, for example). The FIFO buffers
//! filtered samples and re-chunks them onto the encoder grid. It outlives
//! graph teardown, so no samples are lost across track boundaries.
//!
//! Everything after the `aformat` filter — and both cached placeholder
//! frames — is stereo planar float32, so that is the only layout handled
//! here.

use ffmpeg_next as ffmpeg;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type};

use super::AUDIO_RATE;

/// Intermediate and encoder sample format: planar float32.
pub const SAMPLE_FORMAT: Sample = Sample::F32(Type::Planar);

/// Borrow channel `ch` of a planar-f32 frame as a sample slice.
///
/// `ffmpeg-next`'s safe plane accessors trip over planar audio frames that
/// only fill in `linesize[0]`, so the plane pointer is taken straight from
/// `extended_data`. Returns `None` for a channel the frame does not carry
/// or a plane too small for `samples`.
pub(crate) fn channel_samples(
    frame: &ffmpeg::util::frame::Audio,
    ch: usize,
    samples: usize,
) -> Option<&[f32]> {
    // SAFETY: the raw frame pointer stays valid for the borrow's lifetime.
    // For planar audio `extended_data` holds one pointer per channel and
    // `linesize[0]` is the byte size of every plane; the channel bound, the
    // plane size and the f32 alignment are all checked before the slice is
    // formed.
    unsafe {
        let raw = frame.as_ptr();
        if ch >= (*raw).ch_layout.nb_channels as usize {
            return None;
        }
        let planes = (*raw).extended_data;
        if planes.is_null() {
            return None;
        }
        let plane = *planes.add(ch);
        if plane.is_null()
            || ((*raw).linesize[0] as usize) < samples * std::mem::size_of::<f32>()
            || (plane as usize) % std::mem::align_of::<f32>() != 0
        {
            return None;
        }
        Some(std::slice::from_raw_parts(plane as *const f32, samples))
    }
}

/// Mutable counterpart of [`channel_samples`].
pub(crate) fn channel_samples_mut(
    frame: &mut ffmpeg::util::frame::Audio,
    ch: usize,
    samples: usize,
) -> Option<&mut [f32]> {
    // SAFETY: same argument as `channel_samples`; the mutable borrow of the
    // frame guarantees exclusive access to the plane.
    unsafe {
        let raw = frame.as_mut_ptr();
        if ch >= (*raw).ch_layout.nb_channels as usize {
            return None;
        }
        let planes = (*raw).extended_data;
        if planes.is_null() {
            return None;
        }
        let plane = *planes.add(ch);
        if plane.is_null()
            || ((*raw).linesize[0] as usize) < samples * std::mem::size_of::<f32>()
            || (plane as usize) % std::mem::align_of::<f32>() != 0
        {
            return None;
        }
        Some(std::slice::from_raw_parts_mut(plane as *mut f32, samples))
    }
}

/// FIFO of stereo planar float samples.
pub struct SampleFifo {
    planes: [Vec<f32>; 2],
}

impl SampleFifo {
    pub fn new() -> Self {
        Self {
            planes: [Vec::new(), Vec::new()],
        }
    }

    /// Buffered samples per channel.
    pub fn len(&self) -> usize {
        self.planes[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes[0].is_empty()
    }

    /// Append the samples of a planar-f32 frame. A frame that arrives with
    /// only one plane is mirrored onto both channels so the lanes stay the
    /// same length.
    pub fn push(&mut self, frame: &ffmpeg::util::frame::Audio) {
        let samples = frame.samples();
        for ch in 0..2 {
            let plane =
                channel_samples(frame, ch, samples).or_else(|| channel_samples(frame, 0, samples));
            if let Some(values) = plane {
                self.planes[ch].extend_from_slice(values);
            }
        }
    }

    /// Pop a full frame of `frame_size` samples, or `None` while not enough
    /// samples are buffered.
    pub fn pop_frame(&mut self, frame_size: usize) -> Option<ffmpeg::util::frame::Audio> {
        if self.len() < frame_size {
            return None;
        }
        Some(self.take_frame(frame_size))
    }

    /// Drain the remainder as one final frame, zero-padded to `frame_size`.
    /// `None` when the FIFO is empty.
    pub fn drain_padded(&mut self, frame_size: usize) -> Option<ffmpeg::util::frame::Audio> {
        if self.is_empty() {
            return None;
        }
        let target = self.len().max(frame_size).next_multiple_of(frame_size);
        for plane in &mut self.planes {
            plane.resize(target, 0.0);
        }
        Some(self.take_frame(frame_size))
    }

    fn take_frame(&mut self, frame_size: usize) -> ffmpeg::util::frame::Audio {
        let mut out =
            ffmpeg::util::frame::Audio::new(SAMPLE_FORMAT, frame_size, ChannelLayout::STEREO);
        out.set_rate(AUDIO_RATE);
        for ch in 0..2 {
            if let Some(dst) = channel_samples_mut(&mut out, ch, frame_size) {
                dst.copy_from_slice(&self.planes[ch][..frame_size]);
            }
            self.planes[ch].drain(..frame_size);
        }
        out
    }
}

impl Default for SampleFifo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_frame(samples: usize, start: f32) -> ffmpeg::util::frame::Audio {
        let mut frame =
            ffmpeg::util::frame::Audio::new(SAMPLE_FORMAT, samples, ChannelLayout::STEREO);
        frame.set_rate(AUDIO_RATE);
        for ch in 0..2 {
            let values = channel_samples_mut(&mut frame, ch, samples).unwrap();
            for (i, v) in values.iter_mut().enumerate() {
                *v = start + i as f32;
            }
        }
        frame
    }

    #[test]
    fn test_channel_samples_bounds() {
        let frame = ramp_frame(64, 0.0);
        assert!(channel_samples(&frame, 0, 64).is_some());
        assert!(channel_samples(&frame, 1, 64).is_some());
        assert!(channel_samples(&frame, 2, 64).is_none());
        assert!(channel_samples(&frame, 0, 4096).is_none());
    }

    #[test]
    fn test_pop_requires_full_frame() {
        let mut fifo = SampleFifo::new();
        fifo.push(&ramp_frame(960, 0.0));
        assert_eq!(fifo.len(), 960);
        assert!(fifo.pop_frame(1024).is_none());

        fifo.push(&ramp_frame(960, 960.0));
        let frame = fifo.pop_frame(1024).unwrap();
        assert_eq!(frame.samples(), 1024);
        assert_eq!(fifo.len(), 2 * 960 - 1024);
        assert!(fifo.pop_frame(1024).is_none());
    }

    #[test]
    fn test_samples_stay_contiguous_across_chunks() {
        let mut fifo = SampleFifo::new();
        fifo.push(&ramp_frame(960, 0.0));
        fifo.push(&ramp_frame(960, 960.0));

        let frame = fifo.pop_frame(1024).unwrap();
        let values = channel_samples(&frame, 0, 1024).unwrap();
        for (i, v) in values.iter().enumerate() {
            assert_eq!(*v, i as f32);
        }
    }

    #[test]
    fn test_drain_padded_zero_fills_tail() {
        let mut fifo = SampleFifo::new();
        fifo.push(&ramp_frame(100, 1.0));

        let frame = fifo.drain_padded(1024).unwrap();
        assert_eq!(frame.samples(), 1024);
        let values = channel_samples(&frame, 0, 1024).unwrap();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[99], 100.0);
        assert_eq!(values[100], 0.0);
        assert_eq!(values[1023], 0.0);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_drain_padded_on_empty_fifo() {
        let mut fifo = SampleFifo::new();
        assert!(fifo.drain_padded(1024).is_none());
    }
}
