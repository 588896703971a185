//! Audio sample assembly
//!
//! Packs individual [`AudioSample`]s into frames the size the encoder asks
//! for and hands each full frame over.

use std::marker::PhantomData;

use crate::audio::sample::{AudioSample, SampleType};
use crate::codec::{Encoder, FrameSink};
use crate::error::{FfmpegError, PipelineError, Result};
use crate::ffmpeg_utils::helpers;
use crate::media::Frame;

/// Writes samples of one audio stream
pub struct AudioWriter<'a, T: SampleType, K: FrameSink = Encoder> {
    sink: &'a mut K,
    /// Frame being filled, allocated lazily
    frame: Option<Frame>,
    /// Samples stored in `frame` so far
    index: usize,
    capacity: usize,
    channels: usize,
    planar: bool,
    dirty: bool,
    flushed: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: SampleType, K: FrameSink> AudioWriter<'a, T, K> {
    /// Write samples to `sink`, which must accept frames of type `T`
    pub fn new(sink: &'a mut K) -> Result<Self> {
        let frame = sink.make_frame();
        if !T::matches(frame.format()) {
            return Err(PipelineError::SampleFormat(format!(
                "stream encodes from {:?}, writer was given {}",
                frame.format(),
                std::any::type_name::<T>()
            )));
        }
        let capacity = frame.samples();
        if capacity == 0 {
            return Err(PipelineError::Config(
                "encoder frames hold no samples".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            channels: frame.channel_count(),
            planar: frame.is_planar(),
            frame: Some(frame),
            sink,
            index: 0,
            dirty: false,
            flushed: false,
            _marker: PhantomData,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel in each full frame
    pub fn frame_size(&self) -> usize {
        self.capacity
    }

    /// Append one sample; a full frame is encoded immediately.
    ///
    /// The sample's time is ignored: frames are timestamped by position.
    pub fn write(&mut self, sample: &AudioSample<T>) -> Result<()> {
        if sample.channels() != self.channels {
            return Err(PipelineError::ChannelMismatch {
                expected: self.channels,
                actual: sample.channels(),
            });
        }
        if self.flushed {
            return Err(FfmpegError::EncodeFrame("sample written after flush".to_string()).into());
        }

        let sink = &self.sink;
        let frame = self.frame.get_or_insert_with(|| sink.make_frame());
        store(frame, self.index, &sample.values, self.planar, self.capacity)?;
        self.index += 1;
        self.dirty = true;

        if self.index == self.capacity {
            self.index = 0;
            if let Some(frame) = self.frame.take() {
                self.sink.write_frame(frame)?;
            }
        }
        Ok(())
    }

    /// Write every sample of `samples`
    pub fn write_all<'s>(
        &mut self,
        samples: impl IntoIterator<Item = &'s AudioSample<T>>,
    ) -> Result<()> {
        samples.into_iter().try_for_each(|s| self.write(s))
    }

    /// Encode the partial frame, if any, and flush the encoder. Idempotent.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if let Some(mut frame) = self.frame.take() {
            if self.index > 0 {
                frame.set_samples(self.index);
                self.index = 0;
                self.sink.write_frame(frame)?;
            }
        }
        self.sink.flush()
    }
}

/// Store `values` as sample `index` of `frame`
fn store<T: SampleType>(
    frame: &mut Frame,
    index: usize,
    values: &[T],
    planar: bool,
    capacity: usize,
) -> Result<()> {
    let too_short = || PipelineError::SampleFormat("frame plane too short".to_string());
    if planar {
        for (channel, value) in values.iter().enumerate() {
            let plane = helpers::plane_as_samples_mut::<T>(frame.plane_mut(channel), capacity)
                .ok_or_else(too_short)?;
            plane[index] = *value;
        }
    } else {
        let channels = values.len();
        let plane = helpers::plane_as_samples_mut::<T>(frame.plane_mut(0), capacity * channels)
            .ok_or_else(too_short)?;
        plane[index * channels..(index + 1) * channels].copy_from_slice(values);
    }
    Ok(())
}

impl<'a, T: SampleType, K: FrameSink> Drop for AudioWriter<'a, T, K> {
    fn drop(&mut self) {
        if self.dirty && !self.flushed {
            if let Err(e) = self.flush() {
                tracing::error!(error = %e, "flushing audio writer on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::Rational;
    use ffmpeg_next::util::channel_layout::ChannelLayout;
    use ffmpeg_next::util::format::sample::{Sample, Type};

    struct FrameCollector {
        format: Sample,
        frame_size: usize,
        frames: Vec<Frame>,
        flushes: usize,
    }

    impl FrameCollector {
        fn new(format: Sample, frame_size: usize) -> Self {
            crate::ffmpeg_utils::init().unwrap();
            Self {
                format,
                frame_size,
                frames: Vec::new(),
                flushes: 0,
            }
        }

        /// Channel `c` of every collected sample, in order
        fn channel(&self, c: usize) -> Vec<i16> {
            let mut out = Vec::new();
            for frame in &self.frames {
                let n = frame.samples();
                if frame.is_planar() {
                    out.extend_from_slice(
                        helpers::plane_as_samples::<i16>(frame.plane(c), n).unwrap(),
                    );
                } else {
                    let plane = helpers::plane_as_samples::<i16>(frame.plane(0), n * 2).unwrap();
                    out.extend(plane.iter().skip(c).step_by(2));
                }
            }
            out
        }
    }

    impl FrameSink for FrameCollector {
        fn make_frame(&self) -> Frame {
            let mut frame = Frame::new(self.format, self.frame_size, ChannelLayout::STEREO);
            frame.set_rate(8000);
            frame
        }

        fn write_frame(&mut self, frame: Frame) -> Result<()> {
            self.frames.push(frame);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn ramp(n: usize) -> Vec<AudioSample<i16>> {
        (0..n as i16)
            .map(|i| AudioSample::from_values(vec![i, -i], Rational::ZERO))
            .collect()
    }

    #[test]
    fn test_full_frames_and_partial_flush() {
        let mut sink = FrameCollector::new(Sample::I16(Type::Packed), 4);
        {
            let mut writer = AudioWriter::<i16, _>::new(&mut sink).unwrap();
            writer.write_all(&ramp(10)).unwrap();
            writer.flush().unwrap();
            writer.flush().unwrap();
        }
        let sizes: Vec<usize> = sink.frames.iter().map(|f| f.samples()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(sink.flushes, 1);
        assert_eq!(sink.channel(0), (0..10).collect::<Vec<i16>>());
        assert_eq!(sink.channel(1), (0..10).map(|i| -i).collect::<Vec<i16>>());
    }

    #[test]
    fn test_planar_layout() {
        let mut sink = FrameCollector::new(Sample::I16(Type::Planar), 3);
        {
            let mut writer = AudioWriter::<i16, _>::new(&mut sink).unwrap();
            writer.write_all(&ramp(6)).unwrap();
        }
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(sink.channel(0), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(sink.channel(1), vec![0, -1, -2, -3, -4, -5]);
        // Dropping a writer that wrote samples flushes the sink.
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn test_exact_multiple_leaves_no_partial_frame() {
        let mut sink = FrameCollector::new(Sample::I16(Type::Packed), 5);
        {
            let mut writer = AudioWriter::<i16, _>::new(&mut sink).unwrap();
            writer.write_all(&ramp(5)).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let mut sink = FrameCollector::new(Sample::I16(Type::Packed), 4);
        let mut writer = AudioWriter::<i16, _>::new(&mut sink).unwrap();
        let err = writer.write(&AudioSample::new(3)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ChannelMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_rejects_wrong_sample_type() {
        let mut sink = FrameCollector::new(Sample::F32(Type::Planar), 4);
        assert!(AudioWriter::<i16, _>::new(&mut sink).is_err());
    }

    #[test]
    fn test_unused_writer_does_not_flush() {
        let mut sink = FrameCollector::new(Sample::I16(Type::Packed), 4);
        drop(AudioWriter::<i16, _>::new(&mut sink).unwrap());
        assert_eq!(sink.flushes, 0);
        assert!(sink.frames.is_empty());
    }
}
