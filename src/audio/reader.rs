//! Audio sample reconstruction
//!
//! Splits decoded frames into individual [`AudioSample`]s, honouring the skip
//! metadata decoders attach for encoder priming and padding, and stamps each
//! sample with its exact presentation time.

use std::marker::PhantomData;

use crate::audio::sample::{AudioSample, SampleType};
use crate::codec::{Decoder, FrameSource};
use crate::error::{PipelineError, Result};
use crate::ffmpeg_utils::helpers;
use crate::media::Frame;
use crate::rational::Rational;

enum ReadState {
    /// No frame loaded; the next read pulls one
    Idle,
    /// Serving samples `index..end` of `frame`
    InFrame {
        frame: Frame,
        index: usize,
        end: usize,
        /// Time of sample 0 of the frame
        time: Rational,
        rate: i64,
    },
    /// The source is exhausted or failed
    Finished,
}

/// Iterator over the samples of one audio stream
pub struct AudioReader<'a, T: SampleType, F: FrameSource = Decoder> {
    source: &'a mut F,
    state: ReadState,
    time_base: Rational,
    /// Leading samples still to drop from the frames that follow
    pending_skip: usize,
    /// End time of the last frame, used when a frame carries no pts
    next_time: Rational,
    _marker: PhantomData<T>,
}

impl<'a, T: SampleType, F: FrameSource> AudioReader<'a, T, F> {
    /// Read samples from `source`, which must produce frames of type `T`
    pub fn new(source: &'a mut F) -> Result<Self> {
        let format = source.sample_format();
        if !T::matches(format) {
            return Err(PipelineError::SampleFormat(format!(
                "stream decodes to {:?}, reader expects {}",
                format,
                std::any::type_name::<T>()
            )));
        }
        let time_base = source.time_base();
        Ok(Self {
            source,
            state: ReadState::Idle,
            time_base,
            pending_skip: 0,
            next_time: Rational::ZERO,
            _marker: PhantomData,
        })
    }

    /// Pull frames until one has samples left after skipping
    fn load_frame(&mut self) -> ReadState {
        loop {
            let Some(frame) = self.source.next_frame() else {
                return ReadState::Finished;
            };
            if frame.is_discarded() {
                tracing::debug!(samples = frame.samples(), "dropping discarded frame");
                continue;
            }
            if !T::matches(frame.format()) {
                tracing::warn!(
                    format = ?frame.format(),
                    expected = std::any::type_name::<T>(),
                    "frame sample format changed mid-stream"
                );
                return ReadState::Finished;
            }
            let rate = frame.rate() as i64;
            if rate == 0 || frame.channel_count() == 0 {
                tracing::warn!(rate, channels = frame.channel_count(), "malformed audio frame");
                return ReadState::Finished;
            }

            let samples = frame.samples();
            let time = match frame.pts() {
                Some(pts) => Rational::from_ticks(pts, self.time_base),
                None => self.next_time,
            };
            self.next_time = time + Rational::new(samples as i64, rate);

            let skip = frame.skip_samples().unwrap_or_default();
            let leading = self.pending_skip + skip.start as usize;
            let start = leading.min(samples);
            self.pending_skip = leading - start;
            let end = samples.saturating_sub(skip.end as usize);

            if start >= end {
                continue;
            }
            return ReadState::InFrame {
                frame,
                index: start,
                end,
                time,
                rate,
            };
        }
    }
}

/// The per-channel values at `index` of `frame`
fn sample_values<T: SampleType>(frame: &Frame, index: usize) -> Option<Vec<T>> {
    let channels = frame.channel_count();
    let samples = frame.samples();
    if frame.is_planar() {
        (0..channels)
            .map(|c| helpers::plane_as_samples::<T>(frame.plane(c), samples).map(|p| p[index]))
            .collect()
    } else {
        let plane = helpers::plane_as_samples::<T>(frame.plane(0), samples * channels)?;
        Some(plane[index * channels..(index + 1) * channels].to_vec())
    }
}

impl<'a, T: SampleType, F: FrameSource> Iterator for AudioReader<'a, T, F> {
    type Item = AudioSample<T>;

    fn next(&mut self) -> Option<AudioSample<T>> {
        loop {
            match &mut self.state {
                ReadState::Finished => return None,
                ReadState::Idle => self.state = self.load_frame(),
                ReadState::InFrame {
                    frame,
                    index,
                    end,
                    time,
                    rate,
                } => {
                    let Some(values) = sample_values::<T>(frame, *index) else {
                        tracing::warn!("audio plane too short for its sample count");
                        self.state = ReadState::Finished;
                        return None;
                    };
                    let sample_time = *time + Rational::new(*index as i64, *rate);
                    *index += 1;
                    // Past the effective length: retire the frame now.
                    if *index >= *end {
                        self.state = ReadState::Idle;
                    }
                    return Some(AudioSample::from_values(values, sample_time));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SkipSamples;
    use ffmpeg_next::util::channel_layout::ChannelLayout;
    use ffmpeg_next::util::format::sample::{Sample, Type};
    use std::collections::VecDeque;

    struct FrameQueue {
        frames: VecDeque<Frame>,
        time_base: Rational,
        format: Sample,
    }

    impl FrameSource for FrameQueue {
        fn next_frame(&mut self) -> Option<Frame> {
            self.frames.pop_front()
        }

        fn time_base(&self) -> Rational {
            self.time_base
        }

        fn sample_format(&self) -> Sample {
            self.format
        }
    }

    const RATE: u32 = 44100;

    /// Stereo f32 frame whose channel `c` at index `i` holds
    /// `first + i + 0.5 * c`
    fn stereo_frame(format: Sample, first: f32, samples: usize, pts: Option<i64>) -> Frame {
        let mut frame = Frame::new(format, samples, ChannelLayout::STEREO);
        frame.set_rate(RATE);
        frame.set_pts(pts);
        let value = |i: usize, c: usize| first + i as f32 + 0.5 * c as f32;
        if format.is_planar() {
            for c in 0..2 {
                let plane =
                    helpers::plane_as_samples_mut::<f32>(frame.plane_mut(c), samples).unwrap();
                for (i, v) in plane.iter_mut().enumerate() {
                    *v = value(i, c);
                }
            }
        } else {
            let plane =
                helpers::plane_as_samples_mut::<f32>(frame.plane_mut(0), samples * 2).unwrap();
            for i in 0..samples {
                for c in 0..2 {
                    plane[i * 2 + c] = value(i, c);
                }
            }
        }
        frame
    }

    fn queue(format: Sample, frames: Vec<Frame>) -> FrameQueue {
        crate::ffmpeg_utils::init().unwrap();
        FrameQueue {
            frames: frames.into(),
            time_base: Rational::new(1, 14_112_000),
            format,
        }
    }

    #[test]
    fn test_planar_and_interleaved_agree() {
        crate::ffmpeg_utils::init().unwrap();
        let planar = Sample::F32(Type::Planar);
        let packed = Sample::F32(Type::Packed);
        let mut a = queue(
            planar,
            vec![stereo_frame(planar, 0.0, 8, Some(0)), stereo_frame(planar, 8.0, 8, Some(2560))],
        );
        let mut b = queue(
            packed,
            vec![stereo_frame(packed, 0.0, 8, Some(0)), stereo_frame(packed, 8.0, 8, Some(2560))],
        );
        let left: Vec<_> = AudioReader::<f32, _>::new(&mut a).unwrap().collect();
        let right: Vec<_> = AudioReader::<f32, _>::new(&mut b).unwrap().collect();
        assert_eq!(left.len(), 16);
        assert_eq!(left, right);
        assert_eq!(left[3].values, vec![3.0, 3.5]);
    }

    #[test]
    fn test_timestamps_are_exact() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Planar);
        // 14112000 / 44100 = 320 ticks per sample.
        let mut source = queue(
            format,
            vec![
                stereo_frame(format, 0.0, 4, Some(1000)),
                stereo_frame(format, 4.0, 4, Some(1000 + 4 * 320)),
            ],
        );
        let samples: Vec<_> = AudioReader::<f32, _>::new(&mut source).unwrap().collect();
        let start = Rational::new(1000, 14_112_000);
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.time, start + Rational::new(i as i64, RATE as i64));
            assert_eq!(sample.values[0], i as f32);
        }
    }

    #[test]
    fn test_missing_pts_continues_previous_frame() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Packed);
        let mut source = queue(
            format,
            vec![
                stereo_frame(format, 0.0, 4, Some(0)),
                stereo_frame(format, 4.0, 4, None),
            ],
        );
        let samples: Vec<_> = AudioReader::<f32, _>::new(&mut source).unwrap().collect();
        assert_eq!(samples[5].time, Rational::new(5, RATE as i64));
    }

    #[test]
    fn test_priming_and_padding_are_trimmed() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Planar);
        let mut first = stereo_frame(format, 0.0, 10, Some(0));
        first.set_skip_samples(SkipSamples { start: 3, end: 0 });
        let mut last = stereo_frame(format, 10.0, 10, Some(3200));
        last.set_skip_samples(SkipSamples { start: 0, end: 4 });
        let mut source = queue(format, vec![first, last]);

        let samples: Vec<_> = AudioReader::<f32, _>::new(&mut source).unwrap().collect();
        let firsts: Vec<f32> = samples.iter().map(|s| s.values[0]).collect();
        assert_eq!(
            firsts,
            vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0]
        );
        // Skipped samples keep their slot on the timeline.
        assert_eq!(samples[0].time, Rational::new(3, RATE as i64));
    }

    #[test]
    fn test_large_skip_carries_over() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Planar);
        let mut first = stereo_frame(format, 0.0, 4, Some(0));
        first.set_skip_samples(SkipSamples { start: 6, end: 0 });
        let second = stereo_frame(format, 4.0, 4, Some(1280));
        let mut source = queue(format, vec![first, second]);

        let samples: Vec<_> = AudioReader::<f32, _>::new(&mut source).unwrap().collect();
        let firsts: Vec<f32> = samples.iter().map(|s| s.values[0]).collect();
        assert_eq!(firsts, vec![6.0, 7.0]);
        assert_eq!(samples[0].time, Rational::new(6, RATE as i64));
    }

    #[test]
    fn test_discarded_frames_are_skipped() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Packed);
        let mut dropped = stereo_frame(format, 100.0, 4, Some(0));
        unsafe {
            (*dropped.as_mut_ptr()).flags |= 1 << 2;
        }
        let kept = stereo_frame(format, 0.0, 2, Some(1280));
        let mut source = queue(format, vec![dropped, kept]);
        let samples: Vec<_> = AudioReader::<f32, _>::new(&mut source).unwrap().collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].values, vec![0.0, 0.5]);
    }

    #[test]
    fn test_frame_retired_after_last_sample() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Packed);
        let mut source = queue(
            format,
            vec![stereo_frame(format, 0.0, 2, Some(0)), stereo_frame(format, 2.0, 2, Some(640))],
        );
        let mut reader = AudioReader::<f32, _>::new(&mut source).unwrap();
        reader.next().unwrap();
        assert!(matches!(reader.state, ReadState::InFrame { index: 1, .. }));
        reader.next().unwrap();
        // The first frame is gone before the next read; the second is untouched.
        assert!(matches!(reader.state, ReadState::Idle));
        assert_eq!(reader.source.frames.len(), 1);
        assert_eq!(reader.next().unwrap().values, vec![2.0, 2.5]);
    }

    #[test]
    fn test_channel_order() {
        crate::ffmpeg_utils::init().unwrap();
        let format = Sample::F32(Type::Packed);
        let mut source = queue(format, vec![stereo_frame(format, 0.0, 3, Some(0))]);
        for (i, sample) in AudioReader::<f32, _>::new(&mut source).unwrap().enumerate() {
            assert_eq!(sample.sample(0), Some(i as f32));
            assert_eq!(sample.sample(1), Some(i as f32 + 0.5));
        }
    }

    #[test]
    fn test_rejects_wrong_sample_type() {
        let mut source = queue(Sample::F32(Type::Planar), vec![]);
        let err = AudioReader::<i16, _>::new(&mut source).err();
        assert!(matches!(err, Some(PipelineError::SampleFormat(_))));
    }

    #[test]
    fn test_format_change_ends_stream() {
        crate::ffmpeg_utils::init().unwrap();
        let f32p = Sample::F32(Type::Planar);
        let mut odd = Frame::new(Sample::I16(Type::Packed), 4, ChannelLayout::STEREO);
        odd.set_rate(RATE);
        let mut source = queue(f32p, vec![stereo_frame(f32p, 0.0, 2, Some(0)), odd]);
        let mut reader = AudioReader::<f32, _>::new(&mut source).unwrap();
        assert_eq!(reader.by_ref().count(), 2);
        assert!(reader.next().is_none());
    }
}
