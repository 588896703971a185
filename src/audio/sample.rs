//! Sample scalar types and multi-channel samples

use std::fmt;

use ffmpeg_next::util::format::sample::Sample;

use crate::rational::Rational;

/// A scalar FFmpeg can store audio samples as.
///
/// Implemented for `u8`, `i16`, `i32`, `i64`, `f32` and `f64`. The planar and
/// packed variants of a format share one scalar type.
pub trait SampleType: bytemuck::Pod + Default + PartialEq + fmt::Debug + 'static {
    /// Returns `true` if frames in `format` hold samples of this type
    fn matches(format: Sample) -> bool;

    /// The packed FFmpeg format for this type
    fn packed() -> Sample;

    /// The planar FFmpeg format for this type
    fn planar() -> Sample;
}

macro_rules! sample_type {
    ($ty:ty, $variant:ident) => {
        impl SampleType for $ty {
            fn matches(format: Sample) -> bool {
                matches!(format, Sample::$variant(_))
            }

            fn packed() -> Sample {
                Sample::$variant(ffmpeg_next::util::format::sample::Type::Packed)
            }

            fn planar() -> Sample {
                Sample::$variant(ffmpeg_next::util::format::sample::Type::Planar)
            }
        }
    };
}

sample_type!(u8, U8);
sample_type!(i16, I16);
sample_type!(i32, I32);
sample_type!(i64, I64);
sample_type!(f32, F32);
sample_type!(f64, F64);

/// One value per channel at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample<T> {
    pub values: Vec<T>,
    /// Presentation time in seconds
    pub time: Rational,
}

impl<T: SampleType> AudioSample<T> {
    /// A silent sample with `channels` channels at time zero
    pub fn new(channels: usize) -> Self {
        Self {
            values: vec![T::default(); channels],
            time: Rational::ZERO,
        }
    }

    pub fn from_values(values: Vec<T>, time: Rational) -> Self {
        Self { values, time }
    }

    pub fn channels(&self) -> usize {
        self.values.len()
    }

    /// Value of `channel`, `None` if out of range
    pub fn sample(&self, channel: usize) -> Option<T> {
        self.values.get(channel).copied()
    }
}
