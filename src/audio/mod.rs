//! Sample-level access to audio streams
//!
//! [`AudioReader`] turns decoded frames into a sequence of timestamped
//! multi-channel samples; [`AudioWriter`] packs samples back into frames for
//! an encoder.

pub mod reader;
pub mod sample;
pub mod writer;

pub use reader::AudioReader;
pub use sample::{AudioSample, SampleType};
pub use writer::AudioWriter;
