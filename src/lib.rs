//! Sample-exact audio and timed-text pipeline
//!
//! Reads audio and subtitle streams from any container FFmpeg understands,
//! sample by sample with exact rational timestamps, and writes audio back
//! the same way. Input and output go through arbitrary `Read`/`Write` byte
//! streams instead of files.

pub mod audio;
pub mod codec;
pub mod config;
pub mod demux;
pub mod error;
pub mod ffmpeg_utils;
pub mod media;
pub mod mux;
pub mod rational;
pub mod subtitle;

#[cfg(test)]
pub(crate) mod tests;

pub use audio::{AudioReader, AudioSample, AudioWriter, SampleType};
pub use codec::{AudioStreamSpec, Decoder, Encoder, FrameSink, FrameSource};
pub use config::PipelineConfig;
pub use demux::Demuxer;
pub use error::{FfmpegError, PipelineError, Result};
pub use ffmpeg_utils::io::Unseekable;
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
pub use ffmpeg_utils::{init, install_log_filter};
pub use media::{Frame, Packet, StreamInfo};
pub use mux::Muxer;
pub use rational::Rational;
pub use subtitle::{Subtitle, SubtitleReader};
