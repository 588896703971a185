//! Codec stage of the pipeline
//!
//! Decoders pull packets from a [`PacketSource`] (the demuxer) and hand out
//! frames through [`FrameSource`]; encoders accept frames through
//! [`FrameSink`] and push packets into a [`PacketSink`] (the muxer).

pub mod decoder;
pub mod encoder;

pub use decoder::Decoder;
pub use encoder::{AudioStreamSpec, Encoder};

use ffmpeg_next::util::format::sample::Sample;

use crate::error::Result;
use crate::media::{Frame, Packet};
use crate::rational::Rational;

/// Per-stream packet supply
pub trait PacketSource {
    /// Next packet of `stream_index`, `None` once the container is exhausted
    fn read_next_packet(&mut self, stream_index: usize) -> Option<Packet>;

    /// Stop buffering packets for `stream_index`
    fn release(&mut self, stream_index: usize);
}

/// Per-stream packet consumer
pub trait PacketSink {
    /// Write a packet whose timestamps are in the time base of the encoder
    /// feeding `stream_index`
    fn write_next_packet(&mut self, packet: Packet, stream_index: usize) -> Result<()>;
}

/// Decoded audio supply
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;

    /// Time base of frame timestamps
    fn time_base(&self) -> Rational;

    /// Format decoded frames are expected to carry
    fn sample_format(&self) -> Sample;
}

/// Audio frame consumer
pub trait FrameSink {
    /// Allocate an empty frame in the format, layout and size the sink wants
    fn make_frame(&self) -> Frame;

    fn write_frame(&mut self, frame: Frame) -> Result<()>;

    /// Signal end of stream; further calls do nothing
    fn flush(&mut self) -> Result<()>;
}
