//! Packets, frames and stream descriptions
//!
//! [`Packet`] and [`Frame`] are thin owning wrappers over the `ffmpeg-next`
//! types. Each buffer has exactly one owner; cloning a packet shares its
//! reference-counted payload, cloning a frame copies the samples.

use std::ops::{Deref, DerefMut};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;
use ffmpeg_next::util::frame::side_data;

use crate::ffmpeg_utils::helpers;
use crate::rational::Rational;

/// One compressed unit read from or written to a container
#[derive(Clone)]
pub struct Packet(ffmpeg::Packet);

impl Packet {
    pub fn empty() -> Self {
        Packet(ffmpeg::Packet::empty())
    }

    /// Copy `data` into a freshly allocated packet
    pub fn copy(data: &[u8]) -> Self {
        Packet(ffmpeg::Packet::copy(data))
    }

    pub fn stream_index(&self) -> usize {
        self.0.stream()
    }

    pub fn into_inner(self) -> ffmpeg::Packet {
        self.0
    }
}

impl From<ffmpeg::Packet> for Packet {
    fn from(packet: ffmpeg::Packet) -> Self {
        Packet(packet)
    }
}

impl Deref for Packet {
    type Target = ffmpeg::Packet;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Packet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index())
            .field("pts", &self.pts())
            .field("dts", &self.dts())
            .field("duration", &self.duration())
            .field("size", &self.size())
            .finish()
    }
}

/// Priming and padding counts a decoder attached to a frame.
///
/// `start` samples at the front and `end` samples at the back of the frame
/// are not part of the signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipSamples {
    pub start: u32,
    pub end: u32,
}

/// Size of `AV_FRAME_DATA_SKIP_SAMPLES`: two u32le counts, two reason bytes.
const SKIP_SAMPLES_LEN: usize = 10;

impl SkipSamples {
    /// Parse the side-data payload, `None` if it is too short
    pub fn parse(data: &[u8]) -> Option<Self> {
        let start = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
        let end = u32::from_le_bytes(data.get(4..8)?.try_into().ok()?);
        Some(Self { start, end })
    }

    pub fn to_bytes(self) -> [u8; SKIP_SAMPLES_LEN] {
        let mut out = [0u8; SKIP_SAMPLES_LEN];
        out[0..4].copy_from_slice(&self.start.to_le_bytes());
        out[4..8].copy_from_slice(&self.end.to_le_bytes());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// One decoded (or to-be-encoded) block of audio
pub struct Frame(ffmpeg::util::frame::Audio);

impl Frame {
    pub fn empty() -> Self {
        Frame(ffmpeg::util::frame::Audio::empty())
    }

    /// Allocate a frame with room for `samples` samples per channel
    pub fn new(format: Sample, samples: usize, layout: ChannelLayout) -> Self {
        Frame(ffmpeg::util::frame::Audio::new(format, samples, layout))
    }

    pub fn is_discarded(&self) -> bool {
        helpers::frame_is_discarded(&self.0)
    }

    pub fn skip_samples(&self) -> Option<SkipSamples> {
        self.0
            .side_data(side_data::Type::SkipSamples)
            .and_then(|sd| SkipSamples::parse(sd.data()))
    }

    /// Attach skip metadata, replacing any present
    pub fn set_skip_samples(&mut self, skip: SkipSamples) {
        helpers::frame_set_side_data(
            &mut self.0,
            side_data::Type::SkipSamples,
            &skip.to_bytes(),
        );
    }

    pub fn channel_count(&self) -> usize {
        self.0.channels() as usize
    }

    /// Raw bytes of plane `index` (one per channel when planar, else one)
    pub fn plane(&self, index: usize) -> &[u8] {
        helpers::audio_plane_data(&self.0, index)
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        helpers::audio_plane_data_mut(&mut self.0, index)
    }

    pub fn into_inner(self) -> ffmpeg::util::frame::Audio {
        self.0
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Frame(self.0.clone())
    }
}

impl From<ffmpeg::util::frame::Audio> for Frame {
    fn from(frame: ffmpeg::util::frame::Audio) -> Self {
        Frame(frame)
    }
}

impl Deref for Frame {
    type Target = ffmpeg::util::frame::Audio;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format())
            .field("samples", &self.samples())
            .field("channels", &self.channel_count())
            .field("rate", &self.rate())
            .field("pts", &self.pts())
            .finish()
    }
}

/// Description of one elementary stream of a container
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub media_type: ffmpeg::media::Type,
    pub codec_id: ffmpeg::codec::Id,
    pub time_base: Rational,
    /// First timestamp of the stream, if the container knows it
    pub start_time: Option<Rational>,
    /// Zero for non-audio streams
    pub sample_rate: u32,
    /// Zero for non-audio streams
    pub channels: u16,
}

impl StreamInfo {
    pub fn from_stream(stream: &ffmpeg::format::stream::Stream) -> Self {
        let params = stream.parameters();
        let time_base = time_base_or_default(stream.time_base());
        let start_time = match stream.start_time() {
            ts if ts == crate::ffmpeg_utils::NOPTS_VALUE => None,
            ts => Some(Rational::from_ticks(ts, time_base)),
        };
        Self {
            index: stream.index(),
            media_type: params.medium(),
            codec_id: params.id(),
            time_base,
            start_time,
            sample_rate: helpers::codec_params_sample_rate(&params),
            channels: helpers::codec_params_channels(&params),
        }
    }

    pub fn media_type_name(&self) -> &'static str {
        crate::ffmpeg_utils::media_type_name(self.media_type)
    }
}

/// Convert an engine time base, substituting 1/1 for an unset (0/0) one
pub(crate) fn time_base_or_default(time_base: ffmpeg::Rational) -> Rational {
    if time_base.denominator() == 0 {
        Rational::ONE
    } else {
        Rational::from(time_base)
    }
}
