//! Stream encoder
//!
//! Wraps an FFmpeg `AVCodecContext` that turns PCM frames into packets for
//! one output stream. Every packet drained from the codec is pushed straight
//! into the [`PacketSink`] the encoder was opened with (normally the muxer).

use std::cell::RefCell;
use std::rc::Rc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::codec::{FrameSink, PacketSink};
use crate::config::EncoderConfig;
use crate::error::{FfmpegError, PipelineError, Result};
use crate::ffmpeg_utils::helpers;
use crate::media::{Frame, Packet};
use crate::rational::Rational;

/// Parameters of an audio stream to encode
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamSpec {
    pub codec: codec::Id,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: Sample,
    /// Target bit rate in bits per second, 0 for the codec default
    pub bit_rate: usize,
}

impl AudioStreamSpec {
    pub fn new(codec: codec::Id, sample_rate: u32, channels: u16, sample_format: Sample) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            sample_format,
            bit_rate: 0,
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: usize) -> Self {
        self.bit_rate = bit_rate;
        self
    }
}

/// Default speaker layout for a channel count
pub fn channel_layout_for(channels: u16) -> Option<ChannelLayout> {
    match channels {
        1 => Some(ChannelLayout::MONO),
        2 => Some(ChannelLayout::STEREO),
        3 => Some(ChannelLayout::SURROUND),
        4 => Some(ChannelLayout::QUAD),
        5 => Some(ChannelLayout::_5POINT0),
        6 => Some(ChannelLayout::_5POINT1),
        7 => Some(ChannelLayout::_6POINT1),
        8 => Some(ChannelLayout::_7POINT1),
        _ => None,
    }
}

/// Encoder bound to one output stream
pub struct Encoder {
    encoder: ffmpeg::encoder::Audio,
    stream_index: usize,
    codec_id: codec::Id,
    channel_layout: ChannelLayout,
    channels: u16,
    frame_size: usize,
    /// Samples handed to the codec so far; the pts of the next frame
    samples_sent: i64,
    /// Samples covered by packets emitted so far; the pts of the next packet
    samples_written: i64,
    sent_frames: bool,
    flushed: bool,
    sink: Rc<RefCell<dyn PacketSink>>,
}

impl Encoder {
    /// Open an encoder for `spec` whose packets go to `sink` as stream
    /// `stream_index`.
    ///
    /// `global_header` must be set when the target container stores codec
    /// headers out of band.
    pub fn open(
        spec: &AudioStreamSpec,
        stream_index: usize,
        sink: Rc<RefCell<dyn PacketSink>>,
        global_header: bool,
        config: &EncoderConfig,
    ) -> Result<Self> {
        let codec = codec::encoder::find(spec.codec).ok_or_else(|| {
            FfmpegError::EncoderNotFound(format!("{:?} not available in this FFmpeg build", spec.codec))
        })?;

        if spec.sample_rate == 0 || spec.sample_rate > i32::MAX as u32 {
            return Err(PipelineError::Config(format!(
                "invalid sample rate {}",
                spec.sample_rate
            )));
        }
        let channel_layout = channel_layout_for(spec.channels).ok_or_else(|| {
            PipelineError::UnsupportedMedia(format!("no channel layout for {} channels", spec.channels))
        })?;

        // Build context and configure the audio encoder BEFORE opening
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(ffmpeg::Rational::new(1, spec.sample_rate as i32));
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderCreate(format!("Cannot get audio encoder handle: {}", e))
        })?;

        audio_enc.set_rate(spec.sample_rate as i32);
        audio_enc.set_format(spec.sample_format);
        audio_enc.set_channel_layout(channel_layout);
        if spec.bit_rate > 0 {
            audio_enc.set_bit_rate(spec.bit_rate);
        }

        let encoder = audio_enc.open_as(codec).map_err(|e| {
            FfmpegError::EncoderCreate(format!(
                "Failed to open {} encoder: {}",
                spec.codec.name(),
                e
            ))
        })?;

        let frame_size = match encoder.frame_size() as usize {
            0 => config.default_frame_size,
            n => n,
        };

        tracing::debug!(
            stream_index,
            codec = spec.codec.name(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            frame_size,
            "opened encoder"
        );

        Ok(Self {
            encoder,
            stream_index,
            codec_id: spec.codec,
            channel_layout,
            channels: spec.channels,
            frame_size,
            samples_sent: 0,
            samples_written: 0,
            sent_frames: false,
            flushed: false,
            sink,
        })
    }

    /// Allocate an empty frame in the encoder's format, layout and rate,
    /// sized to one codec frame
    pub fn make_frame(&self) -> Frame {
        let mut frame = Frame::new(self.encoder.format(), self.frame_size, self.channel_layout);
        frame.set_rate(self.encoder.rate());
        frame
    }

    /// Encode one frame and push every packet the codec releases to the sink.
    pub fn write_frame(&mut self, mut frame: Frame) -> Result<()> {
        if self.flushed {
            return Err(FfmpegError::EncodeFrame(format!(
                "stream {}: frame written after flush",
                self.stream_index
            ))
            .into());
        }
        frame.set_pts(Some(self.samples_sent));
        self.samples_sent += frame.samples() as i64;

        self.encoder.send_frame(&*frame).map_err(|e| {
            FfmpegError::EncodeFrame(format!(
                "send_frame error on stream {}: {}",
                self.stream_index, e
            ))
        })?;
        self.sent_frames = true;
        self.drain()
    }

    /// Signal end of stream and push the remaining packets. Idempotent.
    pub fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => {
                return Err(FfmpegError::EncodeFrame(format!(
                    "send_eof error on stream {}: {}",
                    self.stream_index, e
                ))
                .into())
            }
        }
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let duration = match packet.duration() {
                        d if d > 0 => d,
                        _ => self.frame_size as i64,
                    };
                    packet.set_pts(Some(self.samples_written));
                    packet.set_dts(Some(self.samples_written));
                    packet.set_duration(duration);
                    self.samples_written += duration;
                    self.sink
                        .borrow_mut()
                        .write_next_packet(Packet::from(packet), self.stream_index)?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => {
                    return Err(FfmpegError::EncodeFrame(format!(
                        "receive_packet error on stream {}: {}",
                        self.stream_index, e
                    ))
                    .into())
                }
            }
        }
    }

    /// Codec parameters for the encoded stream (for muxer stream setup).
    pub fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        helpers::encoder_codec_parameters(&self.encoder)
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn codec_id(&self) -> codec::Id {
        self.codec_id
    }

    /// Samples per channel in each frame the codec expects
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.encoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_format(&self) -> Sample {
        self.encoder.format()
    }

    /// Time base of emitted packet timestamps (1 / sample_rate)
    pub fn time_base(&self) -> Rational {
        Rational::new(1, self.encoder.rate() as i64)
    }

    /// Samples covered by the packets emitted so far
    pub fn samples_written(&self) -> i64 {
        self.samples_written
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl FrameSink for Encoder {
    fn make_frame(&self) -> Frame {
        Encoder::make_frame(self)
    }

    fn write_frame(&mut self, frame: Frame) -> Result<()> {
        Encoder::write_frame(self, frame)
    }

    fn flush(&mut self) -> Result<()> {
        Encoder::flush(self)
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        if self.sent_frames && !self.flushed {
            if let Err(e) = self.flush() {
                tracing::error!(stream_index = self.stream_index, error = %e, "flushing encoder on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::util::format::sample::Type;

    #[derive(Default)]
    struct CollectSink {
        packets: Vec<(usize, Option<i64>, Option<i64>, i64, usize)>,
    }

    impl PacketSink for CollectSink {
        fn write_next_packet(&mut self, packet: Packet, stream_index: usize) -> Result<()> {
            self.packets.push((
                stream_index,
                packet.pts(),
                packet.dts(),
                packet.duration(),
                packet.size(),
            ));
            Ok(())
        }
    }

    fn pcm_encoder(sink: Rc<RefCell<CollectSink>>) -> Encoder {
        crate::ffmpeg_utils::init().unwrap();
        let spec = AudioStreamSpec::new(codec::Id::PCM_S16LE, 8000, 1, Sample::I16(Type::Packed));
        Encoder::open(&spec, 3, sink, false, &EncoderConfig::default()).unwrap()
    }

    #[test]
    fn test_channel_layout_for() {
        assert_eq!(channel_layout_for(1), Some(ChannelLayout::MONO));
        assert_eq!(channel_layout_for(2), Some(ChannelLayout::STEREO));
        assert_eq!(channel_layout_for(6), Some(ChannelLayout::_5POINT1));
        assert_eq!(channel_layout_for(0), None);
        assert_eq!(channel_layout_for(9), None);
    }

    #[test]
    fn test_pcm_frame_size_falls_back_to_config() {
        let sink = Rc::new(RefCell::new(CollectSink::default()));
        let encoder = pcm_encoder(sink);
        assert_eq!(encoder.frame_size(), 1152);
        assert_eq!(encoder.time_base(), Rational::new(1, 8000));

        let frame = encoder.make_frame();
        assert_eq!(frame.samples(), 1152);
        assert_eq!(frame.rate(), 8000);
        assert_eq!(frame.format(), Sample::I16(Type::Packed));
    }

    #[test]
    fn test_packets_are_gap_free() {
        let sink = Rc::new(RefCell::new(CollectSink::default()));
        let mut encoder = pcm_encoder(sink.clone());

        for _ in 0..3 {
            let frame = encoder.make_frame();
            encoder.write_frame(frame).unwrap();
        }
        let mut last = encoder.make_frame();
        last.set_samples(100);
        encoder.write_frame(last).unwrap();
        encoder.flush().unwrap();

        let packets = &sink.borrow().packets;
        let mut expected = 0;
        for &(stream, pts, dts, duration, size) in packets {
            assert_eq!(stream, 3);
            assert_eq!(pts, Some(expected));
            assert_eq!(dts, Some(expected));
            assert!(duration > 0);
            assert_eq!(size, duration as usize * 2);
            expected += duration;
        }
        assert_eq!(expected, 3 * 1152 + 100);
        assert_eq!(encoder.samples_written(), expected);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let sink = Rc::new(RefCell::new(CollectSink::default()));
        let mut encoder = pcm_encoder(sink.clone());
        let frame = encoder.make_frame();
        encoder.write_frame(frame).unwrap();
        encoder.flush().unwrap();
        let count = sink.borrow().packets.len();
        encoder.flush().unwrap();
        assert_eq!(sink.borrow().packets.len(), count);
        assert!(encoder.is_flushed());
        assert!(encoder.write_frame(Frame::empty()).is_err());
    }

    #[test]
    fn test_drop_flushes() {
        let sink = Rc::new(RefCell::new(CollectSink::default()));
        {
            let mut encoder = pcm_encoder(sink.clone());
            let frame = encoder.make_frame();
            encoder.write_frame(frame).unwrap();
        }
        let total: i64 = sink.borrow().packets.iter().map(|p| p.3).sum();
        assert_eq!(total, 1152);
    }

    #[test]
    fn test_unknown_channel_count_rejected() {
        crate::ffmpeg_utils::init().unwrap();
        let sink: Rc<RefCell<dyn PacketSink>> = Rc::new(RefCell::new(CollectSink::default()));
        let spec = AudioStreamSpec::new(codec::Id::PCM_S16LE, 8000, 12, Sample::I16(Type::Packed));
        let err = Encoder::open(&spec, 0, sink, false, &EncoderConfig::default()).err();
        assert!(matches!(err, Some(PipelineError::UnsupportedMedia(_))));
    }
}
