//! Stream decoder
//!
//! Wraps an FFmpeg `AVCodecContext` for one audio or subtitle stream of a
//! demuxed container. Audio frames are produced on demand: whenever the codec
//! needs more input the decoder pulls the next packet of its stream from the
//! shared [`PacketSource`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::format::sample::Sample;

use crate::codec::{FrameSource, PacketSource};
use crate::config::DecoderConfig;
use crate::error::{FfmpegError, PipelineError, Result};
use crate::ffmpeg_utils::{self, helpers, MICROSECOND_TIME_BASE, MILLISECOND_TIME_BASE};
use crate::media::{time_base_or_default, Frame, Packet};
use crate::rational::Rational;

enum Codec {
    Audio(ffmpeg::decoder::Audio),
    Subtitle(ffmpeg::decoder::Subtitle),
}

/// Where a decoder is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Packets are still being pulled from the source
    Streaming,
    /// The source is exhausted; buffered frames are being drained
    Draining,
    /// Nothing more will be produced
    Exhausted,
}

/// Decoder bound to one stream of a container
pub struct Decoder {
    codec: Codec,
    stream_index: usize,
    media_type: ffmpeg::media::Type,
    codec_id: ffmpeg::codec::Id,
    stream_time_base: ffmpeg::Rational,
    start_time: Option<Rational>,
    state: DecoderState,
    subtitles: VecDeque<ffmpeg::Subtitle>,
    source: Rc<RefCell<dyn PacketSource>>,
}

impl Decoder {
    /// Open a decoder for `stream`, pulling packets from `source`.
    pub(crate) fn open(
        stream: &ffmpeg::format::stream::Stream,
        source: Rc<RefCell<dyn PacketSource>>,
        config: &DecoderConfig,
    ) -> Result<Self> {
        let stream_index = stream.index();
        let params = stream.parameters();
        let media_type = params.medium();
        let codec_id = params.id();

        let mut context = ffmpeg::codec::Context::from_parameters(params).map_err(|e| {
            FfmpegError::DecoderCreate(format!(
                "Failed to create codec context for stream {}: {}",
                stream_index, e
            ))
        })?;
        helpers::codec_context_set_pkt_timebase(&mut context, stream.time_base());

        let open_error = |e: ffmpeg::Error| -> PipelineError {
            match e {
                ffmpeg::Error::DecoderNotFound => {
                    FfmpegError::DecoderNotFound(format!("{:?}", codec_id)).into()
                }
                e => FfmpegError::DecoderCreate(format!(
                    "Failed to open decoder for stream {}: {}",
                    stream_index, e
                ))
                .into(),
            }
        };

        let codec = match media_type {
            ffmpeg::media::Type::Audio => {
                if config.manual_skip {
                    helpers::codec_context_set_skip_manual(&mut context);
                }
                Codec::Audio(context.decoder().audio().map_err(open_error)?)
            }
            ffmpeg::media::Type::Subtitle => {
                Codec::Subtitle(context.decoder().subtitle().map_err(open_error)?)
            }
            other => {
                return Err(PipelineError::UnsupportedMedia(format!(
                    "{} stream {}",
                    ffmpeg_utils::media_type_name(other),
                    stream_index
                )))
            }
        };

        let start_time = match stream.start_time() {
            ts if ts == ffmpeg_utils::NOPTS_VALUE => None,
            ts => Some(Rational::from_ticks(
                ts,
                time_base_or_default(stream.time_base()),
            )),
        };

        tracing::debug!(
            stream_index,
            codec = codec_id.name(),
            media_type = ffmpeg_utils::media_type_name(media_type),
            "opened decoder"
        );

        Ok(Self {
            codec,
            stream_index,
            media_type,
            codec_id,
            stream_time_base: stream.time_base(),
            start_time,
            state: DecoderState::Streaming,
            subtitles: VecDeque::new(),
            source,
        })
    }

    /// Next decoded audio frame, `None` once the stream is over.
    ///
    /// Engine failures end the stream early; they are logged, not returned.
    pub fn read(&mut self) -> Option<Frame> {
        let Self {
            codec,
            stream_index,
            state,
            source,
            ..
        } = self;
        let stream_index = *stream_index;
        let Codec::Audio(decoder) = codec else {
            tracing::warn!(stream_index, "read() called on a subtitle decoder");
            return None;
        };

        loop {
            if *state == DecoderState::Exhausted {
                return None;
            }

            let mut frame = ffmpeg::util::frame::Audio::empty();
            match decoder.receive_frame(&mut frame) {
                Ok(()) => return Some(Frame::from(frame)),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(ffmpeg::Error::Eof) => {
                    *state = DecoderState::Exhausted;
                    return None;
                }
                Err(e) => {
                    tracing::warn!(stream_index, error = %e, "receive_frame failed");
                    *state = DecoderState::Exhausted;
                    return None;
                }
            }

            // The codec wants more input.
            if *state == DecoderState::Draining {
                *state = DecoderState::Exhausted;
                return None;
            }
            let packet = source.borrow_mut().read_next_packet(stream_index);
            match packet {
                Some(packet) => match decoder.send_packet(&*packet) {
                    Ok(()) => {}
                    Err(ffmpeg::Error::InvalidData) => {
                        tracing::debug!(stream_index, "send_packet: skipping invalid packet");
                    }
                    Err(e) => {
                        tracing::warn!(stream_index, error = %e, "send_packet failed");
                        *state = DecoderState::Exhausted;
                        return None;
                    }
                },
                None => {
                    tracing::debug!(stream_index, "source exhausted, draining decoder");
                    *state = DecoderState::Draining;
                    match decoder.send_eof() {
                        Ok(()) | Err(ffmpeg::Error::Eof) => {}
                        Err(e) => {
                            tracing::warn!(stream_index, error = %e, "send_eof failed");
                            *state = DecoderState::Exhausted;
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Feed one packet to the codec directly.
    ///
    /// Subtitle packets are decoded immediately and any resulting subtitles
    /// are queued for [`read_subtitle`](Self::read_subtitle). Corrupt audio
    /// packets are skipped.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let stream_index = self.stream_index;
        match &mut self.codec {
            Codec::Audio(decoder) => match decoder.send_packet(&**packet) {
                Ok(()) => Ok(()),
                Err(ffmpeg::Error::InvalidData) => {
                    tracing::debug!(stream_index, "send_packet: skipping invalid packet");
                    Ok(())
                }
                Err(e) => Err(FfmpegError::DecodePacket(format!(
                    "send_packet error on stream {}: {}",
                    stream_index, e
                ))
                .into()),
            },
            Codec::Subtitle(decoder) => {
                let mut subtitle = ffmpeg::Subtitle::new();
                let got = decoder.decode(&**packet, &mut subtitle).map_err(|e| {
                    FfmpegError::DecodePacket(format!(
                        "subtitle decode error on stream {}: {}",
                        stream_index, e
                    ))
                })?;
                if got {
                    backfill_subtitle_timing(&mut subtitle, packet, self.stream_time_base);
                    self.subtitles.push_back(subtitle);
                }
                Ok(())
            }
        }
    }

    /// Next decoded subtitle, pulling packets from the source while none is
    /// queued. Malformed packets are skipped.
    pub fn read_subtitle(&mut self) -> Option<ffmpeg::Subtitle> {
        loop {
            if let Some(subtitle) = self.subtitles.pop_front() {
                return Some(subtitle);
            }
            if self.state != DecoderState::Streaming || !self.is_subtitle() {
                return None;
            }
            let packet = self
                .source
                .borrow_mut()
                .read_next_packet(self.stream_index);
            match packet {
                Some(packet) => {
                    if let Err(e) = self.write_packet(&packet) {
                        tracing::warn!(stream_index = self.stream_index, error = %e, "skipping subtitle packet");
                    }
                }
                None => self.state = DecoderState::Exhausted,
            }
        }
    }

    fn is_subtitle(&self) -> bool {
        matches!(self.codec, Codec::Subtitle(_))
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn media_type(&self) -> ffmpeg::media::Type {
        self.media_type
    }

    pub fn codec_id(&self) -> ffmpeg::codec::Id {
        self.codec_id
    }

    /// Short codec name, e.g. "mp3" or "subrip"
    pub fn codec_name(&self) -> &'static str {
        self.codec_id.name()
    }

    /// Time base of packet and frame timestamps
    pub fn time_base(&self) -> Rational {
        time_base_or_default(self.stream_time_base)
    }

    /// First timestamp of the stream in seconds, if the container knows it
    pub fn start_time(&self) -> Option<Rational> {
        self.start_time
    }

    /// Sample rate of decoded frames, zero for subtitles
    pub fn sample_rate(&self) -> u32 {
        match &self.codec {
            Codec::Audio(d) => d.rate(),
            Codec::Subtitle(_) => 0,
        }
    }

    /// Channel count of decoded frames, zero for subtitles
    pub fn channels(&self) -> u16 {
        match &self.codec {
            Codec::Audio(d) => d.channels(),
            Codec::Subtitle(_) => 0,
        }
    }

    /// Sample format of decoded frames, `Sample::None` for subtitles
    pub fn sample_format(&self) -> Sample {
        match &self.codec {
            Codec::Audio(d) => d.format(),
            Codec::Subtitle(_) => Sample::None,
        }
    }
}

/// Fill in timing some subtitle codecs leave unset, from the packet.
fn backfill_subtitle_timing(
    subtitle: &mut ffmpeg::Subtitle,
    packet: &Packet,
    time_base: ffmpeg::Rational,
) {
    if subtitle.pts().is_none() {
        if let Some(pts) = packet.pts() {
            subtitle.set_pts(Some(ffmpeg_utils::rescale_ts(
                pts,
                time_base,
                MICROSECOND_TIME_BASE,
            )));
        }
    }
    if subtitle.end() == 0 {
        let end = ffmpeg_utils::rescale_ts(packet.duration(), time_base, MILLISECOND_TIME_BASE);
        subtitle.set_end(end.clamp(0, u32::MAX as i64) as u32);
    }
}

impl FrameSource for Decoder {
    fn next_frame(&mut self) -> Option<Frame> {
        self.read()
    }

    fn time_base(&self) -> Rational {
        Decoder::time_base(self)
    }

    fn sample_format(&self) -> Sample {
        Decoder::sample_format(self)
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        if let Ok(mut source) = self.source.try_borrow_mut() {
            source.release(self.stream_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_missing_timing() {
        crate::ffmpeg_utils::init().unwrap();
        let mut packet = Packet::copy(b"x");
        packet.set_pts(Some(50));
        packet.set_duration(650);
        let mut subtitle = ffmpeg::Subtitle::new();
        subtitle.set_pts(None);
        subtitle.set_end(0);

        backfill_subtitle_timing(&mut subtitle, &packet, ffmpeg::Rational(1, 1000));
        assert_eq!(subtitle.pts(), Some(50_000));
        assert_eq!(subtitle.end(), 650);
    }

    #[test]
    fn test_backfill_keeps_codec_timing() {
        crate::ffmpeg_utils::init().unwrap();
        let mut packet = Packet::copy(b"x");
        packet.set_pts(Some(50));
        packet.set_duration(650);
        let mut subtitle = ffmpeg::Subtitle::new();
        subtitle.set_pts(Some(7));
        subtitle.set_end(100);

        backfill_subtitle_timing(&mut subtitle, &packet, ffmpeg::Rational(1, 1000));
        assert_eq!(subtitle.pts(), Some(7));
        assert_eq!(subtitle.end(), 100);
    }
}
