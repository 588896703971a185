//! Container muxer
//!
//! Writes packets produced by one or more [`Encoder`]s into a container on a
//! byte sink. Encoders hold a shared handle to the muxing state and push
//! their packets into it as soon as the codec releases them.

use std::cell::RefCell;
use std::ffi::CString;
use std::io::{Seek, Write};
use std::ptr;
use std::rc::Rc;

use ffmpeg_next as ffmpeg;

use crate::codec::{AudioStreamSpec, Encoder, PacketSink};
use crate::config::{EncoderConfig, PipelineConfig};
use crate::error::{FfmpegError, PipelineError, Result};
use crate::ffmpeg_utils::{self, helpers, io::IoAdapter};
use crate::media::Packet;

struct MuxState<S> {
    output: ffmpeg::format::context::Output,
    /// Time base each stream's encoder stamps its packets in
    encoder_time_bases: Vec<ffmpeg::Rational>,
    header_written: bool,
    header_failed: bool,
    trailer_written: bool,
    interleaved: bool,
    encoder_config: EncoderConfig,
    // Taken by `Muxer::finish`; otherwise freed after `output` is dropped.
    io: Option<IoAdapter<S>>,
}

impl<S> MuxState<S> {
    fn ensure_header(&mut self) -> Result<()> {
        if self.header_failed {
            return Err(FfmpegError::WriteHeader("header previously failed".to_string()).into());
        }
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        self.output.write_header().map_err(|e| {
            self.header_failed = true;
            tracing::error!(error = %e, "could not write container header");
            FfmpegError::WriteHeader(e.to_string())
        })?;
        Ok(())
    }

    /// Write the header if nothing was written yet, then the trailer.
    /// Runs once.
    fn finalize(&mut self) -> Result<()> {
        if self.trailer_written {
            return Ok(());
        }
        self.trailer_written = true;
        self.ensure_header()?;
        self.output.write_trailer().map_err(|e| {
            tracing::error!(error = %e, "could not write container trailer");
            FfmpegError::WriteTrailer(e.to_string())
        })?;
        tracing::debug!(
            streams = self.encoder_time_bases.len(),
            "finished container"
        );
        Ok(())
    }
}

impl<S> PacketSink for MuxState<S> {
    fn write_next_packet(&mut self, packet: Packet, stream_index: usize) -> Result<()> {
        if self.trailer_written {
            return Err(PipelineError::Muxing(format!(
                "packet for stream {} arrived after the trailer",
                stream_index
            )));
        }
        let encoder_tb = *self.encoder_time_bases.get(stream_index).ok_or_else(|| {
            PipelineError::StreamNotFound(format!("output stream {}", stream_index))
        })?;
        self.ensure_header()?;

        // The container may pick its own time base while writing the header.
        let stream_tb = self
            .output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| PipelineError::StreamNotFound(format!("output stream {}", stream_index)))?;

        let mut packet = packet.into_inner();
        helpers::packet_clear_side_data(&mut packet);
        packet.set_stream(stream_index);
        packet.set_position(-1);
        packet.rescale_ts(encoder_tb, stream_tb);

        let written = if self.interleaved {
            packet.write_interleaved(&mut self.output)
        } else {
            packet.write(&mut self.output).map(|_| ())
        };
        written.map_err(|e| {
            FfmpegError::WritePacket(format!("stream {}: {}", stream_index, e)).into()
        })
    }
}

impl<S> Drop for MuxState<S> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!(error = %e, "finalizing container on drop failed");
        }
        helpers::detach_avio(&mut self.output);
    }
}

/// Writes one container to a byte stream.
pub struct Muxer<S> {
    state: Rc<RefCell<MuxState<S>>>,
}

impl<S: Write + Seek + 'static> Muxer<S> {
    /// Create a `format_name` container ("wav", "matroska", ...) with the
    /// default configuration
    pub fn new(sink: S, format_name: &str) -> Result<Self> {
        Self::with_config(sink, format_name, &PipelineConfig::default())
    }

    pub fn with_config(sink: S, format_name: &str, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        ffmpeg_utils::init()?;

        let c_format = CString::new(format_name).map_err(|_| {
            FfmpegError::MuxerCreate(format!("invalid format name {:?}", format_name))
        })?;
        let mut io = IoAdapter::writer(sink, config.io.buffer_size)?;

        // SAFETY: the format context only reaches the sink through `io`,
        // which `MuxState` keeps alive until the context has been dropped.
        let output = unsafe {
            let mut ctx: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
            let ret = ffmpeg::ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                c_format.as_ptr(),
                ptr::null(),
            );
            if ret < 0 || ctx.is_null() {
                let err = ffmpeg::Error::from(ret);
                tracing::error!(format = format_name, error = %err, "could not create output context");
                return Err(FfmpegError::MuxerCreate(format!("{}: {}", format_name, err)).into());
            }
            (*ctx).pb = io.as_mut_ptr();
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;
            ffmpeg::format::context::Output::wrap(ctx)
        };

        tracing::debug!(format = format_name, "opened output container");

        Ok(Self {
            state: Rc::new(RefCell::new(MuxState {
                output,
                encoder_time_bases: Vec::new(),
                header_written: false,
                header_failed: false,
                trailer_written: false,
                interleaved: config.muxer.interleaved,
                encoder_config: config.encoder.clone(),
                io: Some(io),
            })),
        })
    }

    /// Add an audio stream and open the encoder that feeds it.
    ///
    /// All streams must be added before the first packet is written.
    pub fn add_audio_stream(&self, spec: &AudioStreamSpec) -> Result<Encoder> {
        let sink: Rc<RefCell<dyn PacketSink>> = self.state.clone();
        let mut state = self.state.borrow_mut();
        if state.header_written {
            return Err(PipelineError::Muxing(
                "streams cannot be added after the header was written".to_string(),
            ));
        }

        let global_header = state
            .output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);
        let stream_index = state.output.nb_streams() as usize;
        let encoder = Encoder::open(spec, stream_index, sink, global_header, &state.encoder_config)?;

        let time_base = ffmpeg::Rational::new(1, spec.sample_rate as i32);
        {
            let mut stream = state
                .output
                .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
                .map_err(|e| FfmpegError::StreamConfig(format!("add_stream: {}", e)))?;
            stream.set_parameters(encoder.codec_parameters());
            helpers::stream_reset_codec_tag(&mut stream);
            stream.set_time_base(time_base);
        }
        state.encoder_time_bases.push(time_base);

        tracing::debug!(
            stream_index,
            codec = spec.codec.name(),
            global_header,
            "added audio stream"
        );
        Ok(encoder)
    }

    /// Finish the container and hand the sink back.
    ///
    /// Every encoder must have been dropped first, which also flushes them.
    pub fn finish(self) -> Result<S> {
        let cell = Rc::try_unwrap(self.state).map_err(|_| {
            PipelineError::Muxing("encoders are still attached to the muxer".to_string())
        })?;
        let mut state = cell.into_inner();
        let finalized = state.finalize();
        helpers::detach_avio(&mut state.output);
        let io = state.io.take();
        drop(state);
        finalized?;
        io.map(IoAdapter::into_inner)
            .ok_or_else(|| PipelineError::Muxing("output sink already taken".to_string()))
    }
}

impl<S> Muxer<S> {
    pub fn streams_count(&self) -> usize {
        self.state.borrow().encoder_time_bases.len()
    }

    /// Name of the container format
    pub fn format_name(&self) -> String {
        self.state.borrow().output.format().name().to_string()
    }
}
