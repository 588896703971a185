//! Container demuxing over an arbitrary byte stream
//!
//! A [`Demuxer`] reads packets of every stream from one container. Each
//! [`Decoder`] it hands out pulls packets for its own stream through the
//! shared [`PacketSource`]; packets of the other live streams that turn up
//! on the way are parked in per-stream queues until their decoder asks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Seek};
use std::ptr;
use std::rc::Rc;

use ffmpeg_next as ffmpeg;

use crate::codec::{Decoder, PacketSource};
use crate::config::{DecoderConfig, PipelineConfig};
use crate::error::{FfmpegError, PipelineError, Result};
use crate::ffmpeg_utils::{self, io::IoAdapter};
use crate::media::{Packet, StreamInfo};

/// Per-stream packet queues.
///
/// Only streams marked active buffer anything, so a container with many
/// streams costs nothing for the ones nobody decodes.
#[derive(Debug, Default)]
struct StreamQueues {
    queues: Vec<VecDeque<Packet>>,
    active: Vec<bool>,
}

impl StreamQueues {
    fn new(streams: usize) -> Self {
        Self {
            queues: (0..streams).map(|_| VecDeque::new()).collect(),
            active: vec![false; streams],
        }
    }

    fn activate(&mut self, stream_index: usize) {
        if let Some(active) = self.active.get_mut(stream_index) {
            *active = true;
        }
    }

    fn release(&mut self, stream_index: usize) {
        if let Some(active) = self.active.get_mut(stream_index) {
            *active = false;
        }
        if let Some(queue) = self.queues.get_mut(stream_index) {
            queue.clear();
        }
    }

    fn is_active(&self, stream_index: usize) -> bool {
        self.active.get(stream_index).copied().unwrap_or(false)
    }

    fn queued(&self, stream_index: usize) -> usize {
        self.queues.get(stream_index).map_or(0, VecDeque::len)
    }

    /// Next packet of `stream_index`, pulling from `read` until one shows up
    fn next_for(
        &mut self,
        stream_index: usize,
        mut read: impl FnMut() -> Option<Packet>,
    ) -> Option<Packet> {
        if let Some(packet) = self
            .queues
            .get_mut(stream_index)
            .and_then(VecDeque::pop_front)
        {
            return Some(packet);
        }

        loop {
            let packet = read()?;
            let index = packet.stream_index();
            if index == stream_index {
                return Some(packet);
            }
            if self.is_active(index) {
                self.queues[index].push_back(packet);
            }
        }
    }
}

struct DemuxState<S> {
    // Field order is drop order: the format context must be closed before
    // the AVIO context it reads through is freed.
    input: ffmpeg::format::context::Input,
    queues: StreamQueues,
    decoder_config: DecoderConfig,
    _io: IoAdapter<S>,
}

/// Next packet of any stream; parse errors end the input
fn read_packet(input: &mut ffmpeg::format::context::Input) -> Option<Packet> {
    let mut packet = ffmpeg::Packet::empty();
    match packet.read(input) {
        Ok(()) => Some(Packet::from(packet)),
        Err(ffmpeg::Error::Eof) => None,
        Err(e) => {
            tracing::warn!(error = %e, "reading packet failed, treating as end of input");
            None
        }
    }
}

impl<S> PacketSource for DemuxState<S> {
    fn read_next_packet(&mut self, stream_index: usize) -> Option<Packet> {
        let Self { input, queues, .. } = self;
        queues.next_for(stream_index, || read_packet(input))
    }

    fn release(&mut self, stream_index: usize) {
        tracing::debug!(stream_index, "decoder released stream");
        self.queues.release(stream_index);
    }
}

/// Reads one container from a byte stream.
///
/// Cheap to keep around: decoders hold their own reference to the demuxing
/// state, so the `Demuxer` handle may be dropped before them.
pub struct Demuxer<S> {
    state: Rc<RefCell<DemuxState<S>>>,
}

impl<S: Read + Seek + 'static> Demuxer<S> {
    /// Open a container with the default configuration
    pub fn new(source: S) -> Result<Self> {
        Self::with_config(source, &PipelineConfig::default())
    }

    /// Open a container, probing its streams
    pub fn with_config(source: S, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        ffmpeg_utils::init()?;

        let mut io = IoAdapter::reader(source, config.io.buffer_size)?;

        // SAFETY: the format context only reaches the stream through `io`,
        // which is stored next to it and outlives it (see `DemuxState`).
        let input = unsafe {
            let mut ctx = ffmpeg::ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(FfmpegError::OpenInput(
                    "failed to allocate format context".to_string(),
                )
                .into());
            }
            (*ctx).pb = io.as_mut_ptr();

            // On failure the context is freed by FFmpeg and `ctx` is nulled.
            let ret =
                ffmpeg::ffi::avformat_open_input(&mut ctx, ptr::null(), ptr::null(), ptr::null_mut());
            if ret < 0 {
                let err = ffmpeg::Error::from(ret);
                tracing::error!(error = %err, "could not open input");
                return Err(FfmpegError::OpenInput(err.to_string()).into());
            }

            let ret = ffmpeg::ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffmpeg::ffi::avformat_close_input(&mut ctx);
                let err = ffmpeg::Error::from(ret);
                tracing::error!(error = %err, "could not find stream information");
                return Err(FfmpegError::FindStreamInfo(err.to_string()).into());
            }

            ffmpeg::format::context::Input::wrap(ctx)
        };

        let streams = input.nb_streams() as usize;
        tracing::debug!(
            format = input.format().name(),
            streams,
            "opened input container"
        );

        Ok(Self {
            state: Rc::new(RefCell::new(DemuxState {
                input,
                queues: StreamQueues::new(streams),
                decoder_config: config.decoder.clone(),
                _io: io,
            })),
        })
    }

    /// Open a decoder for stream `index`.
    ///
    /// From now on packets of this stream read while serving other streams
    /// are kept until the decoder asks for them. A stream has at most one
    /// live decoder at a time.
    pub fn decoder(&self, index: usize) -> Result<Decoder> {
        let source: Rc<RefCell<dyn PacketSource>> = self.state.clone();
        let decoder = {
            let state = self.state.borrow();
            if state.queues.is_active(index) {
                return Err(PipelineError::StreamInUse(index));
            }
            let stream = state
                .input
                .stream(index)
                .ok_or_else(|| PipelineError::StreamNotFound(format!("stream {}", index)))?;
            Decoder::open(&stream, source, &state.decoder_config)?
        };
        self.state.borrow_mut().queues.activate(index);
        Ok(decoder)
    }
}

impl<S> Demuxer<S> {
    pub fn streams_count(&self) -> usize {
        self.state.borrow().input.nb_streams() as usize
    }

    pub fn media_type(&self, index: usize) -> Option<ffmpeg::media::Type> {
        self.state
            .borrow()
            .input
            .stream(index)
            .map(|s| s.parameters().medium())
    }

    /// Human-readable media type of stream `index` ("Audio", "Subtitle", ...)
    pub fn media_type_name(&self, index: usize) -> &'static str {
        self.media_type(index)
            .map(ffmpeg_utils::media_type_name)
            .unwrap_or("Unknown")
    }

    pub fn stream_info(&self, index: usize) -> Option<StreamInfo> {
        self.state
            .borrow()
            .input
            .stream(index)
            .map(|s| StreamInfo::from_stream(&s))
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.state
            .borrow()
            .input
            .streams()
            .map(|s| StreamInfo::from_stream(&s))
            .collect()
    }

    /// Index of the stream FFmpeg considers the best of `media_type`
    pub fn best_stream(&self, media_type: ffmpeg::media::Type) -> Option<usize> {
        self.state
            .borrow()
            .input
            .streams()
            .best(media_type)
            .map(|s| s.index())
    }

    /// Next packet of any stream, straight from the container.
    ///
    /// Bypasses the per-stream queues; meant for feeding decoders manually
    /// with [`Decoder::write_packet`].
    pub fn read_packet(&self) -> Option<Packet> {
        read_packet(&mut self.state.borrow_mut().input)
    }

    /// Number of packets waiting for the decoder of `index`
    pub fn queued_packets(&self, index: usize) -> usize {
        self.state.borrow().queues.queued(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(stream: usize, pts: i64) -> Packet {
        let mut p = Packet::copy(&[stream as u8]);
        p.set_stream(stream);
        p.set_pts(Some(pts));
        p
    }

    fn source(order: &[(usize, i64)]) -> impl FnMut() -> Option<Packet> {
        let mut packets: VecDeque<Packet> = order.iter().map(|&(s, t)| packet(s, t)).collect();
        move || packets.pop_front()
    }

    #[test]
    fn test_queues_other_active_streams() {
        crate::ffmpeg_utils::init().unwrap();
        let mut queues = StreamQueues::new(2);
        queues.activate(0);
        queues.activate(1);
        let mut read = source(&[(1, 0), (1, 1), (0, 0), (1, 2), (0, 1)]);

        let p = queues.next_for(0, &mut read).unwrap();
        assert_eq!((p.stream_index(), p.pts()), (0, Some(0)));
        assert_eq!(queues.queued(1), 2);

        let pts: Vec<_> = std::iter::from_fn(|| queues.next_for(1, &mut read))
            .map(|p| p.pts())
            .collect();
        // Stream 1 gets its own packets in order; stream 0's next one is parked.
        assert_eq!(pts, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(queues.queued(0), 1);
        assert_eq!(queues.next_for(0, &mut read).unwrap().pts(), Some(1));
        assert!(queues.next_for(0, &mut read).is_none());
    }

    #[test]
    fn test_inactive_streams_are_discarded() {
        crate::ffmpeg_utils::init().unwrap();
        let mut queues = StreamQueues::new(3);
        queues.activate(0);
        let mut read = source(&[(2, 0), (1, 0), (0, 0), (2, 1)]);
        assert_eq!(queues.next_for(0, &mut read).unwrap().pts(), Some(0));
        assert_eq!(queues.queued(1), 0);
        assert_eq!(queues.queued(2), 0);
        assert!(queues.next_for(0, &mut read).is_none());
    }

    #[test]
    fn test_release_clears_queue() {
        crate::ffmpeg_utils::init().unwrap();
        let mut queues = StreamQueues::new(2);
        queues.activate(0);
        queues.activate(1);
        let mut read = source(&[(1, 0), (1, 1), (0, 0), (1, 2)]);
        queues.next_for(0, &mut read);
        assert_eq!(queues.queued(1), 2);

        queues.release(1);
        assert_eq!(queues.queued(1), 0);
        assert!(!queues.is_active(1));
        assert!(queues.next_for(0, &mut read).is_none());
        assert_eq!(queues.queued(1), 0);
    }

    #[test]
    fn test_reactivated_stream_buffers_again() {
        crate::ffmpeg_utils::init().unwrap();
        let mut queues = StreamQueues::new(2);
        queues.activate(0);
        queues.activate(1);
        queues.release(1);
        assert!(!queues.is_active(1));
        queues.activate(1);
        assert!(queues.is_active(1));

        let mut read = source(&[(1, 0), (0, 0)]);
        assert_eq!(queues.next_for(0, &mut read).unwrap().pts(), Some(0));
        assert_eq!(queues.queued(1), 1);
    }

    #[test]
    fn test_out_of_range_stream() {
        let mut queues = StreamQueues::new(1);
        queues.activate(5);
        queues.release(5);
        assert!(!queues.is_active(5));
        assert!(queues.next_for(5, || None).is_none());
    }
}
