//! Custom AVIOContext over Rust byte streams
//!
//! [`IoAdapter`] lets the demuxer read from any `Read + Seek` value and the
//! muxer write to any `Write + Seek` value (files, `Cursor`s, pipes) instead
//! of a path FFmpeg opens itself.
//!
//! # Thread safety
//! An adapter is NOT thread-safe. The stream is reached through a raw pointer
//! handed to FFmpeg as the callback `opaque`, and FFmpeg may call `seek` from
//! within `write` (e.g. during `write_trailer`), so each adapter is owned by
//! exactly one demuxer or muxer on one thread.

use ffmpeg_next as ffmpeg;
use std::ffi::{c_int, c_void};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ptr;

use crate::error::FfmpegError;

/// `AVSEEK_SIZE`: report the stream size instead of seeking
const AVSEEK_SIZE: c_int = 0x10000;

/// `AVSEEK_FORCE`: hint only, may be ignored
const AVSEEK_FORCE: c_int = 0x20000;

/// Owns a byte stream and the AVIOContext whose callbacks forward to it.
pub struct IoAdapter<S> {
    ctx: *mut ffmpeg::ffi::AVIOContext,
    stream: *mut S,
    writable: bool,
}

impl<S: Read + Seek> IoAdapter<S> {
    /// Create a read-only context over `stream`
    pub fn reader(stream: S, buffer_size: usize) -> Result<Self, FfmpegError> {
        Self::alloc(stream, buffer_size, false, Some(read_packet::<S>), None)
    }
}

impl<S: Write + Seek> IoAdapter<S> {
    /// Create a write-only context over `stream`
    pub fn writer(stream: S, buffer_size: usize) -> Result<Self, FfmpegError> {
        Self::alloc(stream, buffer_size, true, None, Some(write_packet::<S>))
    }
}

type ReadFn = unsafe extern "C" fn(*mut c_void, *mut u8, c_int) -> c_int;
type WriteFn = unsafe extern "C" fn(*mut c_void, *const u8, c_int) -> c_int;
type SeekFn = unsafe extern "C" fn(*mut c_void, i64, c_int) -> i64;

impl<S: Seek> IoAdapter<S> {
    fn alloc(
        mut stream: S,
        buffer_size: usize,
        writable: bool,
        read: Option<ReadFn>,
        write: Option<WriteFn>,
    ) -> Result<Self, FfmpegError> {
        let buffer_size = c_int::try_from(buffer_size)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                FfmpegError::IoContext(format!("invalid buffer size {}", buffer_size))
            })?;

        // Pipes get no seek callback, so FFmpeg marks the context unseekable
        // and demuxers avoid seeking back.
        let seekable = stream.stream_position().is_ok();
        let seek: Option<SeekFn> = if seekable { Some(seek_packet::<S>) } else { None };

        // Box the stream to get a stable pointer for the callbacks.
        let stream = Box::into_raw(Box::new(stream));

        unsafe {
            let buffer = ffmpeg::ffi::av_malloc(buffer_size as usize) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(stream));
                return Err(FfmpegError::IoContext(
                    "failed to allocate AVIO buffer".to_string(),
                ));
            }

            let ctx = ffmpeg::ffi::avio_alloc_context(
                buffer,
                buffer_size,
                writable as c_int,
                stream as *mut c_void,
                read,
                write,
                seek,
            );
            if ctx.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(stream));
                return Err(FfmpegError::IoContext(
                    "failed to allocate AVIO context".to_string(),
                ));
            }

            tracing::debug!(buffer_size, writable, seekable, "allocated AVIO context");
            Ok(Self {
                ctx,
                stream,
                writable,
            })
        }
    }
}

impl<S> IoAdapter<S> {
    /// Raw context pointer, to be stored in `AVFormatContext::pb`.
    ///
    /// The pointer stays valid until the adapter is dropped or consumed.
    pub fn as_mut_ptr(&mut self) -> *mut ffmpeg::ffi::AVIOContext {
        self.ctx
    }

    /// Free the AVIO context and give the stream back.
    pub fn into_inner(mut self) -> S {
        self.free_context();
        let stream = std::mem::replace(&mut self.stream, ptr::null_mut());
        // SAFETY: `stream` came from `Box::into_raw` and is only reclaimed
        // here or in `drop`, which sees the null left behind.
        *unsafe { Box::from_raw(stream) }
    }

    fn free_context(&mut self) {
        if self.ctx.is_null() {
            return;
        }
        unsafe {
            if self.writable {
                ffmpeg::ffi::avio_flush(self.ctx);
            }
            // FFmpeg may have swapped the buffer, so free whatever the
            // context points at now rather than the one we allocated.
            ffmpeg::ffi::av_freep(&mut (*self.ctx).buffer as *mut *mut u8 as *mut c_void);
            ffmpeg::ffi::avio_context_free(&mut self.ctx);
        }
        self.ctx = ptr::null_mut();
    }
}

impl<S> Drop for IoAdapter<S> {
    fn drop(&mut self) {
        self.free_context();
        if !self.stream.is_null() {
            // SAFETY: see `into_inner`.
            drop(unsafe { Box::from_raw(self.stream) });
        }
    }
}

/// Wraps a pipe-like stream so every seek reports "unsupported".
///
/// FFmpeg then falls back to purely sequential access.
pub struct Unseekable<R>(pub R);

impl<R> Unseekable<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: Read> Read for Unseekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<W: Write> Write for Unseekable<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<R> Seek for Unseekable<R> {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "stream is not seekable",
        ))
    }
}

// C-compatible callbacks for FFmpeg

unsafe extern "C" fn read_packet<S: Read>(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let stream = &mut *(opaque as *mut S);
    let slice = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    loop {
        match stream.read(slice) {
            Ok(0) => return ffmpeg::ffi::AVERROR_EOF,
            Ok(n) => return n as c_int,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!(error = %e, "read from byte stream failed");
                return ffmpeg::ffi::AVERROR_EOF;
            }
        }
    }
}

unsafe extern "C" fn write_packet<S: Write>(
    opaque: *mut c_void,
    buf: *const u8,
    buf_size: c_int,
) -> c_int {
    let stream = &mut *(opaque as *mut S);
    let slice = std::slice::from_raw_parts(buf, buf_size.max(0) as usize);
    match stream.write_all(slice) {
        Ok(()) => buf_size,
        Err(e) => {
            tracing::warn!(error = %e, "write to byte stream failed");
            -1
        }
    }
}

unsafe extern "C" fn seek_packet<S: Seek>(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    let stream = &mut *(opaque as *mut S);
    let whence = whence & !AVSEEK_FORCE;

    if whence == AVSEEK_SIZE {
        return stream_size(stream).map(|n| n as i64).unwrap_or(-1);
    }

    let seek_from = match whence {
        0 => match u64::try_from(offset) {
            Ok(p) => SeekFrom::Start(p),
            Err(_) => return -1,
        },
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match stream.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

/// Total length of the stream, leaving the position where it was.
fn stream_size<S: Seek>(stream: &mut S) -> std::io::Result<u64> {
    let current = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    if end != current {
        stream.seek(SeekFrom::Start(current))?;
    }
    Ok(end)
}
