//! FFmpeg module - provides wrappers and utilities for FFmpeg library access
//!
//! This module handles:
//! - FFmpeg initialization
//! - Routing FFmpeg's own log output into `tracing`
//! - Custom AVIOContext bridging Rust byte streams to the engine
//! - Safe accessors for fields `ffmpeg-next` does not expose

pub mod helpers;
pub mod io;
pub mod utils;

pub use ffmpeg_next as ffmpeg;
#[allow(unused_imports)]
pub use utils::*;

use std::sync::OnceLock;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the FFmpeg library.
///
/// Safe to call any number of times; only the first call does any work. Every
/// pipeline constructor calls it, so applications only need it when they touch
/// `ffmpeg-next` directly before building a pipeline.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    INIT.get_or_init(|| {
        let result = ffmpeg::init().map_err(|e| e.to_string());
        if result.is_ok() {
            tracing::debug!("FFmpeg initialized");
        }
        result
    })
    .clone()
    .map_err(|e| crate::error::FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e)))
}

/// Install an FFmpeg log callback that forwards engine messages to `tracing`.
///
/// Messages are emitted under the `ffmpeg` target at a level matching the
/// engine's own, so the application's subscriber decides what is shown.
/// Known benign messages are dropped.
///
/// **Safety & Ordering:** Must be called after `init()` and before any threading begins,
/// because altering the global log callback is not thread-safe.
pub fn install_log_filter() {
    // SAFETY: both functions modify global FFmpeg state and are safe to call
    // after `ffmpeg::init()`. They are called once at startup.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages that are expected side-effects of manual skip handling and custom IO.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
    "Estimating duration from bitrate, this may be inaccurate",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    // Respect the configured log level
    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    // Format the message using FFmpeg's own vsnprintf helper
    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }

    for suppressed in SUPPRESSED_MESSAGES {
        if msg.contains(suppressed) {
            return;
        }
    }

    match level {
        l if l <= ffmpeg_next::ffi::AV_LOG_ERROR as i32 => {
            tracing::error!(target: "ffmpeg", "{}", msg)
        }
        l if l <= ffmpeg_next::ffi::AV_LOG_WARNING as i32 => {
            tracing::warn!(target: "ffmpeg", "{}", msg)
        }
        l if l <= ffmpeg_next::ffi::AV_LOG_INFO as i32 => {
            tracing::info!(target: "ffmpeg", "{}", msg)
        }
        _ => tracing::debug!(target: "ffmpeg", "{}", msg),
    }
}

/// Get the version information of the linked libavcodec.
pub fn version_info() -> String {
    // SAFETY: `avcodec_version` only reads a compile-time constant.
    let version = unsafe { ffmpeg_next::ffi::avcodec_version() };
    format!(
        "libavcodec {}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}
