//! FFmpeg utility functions

use ffmpeg_next as ffmpeg;

/// Microsecond time base FFmpeg uses for subtitle presentation timestamps
pub const MICROSECOND_TIME_BASE: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

/// Millisecond time base of subtitle display offsets
pub const MILLISECOND_TIME_BASE: ffmpeg::Rational = ffmpeg::Rational(1, 1000);

/// `AV_NOPTS_VALUE`: timestamp not set
pub const NOPTS_VALUE: i64 = i64::MIN;

/// Convert timestamps from one timebase to another
pub fn rescale_ts(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
    unsafe { ffmpeg::ffi::av_rescale_q(ts, from.into(), to.into()) }
}

/// Get the media type name
pub fn media_type_name(media_type: ffmpeg::media::Type) -> &'static str {
    match media_type {
        ffmpeg::media::Type::Video => "Video",
        ffmpeg::media::Type::Audio => "Audio",
        ffmpeg::media::Type::Subtitle => "Subtitle",
        ffmpeg::media::Type::Data => "Data",
        ffmpeg::media::Type::Attachment => "Attachment",
        _ => "Unknown",
    }
}
