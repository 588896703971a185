//! Subtitle text extraction

use std::sync::OnceLock;

use regex::Regex;

use ffmpeg_next as ffmpeg;

/// Text of an ASS `Dialogue` event.
///
/// The first eight comma-separated fields (ReadOrder, Layer, Style, Name,
/// MarginL, MarginR, MarginV, Effect) are dropped and the rest is returned
/// verbatim, commas included. A line with fewer fields yields "".
pub fn text_from_ass(ass: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)^[^,]*,[^,]*,[^,]*,[^,]*,[^,]*,[^,]*,[^,]*,[^,]*,(.*)$")
            .expect("Invalid ASS regex")
    });
    re.captures(ass)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Check if a codec is a text-based subtitle format
pub fn is_text_subtitle_codec(codec_id: ffmpeg::codec::Id) -> bool {
    matches!(
        codec_id,
        ffmpeg::codec::Id::SUBRIP      // SRT
            | ffmpeg::codec::Id::ASS           // ASS/SSA
            | ffmpeg::codec::Id::SSA           // SSA
            | ffmpeg::codec::Id::MOV_TEXT      // QuickTime TTXT
            | ffmpeg::codec::Id::TEXT          // Plain text
            | ffmpeg::codec::Id::WEBVTT        // WebVTT
    )
}
