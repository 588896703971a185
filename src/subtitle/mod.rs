//! Subtitle module - text cues from subtitle streams
//!
//! Supports text-based formats (SRT, ASS/SSA, mov_text, WebVTT). Bitmap
//! subtitles (PGS, DVB, VobSub) are recognised and skipped.

pub mod reader;
pub mod text;

pub use reader::SubtitleReader;
pub use text::{is_text_subtitle_codec, text_from_ass};

use ffmpeg_next as ffmpeg;

use crate::rational::Rational;

/// A single subtitle cue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtitle {
    pub text: String,
    /// Start time in seconds
    pub begin: Rational,
    /// End time in seconds
    pub end: Rational,
}

impl Subtitle {
    pub fn new(text: impl Into<String>, begin: Rational, end: Rational) -> Self {
        Self {
            text: text.into(),
            begin,
            end,
        }
    }

    /// Cue from a decoded unit: pts is in microseconds, the display offsets
    /// in milliseconds.
    pub(crate) fn from_unit(unit: &ffmpeg::Subtitle, text: String) -> Self {
        let pts = Rational::new(unit.pts().unwrap_or(0), 1_000_000);
        Self {
            text,
            begin: pts + Rational::new(unit.start() as i64, 1000),
            end: pts + Rational::new(unit.end() as i64, 1000),
        }
    }

    pub fn duration(&self) -> Rational {
        self.end - self.begin
    }
}
