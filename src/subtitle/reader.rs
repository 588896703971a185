//! Iterating the cues of a subtitle stream

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::subtitle::Rect;

use crate::codec::Decoder;
use crate::subtitle::text::{is_text_subtitle_codec, text_from_ass};
use crate::subtitle::Subtitle;

/// Yields the text cues of one subtitle stream
pub struct SubtitleReader<'a> {
    decoder: &'a mut Decoder,
}

impl<'a> SubtitleReader<'a> {
    pub fn new(decoder: &'a mut Decoder) -> Self {
        if decoder.media_type() != ffmpeg::media::Type::Subtitle {
            tracing::warn!(
                stream_index = decoder.stream_index(),
                "subtitle reader attached to a non-subtitle stream"
            );
        } else if !is_text_subtitle_codec(decoder.codec_id()) {
            tracing::debug!(
                stream_index = decoder.stream_index(),
                codec = decoder.codec_name(),
                "subtitle codec is not text based, bitmap cues will be skipped"
            );
        }
        Self { decoder }
    }
}

impl Iterator for SubtitleReader<'_> {
    type Item = Subtitle;

    fn next(&mut self) -> Option<Subtitle> {
        loop {
            let unit = self.decoder.read_subtitle()?;
            match cue_text(&unit) {
                Some(text) => return Some(Subtitle::from_unit(&unit, text)),
                None => continue,
            }
        }
    }
}

/// Text of a unit holding exactly one text or ASS rect
fn cue_text(unit: &ffmpeg::Subtitle) -> Option<String> {
    let mut rects = unit.rects();
    let (Some(rect), None) = (rects.next(), rects.next()) else {
        tracing::debug!(rects = unit.rects().count(), "skipping subtitle unit");
        return None;
    };
    match rect {
        Rect::Text(text) => Some(text.get().to_string()),
        Rect::Ass(ass) => Some(text_from_ass(ass.get())),
        Rect::Bitmap(_) => {
            tracing::debug!("skipping bitmap subtitle");
            None
        }
        Rect::None(_) => None,
    }
}
