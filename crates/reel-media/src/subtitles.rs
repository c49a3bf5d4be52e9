//! ASS subtitle synthesis from word-level transcription timings.
//!
//! Words are grouped into caption lines (punctuation-aware, bounded word
//! count), then emitted as ASS dialogue events. Per-word highlighting uses
//! karaoke timing tags: the secondary colour is the base font colour and
//! the primary colour the highlight, so each word flips as it is spoken.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MediaResult;
use reel_models::{SubtitleConfig, SubtitlePosition};

/// One transcribed word with start/end times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A caption line covering a span of words.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLine {
    pub words: Vec<WordTiming>,
}

impl CaptionLine {
    pub fn start(&self) -> f64 {
        self.words.first().map(|w| w.start).unwrap_or(0.0)
    }

    pub fn end(&self) -> f64 {
        self.words.last().map(|w| w.end).unwrap_or(0.0)
    }

    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.word.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

const MIN_WORDS_PER_LINE: usize = 4;
const MAX_WORDS_PER_LINE: usize = 6;

/// Group words into caption lines: break on sentence punctuation, on commas
/// once a minimum length is reached, or on the word cap; merge trailing
/// fragments into the previous line.
pub fn group_words(words: &[WordTiming]) -> Vec<CaptionLine> {
    let mut lines: Vec<Vec<WordTiming>> = Vec::new();
    let mut current: Vec<WordTiming> = Vec::new();

    for word in words {
        current.push(word.clone());
        let trimmed = word.word.trim();
        let sentence_end = trimmed.ends_with(['.', '!', '?']);
        let comma_break = trimmed.ends_with(',') && current.len() >= MIN_WORDS_PER_LINE;

        if sentence_end || comma_break || current.len() >= MAX_WORDS_PER_LINE {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    // Merge short fragments into their predecessor.
    let mut merged: Vec<Vec<WordTiming>> = Vec::new();
    for line in lines {
        if line.len() < MIN_WORDS_PER_LINE {
            if let Some(prev) = merged.last_mut() {
                prev.extend(line);
                continue;
            }
        }
        merged.push(line);
    }

    merged.into_iter().map(|words| CaptionLine { words }).collect()
}

/// Map a named or `#rrggbb` colour to ASS `&HAABBGGRR` form.
pub fn color_to_ass(color: &str) -> String {
    let (r, g, b) = match color.to_ascii_lowercase().as_str() {
        "white" => (0xff, 0xff, 0xff),
        "black" => (0x00, 0x00, 0x00),
        "yellow" => (0xff, 0xff, 0x00),
        "red" => (0xff, 0x00, 0x00),
        "green" => (0x00, 0xff, 0x00),
        "blue" => (0x00, 0x00, 0xff),
        "orange" => (0xff, 0xa5, 0x00),
        "cyan" => (0x00, 0xff, 0xff),
        "magenta" => (0xff, 0x00, 0xff),
        hex => {
            let hex = hex.strip_prefix('#').unwrap_or(hex);
            if hex.len() == 6 {
                let parse = |s: &str| u8::from_str_radix(s, 16).unwrap_or(0xff);
                (parse(&hex[0..2]), parse(&hex[2..4]), parse(&hex[4..6]))
            } else {
                (0xff, 0xff, 0xff)
            }
        }
    };
    format!("&H00{:02X}{:02X}{:02X}", b, g, r)
}

fn alignment(position: SubtitlePosition) -> u8 {
    match position {
        SubtitlePosition::Top => 8,
        SubtitlePosition::Middle => 5,
        SubtitlePosition::Bottom => 2,
    }
}

fn ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let cs = total_cs % 100;
    let total_secs = total_cs / 100;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// Font family name from a config value that may be a file name.
fn font_name(font: &str) -> String {
    let base = font.rsplit('/').next().unwrap_or(font);
    let stem = base
        .strip_suffix(".ttf")
        .or_else(|| base.strip_suffix(".otf"))
        .unwrap_or(base);
    stem.split('-').next().unwrap_or(stem).to_string()
}

/// Render the full ASS document for a set of word timings.
pub fn render_ass(
    words: &[WordTiming],
    config: &SubtitleConfig,
    frame_w: u32,
    frame_h: u32,
) -> String {
    let lines = group_words(words);

    // With highlighting on, the primary colour (karaoke fill) is the
    // highlight and the secondary the base colour; otherwise both are the
    // base colour and no karaoke tags are emitted.
    let (primary, secondary) = if config.highlight_current_word {
        (
            color_to_ass(&config.word_highlight_color),
            color_to_ass(&config.font_color),
        )
    } else {
        let base = color_to_ass(&config.font_color);
        (base.clone(), base)
    };

    let mut out = String::new();
    out.push_str("[Script Info]\n");
    out.push_str("ScriptType: v4.00+\n");
    out.push_str(&format!("PlayResX: {frame_w}\n"));
    out.push_str(&format!("PlayResY: {frame_h}\n"));
    out.push_str("WrapStyle: 0\n\n");

    out.push_str("[V4+ Styles]\n");
    out.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
    );
    out.push_str(&format!(
        "Style: Caption,{font},{size},{primary},{secondary},{outline},&H00000000,0,0,0,0,100,100,0,0,1,{stroke},0,{align},40,40,60,1\n\n",
        font = font_name(&config.font),
        size = config.font_size,
        outline = color_to_ass(&config.stroke_color),
        stroke = config.stroke_width,
        align = alignment(config.position),
    ));

    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");

    for line in &lines {
        let text = if config.highlight_current_word {
            let mut parts = Vec::with_capacity(line.words.len());
            for word in &line.words {
                let centis = ((word.end - word.start).max(0.0) * 100.0).round() as u64;
                parts.push(format!("{{\\k{centis}}}{}", word.word.trim()));
            }
            parts.join(" ")
        } else {
            line.text()
        };

        out.push_str(&format!(
            "Dialogue: 0,{start},{end},Caption,,0,0,0,,{text}\n",
            start = ass_timestamp(line.start()),
            end = ass_timestamp(line.end()),
        ));
    }

    out
}

/// Write the ASS document for the given words to `path`.
pub async fn write_ass_file(
    path: &Path,
    words: &[WordTiming],
    config: &SubtitleConfig,
    frame_w: u32,
    frame_h: u32,
) -> MediaResult<()> {
    let document = render_ass(words, config, frame_w, frame_h);
    tokio::fs::write(path, document).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64) -> WordTiming {
        WordTiming {
            word: text.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_grouping_breaks_on_sentence_end() {
        let words = vec![
            word("Hello", 0.0, 0.4),
            word("there.", 0.4, 0.8),
            word("This", 0.9, 1.1),
            word("is", 1.1, 1.2),
            word("a", 1.2, 1.3),
            word("longer", 1.3, 1.6),
            word("sentence", 1.6, 2.0),
        ];
        let lines = group_words(&words);
        // The two-word fragment merges forward is impossible (it is first),
        // so it stays; the rest forms one line.
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "Hello there.");
        assert_eq!(lines[1].words.len(), 5);
    }

    #[test]
    fn test_grouping_caps_line_length() {
        let words: Vec<_> = (0..13)
            .map(|i| word("w", i as f64, i as f64 + 0.5))
            .collect();
        let lines = group_words(&words);
        assert!(lines.iter().all(|l| l.words.len() <= 2 * MAX_WORDS_PER_LINE));
        assert!(lines[0].words.len() <= MAX_WORDS_PER_LINE);
    }

    #[test]
    fn test_short_tail_merges_into_previous_line() {
        let mut words: Vec<_> = (0..6)
            .map(|i| word("w", i as f64, i as f64 + 0.5))
            .collect();
        words.push(word("tail", 6.0, 6.5));
        let lines = group_words(&words);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].words.len(), 7);
    }

    #[test]
    fn test_color_conversion() {
        assert_eq!(color_to_ass("white"), "&H00FFFFFF");
        assert_eq!(color_to_ass("yellow"), "&H0000FFFF");
        assert_eq!(color_to_ass("#ff8000"), "&H000080FF");
        // Unknown names fall back to white.
        assert_eq!(color_to_ass("no-such-color"), "&H00FFFFFF");
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(ass_timestamp(0.0), "0:00:00.00");
        assert_eq!(ass_timestamp(61.25), "0:01:01.25");
        assert_eq!(ass_timestamp(3661.5), "1:01:01.50");
    }

    #[test]
    fn test_render_contains_karaoke_tags_when_highlighting() {
        let words = vec![
            word("one", 0.0, 0.5),
            word("two", 0.5, 1.0),
            word("three", 1.0, 1.5),
            word("four", 1.5, 2.0),
        ];
        let config = SubtitleConfig::default();
        let doc = render_ass(&words, &config, 1080, 1920);
        assert!(doc.contains("PlayResX: 1080"));
        assert!(doc.contains("{\\k50}one"));
        assert!(doc.contains("Style: Caption,Bangers,110"));

        let plain = SubtitleConfig {
            highlight_current_word: false,
            ..Default::default()
        };
        let doc = render_ass(&words, &plain, 1080, 1920);
        assert!(!doc.contains("\\k"));
        assert!(doc.contains("one two three four"));
    }

    #[test]
    fn test_alignment_from_position() {
        assert_eq!(alignment(SubtitlePosition::Top), 8);
        assert_eq!(alignment(SubtitlePosition::Middle), 5);
        assert_eq!(alignment(SubtitlePosition::Bottom), 2);
    }
}
