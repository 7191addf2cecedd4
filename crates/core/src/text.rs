//! Transcript text cleanup
//!
//! Emoji and decorative symbols never reach the client's caption line, and
//! transcripts lose the punctuation that recognizers tend to pad them with.

use once_cell::sync::Lazy;
use regex::Regex;

static EMOJI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{1F900}-\x{1F9FF}\x{2600}-\x{26FF}\x{2700}-\x{27BF}\x{FE0F}]+",
    )
    .expect("emoji pattern is valid")
});

const EDGE_PUNCTUATION: &[char] = &[
    '，', ',', '。', '.', '！', '!', '？', '?', '-', '－', '、', '；', ';', '：', ':', '~', '…',
];

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F600..=0x1F64F
        | 0x1F300..=0x1F5FF
        | 0x1F680..=0x1F6FF
        | 0x1F1E0..=0x1F1FF
        | 0x1F900..=0x1F9FF
        | 0x2600..=0x26FF
        | 0x2700..=0x27BF
        | 0xFE0F)
}

fn is_punctuation_or_emoji(c: char) -> bool {
    c.is_whitespace() || EDGE_PUNCTUATION.contains(&c) || is_emoji(c)
}

/// Remove emoji anywhere in the text
pub fn strip_emoji(text: &str) -> String {
    EMOJI_PATTERN.replace_all(text, "").into_owned()
}

/// Trim punctuation, whitespace and emoji from both ends of a transcript
pub fn clean_transcript(text: &str) -> String {
    text.trim_matches(is_punctuation_or_emoji).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_emoji() {
        assert_eq!(strip_emoji("Hello 😀 world ☀"), "Hello  world ");
        assert_eq!(strip_emoji("plain"), "plain");
    }

    #[test]
    fn test_clean_transcript_trims_edges_only() {
        assert_eq!(clean_transcript("  你好，世界。 "), "你好，世界");
        assert_eq!(clean_transcript("😀Hi, there!!"), "Hi, there");
        assert_eq!(clean_transcript("。。"), "");
    }
}
