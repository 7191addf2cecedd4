//! Built-in speech synthesizer
//!
//! `SilenceSynthesizer` produces Opus silence frames proportional to the
//! sentence length. It keeps the full delivery path exercisable without a
//! synthesis model. Cue files use a simple framing: each frame is a
//! big-endian `u16` length followed by that many payload bytes.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use voice_agent_config::TtsConfig;
use voice_agent_core::{AudioFrame, Error, Result, SpeechSynthesizer, SynthesizedSpeech};

/// One 60ms Opus frame of silence (TOC 0xF8: CELT, fullband, 20ms x3)
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Synthesizer emitting silence
pub struct SilenceSynthesizer {
    frames_per_char: f32,
    first_pending: AtomicBool,
}

impl SilenceSynthesizer {
    pub fn new(frames_per_char: f32) -> Self {
        Self {
            frames_per_char: frames_per_char.max(0.0),
            first_pending: AtomicBool::new(true),
        }
    }

    pub fn from_settings(config: &TtsConfig) -> Self {
        Self::new(config.frames_per_char)
    }

    fn frame_count(&self, text: &str) -> usize {
        let chars = text.chars().filter(|c| !c.is_whitespace()).count();
        if chars == 0 {
            return 0;
        }
        ((chars as f32 * self.frames_per_char).ceil() as usize).max(1)
    }
}

#[async_trait]
impl SpeechSynthesizer for SilenceSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech> {
        let count = self.frame_count(text);
        let first_sentence = count > 0 && self.first_pending.swap(false, Ordering::SeqCst);

        tracing::debug!(
            chars = text.chars().count(),
            frames = count,
            first_sentence,
            "Synthesized sentence"
        );

        Ok(SynthesizedSpeech {
            frames: vec![AudioFrame::from(OPUS_SILENCE_FRAME.to_vec()); count],
            first_sentence,
        })
    }

    async fn load_cue(&self, path: &Path) -> Result<Vec<AudioFrame>> {
        let bytes = tokio::fs::read(path).await?;
        let frames = parse_cue_frames(&bytes)?;
        tracing::debug!(path = %path.display(), frames = frames.len(), "Loaded audio cue");
        Ok(frames)
    }

    fn reset(&self) {
        self.first_pending.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "silence"
    }
}

/// Split a length-prefixed cue file into frames
pub fn parse_cue_frames(bytes: &[u8]) -> Result<Vec<AudioFrame>> {
    let mut frames = Vec::new();
    let mut rest = bytes;

    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(Error::Tts("cue file ends inside a length prefix".to_string()));
        }
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let tail = &rest[2..];
        if tail.len() < len {
            return Err(Error::Tts(format!(
                "cue frame declares {} bytes, {} remain",
                len,
                tail.len()
            )));
        }
        frames.push(AudioFrame::from(tail[..len].to_vec()));
        rest = &tail[len..];
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_proportional_to_text() {
        let tts = SilenceSynthesizer::new(0.5);
        let speech = tts.synthesize("abcd efg").await.unwrap();
        assert_eq!(speech.frames.len(), 4);
        assert_eq!(speech.frames[0].payload().as_ref(), &OPUS_SILENCE_FRAME);

        let empty = tts.synthesize("   ").await.unwrap();
        assert!(empty.frames.is_empty());
    }

    #[tokio::test]
    async fn test_first_sentence_flag_per_response() {
        let tts = SilenceSynthesizer::new(1.0);
        assert!(tts.synthesize("one.").await.unwrap().first_sentence);
        assert!(!tts.synthesize("two.").await.unwrap().first_sentence);

        tts.reset();
        assert!(tts.synthesize("three.").await.unwrap().first_sentence);
    }

    #[test]
    fn test_parse_cue_frames() {
        let bytes = [0x00, 0x02, 0xAA, 0xBB, 0x00, 0x01, 0xCC];
        let frames = parse_cue_frames(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload().as_ref(), &[0xAA, 0xBB]);
        assert_eq!(frames[1].payload().as_ref(), &[0xCC]);

        assert!(parse_cue_frames(&[0x00, 0x05, 0x01]).is_err());
        assert!(parse_cue_frames(&[0x00]).is_err());
        assert!(parse_cue_frames(&[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cue_file_is_an_error() {
        let tts = SilenceSynthesizer::new(1.0);
        let result = tts.load_cue(Path::new("/nonexistent/cue.opus")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
