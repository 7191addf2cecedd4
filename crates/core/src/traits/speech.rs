//! Speech synthesis interface

use crate::{AudioFrame, Result};
use async_trait::async_trait;
use std::path::Path;

/// Output of one synthesis call
#[derive(Debug, Clone, Default)]
pub struct SynthesizedSpeech {
    /// Encoded frames, in playback order
    pub frames: Vec<AudioFrame>,
    /// Synthesizer's own view that this is the first sentence of a response
    pub first_sentence: bool,
}

/// Text-to-Speech interface
///
/// Implementations produce frames of the session's fixed frame duration.
///
/// # Example
///
/// ```ignore
/// let tts: Arc<dyn SpeechSynthesizer> = Arc::new(SilenceSynthesizer::new(4));
/// let speech = tts.synthesize("Hello there.").await?;
/// let unit = SentenceUnit::new(kind, "Hello there.", speech.frames);
/// coordinator.handle_sentence_ready(unit, speech.first_sentence).await?;
/// ```
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one sentence
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech>;

    /// Load a pre-encoded cue (e.g. the stop chime) as frames
    async fn load_cue(&self, path: &Path) -> Result<Vec<AudioFrame>>;

    /// Mark the start of a new response so the next sentence is flagged first
    fn reset(&self) {}

    /// Name for logging
    fn name(&self) -> &str;
}
