//! Core traits and types for the voice agent
//!
//! This crate provides foundational types used across all other crates:
//! - Encoded audio frames and frame timing
//! - Sentence units handed from synthesis to delivery
//! - Client/server protocol messages
//! - Collaborator traits (speech synthesis, transport, transcript reporting)
//! - Transcript text cleanup
//! - Error types

pub mod audio;
pub mod error;
pub mod protocol;
pub mod text;
pub mod traits;
pub mod utterance;

pub use audio::{AudioFrame, FrameTiming, DEFAULT_FRAME_DURATION_MS};
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use protocol::{ClientMessage, ServerMessage, TtsState};
pub use text::{clean_transcript, strip_emoji};
pub use utterance::{SentenceKind, SentenceUnit};

pub use traits::{
    ChatType, NoopSink, OutboundMessage, SpeechSynthesizer, SynthesizedSpeech, TranscriptEntry,
    TranscriptSink, Transport,
};
