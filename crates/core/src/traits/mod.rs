//! Core traits for the delivery pipeline
//!
//! Collaborators the pipeline drives but does not own sit behind these
//! traits so they can be swapped (and mocked in tests):
//!
//! ```text
//! Speech:
//!   - SpeechSynthesizer: sentence text → ordered encoded frames
//!
//! Transport:
//!   - Transport: ordered, reliable-within-connection message sink
//!
//! Reporting:
//!   - TranscriptSink: best-effort, non-blocking transcript persistence
//! ```

mod reporting;
mod speech;
mod transport;

pub use reporting::{ChatType, NoopSink, TranscriptEntry, TranscriptSink};
pub use speech::{SpeechSynthesizer, SynthesizedSpeech};
pub use transport::{OutboundMessage, Transport};
