//! Transcript reporting interface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
    User,
    Assistant,
}

impl ChatType {
    /// Numeric code used by the management API
    pub fn code(&self) -> u8 {
        match self {
            Self::User => 1,
            Self::Assistant => 2,
        }
    }
}

/// One line of conversation transcript
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub session_id: String,
    pub device_id: String,
    pub chat_type: ChatType,
    pub content: String,
    pub reported_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(
        session_id: impl Into<String>,
        device_id: impl Into<String>,
        chat_type: ChatType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            device_id: device_id.into(),
            chat_type,
            content: content.into(),
            reported_at: Utc::now(),
        }
    }
}

/// Best-effort transcript sink
///
/// `report` must return immediately. Failures are the sink's problem and
/// never reach the caller.
pub trait TranscriptSink: Send + Sync {
    fn report(&self, entry: TranscriptEntry);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TranscriptSink for NoopSink {
    fn report(&self, _entry: TranscriptEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_type_codes() {
        assert_eq!(ChatType::User.code(), 1);
        assert_eq!(ChatType::Assistant.code(), 2);
    }
}
