//! Client/server protocol messages
//!
//! Control signals travel as JSON text messages. Audio travels as binary
//! messages, one encoded frame per message.

use serde::{Deserialize, Serialize};

/// Speaking-state transitions announced to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    /// Server is about to respond
    Start,
    /// A sentence's audio follows
    SentenceStart,
    /// Response finished
    Stop,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Speaking-state signal
    Tts {
        state: TtsState,
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Transcript echo of the user's speech
    Stt { text: String, session_id: String },
    /// Handshake reply
    Hello {
        session_id: String,
        audio_format: String,
        frame_duration_ms: u64,
    },
    /// Recoverable error report
    Error { message: String },
    Pong,
}

impl ServerMessage {
    pub fn tts(state: TtsState, session_id: impl Into<String>, text: Option<String>) -> Self {
        Self::Tts {
            state,
            session_id: session_id.into(),
            text,
        }
    }

    pub fn stt(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::Stt {
            text: text.into(),
            session_id: session_id.into(),
        }
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake
    Hello {
        #[serde(default)]
        device_id: Option<String>,
    },
    /// Recognized user speech (plain text or a JSON payload with speaker info)
    Listen { text: String },
    /// Stop the utterance currently being played
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tts_start_omits_text() {
        let msg = ServerMessage::tts(TtsState::Start, "s-1", None);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "tts", "state": "start", "session_id": "s-1"})
        );
    }

    #[test]
    fn test_sentence_start_carries_text() {
        let msg = ServerMessage::tts(TtsState::SentenceStart, "s-1", Some("Hello.".into()));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["state"], "sentence_start");
        assert_eq!(value["text"], "Hello.");
    }

    #[test]
    fn test_stt_shape() {
        let msg = ServerMessage::stt("hi there", "s-2");
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "stt", "text": "hi there", "session_id": "s-2"})
        );
    }

    #[test]
    fn test_client_messages_parse() {
        let abort: ClientMessage = serde_json::from_str(r#"{"type":"abort"}"#).unwrap();
        assert_eq!(abort, ClientMessage::Abort { reason: None });

        let listen: ClientMessage =
            serde_json::from_str(r#"{"type":"listen","text":"what time is it"}"#).unwrap();
        assert!(matches!(listen, ClientMessage::Listen { ref text } if text == "what time is it"));
    }
}
