//! Sentence units handed from synthesis to delivery

use crate::AudioFrame;
use serde::{Deserialize, Serialize};

/// Position of a sentence within a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentenceKind {
    First,
    Middle,
    Last,
}

impl SentenceKind {
    pub fn is_last(&self) -> bool {
        matches!(self, Self::Last)
    }
}

/// One sentence of a response: its text and the frames that speak it
#[derive(Debug, Clone)]
pub struct SentenceUnit {
    pub kind: SentenceKind,
    pub text: String,
    pub frames: Vec<AudioFrame>,
}

impl SentenceUnit {
    pub fn new(kind: SentenceKind, text: impl Into<String>, frames: Vec<AudioFrame>) -> Self {
        Self {
            kind,
            text: text.into(),
            frames,
        }
    }
}
