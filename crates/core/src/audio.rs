//! Encoded audio frame types

use bytes::Bytes;
use std::time::Duration;

/// Default playback duration of one encoded frame (Opus, 60ms)
pub const DEFAULT_FRAME_DURATION_MS: u64 = 60;

/// Frame timing shared by every frame of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    duration: Duration,
}

impl FrameTiming {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            duration: Duration::from_millis(ms),
        }
    }

    /// Playback duration of a single frame
    pub fn frame_duration(&self) -> Duration {
        self.duration
    }

    /// Offset of the k-th frame from the start of a paced run
    pub fn offset_of(&self, index: usize) -> Duration {
        self.duration * index as u32
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::from_millis(DEFAULT_FRAME_DURATION_MS)
    }
}

/// Opaque encoded audio frame
///
/// Holds exactly one frame duration of playback. Frames carry no
/// sequence number; their position in a sequence is their order.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame {
    payload: Bytes,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl AudioFrame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Encoded payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static [u8]> for AudioFrame {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }
}
