//! Per-connection session state

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cooperative cancellation flag for the utterance being delivered
///
/// Cloned handles share one flag; the connection reader sets it, the
/// pacer reads it between frames.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Last time anything was delivered to the client
///
/// Stored as milliseconds since the clock was created so it can be shared
/// lock-free between the pacer and the idle watcher.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record activity now
    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one client conversation
///
/// Mutated only by the coordinator driving it, except `abort` (set by the
/// connection reader) and `activity` (written by the pacer, read by the
/// idle watcher).
#[derive(Debug)]
pub struct ConversationSession {
    pub id: String,
    pub device_id: String,
    /// Server is producing audio for the current response
    pub speaking: bool,
    /// A user turn has been accepted and its response is pending
    pub listening: bool,
    /// Generation for the current response began at
    pub pipeline_start: Option<Instant>,
    /// First-audio latency has been recorded for this session
    pub first_audio_recorded: bool,
    /// Close the connection once the current response finishes
    pub close_after_chat: bool,
    /// Upstream generation for the current response has finished
    pub generation_complete: bool,
    /// Speaker named by the latest structured transcript
    pub current_speaker: Option<String>,
    abort: AbortFlag,
    activity: ActivityClock,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            speaking: false,
            listening: false,
            pipeline_start: None,
            first_audio_recorded: false,
            close_after_chat: false,
            generation_complete: false,
            current_speaker: None,
            abort: AbortFlag::new(),
            activity: ActivityClock::new(),
        }
    }

    pub fn with_close_after_chat(mut self, close_after_chat: bool) -> Self {
        self.close_after_chat = close_after_chat;
        self
    }

    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub fn activity(&self) -> &ActivityClock {
        &self.activity
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.is_set()
    }
}
