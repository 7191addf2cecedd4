//! Test doubles shared by unit tests

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use voice_agent_core::{
    AudioFrame, OutboundMessage, SpeechSynthesizer, SynthesizedSpeech, TranscriptEntry,
    TranscriptSink, Transport, TransportError,
};

use crate::AbortFlag;

/// What the client saw, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Text(serde_json::Value),
    Audio(Vec<u8>),
    Closed,
}

/// Transport that records every message with its send time
#[derive(Default)]
pub struct RecordingTransport {
    pub events: Mutex<Vec<(Instant, Recorded)>>,
    /// Set the flag once this many audio frames have gone out
    abort_after: Mutex<Option<(usize, AbortFlag)>>,
    /// Fail every send from this message index on
    fail_from: Mutex<Option<usize>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn abort_after_frames(&self, frames: usize, flag: AbortFlag) {
        *self.abort_after.lock() = Some((frames, flag));
    }

    pub fn fail_from(&self, index: usize) {
        *self.fail_from.lock() = Some(index);
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.events.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn audio_times(&self) -> Vec<Instant> {
        self.events
            .lock()
            .iter()
            .filter(|(_, r)| matches!(r, Recorded::Audio(_)))
            .map(|(t, _)| *t)
            .collect()
    }

    /// Compact view: `tts:start`, `tts:sentence_start:Hi.`, `audio`, `stt:hi`, `close`
    pub fn script(&self) -> Vec<String> {
        self.recorded()
            .into_iter()
            .map(|r| match r {
                Recorded::Audio(_) => "audio".to_string(),
                Recorded::Closed => "close".to_string(),
                Recorded::Text(v) => {
                    let kind = v["type"].as_str().unwrap_or_default().to_string();
                    match kind.as_str() {
                        "tts" => match v["text"].as_str() {
                            Some(text) => format!("tts:{}:{}", v["state"].as_str().unwrap(), text),
                            None => format!("tts:{}", v["state"].as_str().unwrap()),
                        },
                        "stt" => format!("stt:{}", v["text"].as_str().unwrap()),
                        other => other.to_string(),
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut events = self.events.lock();
        if let Some(index) = *self.fail_from.lock() {
            if events.len() >= index {
                return Err(TransportError::closed("peer went away"));
            }
        }

        let recorded = match message {
            OutboundMessage::Text(json) => Recorded::Text(serde_json::from_str(&json).unwrap()),
            OutboundMessage::Audio(bytes) => Recorded::Audio(bytes.to_vec()),
        };
        events.push((Instant::now(), recorded));

        let audio_sent = events
            .iter()
            .filter(|(_, r)| matches!(r, Recorded::Audio(_)))
            .count();
        if let Some((after, flag)) = self.abort_after.lock().as_ref() {
            if audio_sent == *after {
                flag.set();
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.events.lock().push((Instant::now(), Recorded::Closed));
        Ok(())
    }
}

/// Sink that keeps every entry
#[derive(Default)]
pub struct CollectingSink {
    pub entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptSink for CollectingSink {
    fn report(&self, entry: TranscriptEntry) {
        self.entries.lock().push(entry);
    }
}

/// Synthesizer returning `frames_per_sentence` numbered frames and a fixed cue
pub struct FixedSynthesizer {
    pub frames_per_sentence: usize,
    pub cue: Option<Vec<AudioFrame>>,
}

#[async_trait]
impl SpeechSynthesizer for FixedSynthesizer {
    async fn synthesize(&self, _text: &str) -> voice_agent_core::Result<SynthesizedSpeech> {
        Ok(SynthesizedSpeech {
            frames: frames(self.frames_per_sentence),
            first_sentence: false,
        })
    }

    async fn load_cue(&self, path: &Path) -> voice_agent_core::Result<Vec<AudioFrame>> {
        self.cue.clone().ok_or_else(|| {
            voice_agent_core::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.display().to_string(),
            ))
        })
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// `count` distinguishable frames
pub fn frames(count: usize) -> Vec<AudioFrame> {
    (0..count).map(|i| AudioFrame::from(vec![i as u8])).collect()
}

/// Run `body` on a paused current-thread runtime with a local metrics
/// recorder installed, returning the sample count of every histogram
pub fn histogram_samples(body: impl Future<Output = ()>) -> HashMap<String, usize> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || runtime.block_on(body));

    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Histogram(samples) => Some((key.key().name().to_string(), samples.len())),
            _ => None,
        })
        .collect()
}
