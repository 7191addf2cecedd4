//! End-to-end delivery ordering through the public pipeline API

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voice_agent_core::{
    AudioFrame, NoopSink, OutboundMessage, SentenceKind, SentenceUnit, SpeechSynthesizer,
    SynthesizedSpeech, Transport, TransportError,
};
use voice_agent_pipeline::{
    AudioFramePacer, ConversationSession, CoordinatorConfig, SessionCoordinator,
};

#[derive(Default)]
struct WireLog {
    entries: Mutex<Vec<(Instant, String)>>,
}

impl WireLog {
    fn lines(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(_, l)| l.clone()).collect()
    }

    fn time_of(&self, line: &str) -> Instant {
        self.entries
            .lock()
            .iter()
            .find(|(_, l)| l == line)
            .map(|(t, _)| *t)
            .expect("line was sent")
    }
}

#[async_trait]
impl Transport for WireLog {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let line = match message {
            OutboundMessage::Audio(bytes) => format!("frame:{}", bytes[0]),
            OutboundMessage::Text(json) => {
                let v: serde_json::Value = serde_json::from_str(&json).unwrap();
                let signal = format!("{}:{}", v["type"].as_str().unwrap(), v["state"].as_str().unwrap());
                match v["text"].as_str() {
                    Some(text) => format!("{}({})", signal, text),
                    None => signal,
                }
            }
        };
        self.entries.lock().push((Instant::now(), line));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.entries.lock().push((Instant::now(), "close".to_string()));
        Ok(())
    }
}

struct NoCue;

#[async_trait]
impl SpeechSynthesizer for NoCue {
    async fn synthesize(&self, _text: &str) -> voice_agent_core::Result<SynthesizedSpeech> {
        Ok(SynthesizedSpeech::default())
    }

    async fn load_cue(&self, _path: &Path) -> voice_agent_core::Result<Vec<AudioFrame>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

fn numbered(range: std::ops::Range<u8>) -> Vec<AudioFrame> {
    range.map(|i| AudioFrame::from(vec![i])).collect()
}

/// Samples recorded for the first-audio histogram while `body` runs
fn first_audio_samples(body: impl std::future::Future<Output = ()>) -> usize {
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
        .filter(|(key, _, _, _)| key.key().name() == "voice_agent_first_audio_seconds")
        .map(|(_, _, _, value)| match value {
            DebugValue::Histogram(samples) => samples.len(),
            _ => 0,
        })
        .sum()
}

#[test]
fn test_two_sentence_response_then_close() {
    let samples = first_audio_samples(two_sentence_response_then_close());
    assert_eq!(samples, 1);
}

async fn two_sentence_response_then_close() {
    let wire = Arc::new(WireLog::default());
    let mut coordinator = SessionCoordinator::new(
        ConversationSession::new("s-42", "dev"),
        wire.clone(),
        AudioFramePacer::default(),
        Arc::new(NoCue),
        Arc::new(NoopSink),
        CoordinatorConfig {
            close_after_chat: true,
            ..Default::default()
        },
    );

    coordinator.begin_response();
    tokio::time::advance(Duration::from_millis(250)).await;

    coordinator
        .handle_sentence_ready(SentenceUnit::new(SentenceKind::Middle, "Hello there.", numbered(0..4)), false)
        .await
        .unwrap();
    assert!(coordinator.session().first_audio_recorded);

    coordinator.mark_generation_complete();
    coordinator
        .handle_sentence_ready(SentenceUnit::new(SentenceKind::Last, "Goodbye.", numbered(10..12)), false)
        .await
        .unwrap();

    assert_eq!(
        wire.lines(),
        vec![
            "tts:start",
            "tts:sentence_start(Hello there.)",
            "frame:0",
            "frame:1",
            "frame:2",
            "frame:3",
            "tts:sentence_start(Goodbye.)",
            "frame:10",
            "frame:11",
            "tts:stop",
            "close",
        ]
    );

    // first sentence was burst, second paced from its own start
    assert_eq!(wire.time_of("frame:2") - wire.time_of("frame:0"), Duration::ZERO);
    assert_eq!(
        wire.time_of("frame:11") - wire.time_of("frame:10"),
        Duration::from_millis(60)
    );
    assert!(!coordinator.session().speaking);
}

#[tokio::test(start_paused = true)]
async fn test_abort_from_another_task_stops_delivery() {
    let wire = Arc::new(WireLog::default());
    let mut coordinator = SessionCoordinator::new(
        ConversationSession::new("s-43", "dev"),
        wire.clone(),
        AudioFramePacer::default(),
        Arc::new(NoCue),
        Arc::new(NoopSink),
        CoordinatorConfig::default(),
    );

    let abort = coordinator.abort_flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(90)).await;
        abort.set();
    });

    let report = coordinator
        .handle_sentence_ready(SentenceUnit::new(SentenceKind::First, "Long answer.", numbered(0..10)), false)
        .await
        .unwrap();

    // frames at 0ms and 60ms go out; the one due at 120ms sees the flag
    assert!(report.aborted);
    assert_eq!(report.sent, 2);
    assert!(coordinator.session().abort_requested());
}
