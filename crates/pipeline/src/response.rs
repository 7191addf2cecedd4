//! Response driver
//!
//! Runs one response end to end: streams model output through the
//! `<think>` filter and sentence splitter, synthesizes each sentence and
//! hands it to the coordinator. One sentence is held back so the final one
//! can be tagged `Last` once generation has finished.

use std::sync::Arc;
use tokio::sync::mpsc;
use voice_agent_core::{SentenceKind, SentenceUnit, SpeechSynthesizer};
use voice_agent_llm::{LlmBackend, Message, ThinkFilter};

use crate::{PipelineError, SentenceSplitter, SentenceSplitterConfig, SessionCoordinator};

/// Channel depth between the generation task and the driver
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Result of one response
#[derive(Debug, Clone, Default)]
pub struct ResponseOutcome {
    /// Text of every sentence handed to delivery
    pub text: String,
    /// Sentences delivered
    pub sentences: usize,
    /// Stopped early by the abort flag
    pub aborted: bool,
}

/// Generation → synthesis → delivery for one response at a time
pub struct ResponseDriver {
    llm: Arc<dyn LlmBackend>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    splitter_config: SentenceSplitterConfig,
}

impl ResponseDriver {
    pub fn new(llm: Arc<dyn LlmBackend>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            llm,
            synthesizer,
            splitter_config: SentenceSplitterConfig::default(),
        }
    }

    pub fn with_splitter_config(mut self, config: SentenceSplitterConfig) -> Self {
        self.splitter_config = config;
        self
    }

    /// Generate and deliver a response to `messages`
    ///
    /// Returns early when the abort flag is set; the response is then
    /// closed with a plain `tts:stop`. A delivery failure is returned
    /// after the generation task has been stopped.
    pub async fn run(
        &self,
        coordinator: &mut SessionCoordinator,
        messages: Vec<Message>,
    ) -> Result<ResponseOutcome, PipelineError> {
        coordinator.begin_response();
        self.synthesizer.reset();

        let (tx, mut rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);
        let llm = self.llm.clone();
        let generation = tokio::spawn(async move { llm.generate_stream(&messages, tx).await });

        let mut run = ResponseRun::new(self.splitter_config.clone());
        let abort = coordinator.abort_flag();

        while let Some(increment) = rx.recv().await {
            if abort.is_set() {
                break;
            }
            let text = run.filter.push(&increment);
            for sentence in run.splitter.push(&text) {
                if let Some(ready) = run.pending.replace(sentence) {
                    if let Err(e) = self.deliver(coordinator, &mut run, ready, false).await {
                        generation.abort();
                        return Err(e);
                    }
                    if abort.is_set() {
                        break;
                    }
                }
            }
        }

        if abort.is_set() {
            generation.abort();
            return self.close_aborted(coordinator, run).await;
        }

        match generation.await {
            Ok(Ok(result)) => tracing::debug!(
                session_id = %coordinator.session_id(),
                tokens = result.tokens,
                finish_reason = ?result.finish_reason,
                "Generation finished"
            ),
            Ok(Err(e)) => tracing::error!(
                session_id = %coordinator.session_id(),
                error = %e,
                "Generation failed, ending response"
            ),
            Err(e) => tracing::error!(
                session_id = %coordinator.session_id(),
                error = %e,
                "Generation task panicked"
            ),
        }

        let tail = run.filter.finish();
        for sentence in run.splitter.push(&tail) {
            if let Some(ready) = run.pending.replace(sentence) {
                self.deliver(coordinator, &mut run, ready, false).await?;
            }
        }
        if let Some(rest) = run.splitter.flush() {
            if let Some(ready) = run.pending.replace(rest) {
                self.deliver(coordinator, &mut run, ready, false).await?;
            }
        }

        coordinator.mark_generation_complete();

        if abort.is_set() {
            return self.close_aborted(coordinator, run).await;
        }

        match run.pending.take() {
            Some(last) => {
                self.deliver(coordinator, &mut run, last, true).await?;
                if run.outcome.aborted {
                    coordinator.end_response().await?;
                }
            }
            None => {
                tracing::warn!(session_id = %coordinator.session_id(), "Empty response");
                coordinator.end_response().await?;
            }
        }

        Ok(run.outcome)
    }

    async fn deliver(
        &self,
        coordinator: &mut SessionCoordinator,
        run: &mut ResponseRun,
        sentence: String,
        last: bool,
    ) -> Result<(), PipelineError> {
        let kind = if last {
            SentenceKind::Last
        } else if run.outcome.sentences == 0 {
            SentenceKind::First
        } else {
            SentenceKind::Middle
        };

        let speech = match self.synthesizer.synthesize(&sentence).await {
            Ok(speech) => speech,
            Err(e) => {
                tracing::warn!(
                    session_id = %coordinator.session_id(),
                    synthesizer = self.synthesizer.name(),
                    error = %e,
                    "Synthesis failed, sending text only"
                );
                Default::default()
            }
        };

        let unit = SentenceUnit::new(kind, sentence.as_str(), speech.frames);
        let report = coordinator
            .handle_sentence_ready(unit, speech.first_sentence)
            .await?;

        if !run.outcome.text.is_empty() {
            run.outcome.text.push(' ');
        }
        run.outcome.text.push_str(&sentence);
        run.outcome.sentences += 1;
        run.outcome.aborted |= report.aborted;
        Ok(())
    }

    async fn close_aborted(
        &self,
        coordinator: &mut SessionCoordinator,
        mut run: ResponseRun,
    ) -> Result<ResponseOutcome, PipelineError> {
        tracing::info!(
            session_id = %coordinator.session_id(),
            delivered = run.outcome.sentences,
            "Response aborted"
        );
        run.outcome.aborted = true;
        coordinator.end_response().await?;
        Ok(run.outcome)
    }
}

/// Working state of one `run`
struct ResponseRun {
    filter: ThinkFilter,
    splitter: SentenceSplitter,
    pending: Option<String>,
    outcome: ResponseOutcome,
}

impl ResponseRun {
    fn new(config: SentenceSplitterConfig) -> Self {
        Self {
            filter: ThinkFilter::new(),
            splitter: SentenceSplitter::new(config),
            pending: None,
            outcome: ResponseOutcome::default(),
        }
    }
}
