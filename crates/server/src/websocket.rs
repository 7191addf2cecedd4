//! WebSocket Handler
//!
//! One connection per device. The reader loop handles client control
//! messages and feeds recognized speech to a conversation task, which owns
//! the `SessionCoordinator` and runs responses one at a time. Abort is
//! signalled straight through the shared flag so it takes effect while a
//! response is still playing.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use voice_agent_core::{ClientMessage, OutboundMessage, ServerMessage, Transport, TransportError};
use voice_agent_llm::Dialogue;
use voice_agent_pipeline::{
    ActivityClock, AudioFramePacer, ConversationSession, CoordinatorConfig, ResponseDriver,
    SessionCoordinator, SilenceSynthesizer,
};

use crate::metrics::{record_active_sessions, record_session_created};
use crate::session::SessionManager;
use crate::state::AppState;

/// Recognized turns waiting for the conversation task
const TURN_QUEUE_DEPTH: usize = 8;

/// Audio format announced in the hello reply
const AUDIO_FORMAT: &str = "opus";

/// `Transport` over the write half of an axum WebSocket
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::closed("connection closed"));
        }

        let message = match message {
            OutboundMessage::Text(text) => Message::Text(text),
            OutboundMessage::Audio(bytes) => Message::Binary(bytes.to_vec()),
        };

        self.sink.lock().await.send(message).await.map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            TransportError::closed(e.to_string())
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::io(e.to_string()))
    }
}

/// What the reader loop should do with one client text message
#[derive(Debug, PartialEq)]
enum ClientAction {
    Hello,
    Turn(String),
    Abort(Option<String>),
    Pong,
    Invalid(String),
}

fn classify(text: &str) -> ClientAction {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Hello { .. }) => ClientAction::Hello,
        Ok(ClientMessage::Listen { text }) => ClientAction::Turn(text),
        Ok(ClientMessage::Abort { reason }) => ClientAction::Abort(reason),
        Ok(ClientMessage::Ping) => ClientAction::Pong,
        Err(e) => ClientAction::Invalid(e.to_string()),
    }
}

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(
        ws: WebSocketUpgrade,
        State(state): State<AppState>,
        Path(device_id): Path<String>,
    ) -> Result<Response, axum::http::StatusCode> {
        if state.sessions.count() >= state.sessions.capacity() {
            tracing::warn!(device_id = %device_id, "Rejecting connection, at capacity");
            return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
        }

        Ok(ws.on_upgrade(move |socket| Self::handle_socket(socket, device_id, state)))
    }

    /// Handle WebSocket connection
    async fn handle_socket(socket: WebSocket, device_id: String, state: AppState) {
        let settings = Arc::clone(&state.config);

        let session = ConversationSession::new(SessionManager::new_session_id(), device_id);
        let handle = match state.sessions.create(&session) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Session not registered, dropping connection");
                return;
            }
        };
        record_session_created();
        record_active_sessions(state.sessions.count());

        let session_id = session.id.clone();
        let activity = session.activity().clone();
        activity.touch();

        let (sink, mut stream) = socket.split();
        let transport = Arc::new(WsTransport::new(sink));
        let synthesizer = Arc::new(SilenceSynthesizer::from_settings(&settings.tts));

        let coordinator = SessionCoordinator::new(
            session,
            transport.clone(),
            AudioFramePacer::from_settings(&settings.delivery),
            synthesizer.clone(),
            state.reporter.clone(),
            CoordinatorConfig::from_settings(&settings.delivery),
        );
        let driver = ResponseDriver::new(state.llm.clone(), synthesizer);
        let dialogue = Dialogue::new(settings.llm.system_prompt.clone());

        let hello = ServerMessage::Hello {
            session_id: session_id.clone(),
            audio_format: AUDIO_FORMAT.to_string(),
            frame_duration_ms: settings.delivery.frame_duration_ms,
        };

        let (turn_tx, turn_rx) = mpsc::channel::<String>(TURN_QUEUE_DEPTH);
        let mut conversation = tokio::spawn(run_conversation(coordinator, driver, dialogue, turn_rx));
        let mut idle = tokio::spawn(watch_idle(
            activity.clone(),
            settings.server.idle_timeout(),
            settings.server.idle_check_interval(),
        ));

        if let Err(e) = transport.send_signal(&hello).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to send hello");
        } else {
            tracing::info!(session_id = %session_id, device_id = %handle.device_id, "Client connected");

            loop {
                tokio::select! {
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            activity.touch();
                            match classify(&text) {
                                ClientAction::Hello => {
                                    if transport.send_signal(&hello).await.is_err() {
                                        break;
                                    }
                                }
                                ClientAction::Turn(text) => {
                                    if let Err(e) = turn_tx.try_send(text) {
                                        tracing::warn!(
                                            session_id = %session_id,
                                            error = %e,
                                            "Dropping recognized turn"
                                        );
                                    }
                                }
                                ClientAction::Abort(reason) => {
                                    tracing::info!(
                                        session_id = %session_id,
                                        reason = ?reason,
                                        "Client requested abort"
                                    );
                                    handle.abort();
                                }
                                ClientAction::Pong => {
                                    if transport.send_signal(&ServerMessage::Pong).await.is_err() {
                                        break;
                                    }
                                }
                                ClientAction::Invalid(message) => {
                                    tracing::debug!(session_id = %session_id, error = %message, "Unrecognized client message");
                                    let reply = ServerMessage::Error { message };
                                    if transport.send_signal(&reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => activity.touch(),
                        Some(Err(e)) => {
                            tracing::warn!(session_id = %session_id, error = %e, "WebSocket receive error");
                            break;
                        }
                    },
                    _ = &mut idle => {
                        tracing::info!(
                            session_id = %session_id,
                            idle_secs = activity.idle_for().as_secs(),
                            "Closing idle connection"
                        );
                        break;
                    }
                    _ = &mut conversation => {
                        tracing::debug!(session_id = %session_id, "Conversation ended");
                        break;
                    }
                }
            }
        }

        handle.abort();
        drop(turn_tx);
        idle.abort();
        conversation.abort();
        if let Err(e) = transport.close().await {
            tracing::debug!(session_id = %session_id, error = %e, "Close after disconnect failed");
        }

        state.sessions.remove(&session_id);
        record_active_sessions(state.sessions.count());
        tracing::info!(session_id = %session_id, "Client disconnected");
    }
}

/// Run responses for recognized turns until the queue closes or the
/// connection goes away
async fn run_conversation(
    mut coordinator: SessionCoordinator,
    driver: ResponseDriver,
    mut dialogue: Dialogue,
    mut turns: mpsc::Receiver<String>,
) {
    while let Some(text) = turns.recv().await {
        let prompt = match coordinator.handle_user_speech(&text).await {
            Ok(prompt) => prompt,
            Err(e) if e.is_disconnect() => break,
            Err(e) => {
                tracing::warn!(session_id = %coordinator.session_id(), error = %e, "Failed to accept turn");
                continue;
            }
        };
        if prompt.is_empty() {
            // nothing recognized: close the response that was just opened
            if let Err(e) = coordinator.end_response().await {
                if e.is_disconnect() {
                    break;
                }
            }
            continue;
        }

        dialogue.push_user(prompt);
        match driver.run(&mut coordinator, dialogue.messages()).await {
            Ok(outcome) => {
                tracing::info!(
                    session_id = %coordinator.session_id(),
                    sentences = outcome.sentences,
                    aborted = outcome.aborted,
                    "Response finished"
                );
                dialogue.push_assistant(outcome.text);
                if coordinator.session().close_after_chat && !outcome.aborted {
                    break;
                }
            }
            Err(e) if e.is_disconnect() => break,
            Err(e) => {
                tracing::error!(session_id = %coordinator.session_id(), error = %e, "Response failed");
            }
        }
    }
}

/// Resolve once the connection has been idle for `timeout`
async fn watch_idle(activity: ActivityClock, timeout: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if activity.idle_for() >= timeout {
            return;
        }
    }
}
