//! Observability Metrics
//!
//! Prometheus recorder and `/metrics` endpoint. Pipeline crates record
//! through the `metrics` facade; this module only installs the exporter.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::state::AppState;

/// Global Prometheus handle
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder
///
/// Returns `None` when a recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            return None;
        }
    };

    register_default_metrics();

    METRICS_HANDLE.get_or_init(|| handle.clone());
    Some(handle)
}

/// Get the global metrics handle
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

fn register_default_metrics() {
    describe_gauge!("voice_agent_sessions_active", "Live WebSocket sessions");
    describe_counter!(
        "voice_agent_sessions_created_total",
        "WebSocket sessions accepted"
    );
    describe_counter!(
        "voice_agent_frames_sent_total",
        Unit::Count,
        "Audio frames written to clients"
    );
    describe_counter!(
        "voice_agent_utterances_aborted_total",
        "Utterances stopped by the abort flag"
    );
    describe_counter!(
        "voice_agent_report_failures_total",
        "Transcript reports that failed after retries"
    );
    describe_histogram!(
        "voice_agent_first_audio_seconds",
        Unit::Seconds,
        "Time from response start to its first sentence_start"
    );

    gauge!("voice_agent_sessions_active").set(0.0);
    counter!("voice_agent_sessions_created_total").absolute(0);
}

/// Record session created
pub fn record_session_created() {
    counter!("voice_agent_sessions_created_total").increment(1);
}

/// Record active sessions gauge
pub fn record_active_sessions(count: usize) {
    gauge!("voice_agent_sessions_active").set(count as f64);
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.sessions.count());

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}
