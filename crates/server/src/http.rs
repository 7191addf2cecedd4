//! HTTP Endpoints
//!
//! Health, readiness, metrics and the WebSocket upgrade route.

use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::WebSocketHandler;

/// Fallback origin when none of the configured ones are usable
const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = {
        let config = state.get_config();
        build_cors_layer(&config.server.cors_origins, config.server.cors_enabled)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws/:device_id", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - disabled: permissive (development only)
/// - no usable origins: localhost:3000
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No usable CORS origins configured, defaulting to {}", DEFAULT_ORIGIN);
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static(DEFAULT_ORIGIN))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    // credentialed CORS cannot use wildcard headers
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Liveness plus session capacity
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let active = state.sessions.count();
    let capacity = state.sessions.capacity();
    let saturated = active >= capacity;

    let status_code = if saturated {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if saturated { "saturated" } else { "healthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": {
                "active": active,
                "capacity": capacity,
            },
        })),
    )
}

/// Readiness: the text generator must be reachable
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let available = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state.llm.is_available(),
    )
    .await
    .unwrap_or(false);

    let status_code = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if available { "ready" } else { "not_ready" },
            "checks": {
                "llm_backend": {
                    "status": if available { "ok" } else { "unreachable" },
                    "model": state.llm.model_name(),
                },
            },
        })),
    )
}

/// WebSocket handler wrapper
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    WebSocketHandler::handle(ws, State(state), Path(device_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use voice_agent_config::Settings;
    use voice_agent_core::NoopSink;
    use voice_agent_llm::{GenerationResult, LlmBackend, LlmError, Message};
    use voice_agent_pipeline::ConversationSession;

    struct OfflineLlm;

    #[async_trait]
    impl LlmBackend for OfflineLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            Err(LlmError::Network("offline".to_string()))
        }

        async fn generate_stream(
            &self,
            _messages: &[Message],
            _tx: mpsc::Sender<String>,
        ) -> Result<GenerationResult, LlmError> {
            Err(LlmError::Network("offline".to_string()))
        }

        async fn is_available(&self) -> bool {
            false
        }

        fn model_name(&self) -> &str {
            "offline"
        }
    }

    fn state(max_sessions: usize) -> AppState {
        let mut settings = Settings::default();
        settings.server.max_sessions = max_sessions;
        AppState::new(settings, Arc::new(OfflineLlm), Arc::new(NoopSink))
    }

    #[test]
    fn test_router_creation() {
        let _ = create_router(state(10));
    }

    #[test]
    fn test_router_with_configured_origins() {
        let mut settings = Settings::default();
        settings.server.cors_origins = vec!["https://console.example.com".to_string()];
        let _ = create_router(AppState::new(
            settings,
            Arc::new(OfflineLlm),
            Arc::new(NoopSink),
        ));
    }

    #[tokio::test]
    async fn test_admin_reload_not_exposed() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let response = create_router(state(10))
            .oneshot(
                Request::post("/admin/reload-config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = create_router(state(10))
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_reports_capacity() {
        let state = state(1);

        let (status, Json(body)) = health_check(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"]["active"], 0);
        assert_eq!(body["sessions"]["capacity"], 1);

        state
            .sessions
            .create(&ConversationSession::new("s-1", "aa:bb"))
            .unwrap();
        let (status, Json(body)) = health_check(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "saturated");
    }

    #[tokio::test]
    async fn test_readiness_reflects_llm() {
        let (status, Json(body)) = readiness_check(State(state(10))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["llm_backend"]["model"], "offline");
    }
}
