use super::AppState;
use super::events::sse_response;
use crate::error::RelayError;
use axum::{
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;

/// Header carrying a client-chosen session identifier.
pub const SESSION_HEADER: &str = "X-Session-ID";

/// POST /chat and /chat/stream request body.
#[derive(Debug, serde::Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /webhook/zoho request body, as the SalesIQ widget sends it.
#[derive(Debug, Default, serde::Deserialize)]
pub struct WidgetWebhookBody {
    #[serde(default)]
    pub message: WidgetMessage,
    #[serde(default)]
    pub visitor: WidgetVisitor,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct WidgetMessage {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct WidgetVisitor {
    #[serde(default = "unknown_visitor")]
    pub id: String,
}

impl Default for WidgetVisitor {
    fn default() -> Self {
        Self {
            id: unknown_visitor(),
        }
    }
}

fn unknown_visitor() -> String {
    "unknown".into()
}

fn session_hint(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
        .map(ToOwned::to_owned)
}

/// POST /chat — single-shot chat turn.
pub(super) async fn handle_chat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> impl IntoResponse {
    state.stats.record_request();

    let Ok(Json(chat_body)) = body else {
        state.stats.record_failure();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Missing 'message' in request body"})),
        );
    };
    let Some(message) = chat_body.message else {
        state.stats.record_failure();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Missing 'message' in request body"})),
        );
    };

    let hint = session_hint(&headers);
    match state
        .relay
        .handle_chat(hint.as_deref(), &addr.ip().to_string(), &message)
        .await
    {
        Ok(reply) => {
            state.stats.record_success();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "response": reply.text,
                    "session_id": reply.session_id,
                    "timestamp": reply.timestamp.to_rfc3339(),
                })),
            )
        }
        Err(RelayError::EmptyMessage) => {
            state.stats.record_failure();
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "Empty message"})),
            )
        }
        Err(RelayError::Backend(error)) => {
            state.stats.record_failure();
            tracing::error!(%error, "chat request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "Failed to get response from AI model",
                    "response": error.user_message(),
                })),
            )
        }
    }
}

/// POST /chat/stream — same contract as /chat, answered as an SSE stream.
pub(super) async fn handle_chat_stream(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let message = match body {
        Ok(Json(ChatBody {
            message: Some(message),
        })) => message,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "Missing 'message' in request body"})),
            )
                .into_response();
        }
    };

    let hint = session_hint(&headers);
    match state
        .relay
        .stream_chat(hint.as_deref(), &addr.ip().to_string(), &message)
    {
        Ok((_session_id, events)) => sse_response(events),
        Err(RelayError::EmptyMessage) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Empty message"})),
        )
            .into_response(),
        Err(RelayError::Backend(error)) => {
            tracing::error!(%error, "stream setup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "Failed to get response from AI model"})),
            )
                .into_response()
        }
    }
}

/// GET /health — live probe of the backend, always public.
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let alive = state.client.check_alive().await;
    Json(json!({
        "status": if alive { "healthy" } else { "unhealthy" },
        "backend_status": if alive { "connected" } else { "disconnected" },
        "model": state.config.model,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.stats.uptime_seconds(),
    }))
}

/// GET /stats — usage counters. Doubles as the reaper trigger: idle
/// sessions are evicted here rather than on a timer, so staleness is
/// bounded by traffic to this endpoint.
pub(super) async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.store.sweep(state.config.session_retention_secs);
    if removed > 0 {
        tracing::info!(removed, "reaped idle sessions");
    }

    Json(json!({
        "total_requests": state.stats.total(),
        "successful_requests": state.stats.succeeded(),
        "failed_requests": state.stats.failed(),
        "active_sessions": state.store.session_count(),
        "buffered_messages": state.store.buffered_messages(),
        "max_conversation_length": state.config.max_conversation_length,
        "context_window": state.config.context_window,
        "model": state.config.model,
        "start_time": state.stats.started_at().to_rfc3339(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// POST /webhook/zoho — SalesIQ chat-widget adapter.
pub(super) async fn handle_widget_webhook(
    State(state): State<AppState>,
    body: Result<Json<WidgetWebhookBody>, JsonRejection>,
) -> impl IntoResponse {
    state.stats.record_request();

    let Ok(Json(payload)) = body else {
        state.stats.record_failure();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No message found"})),
        );
    };

    match state
        .relay
        .handle_widget_message(&payload.visitor.id, &payload.message.text)
        .await
    {
        Ok(reply) => {
            state.stats.record_success();
            (
                StatusCode::OK,
                Json(json!({"response": reply.text, "success": true})),
            )
        }
        Err(RelayError::EmptyMessage) => {
            state.stats.record_failure();
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "No message found"})),
            )
        }
        Err(RelayError::Backend(error)) => {
            state.stats.record_failure();
            tracing::error!(%error, "widget webhook request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"response": error.user_message(), "success": false})),
            )
        }
    }
}
