//! Axum-based HTTP gateway: route glue, shared state, and response shaping
//! around the relay core.

mod events;
mod handlers;

pub use handlers::SESSION_HEADER;

use crate::config::Config;
use crate::ollama::OllamaClient;
use crate::relay::ChatRelay;
use crate::sessions::{InMemorySessionStore, SessionStore};
use crate::stats::RequestStats;
use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: ChatRelay,
    pub store: Arc<dyn SessionStore>,
    pub client: Arc<OllamaClient>,
    pub stats: Arc<RequestStats>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let store: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(config.max_conversation_length));
        let client = Arc::new(OllamaClient::new(&config));
        let relay = ChatRelay::new(store.clone(), client.clone(), &config);

        Self {
            relay,
            store,
            client,
            stats: Arc::new(RequestStats::new()),
            config: Arc::new(config),
        }
    }
}

/// Run the HTTP gateway.
pub async fn run_gateway(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    run_gateway_with_listener(listener, config).await
}

/// Run the HTTP gateway from a pre-bound listener.
pub async fn run_gateway_with_listener(
    listener: tokio::net::TcpListener,
    config: Config,
) -> Result<()> {
    let state = AppState::from_config(config);
    tracing::info!(
        addr = %listener.local_addr()?,
        model = %state.config.model,
        backend = %state.config.ollama_base_url,
        "gateway listening"
    );

    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    // No global request timeout: /chat and /chat/stream legitimately run
    // for minutes against a slow local model. The backend deadline bounds
    // them instead.
    Router::new()
        .route("/chat", post(handlers::handle_chat))
        .route("/chat/stream", post(handlers::handle_chat_stream))
        .route("/health", get(handlers::handle_health))
        .route("/stats", get(handlers::handle_stats))
        .route("/webhook/zoho", post(handlers::handle_widget_webhook))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install ctrl-c handler");
    }
}
