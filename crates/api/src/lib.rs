//! HTTP gateway for the mnemo agent backend.
//!
//! # Endpoints
//!
//! - `GET /` - Service description
//! - `GET /health` - Store and completion-service status
//! - `POST /chat` - Run one turn
//! - `POST /chat/stream` - Run one turn as server-sent events
//! - `GET|DELETE /session/{id}` - Inspect or drop cached session context
//! - `GET|POST /memory/{user_id}` - List or write long-term memories
//! - `DELETE /memory/{user_id}/{key}` - Delete one memory
//! - `GET /config` - Non-sensitive configuration
//!
//! ```text
//! Client (curl / web / mnemo-chat)
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API Gateway   │ ◄── This crate
//! │     (Axum)      │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   Coordinator   │
//! │   (pipeline)    │
//! └─────────────────┘
//! ```

pub mod bootstrap;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use routes::ErrorResponse;
pub use state::AppState;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/chat", post(routes::chat))
        .route("/chat/stream", post(routes::chat_stream))
        .route(
            "/session/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route(
            "/memory/{user_id}",
            get(routes::list_memories).post(routes::save_memory),
        )
        .route("/memory/{user_id}/{key}", axum::routing::delete(routes::delete_memory))
        .route("/config", get(routes::config))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state);

    info!(%addr, "Starting mnemo API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
