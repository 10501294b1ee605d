//! HTTP route handlers for the API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use mnemo_common::{AgentRequest, AgentResponse, Context, MnemoError};
use mnemo_coordinator::decode_value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::AppState;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: &'static str,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            code,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", error)
    }

    pub fn validation(error: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", error)
    }
}

impl From<MnemoError> for ErrorResponse {
    fn from(e: MnemoError) -> Self {
        match e {
            MnemoError::Validation(msg) => Self::validation(msg),
            MnemoError::Store(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", e.to_string())
            }
            MnemoError::Cache(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SESSION_CACHE_UNAVAILABLE",
                e.to_string(),
            ),
            other => {
                error!(error = %other, "Request failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    other.to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "mnemo",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "POST /chat",
            "POST /chat/stream",
            "GET /session/{id}",
            "DELETE /session/{id}",
            "GET /memory/{user_id}",
            "POST /memory/{user_id}",
            "DELETE /memory/{user_id}/{key}",
            "GET /config",
        ],
    }))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub database: bool,
    pub session_cache: &'static str,
    pub llm_configured: bool,
}

/// Health check endpoint.
///
/// Degraded when the database is unreachable or a configured Redis has
/// fallen back to the in-process cache.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    let config = coordinator.config();

    let database = match coordinator.memory().store().health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            false
        }
    };
    let fallback = coordinator.memory().sessions().is_fallback();
    let cache_expected = config.store.redis_url.is_some();

    Json(HealthResponse {
        status: if database && !(fallback && cache_expected) {
            "healthy"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        database,
        session_cache: if fallback { "fallback" } else { "redis" },
        llm_configured: config.llm.is_configured(),
    })
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRequest>,
) -> Result<Json<AgentResponse>, ErrorResponse> {
    info!(
        session_id = request.session_id.as_deref().unwrap_or("-"),
        message_preview = %request.message.chars().take(50).collect::<String>(),
        "Received chat message"
    );
    let response = state.coordinator.run(request).await?;
    Ok(Json(response))
}

/// Stream a turn as server-sent events, one JSON `StreamChunk` per event.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ErrorResponse> {
    info!(
        session_id = request.session_id.as_deref().unwrap_or("-"),
        "Received streaming chat message"
    );
    let mut chunks = state.coordinator.clone().run_stream(request)?;

    let events = async_stream::stream! {
        while let Some(chunk) = chunks.next().await {
            match serde_json::to_string(&chunk) {
                Ok(data) => yield Ok(Event::default().data(data)),
                Err(e) => {
                    error!(error = %e, "Failed to encode stream chunk");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub context: Context,
    pub active: bool,
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ErrorResponse> {
    debug!(session_id = %session_id, "Getting session");
    let coordinator = &state.coordinator;

    let context = match coordinator.memory().sessions().get(&session_id).await {
        Ok(context) => context,
        Err(e) => {
            warn!(error = %e, session_id = %session_id, "Session cache read failed");
            None
        }
    };
    let active = match coordinator.authenticator().validate_session(&session_id).await {
        Ok(active) => active,
        Err(e) => {
            warn!(error = %e, session_id = %session_id, "Session lookup failed");
            false
        }
    };

    if context.is_none() && !active {
        return Err(ErrorResponse::not_found(format!(
            "Session '{session_id}' not found"
        )));
    }

    Ok(Json(SessionResponse {
        session_id,
        context: context.unwrap_or_default(),
        active,
    }))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ErrorResponse> {
    state
        .coordinator
        .memory()
        .sessions()
        .delete(&session_id)
        .await?;
    info!(session_id = %session_id, "Session context dropped");
    Ok(Json(json!({"session_id": session_id, "deleted": true})))
}

#[derive(Debug, Serialize)]
pub struct MemoriesResponse {
    pub user_id: i64,
    pub memories: Context,
}

pub async fn list_memories(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<MemoriesResponse>, ErrorResponse> {
    let records = state.coordinator.memory().store().query_by_user(user_id).await?;
    let memories = records
        .into_iter()
        .map(|r| (r.key, decode_value(&r.value)))
        .collect();
    Ok(Json(MemoriesResponse { user_id, memories }))
}

#[derive(Debug, Deserialize)]
pub struct MemoryWrite {
    pub key: String,
    pub value: Value,
}

pub async fn save_memory(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(write): Json<MemoryWrite>,
) -> Result<Json<Value>, ErrorResponse> {
    let key = write.key.trim();
    if key.is_empty() {
        return Err(ErrorResponse::validation("key must not be empty"));
    }
    state
        .coordinator
        .memory()
        .save_record(user_id, key, &write.value)
        .await?;
    Ok(Json(json!({"user_id": user_id, "key": key, "saved": true})))
}

pub async fn delete_memory(
    State(state): State<Arc<AppState>>,
    Path((user_id, key)): Path<(i64, String)>,
) -> Result<Json<Value>, ErrorResponse> {
    let deleted = state.coordinator.memory().delete_record(user_id, &key).await?;
    Ok(Json(json!({"user_id": user_id, "key": key, "deleted": deleted})))
}

pub async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.coordinator.config().public_view())
}
