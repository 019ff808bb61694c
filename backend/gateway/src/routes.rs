//! Request handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use confab_agent::{ConfirmationAck, SessionStats, TurnSummary};
use confab_core::PendingToolCall;

use crate::error::ApiError;
use crate::server::AppState;
use crate::sse;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.message.trim().is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
    pub confirmed: bool,
    #[serde(default)]
    pub tool_args: Map<String, Value>,
}

/// `POST /chat/stream`
#[instrument(skip_all)]
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let handle = state
        .orchestrator
        .send_message(req.session_id, req.message)
        .await?;
    debug!(session_id = %handle.session_id, "Streaming turn");
    Ok(sse::event_stream(handle.events))
}

/// `POST /chat`
#[instrument(skip_all)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TurnSummary>, ApiError> {
    req.validate()?;
    let handle = state
        .orchestrator
        .send_message(req.session_id, req.message)
        .await?;
    Ok(Json(handle.collect().await))
}

/// `POST /chat/tool-confirm`
pub async fn tool_confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmationAck>, ApiError> {
    let ack = state
        .orchestrator
        .confirm(&req.session_id, req.confirmed, req.tool_args)
        .await?;
    Ok(Json(ack))
}

/// `GET /session/:id`
pub async fn session_stats(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    Ok(Json(state.orchestrator.session_stats(&session_id).await?))
}

/// `GET /session/:id/pending`
pub async fn pending(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<PendingToolCall>, ApiError> {
    state
        .orchestrator
        .pending_confirmation(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no pending tool call for session {session_id}")))
}

/// `GET /session/:id/events`. Only live sessions (a turn running or a call
/// parked for confirmation) can be re-attached.
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.orchestrator.subscribe(&session_id).await?;
    debug!(%session_id, "Subscriber re-attached");
    Ok(sse::event_stream(events))
}

/// `DELETE /session/:id/clear`
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.orchestrator.clear_session(&session_id).await?;
    Ok(Json(json!({
        "status": "cleared",
        "session_id": session_id,
        "removed": removed,
    })))
}

/// `GET /tools`
pub async fn tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "tools": state.orchestrator.tools() }))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "provider": state.orchestrator.provider_name(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
