//! HTTP/WebSocket Handlers

use std::time::Instant;

use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade, ws::{Message as WsMessage, WebSocket}},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agent_core::{
    error::{AgentError, GatewayError},
    events::{EventStream, NullSink},
    gateway::CompletionRequest,
    message::Message,
    session::SessionId,
};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: &'static str,
    pub model: String,
    pub api_base: String,
    pub has_api_key: bool,
    pub streaming: bool,
    pub sandbox_configured: bool,
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct LlmHealthResponse {
    pub status: &'static str,
    pub model: String,
    pub latency_ms: u64,
    pub reply: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub session_id: SessionId,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: SessionId,
    pub status: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Client frames accepted on the session socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Cancel,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Session not found")]
    NotFound,

    #[error("Session events already have a consumer")]
    EventsTaken,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            Self::EventsTaken => (StatusCode::CONFLICT, "EVENTS_TAKEN", self.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            Self::Agent(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.reason_code(), e.user_message()),
            Self::Gateway(GatewayError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", self.to_string())
            }
            Self::Gateway(e) => (StatusCode::BAD_GATEWAY, e.reason_code(), self.to_string()),
        };
        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error,
                code: code.into(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = &state.gateway_config;
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: config.kind.as_str(),
        model: config.model.clone(),
        api_base: config.api_base_preview(),
        has_api_key: config.api_key.is_some(),
        streaming: state.gateway.info().supports_streaming,
        sandbox_configured: state.sandbox_config.url.is_some(),
        active_sessions: state.sessions.len().await,
    })
}

/// Probe the LLM gateway with a one-word prompt
pub async fn llm_health_check(State(state): State<AppState>) -> ApiResult<Json<LlmHealthResponse>> {
    let messages = [Message::user("Reply with the single word OK.")];
    let options = state.agent.config().generation.clone();
    let started = Instant::now();

    let completion = state
        .gateway
        .complete(CompletionRequest::new(&messages, &[], &options), &NullSink)
        .await?;

    Ok(Json(LlmHealthResponse {
        status: "ok",
        model: completion.model,
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        reply: completion.text.chars().take(100).collect(),
    }))
}

/// Start a session for the given goal
pub async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<CreateSessionResponse>)> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }

    let handle = state.agent.spawn(payload.message);
    let session_id = handle.id.clone();
    state.sessions.track(handle).await;
    tracing::info!(session = %session_id, "Session created");

    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

/// WebSocket delivering a session's ordered event stream
pub async fn session_events(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let entry = state
        .sessions
        .get(&SessionId::from_string(id))
        .await
        .ok_or(ApiError::NotFound)?;
    let events = entry.take_events().await.ok_or(ApiError::EventsTaken)?;
    let cancel = entry.cancel.clone();

    Ok(ws.on_upgrade(move |socket| stream_events(socket, events, cancel)))
}

async fn stream_events(socket: WebSocket, events: EventStream, cancel: CancellationToken) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = events.into_stream();

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize event");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    tracing::debug!("Event consumer went away");
                    break;
                }
            }
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Cancel) => {
                        tracing::info!("Cancellation requested over WebSocket");
                        cancel.cancel();
                    }
                    Err(e) => tracing::debug!(error = %e, "Ignoring unknown client frame"),
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(WsMessage::Close(None)).await;
}

/// Out-of-band cancellation
pub async fn cancel_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let session_id = SessionId::from_string(id);
    let entry = state.sessions.get(&session_id).await.ok_or(ApiError::NotFound)?;
    entry.cancel.cancel();
    tracing::info!(session = %session_id, "Cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            session_id,
            cancelled: true,
        }),
    ))
}

/// Messages recorded so far
pub async fn session_history(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<HistoryResponse>> {
    let session_id = SessionId::from_string(id);
    let entry = state.sessions.get(&session_id).await.ok_or(ApiError::NotFound)?;
    let messages = state.agent.history_store().load(&session_id).await?;
    let status = entry
        .report()
        .await
        .map_or_else(|| "running".to_string(), |r| r.status.to_string());

    Ok(Json(HistoryResponse {
        session_id,
        status,
        messages,
    }))
}

/// Cancel if running, then forget the session
pub async fn delete_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    let session_id = SessionId::from_string(id);
    state
        .sessions
        .forget(&session_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    tracing::info!(session = %session_id, "Session deleted");

    Ok(StatusCode::NO_CONTENT)
}
