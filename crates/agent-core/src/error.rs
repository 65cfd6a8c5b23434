//! Error Types
//!
//! Three families surface from the orchestration loop:
//!
//! - [`GatewayError`]: the LLM gateway gave up after its retry budget.
//! - [`ToolError`]: a tool invocation failed. Always recovered into an
//!   [`Observation`](crate::executor::Observation), never fatal.
//! - [`SessionError`]: the state machine itself decided to stop.
//!
//! [`AgentError`] wraps all of them plus infrastructure failures and carries
//! the stable machine-readable reason code reported to clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionStatus;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// LLM gateway failures, surfaced only after retries are exhausted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Request exceeded the configured timeout
    #[error("Gateway timeout: {0}")]
    Timeout(String),

    /// Connection-level failure or 5xx from the provider
    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// Response body could not be interpreted
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    /// Provider rejected the request or reported an error status
    #[error("Provider error{}: {message}", status_suffix(.status))]
    ProviderError {
        /// Raw provider status (HTTP code or status string), kept for diagnostics
        status: Option<String>,
        message: String,
    },
}

fn status_suffix(status: &Option<String>) -> String {
    status.as_deref().map(|s| format!(" ({s})")).unwrap_or_default()
}

impl GatewayError {
    pub fn provider(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            status: Some(status.into()),
            message: message.into(),
        }
    }

    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "gateway_timeout",
            Self::Transport(_) => "gateway_transport",
            Self::MalformedResponse(_) => "gateway_malformed_response",
            Self::ProviderError { .. } => "gateway_provider_error",
        }
    }
}

/// Tool invocation failures
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ToolError {
    /// No backend can serve this tool (sandbox absent, capability disabled, unknown tool)
    #[error("Tool unavailable: {0}")]
    Unavailable(String),

    /// Invocation exceeded its timeout
    #[error("Tool timed out after {0} ms")]
    Timeout(u64),

    /// The sandbox ran the tool and it failed
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

impl ToolError {
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::ExecutionFailed(_) => "execution_failed",
        }
    }
}

/// Reasons the state machine terminates a session on its own
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Planner and summarizer both produced nothing
    #[error("No progress: the model produced neither a tool call nor an answer")]
    NoProgress,

    /// Tool step budget used up
    #[error("Step budget of {0} tool steps exceeded")]
    StepBudgetExceeded(usize),

    /// Cancelled by the client
    #[error("Session cancelled")]
    Cancelled,
}

impl SessionError {
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::NoProgress => "no_progress",
            Self::StepBudgetExceeded(_) => "step_budget_exceeded",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM gateway exhausted its retries
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Session terminated by the state machine
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Status change not permitted by the session graph
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    /// History store failure
    #[error("History store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Gateway(GatewayError::Timeout(_) | GatewayError::Transport(_))
        )
    }

    /// Stable machine-readable reason carried by the terminal `error` event
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.reason_code(),
            Self::Session(e) => e.reason_code(),
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Store(_) => "history_store",
            Self::Config(_) => "config",
            Self::Json(_) | Self::Other(_) => "internal",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Gateway(GatewayError::Timeout(_)) => {
                "The AI service did not respond in time. Please try again.".into()
            }
            Self::Gateway(GatewayError::Transport(_)) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::Gateway(GatewayError::MalformedResponse(_)) => {
                "The AI service returned a response that could not be understood.".into()
            }
            Self::Gateway(GatewayError::ProviderError { message, .. }) => {
                format!("The AI service encountered an error: {message}")
            }
            Self::Session(SessionError::NoProgress) => {
                "The agent could not make progress on this task.".into()
            }
            Self::Session(SessionError::StepBudgetExceeded(_)) => {
                "The task needed too many steps. Please try a simpler request.".into()
            }
            Self::Session(SessionError::Cancelled) => "The task was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
