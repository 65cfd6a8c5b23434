//! LLM Gateway
//!
//! Defines the interface between the orchestration loop and any LLM backend.
//! A gateway sends the conversation plus the offered tool schemas and returns
//! a canonical [`Completion`], hiding the provider's response shape and its
//! transient failures.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::gateway::{CompletionRequest, LlmGateway};
//! use agent_core::events::NullSink;
//!
//! let request = CompletionRequest::new(&messages, &tools, &options);
//! let completion = gateway.complete(request, &NullSink).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::events::OutputSink;
use crate::message::Message;
use crate::status::Outcome;
use crate::tool::{ToolCall, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 2048 }
const fn default_top_p() -> f32 { 0.9 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Canonical reply of one gateway call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text, empty when the model only called tools
    pub text: String,

    /// Tool calls in the order the model returned them
    pub tool_calls: Vec<ToolCall>,

    /// Normalized outcome
    pub outcome: Outcome,

    /// Provider status string the outcome was derived from
    pub raw_status: Option<String>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// True when `text` was already forwarded incrementally to the sink
    pub streamed: bool,
}

impl Completion {
    /// Successful text-only completion
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            outcome: Outcome::Ok,
            raw_status: None,
            model: String::new(),
            usage: None,
            streamed: false,
        }
    }

    /// Successful completion requesting tools
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::text("")
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome, raw_status: Option<String>) -> Self {
        self.outcome = outcome;
        self.raw_status = raw_status;
        self
    }

    /// Neither text nor tool calls
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Read-only inputs of one gateway call
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],

    /// Offered tools. Empty means the provider must not receive a tool list.
    pub tools: &'a [ToolSchema],

    pub options: &'a GenerationOptions,
}

impl<'a> CompletionRequest<'a> {
    pub const fn new(
        messages: &'a [Message],
        tools: &'a [ToolSchema],
        options: &'a GenerationOptions,
    ) -> Self {
        Self { messages, tools, options }
    }

    pub const fn offers_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// Description of a configured gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayInfo {
    /// Provider family, e.g. "openai" or "envelope"
    pub kind: String,
    pub model: String,
    pub supports_streaming: bool,
}

/// Strategy trait for LLM gateways
///
/// Implementations must be safe to share across sessions; one instance
/// (and its connection pool) serves every session concurrently.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Describe the backend
    fn info(&self) -> GatewayInfo;

    /// Run one completion.
    ///
    /// Streaming providers push text deltas into `sink` as they arrive and
    /// mark the result `streamed`. Errors are returned only once the
    /// implementation's retry budget is spent.
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
        sink: &dyn OutputSink,
    ) -> Result<Completion, GatewayError>;
}
