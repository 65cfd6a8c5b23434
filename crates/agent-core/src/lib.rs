//! # agent-core
//!
//! Session orchestration for a tool-using LLM agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Agent (state machine)                    │
//! │  ┌───────────┐   ┌──────────────┐   ┌──────────────────────────┐ │
//! │  │  Planner  │──▶│ ToolExecutor │──▶│  HistoryStore            │ │
//! │  └─────┬─────┘   └──────┬───────┘   └──────────────────────────┘ │
//! │        │                │                                        │
//! │  ┌─────▼──────┐   ┌─────▼─────┐     ┌──────────────────────────┐ │
//! │  │ LlmGateway │   │  Sandbox  │     │  EventEmitter ─▶ client  │ │
//! │  └────────────┘   └───────────┘     └──────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `LlmGateway`, `Sandbox` and `HistoryStore` are traits; concrete HTTP
//! backends live in `agent-runtime`.

pub mod error;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod history;
pub mod message;
pub mod plan;
pub mod planner;
pub mod reasoning;
pub mod sandbox;
pub mod session;
pub mod status;
pub mod tool;

#[cfg(test)]
mod testing;

pub use error::{AgentError, GatewayError, Result, SessionError, ToolError};
pub use events::{Event, EventEmitter, EventEnvelope, EventStream, NullSink, OutputSink, event_channel};
pub use executor::{Observation, ToolExecutor};
pub use gateway::{Completion, CompletionRequest, GatewayInfo, GenerationOptions, LlmGateway, TokenUsage};
pub use history::{HistoryStore, MemoryHistoryStore};
pub use message::{Conversation, Message, Role};
pub use plan::{Plan, Step};
pub use planner::Planner;
pub use reasoning::{Agent, AgentBuilder, AgentConfig, Failure, SessionHandle, SessionReport};
pub use sandbox::{Sandbox, SandboxReply, ToolOutput, ToolRequest};
pub use session::{Session, SessionId, SessionStatus};
pub use status::{NormalizedStatus, Outcome, normalize_status};
pub use tool::{Capability, ToolCall, ToolCatalog, ToolSchema, tools_prompt_section};
