//! # agent-runtime
//!
//! HTTP collaborators for the agent orchestrator.
//!
//! ## Components
//!
//! - **`HttpGateway`**: LLM gateway over reqwest. Speaks either the
//!   OpenAI-compatible chat completions format or a custom `{status, data}`
//!   envelope, with retry and optional SSE streaming.
//! - **`HttpSandbox`**: client for the sandbox service that runs tools.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{GatewayConfig, HttpGateway};
//!
//! let gateway = HttpGateway::new(GatewayConfig::from_env()?)?;
//! let agent = AgentBuilder::new()
//!     .gateway(Arc::new(gateway))
//!     .build()?;
//! ```

pub mod config;
pub mod http;
pub mod retry;
pub mod sandbox;
pub mod shape;

pub use config::{GatewayConfig, ProviderKind, SandboxConfig};
pub use http::HttpGateway;
pub use retry::RetryPolicy;
pub use sandbox::HttpSandbox;
pub use shape::ResponseShape;

// Re-export core types for convenience
pub use agent_core::{Agent, AgentBuilder, AgentError, LlmGateway, Message, Result, Role, Sandbox, Session};
