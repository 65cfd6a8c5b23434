//! Sandbox collaborator interface
//!
//! The sandbox physically runs shell, file, browser and search actions. The
//! agent reaches it through [`Sandbox`] and treats it as opaque; it may live
//! across a network boundary or be absent altogether.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::events::OutputSink;

/// One tool run as sent to the sandbox
#[derive(Clone, Copy, Debug)]
pub struct ToolRequest<'a> {
    pub name: &'a str,
    pub arguments: &'a Value,
    /// Deadline the sandbox should enforce on its side
    pub timeout: Duration,
}

/// Tool output payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
}

impl ToolOutput {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    /// Render for the conversation
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(Value::String(text)) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Structured(value) => value.is_null(),
        }
    }
}

impl Default for ToolOutput {
    fn default() -> Self {
        Self::empty()
    }
}

/// What the sandbox reported for one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SandboxReply {
    pub success: bool,
    #[serde(default)]
    pub output: ToolOutput,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl SandboxReply {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: ToolOutput::Text(output.into()),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: ToolOutput::empty(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }
}

/// Capability that executes tools on the agent's behalf
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run one tool. Streaming sandboxes push partial output into `chunks`.
    ///
    /// Errors describe why the run could not happen or could not finish;
    /// a tool that ran and failed is a reply with `success: false`.
    async fn run_tool(
        &self,
        request: ToolRequest<'_>,
        chunks: &dyn OutputSink,
    ) -> Result<SandboxReply, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_accepts_text_or_structured_output() {
        let text: SandboxReply =
            serde_json::from_value(json!({"success": true, "output": "ok", "duration_ms": 5}))
                .unwrap();
        assert_eq!(text.output, ToolOutput::Text("ok".into()));

        let structured: SandboxReply = serde_json::from_value(
            json!({"success": true, "output": {"files": ["a", "b"]}}),
        )
        .unwrap();
        assert_eq!(structured.output.to_text(), r#"{"files":["a","b"]}"#);
        assert_eq!(structured.duration_ms, 0);
    }

    #[test]
    fn missing_output_defaults_to_empty() {
        let reply: SandboxReply =
            serde_json::from_value(json!({"success": false, "error": "exit 1"})).unwrap();
        assert!(reply.output.is_empty());
        assert_eq!(reply.error.as_deref(), Some("exit 1"));
    }
}
