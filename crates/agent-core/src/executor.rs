//! Tool Executor
//!
//! Dispatches a planned [`ToolCall`] to the sandbox and turns whatever
//! happens into an [`Observation`]. Failures here are information for the
//! model, never a reason to abort the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::events::OutputSink;
use crate::message::Message;
use crate::sandbox::{Sandbox, ToolOutput, ToolRequest};
use crate::tool::{ToolCall, ToolCatalog};

/// Default per-invocation timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of one tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    pub output: ToolOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub elapsed: Duration,
}

impl Observation {
    fn failed(call: &ToolCall, error: ToolError, elapsed: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: false,
            output: ToolOutput::empty(),
            error: Some(error),
            elapsed,
        }
    }

    /// Stable reason code of a failed observation
    pub fn reason(&self) -> Option<&'static str> {
        self.error.as_ref().map(ToolError::reason_code)
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// The `tool` message fed back to the model
    pub fn to_message(&self) -> Message {
        let body = match (&self.error, self.success) {
            (None, true) => format!("[Tool '{}' returned]\n{}", self.tool, self.output.to_text()),
            (Some(error), _) => {
                let mut body = format!(
                    "[Tool '{}' failed: {}]\n{}",
                    self.tool,
                    error.reason_code(),
                    error
                );
                if !self.output.is_empty() {
                    body.push('\n');
                    body.push_str(&self.output.to_text());
                }
                body
            }
            (None, false) => format!("[Tool '{}' failed]\n{}", self.tool, self.output.to_text()),
        };
        Message::tool(body, self.call_id.clone(), self.tool.clone())
    }
}

/// Sends tool calls to the sandbox under a timeout
pub struct ToolExecutor {
    sandbox: Option<Arc<dyn Sandbox>>,
    catalog: Arc<ToolCatalog>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        sandbox: Option<Arc<dyn Sandbox>>,
        catalog: Arc<ToolCatalog>,
        timeout: Duration,
    ) -> Self {
        Self {
            sandbox,
            catalog,
            timeout,
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_sandbox(&self) -> bool {
        self.sandbox.is_some()
    }

    /// Run one invocation. Never fails: every outcome is an observation.
    pub async fn execute(&self, call: &ToolCall, chunks: &dyn OutputSink) -> Observation {
        let started = Instant::now();

        if let Err(error) = self.catalog.availability(&call.name) {
            tracing::warn!(tool = %call.name, %error, "Tool unavailable");
            return Observation::failed(call, error, started.elapsed());
        }

        let Some(sandbox) = &self.sandbox else {
            tracing::warn!(tool = %call.name, "No sandbox configured");
            return Observation::failed(
                call,
                ToolError::Unavailable("no sandbox is configured for this deployment".into()),
                started.elapsed(),
            );
        };

        let request = ToolRequest {
            name: &call.name,
            arguments: &call.arguments,
            timeout: self.timeout,
        };

        let result = tokio::time::timeout(self.timeout, sandbox.run_tool(request, chunks)).await;
        let elapsed = started.elapsed();

        match result {
            Err(_) => {
                let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(tool = %call.name, timeout_ms = ms, "Tool timed out");
                Observation::failed(call, ToolError::Timeout(ms), elapsed)
            }
            Ok(Err(error)) => {
                tracing::warn!(tool = %call.name, %error, "Tool could not run");
                Observation::failed(call, error, elapsed)
            }
            Ok(Ok(reply)) if reply.success => {
                tracing::debug!(tool = %call.name, elapsed_ms = elapsed.as_millis(), "Tool succeeded");
                Observation {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    success: true,
                    output: reply.output,
                    error: None,
                    elapsed,
                }
            }
            Ok(Ok(reply)) => {
                let detail = reply
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "tool reported failure".into());
                tracing::warn!(tool = %call.name, %detail, "Tool failed");
                Observation {
                    output: reply.output,
                    ..Observation::failed(call, ToolError::ExecutionFailed(detail), elapsed)
                }
            }
        }
    }
}
