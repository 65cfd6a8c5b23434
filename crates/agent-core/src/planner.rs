//! Planner
//!
//! Turns the session's conversation into a [`Plan`] with exactly one gateway
//! call. The planner owns the tool-use policy: tool schemas are sent only
//! when tool use is permitted for the turn, and never for the summarizer.

use std::sync::Arc;

use crate::error::GatewayError;
use crate::events::OutputSink;
use crate::gateway::{Completion, CompletionRequest, GenerationOptions, LlmGateway};
use crate::message::{Message, Role};
use crate::plan::Plan;
use crate::session::Session;
use crate::status::Outcome;
use crate::tool::{ToolCatalog, ToolSchema};

/// Instruction appended when planning stalls
pub const SUMMARIZE_INSTRUCTION: &str = "Produce a final summary now. Do not call any tools. \
Answer the user's original request as completely as possible using the information gathered so far.";

/// Default task framing
pub const DEFAULT_SYSTEM_PROMPT: &str = r"You are an autonomous agent working inside a sandbox.
You can run shell commands, read and write files, browse the web and search when those tools are offered.
Work step by step: call a tool when you need information or need to act, and read its result before continuing.
When the task is done, reply with the final answer as plain text and no tool calls.";

pub struct Planner {
    gateway: Arc<dyn LlmGateway>,
    catalog: Arc<ToolCatalog>,
    options: GenerationOptions,
    system_prompt: String,
    allow_tools: bool,
}

impl Planner {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        catalog: Arc<ToolCatalog>,
        options: GenerationOptions,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            catalog,
            options,
            system_prompt: system_prompt.into(),
            allow_tools: true,
        }
    }

    /// Disable tool use for every turn
    #[must_use]
    pub fn allow_tools(mut self, allow: bool) -> Self {
        self.allow_tools = allow;
        self
    }

    /// Whether this turn may offer tools to the model
    pub fn tools_permitted(&self) -> bool {
        self.allow_tools && !self.catalog.is_empty()
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Ask the model for the next step of `session`
    pub async fn plan(
        &self,
        session: &Session,
        sink: &dyn OutputSink,
    ) -> Result<Plan, GatewayError> {
        let messages = self.outbound(session.history().messages(), None);
        let tools: Vec<ToolSchema> = if self.tools_permitted() {
            self.catalog.offered()
        } else {
            Vec::new()
        };

        let completion = self.call(&messages, &tools, sink).await?;

        if !completion.tool_calls.is_empty() {
            if tools.is_empty() {
                tracing::warn!(
                    session = %session.id,
                    calls = completion.tool_calls.len(),
                    "Model requested tools that were not offered; ignoring them"
                );
            } else {
                let narration = Some(completion.text).filter(|t| !t.trim().is_empty());
                return Ok(Plan::tool_calls(completion.tool_calls, narration));
            }
        }

        if completion.text.trim().is_empty() {
            tracing::debug!(session = %session.id, "Model produced an empty plan");
            Ok(Plan::empty())
        } else {
            Ok(Plan::final_answer(completion.text))
        }
    }

    /// Force a final answer without tools. `None` when the model still says nothing.
    pub async fn summarize(
        &self,
        session: &Session,
        sink: &dyn OutputSink,
    ) -> Result<Option<String>, GatewayError> {
        let messages = self.outbound(
            session.history().messages(),
            Some(Message::user(SUMMARIZE_INSTRUCTION)),
        );
        let completion = self.call(&messages, &[], sink).await?;

        let text = completion.text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    fn outbound(&self, history: &[Message], extra: Option<Message>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(history.iter().filter(|m| m.role != Role::System).cloned());
        messages.extend(extra);
        messages
    }

    async fn call(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        sink: &dyn OutputSink,
    ) -> Result<Completion, GatewayError> {
        let request = CompletionRequest::new(messages, tools, &self.options);
        let completion = self.gateway.complete(request, sink).await?;

        match completion.outcome {
            Outcome::Ok => {}
            Outcome::Error => {
                return Err(GatewayError::ProviderError {
                    status: completion.raw_status.clone(),
                    message: "provider reported an error outcome".into(),
                });
            }
            Outcome::NeedsRetry => {
                return Err(GatewayError::Transport(format!(
                    "provider still asked for a retry ({})",
                    completion.raw_status.as_deref().unwrap_or("no status")
                )));
            }
        }

        if !completion.streamed && !completion.text.trim().is_empty() {
            sink.push(&completion.text).await;
        }
        Ok(completion)
    }
}
