//! Scripted collaborators for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, ToolError};
use crate::events::OutputSink;
use crate::gateway::{Completion, CompletionRequest, GatewayInfo, LlmGateway};
use crate::sandbox::{Sandbox, SandboxReply, ToolRequest};

/// What the scripted gateway saw for one call
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub tools: Vec<String>,
    pub messages: usize,
    pub last_text: String,
}

/// Gateway replaying a fixed script, then repeating its fallback
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Completion, GatewayError>>>,
    fallback: Option<Completion>,
    cancel_on_call: Option<CancellationToken>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, completion: Completion) -> Self {
        self.then_result(Ok(completion))
    }

    pub fn then_err(self, error: GatewayError) -> Self {
        self.then_result(Err(error))
    }

    fn then_result(self, result: Result<Completion, GatewayError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// Returned once the script is exhausted
    pub fn repeat(mut self, completion: Completion) -> Self {
        self.fallback = Some(completion);
        self
    }

    /// Cancel `token` while the first request is in flight
    pub fn cancel_on_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    fn info(&self) -> GatewayInfo {
        GatewayInfo {
            kind: "scripted".into(),
            model: "test".into(),
            supports_streaming: true,
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest<'_>,
        sink: &dyn OutputSink,
    ) -> Result<Completion, GatewayError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            messages: request.messages.len(),
            last_text: request
                .messages
                .last()
                .map(|m| m.text().to_string())
                .unwrap_or_default(),
        });

        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }

        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| GatewayError::Transport("script exhausted".into())),
        };

        if let Ok(completion) = &result {
            if completion.streamed {
                for word in completion.text.split_inclusive(' ') {
                    sink.push(word).await;
                }
            }
        }
        result
    }
}

/// Sandbox replaying fixed replies
#[derive(Default)]
pub struct ScriptedSandbox {
    replies: Mutex<VecDeque<Result<SandboxReply, ToolError>>>,
    delay: Option<Duration>,
    cancel_on_call: Option<CancellationToken>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: SandboxReply) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub fn error(self, error: ToolError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancel `token` as soon as a tool starts running
    pub fn cancel_on_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run_tool(
        &self,
        request: ToolRequest<'_>,
        chunks: &dyn OutputSink,
    ) -> Result<SandboxReply, ToolError> {
        self.calls.lock().unwrap().push(request.name.to_string());
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SandboxReply::success("ok")));
        if let Ok(reply) = &reply {
            chunks.push(&reply.output.to_text()).await;
        }
        reply
    }
}
