//! HTTP LLM gateway
//!
//! One [`HttpGateway`] serves every session; the underlying reqwest client
//! pools connections. Transient failures are retried per [`RetryPolicy`]
//! before anything is reported to the planner.
//!
//! [`RetryPolicy`]: crate::retry::RetryPolicy

use std::collections::BTreeMap;

use agent_core::error::GatewayError;
use agent_core::events::OutputSink;
use agent_core::gateway::{Completion, CompletionRequest, GatewayInfo, LlmGateway, TokenUsage};
use agent_core::status::{Outcome, normalize_status};
use agent_core::tool::ToolCall;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::retry::is_transient;
use crate::shape::{parse_arguments, parse_usage};

/// Longest slice of an error body kept in messages
const ERROR_BODY_LIMIT: usize = 500;

pub struct HttpGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!("{}{}", self.config.api_base, self.config.shape().path())
    }

    const fn streams(&self) -> bool {
        self.config.stream && self.config.shape().supports_streaming()
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let request = self.http.post(self.url()).json(body);
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// One HTTP exchange, buffered
    async fn send(&self, body: &Value, tools_offered: bool) -> Result<Completion, GatewayError> {
        let response = self.post(body).send().await.map_err(classify_reqwest_error)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(classify_reqwest_error)?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::MalformedResponse(format!("Response is not JSON: {e}")))?;
        self.config
            .shape()
            .parse(&value, &self.config.model, tools_offered)
    }

    /// One HTTP exchange, forwarding text deltas as they arrive.
    /// `forwarded` is set once any delta reached the sink.
    async fn send_streaming(
        &self,
        body: &Value,
        tools_offered: bool,
        sink: &dyn OutputSink,
        forwarded: &mut bool,
    ) -> Result<Completion, GatewayError> {
        let response = self.post(body).send().await.map_err(classify_reqwest_error)?;
        let response = check_status(response).await?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !is_sse {
            tracing::debug!("Provider ignored the stream flag, parsing a buffered body");
            let bytes = response.bytes().await.map_err(classify_reqwest_error)?;
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| GatewayError::MalformedResponse(format!("Response is not JSON: {e}")))?;
            return self.config.shape().parse(&value, &self.config.model, tools_offered);
        }

        // A trailing blank line flushes a final event the server left unterminated
        let bytes = response
            .bytes_stream()
            .chain(futures::stream::once(async { Ok(b"\n\n".as_slice().into()) }));
        let mut events = std::pin::pin!(bytes.eventsource());
        let mut assembly = StreamAssembly::new(&self.config.model);

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| GatewayError::Transport(format!("SSE stream error: {e}")))?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }
            let chunk: Value = serde_json::from_str(data)
                .map_err(|e| GatewayError::MalformedResponse(format!("Bad SSE chunk: {e}")))?;
            if let Some(delta) = assembly.absorb(&chunk)? {
                sink.push(&delta).await;
                *forwarded = true;
            }
        }

        Ok(assembly.finish())
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    fn info(&self) -> GatewayInfo {
        GatewayInfo {
            kind: self.config.kind.as_str().into(),
            model: self.config.model.clone(),
            supports_streaming: self.streams(),
        }
    }

    async fn complete(
        &self,
        request: CompletionRequest<'_>,
        sink: &dyn OutputSink,
    ) -> Result<Completion, GatewayError> {
        let streaming = self.streams();
        let body = self
            .config
            .shape()
            .request_body(&request, &self.config.provider, streaming);
        let tools_offered = request.offers_tools();
        let retry = self.config.retry;
        let attempts = retry.attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(attempt, attempts, model = %self.config.model, tools = request.tools.len(), "Calling LLM");

            let mut forwarded = false;
            let result = if streaming {
                self.send_streaming(&body, tools_offered, sink, &mut forwarded).await
            } else {
                self.send(&body, tools_offered).await
            };
            let may_retry = attempt < attempts && !forwarded;

            match result {
                Ok(completion) if completion.outcome == Outcome::NeedsRetry && may_retry => {
                    tracing::warn!(
                        attempt,
                        status = completion.raw_status.as_deref().unwrap_or_default(),
                        "Provider asked for a retry"
                    );
                }
                Ok(completion) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "LLM call succeeded after retry");
                    }
                    return Ok(completion);
                }
                Err(error) if is_transient(&error) && may_retry => {
                    tracing::warn!(attempt, attempts, %error, "LLM call failed, retrying");
                }
                Err(error) => {
                    tracing::error!(attempt, %error, "LLM call failed");
                    return Err(error);
                }
            }

            let delay = retry.delay(attempt);
            tracing::debug!(delay_ms = delay.as_millis(), "Backing off");
            tokio::time::sleep(delay).await;
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let code = status.as_u16();
    if code == 408 {
        GatewayError::Timeout(format!("HTTP 408: {snippet}"))
    } else if status.is_server_error() {
        GatewayError::Transport(format!("HTTP {code}: {snippet}"))
    } else {
        GatewayError::ProviderError {
            status: Some(code.to_string()),
            message: snippet,
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        GatewayError::Transport(format!("Connection failed: {e}"))
    } else if e.is_decode() {
        GatewayError::MalformedResponse(format!("Failed to read body: {e}"))
    } else {
        GatewayError::Transport(format!("Network error: {e}"))
    }
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds OpenAI-style stream chunks into one completion
struct StreamAssembly {
    model: String,
    text: String,
    calls: BTreeMap<u64, PartialCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamAssembly {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            text: String::new(),
            calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Take in one chunk; returns the text delta to forward, if any
    fn absorb(&mut self, chunk: &Value) -> Result<Option<String>, GatewayError> {
        if let Some(error) = chunk.get("error") {
            return Err(GatewayError::ProviderError {
                status: error.get("type").and_then(Value::as_str).map(str::to_string),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream reported an error")
                    .to_string(),
            });
        }

        if let Some(model) = chunk.get("model").and_then(Value::as_str) {
            model.clone_into(&mut self.model);
        }
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(parse_usage(usage));
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return Ok(None);
        };
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
        let Some(delta) = choice.get("delta") else {
            return Ok(None);
        };

        if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
            for (position, fragment) in fragments.iter().enumerate() {
                let index = fragment
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(position as u64);
                let call = self.calls.entry(index).or_default();
                if let Some(id) = fragment.get("id").and_then(Value::as_str) {
                    call.id = Some(id.to_string());
                }
                if let Some(function) = fragment.get("function") {
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        call.name.push_str(name);
                    }
                    if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                        call.arguments.push_str(args);
                    }
                }
            }
        }

        match delta.get("content").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => {
                self.text.push_str(text);
                Ok(Some(text.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn finish(self) -> Completion {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(index, call)| {
                ToolCall::new(call.name, parse_arguments(&call.arguments))
                    .with_id(call.id.unwrap_or_else(|| format!("call_{index}")))
            })
            .collect();
        let status = normalize_status(self.finish_reason.as_deref());

        Completion {
            text: self.text,
            tool_calls,
            outcome: status.outcome,
            raw_status: status.raw,
            model: self.model,
            usage: self.usage,
            streamed: true,
        }
    }
}
