//! Provider response shapes
//!
//! Two wire formats are supported:
//!
//! - [`ResponseShape::Native`]: OpenAI-compatible chat completions with
//!   native function calling.
//! - [`ResponseShape::Enveloped`]: a `{status, data}` envelope around plain
//!   text. Tools are described in the prompt and tool calls are recovered
//!   from JSON embedded in the reply.
//!
//! Both produce the same canonical [`Completion`].

use agent_core::error::GatewayError;
use agent_core::gateway::{Completion, CompletionRequest, TokenUsage};
use agent_core::message::{Message, Role};
use agent_core::status::normalize_status;
use agent_core::tool::{ToolCall, tools_prompt_section};
use serde_json::{Value, json};

/// Keys tried, in order, for the text inside an envelope `data` object
const ENVELOPE_TEXT_KEYS: &[&str] = &["response", "text", "content", "message", "result", "answer"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    Native,
    Enveloped,
}

impl ResponseShape {
    /// Path appended to the API base
    pub const fn path(self) -> &'static str {
        match self {
            Self::Native => "/chat/completions",
            Self::Enveloped => "/api/chat",
        }
    }

    pub const fn supports_streaming(self) -> bool {
        matches!(self, Self::Native)
    }

    /// Build the JSON request body
    pub fn request_body(self, request: &CompletionRequest<'_>, provider: &str, stream: bool) -> Value {
        match self {
            Self::Native => native_body(request, stream),
            Self::Enveloped => envelope_body(request, provider),
        }
    }

    /// Parse a complete (non-streamed) response body
    pub fn parse(self, body: &Value, model: &str, tools_offered: bool) -> Result<Completion, GatewayError> {
        match self {
            Self::Native => parse_native(body, model),
            Self::Enveloped => Ok(parse_envelope(body, model, tools_offered)),
        }
    }
}

// --- Native ---------------------------------------------------------------

fn native_body(request: &CompletionRequest<'_>, stream: bool) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(native_message).collect();
    let mut body = json!({
        "model": request.options.model,
        "messages": messages,
        "temperature": request.options.temperature,
        "max_tokens": request.options.max_tokens,
    });
    if request.offers_tools() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(agent_core::tool::ToolSchema::function_definition)
                .collect(),
        );
    }
    if stream {
        body["stream"] = Value::Bool(true);
    }
    body
}

fn native_message(message: &Message) -> Value {
    let mut out = json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        out["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        out["tool_call_id"] = Value::String(id.clone());
    }
    out
}

fn parse_native(body: &Value, model: &str) -> Result<Completion, GatewayError> {
    let Some(choice) = body.get("choices").and_then(|c| c.get(0)) else {
        if let Some(error) = body.get("error") {
            return Err(GatewayError::ProviderError {
                status: error
                    .get("code")
                    .or_else(|| error.get("type"))
                    .map(value_to_string),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("provider returned an error body")
                    .to_string(),
            });
        }
        return Err(GatewayError::MalformedResponse("response has no choices".into()));
    };

    let message = choice.get("message").unwrap_or(&Value::Null);
    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| native_tool_call(i, call))
                .collect()
        })
        .unwrap_or_default();

    let status = normalize_status(choice.get("finish_reason").and_then(Value::as_str));
    Ok(Completion {
        text,
        tool_calls,
        outcome: status.outcome,
        raw_status: status.raw,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        usage: body.get("usage").map(parse_usage),
        streamed: false,
    })
}

fn native_tool_call(index: usize, call: &Value) -> ToolCall {
    let function = call.get("function").unwrap_or(&Value::Null);
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => parse_arguments(raw),
        Some(other) => other.clone(),
        None => json!({}),
    };
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| format!("call_{index}"), str::to_string);
    ToolCall::new(name, arguments).with_id(id)
}

/// Tool arguments arrive as a JSON string; unparsable text is kept verbatim
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub(crate) fn parse_usage(usage: &Value) -> TokenUsage {
    let count = |key: &str| {
        usage
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    };
    TokenUsage {
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
        total_tokens: count("total_tokens"),
    }
}

// --- Envelope -------------------------------------------------------------

fn envelope_body(request: &CompletionRequest<'_>, provider: &str) -> Value {
    let mut text = flatten(request.messages);
    if request.offers_tools() {
        text.push_str(&tools_prompt_section(request.tools));
    }
    json!({
        "text": text,
        "provider": provider,
        "model": request.options.model,
    })
}

/// Conversation as `[role]: content` lines
fn flatten(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.text().is_empty())
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            format!("[{role}]: {}", m.text())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_envelope(body: &Value, model: &str, tools_offered: bool) -> Completion {
    let (status, data) = match body {
        Value::Object(map) if map.contains_key("data") => (
            map.get("status").map(value_to_string),
            map.get("data").unwrap_or(&Value::Null),
        ),
        Value::Object(map) => (map.get("status").map(value_to_string), body),
        _ => (None, body),
    };

    let mut text = envelope_text(data);
    let tool_calls = if tools_offered {
        extract_tool_calls(&text)
    } else {
        Vec::new()
    };
    if !tool_calls.is_empty() {
        text.clear();
    }

    let status = normalize_status(status.as_deref());
    Completion {
        text,
        tool_calls,
        outcome: status.outcome,
        raw_status: status.raw,
        model: model.to_string(),
        usage: None,
        streamed: false,
    }
}

fn envelope_text(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            let found = ENVELOPE_TEXT_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .find(|v| is_present(v));
            match found {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Object(inner)) => inner
                    .get("content")
                    .and_then(Value::as_str)
                    .map_or_else(|| Value::Object(inner.clone()).to_string(), str::to_string),
                Some(other) => other.to_string(),
                None => data.to_string(),
            }
        }
        other => other.to_string(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

/// Tool calls embedded as JSON between the first `{` and the last `}`
fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    let Ok(parsed) = serde_json::from_str::<Value>(&text[start..=end]) else {
        return Vec::new();
    };
    let Some(calls) = parsed.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };

    calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let function = call.get("function").unwrap_or(&Value::Null);
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => parse_arguments(raw),
                Some(args) => args.clone(),
                None => json!({}),
            };
            ToolCall::new(name, arguments).with_id(format!("call_{i}"))
        })
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
