//! HTTP sandbox client
//!
//! Runs tools through the sandbox service's `/api/v1/tools/run` endpoint.

use std::time::Duration;

use agent_core::error::ToolError;
use agent_core::events::OutputSink;
use agent_core::sandbox::{Sandbox, SandboxReply, ToolRequest};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::SandboxConfig;

const RUN_PATH: &str = "/api/v1/tools/run";

/// Slack added to the tool deadline for the HTTP exchange itself
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RunToolBody<'a> {
    name: &'a str,
    args: &'a Value,
    timeout_ms: u64,
}

pub struct HttpSandbox {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSandbox {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ToolError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no sandbox URL is configured
    pub fn from_config(config: &SandboxConfig) -> Result<Option<Self>, ToolError> {
        config.url.as_deref().map(Self::new).transpose()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn run_tool(
        &self,
        request: ToolRequest<'_>,
        chunks: &dyn OutputSink,
    ) -> Result<SandboxReply, ToolError> {
        let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
        let body = RunToolBody {
            name: request.name,
            args: request.arguments,
            timeout_ms,
        };

        tracing::debug!(tool = request.name, url = %self.base_url, "Running tool in sandbox");
        let response = self
            .http
            .post(format!("{}{RUN_PATH}", self.base_url))
            .timeout(request.timeout.saturating_add(TRANSPORT_GRACE))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = format!("sandbox returned HTTP {}: {}", status.as_u16(), text.trim());
            return Err(if status.is_server_error() {
                ToolError::ExecutionFailed(detail)
            } else {
                ToolError::Unavailable(detail)
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("unreadable sandbox reply: {e}")))?;
        let reply = unwrap_reply(value)?;

        if !reply.output.is_empty() {
            chunks.push(&reply.output.to_text()).await;
        }
        Ok(reply)
    }
}

/// Accept a bare reply or one wrapped in `{code, msg, data}`
fn unwrap_reply(value: Value) -> Result<SandboxReply, ToolError> {
    let is_wrapped = value.get("data").is_some() && value.get("success").is_none();
    let inner = if is_wrapped {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let msg = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("sandbox reported an error");
            return Err(ToolError::ExecutionFailed(format!("{msg} (code {code})")));
        }
        value.get("data").cloned().unwrap_or(Value::Null)
    } else {
        value
    };

    serde_json::from_value(inner)
        .map_err(|e| ToolError::ExecutionFailed(format!("unexpected sandbox reply: {e}")))
}

fn classify(error: &reqwest::Error, timeout_ms: u64) -> ToolError {
    if error.is_timeout() {
        ToolError::Timeout(timeout_ms)
    } else if error.is_connect() {
        ToolError::Unavailable(format!("sandbox unreachable: {error}"))
    } else {
        ToolError::ExecutionFailed(format!("sandbox request failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::events::NullSink;
    use agent_core::sandbox::ToolOutput;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request<'a>(args: &'a Value) -> ToolRequest<'a> {
        ToolRequest {
            name: "shell_exec",
            arguments: args,
            timeout: Duration::from_secs(3),
        }
    }

    #[tokio::test]
    async fn posts_name_args_and_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tools/run"))
            .and(body_partial_json(json!({"name": "shell_exec", "args": {"command": "ls"}, "timeout_ms": 3000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": true, "output": "a.txt\nb.txt", "duration_ms": 12}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let sandbox = HttpSandbox::new(server.uri()).unwrap();
        let args = json!({"command": "ls"});
        let reply = sandbox.run_tool(request(&args), &NullSink).await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.output, ToolOutput::Text("a.txt\nb.txt".into()));
        assert_eq!(reply.duration_ms, 12);
    }

    #[tokio::test]
    async fn wrapped_reply_is_unwrapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "msg": "ok",
                "data": {"success": false, "error": "exit status 1"}
            })))
            .mount(&server)
            .await;

        let sandbox = HttpSandbox::new(server.uri()).unwrap();
        let args = json!({});
        let reply = sandbox.run_tool(request(&args), &NullSink).await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("exit status 1"));
    }

    #[tokio::test]
    async fn server_error_is_execution_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("crashed"))
            .mount(&server)
            .await;

        let sandbox = HttpSandbox::new(server.uri()).unwrap();
        let args = json!({});
        let err = sandbox.run_tool(request(&args), &NullSink).await.unwrap_err();
        assert_eq!(err.reason_code(), "execution_failed");
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };
        let sandbox = HttpSandbox::new(uri).unwrap();
        let args = json!({});
        let err = sandbox.run_tool(request(&args), &NullSink).await.unwrap_err();
        assert_eq!(err.reason_code(), "unavailable");
    }

    #[test]
    fn absent_url_means_no_sandbox() {
        assert!(HttpSandbox::from_config(&SandboxConfig::default()).unwrap().is_none());
    }
}
