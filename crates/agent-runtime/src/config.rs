//! Environment-driven configuration for the HTTP collaborators

use std::str::FromStr;
use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::gateway::GenerationOptions;
use serde::Serialize;

use crate::retry::RetryPolicy;
use crate::shape::ResponseShape;

/// Which wire format the configured provider speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    OpenAi,
    /// Custom `{status, data}` envelope API
    Envelope,
}

impl ProviderKind {
    pub const fn shape(self) -> ResponseShape {
        match self {
            Self::OpenAi => ResponseShape::Native,
            Self::Envelope => ResponseShape::Enveloped,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Envelope => "envelope",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "native" => Ok(Self::OpenAi),
            "custom" | "envelope" => Ok(Self::Envelope),
            other => Err(AgentError::Config(format!(
                "LLM_PROVIDER_KIND must be openai or custom, got '{other}'"
            ))),
        }
    }
}

/// LLM gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub kind: ProviderKind,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Upstream provider name forwarded in envelope requests
    pub provider: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Request SSE streaming (native shape only)
    pub stream: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let generation = GenerationOptions::default();
        Self {
            kind: ProviderKind::OpenAi,
            api_base: "https://api.openai.com/v1".into(),
            api_key: None,
            model: generation.model,
            provider: "openai".into(),
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            stream: false,
        }
    }
}

impl GatewayConfig {
    /// Load from process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let kind = match non_empty(&lookup, "LLM_PROVIDER_KIND") {
            Some(raw) => raw.parse()?,
            None => defaults.kind,
        };
        let max_retries = parse(&lookup, "MAX_RETRIES")?.unwrap_or(defaults.retry.max_retries);

        Ok(Self {
            kind,
            api_base: non_empty(&lookup, "API_BASE")
                .map_or(defaults.api_base, |base| base.trim_end_matches('/').to_string()),
            api_key: non_empty(&lookup, "API_KEY"),
            model: non_empty(&lookup, "MODEL_NAME").unwrap_or(defaults.model),
            provider: non_empty(&lookup, "LLM_PROVIDER").unwrap_or(defaults.provider),
            temperature: parse(&lookup, "TEMPERATURE")?.unwrap_or(defaults.temperature),
            max_tokens: parse(&lookup, "MAX_TOKENS")?.unwrap_or(defaults.max_tokens),
            retry: RetryPolicy {
                max_retries,
                ..defaults.retry
            },
            stream: parse_bool(&lookup, "LLM_STREAM")?.unwrap_or(defaults.stream),
            ..defaults
        })
    }

    pub const fn shape(&self) -> ResponseShape {
        self.kind.shape()
    }

    /// Generation options matching this configuration
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..GenerationOptions::default()
        }
    }

    /// API base cut down for display
    pub fn api_base_preview(&self) -> String {
        const SHOWN: usize = 30;
        if self.api_base.chars().count() > SHOWN {
            let head: String = self.api_base.chars().take(SHOWN).collect();
            format!("{head}...")
        } else {
            self.api_base.clone()
        }
    }
}

/// Sandbox collaborator configuration
#[derive(Clone, Debug, Default)]
pub struct SandboxConfig {
    /// Absent means no sandbox is deployed
    pub url: Option<String>,
    pub browser_enabled: bool,
    pub search_enabled: bool,
}

impl SandboxConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            url: non_empty(&lookup, "SANDBOX_URL").map(|url| url.trim_end_matches('/').to_string()),
            browser_enabled: parse_bool(&lookup, "BROWSER_ENABLED")?.unwrap_or(false),
            search_enabled: parse_bool(&lookup, "SEARCH_ENABLED")?.unwrap_or(false),
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a numeric variable; malformed values are errors, not defaults
pub fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    non_empty(lookup, key)
        .map(|raw| {
            raw.parse()
                .map_err(|_| AgentError::Config(format!("{key} has invalid value '{raw}'")))
        })
        .transpose()
}

pub fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    non_empty(lookup, key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AgentError::Config(format!("{key} must be a boolean, got '{raw}'"))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = GatewayConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.kind, ProviderKind::OpenAi);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.api_key.is_none());
        assert!(!config.stream);
    }

    #[test]
    fn custom_provider_selects_envelope_shape() {
        let config = GatewayConfig::from_lookup(env(&[
            ("LLM_PROVIDER_KIND", "custom"),
            ("API_BASE", "https://llm.internal/"),
            ("API_KEY", "secret"),
            ("MODEL_NAME", "deepseek-chat"),
            ("LLM_PROVIDER", "deepseek"),
            ("MAX_RETRIES", "5"),
        ]))
        .unwrap();

        assert_eq!(config.shape(), ResponseShape::Enveloped);
        assert_eq!(config.api_base, "https://llm.internal");
        assert_eq!(config.provider, "deepseek");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.generation_options().model, "deepseek-chat");
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = GatewayConfig::from_lookup(env(&[("MAX_TOKENS", "lots")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(msg) if msg.contains("MAX_TOKENS")));

        let err = GatewayConfig::from_lookup(env(&[("LLM_PROVIDER_KIND", "carrier-pigeon")]));
        assert!(err.is_err());
    }

    #[test]
    fn sandbox_is_optional() {
        let config = SandboxConfig::from_lookup(env(&[])).unwrap();
        assert!(config.url.is_none());

        let config = SandboxConfig::from_lookup(env(&[
            ("SANDBOX_URL", "http://sandbox:8080/"),
            ("BROWSER_ENABLED", "true"),
        ]))
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("http://sandbox:8080"));
        assert!(config.browser_enabled);
        assert!(!config.search_enabled);
    }

    #[test]
    fn long_api_base_is_truncated_for_display() {
        let config = GatewayConfig {
            api_base: "https://a-very-long-hostname.example.com/v1/some/path".into(),
            ..GatewayConfig::default()
        };
        assert!(config.api_base_preview().ends_with("..."));
        assert_eq!(config.api_base_preview().chars().count(), 33);
    }
}
