//! agent-orchestrator HTTP Server
//!
//! Axum-based server exposing agent sessions over REST and WebSocket.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{
    gateway::LlmGateway,
    reasoning::{AgentBuilder, AgentConfig},
    sandbox::Sandbox,
    tool::{Capability, ToolCatalog},
};
use agent_runtime::{GatewayConfig, HttpGateway, HttpSandbox, SandboxConfig, config};

use crate::handlers::{
    cancel_session, create_session, delete_session, health_check, llm_health_check,
    session_events, session_history,
};
use crate::state::{AppState, DEFAULT_RETENTION, SessionRegistry};

/// Build the HTTP surface
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        .route("/health/llm", get(llm_health_check))
        // Sessions
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/sessions/{id}/ws", get(session_events))
        .route("/api/sessions/{id}/cancel", post(cancel_session))
        .route("/api/sessions/{id}/history", get(session_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let gateway_config = GatewayConfig::from_env().context("invalid LLM configuration")?;
    let sandbox_config = SandboxConfig::from_env().context("invalid sandbox configuration")?;
    let env = |key: &str| std::env::var(key).ok();

    // LLM gateway
    let gateway: Arc<dyn LlmGateway> = Arc::new(HttpGateway::new(gateway_config.clone())?);
    tracing::info!(
        provider = gateway_config.kind.as_str(),
        model = %gateway_config.model,
        api_base = %gateway_config.api_base_preview(),
        has_api_key = gateway_config.api_key.is_some(),
        "LLM gateway configured"
    );
    if gateway_config.api_key.is_none() {
        tracing::warn!("API_KEY is not set; requests will be sent unauthenticated");
    }

    // Sandbox
    let sandbox = HttpSandbox::from_config(&sandbox_config)?;
    match &sandbox {
        Some(sandbox) => tracing::info!(url = %sandbox.base_url(), "Sandbox configured"),
        None => tracing::warn!("SANDBOX_URL not set; tool calls will report unavailable"),
    }

    // Tools
    let catalog = ToolCatalog::standard()
        .with_capability(Capability::Browser, sandbox_config.browser_enabled)
        .with_capability(Capability::Search, sandbox_config.search_enabled);
    tracing::info!("Offering {} tools: {}", catalog.offered().len(), catalog.names().join(", "));

    // Agent
    let defaults = AgentConfig::default();
    let agent_config = AgentConfig {
        max_steps: config::parse(&env, "MAX_STEPS")?.unwrap_or(defaults.max_steps),
        tool_timeout: config::parse(&env, "TOOL_TIMEOUT_SECS")?
            .map_or(defaults.tool_timeout, Duration::from_secs),
        generation: gateway_config.generation_options(),
        ..defaults
    };
    let mut builder = AgentBuilder::new()
        .gateway(Arc::clone(&gateway))
        .catalog(catalog)
        .config(agent_config);
    if let Some(sandbox) = sandbox {
        builder = builder.sandbox(Arc::new(sandbox) as Arc<dyn Sandbox>);
    }
    let agent = builder.build()?;

    let retention = config::parse(&env, "SESSION_RETENTION_SECS")?
        .map_or(DEFAULT_RETENTION, Duration::from_secs);
    let sessions = SessionRegistry::new(agent.history_store(), retention);

    let state = AppState {
        agent: Arc::new(agent),
        gateway,
        gateway_config: Arc::new(gateway_config),
        sandbox_config: Arc::new(sandbox_config),
        sessions: Arc::new(sessions),
    };

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("agent-orchestrator listening on http://{}", addr);
    tracing::info!("  GET    /health                    - Configuration summary");
    tracing::info!("  GET    /health/llm                - Probe the LLM gateway");
    tracing::info!("  POST   /api/sessions              - Start a session");
    tracing::info!("  GET    /api/sessions/{{id}}/ws      - Session event stream");
    tracing::info!("  POST   /api/sessions/{{id}}/cancel  - Cancel a session");
    tracing::info!("  GET    /api/sessions/{{id}}/history - Session messages");
    tracing::info!("  DELETE /api/sessions/{{id}}         - Forget a session");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
