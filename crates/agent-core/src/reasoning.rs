//! Session State Machine
//!
//! Drives one session through plan → act → observe cycles:
//!
//! 1. ask the [`Planner`] for the next step,
//! 2. run tool invocations through the [`ToolExecutor`] and append each
//!    observation to history,
//! 3. loop until the model answers, the summarizer answers, or the session
//!    fails.
//!
//! Every session reaches `completed` or `failed` and its event stream always
//! ends with exactly one `completed` or `error` event. Cancellation is
//! checked only between suspension points, so history is never left
//! half-written.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{AgentError, Result, SessionError};
use crate::events::{DEFAULT_EVENT_BUFFER, Event, EventEmitter, EventStream, event_channel};
use crate::executor::{DEFAULT_TOOL_TIMEOUT, ToolExecutor};
use crate::gateway::{GenerationOptions, LlmGateway};
use crate::history::{HistoryStore, MemoryHistoryStore};
use crate::message::Message;
use crate::planner::{DEFAULT_SYSTEM_PROMPT, Planner};
use crate::sandbox::Sandbox;
use crate::session::{Session, SessionId, SessionStatus};
use crate::tool::{ToolCall, ToolCatalog};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Task framing sent ahead of the conversation
    pub system_prompt: String,

    /// Tool steps allowed per session before it fails
    pub max_steps: usize,

    /// Per-invocation tool timeout
    pub tool_timeout: Duration,

    /// Events buffered before the worker waits for the consumer
    pub event_buffer: usize,

    /// Whether tools are offered at all
    pub allow_tools: bool,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_steps: 20,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            allow_tools: true,
            generation: GenerationOptions::default(),
        }
    }
}

/// Why a session failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Stable machine-readable reason code
    pub reason: String,
    /// Human-readable detail
    pub detail: String,
}

/// Final state of a finished session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub steps: usize,
    pub transitions: Vec<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

/// A running session as seen from outside its worker
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Ordered events; there is exactly one consumer
    pub events: EventStream,
    /// Out-of-band cancellation, observed at the next suspension point
    pub cancel: CancellationToken,
    /// Resolves with the report once the session is terminal
    pub worker: JoinHandle<SessionReport>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The main Agent struct
///
/// Shared by every session; holds no per-session mutable state.
pub struct Agent {
    planner: Planner,
    executor: ToolExecutor,
    history: Arc<dyn HistoryStore>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        sandbox: Option<Arc<dyn Sandbox>>,
        catalog: Arc<ToolCatalog>,
        history: Arc<dyn HistoryStore>,
        config: AgentConfig,
    ) -> Self {
        let planner = Planner::new(
            gateway,
            Arc::clone(&catalog),
            config.generation.clone(),
            config.system_prompt.clone(),
        )
        .allow_tools(config.allow_tools);
        let executor = ToolExecutor::new(sandbox, catalog, config.tool_timeout);

        Self {
            planner,
            executor,
            history,
            config,
        }
    }

    /// Get configuration
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub const fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn history_store(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.history)
    }

    /// Start a session for `goal` on its own worker task
    pub fn spawn(self: &Arc<Self>, goal: impl Into<String>) -> SessionHandle {
        let session = Session::new();
        let id = session.id.clone();
        let cancel = session.cancel_token();
        let (emitter, events) = event_channel(id.clone(), self.config.event_buffer);
        let emitter = emitter.with_cancel(cancel.clone());

        let agent = Arc::clone(self);
        let goal = goal.into();
        let span = tracing::info_span!("session", id = %id);
        let worker = tokio::spawn(
            async move {
                let mut session = session;
                agent.run(&mut session, &goal, &emitter).await
            }
            .instrument(span),
        );

        SessionHandle {
            id,
            events,
            cancel,
            worker,
        }
    }

    /// Run `session` to a terminal state, emitting into `events`
    pub async fn run(
        &self,
        session: &mut Session,
        goal: &str,
        events: &EventEmitter,
    ) -> SessionReport {
        tracing::info!(session = %session.id, "Session started");

        let result = self.drive(session, goal, events).await;
        let (answer, failure) = match result {
            Ok(answer) => match session.transition(SessionStatus::Completed) {
                Ok(()) => {
                    events
                        .emit(
                            SessionStatus::Completed,
                            Event::Completed {
                                answer: answer.clone(),
                            },
                        )
                        .await;
                    tracing::info!(session = %session.id, steps = session.steps(), "Session completed");
                    (Some(answer), None)
                }
                Err(e) => (None, Some(self.fail(session, &e, events).await)),
            },
            Err(e) => (None, Some(self.fail(session, &e, events).await)),
        };

        SessionReport {
            session_id: session.id.clone(),
            status: session.status(),
            steps: session.steps(),
            transitions: session.transitions().to_vec(),
            answer,
            failure,
        }
    }

    async fn fail(&self, session: &mut Session, error: &AgentError, events: &EventEmitter) -> Failure {
        if !session.status().is_terminal() {
            if let Err(e) = session.transition(SessionStatus::Failed) {
                tracing::error!(session = %session.id, error = %e, "Could not mark session failed");
            }
        }

        let failure = Failure {
            reason: error.reason_code().to_string(),
            detail: error.to_string(),
        };
        match error {
            AgentError::Session(SessionError::Cancelled) => {
                tracing::info!(session = %session.id, "Session cancelled");
            }
            _ => tracing::error!(session = %session.id, reason = %failure.reason, error = %error, "Session failed"),
        }

        events
            .emit(
                session.status(),
                Event::Error {
                    reason: failure.reason.clone(),
                    detail: failure.detail.clone(),
                },
            )
            .await;
        failure
    }

    async fn drive(&self, session: &mut Session, goal: &str, events: &EventEmitter) -> Result<String> {
        session.transition(SessionStatus::Planning)?;
        self.record(session, Message::user(goal)).await?;

        loop {
            checkpoint(session)?;
            let plan = self
                .planner
                .plan(session, &events.deltas(SessionStatus::Planning))
                .await?;
            checkpoint(session)?;

            if plan.is_empty() {
                return self.summarize(session, events).await;
            }

            if let Some(answer) = plan.answer() {
                let answer = answer.to_string();
                self.record(session, Message::assistant(answer.clone())).await?;
                return Ok(answer);
            }

            let calls: Vec<ToolCall> = plan.invocations().cloned().collect();
            self.ensure_budget(session, calls.len())?;
            self.record(
                session,
                Message::assistant_tool_calls(plan.narration.clone(), calls.clone()),
            )
            .await?;

            // executing -> awaiting_tool once per plan; every call runs there
            session.transition(SessionStatus::Executing)?;
            for call in &calls {
                self.run_step(session, call, events).await?;
            }
            session.transition(SessionStatus::Planning)?;
        }
    }

    /// Dispatch one invocation and record its observation
    async fn run_step(
        &self,
        session: &mut Session,
        call: &ToolCall,
        events: &EventEmitter,
    ) -> Result<()> {
        let step = session.record_step();
        tracing::debug!(session = %session.id, step, tool = %call.name, "Dispatching tool");
        events
            .emit(
                session.status(),
                Event::StepStarted {
                    step,
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;

        if session.status() == SessionStatus::Executing {
            session.transition(SessionStatus::AwaitingTool)?;
        }
        let observation = self
            .executor
            .execute(call, &events.tool_chunks(&call.id, SessionStatus::AwaitingTool))
            .await;

        self.record(session, observation.to_message()).await?;
        events
            .emit(
                SessionStatus::AwaitingTool,
                Event::StepFinished {
                    step,
                    call_id: observation.call_id.clone(),
                    tool: observation.tool.clone(),
                    success: observation.success,
                    reason: observation.reason().map(str::to_string),
                    elapsed_ms: observation.elapsed_ms(),
                },
            )
            .await;

        checkpoint(session)
    }

    /// Summarizer fallback, at most once per planning turn
    async fn summarize(&self, session: &mut Session, events: &EventEmitter) -> Result<String> {
        tracing::info!(session = %session.id, "Empty plan, asking for a final summary");
        session.transition(SessionStatus::Planning)?;

        let summary = self
            .planner
            .summarize(session, &events.deltas(SessionStatus::Planning))
            .await?;
        checkpoint(session)?;

        match summary {
            Some(text) => {
                self.record(session, Message::assistant(text.clone())).await?;
                Ok(text)
            }
            None => Err(SessionError::NoProgress.into()),
        }
    }

    /// Fails before anything of a plan is recorded if its calls do not fit
    fn ensure_budget(&self, session: &Session, upcoming: usize) -> Result<()> {
        if session.steps() + upcoming > self.config.max_steps {
            return Err(SessionError::StepBudgetExceeded(self.config.max_steps).into());
        }
        Ok(())
    }

    /// Persist, then append locally; the store is durable before the next step
    async fn record(&self, session: &mut Session, message: Message) -> Result<()> {
        self.history.append(&session.id, &message).await?;
        session.append(message);
        Ok(())
    }
}

fn checkpoint(session: &Session) -> Result<()> {
    if session.is_cancelled() {
        return Err(SessionError::Cancelled.into());
    }
    Ok(())
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    gateway: Option<Arc<dyn LlmGateway>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    catalog: ToolCatalog,
    history: Option<Arc<dyn HistoryStore>>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            sandbox: None,
            catalog: ToolCatalog::standard(),
            history: None,
            config: AgentConfig::default(),
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let gateway = self
            .gateway
            .ok_or_else(|| AgentError::Config("Gateway is required".into()))?;
        if self.config.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be at least 1".into()));
        }
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(MemoryHistoryStore::new()));

        Ok(Agent::new(
            gateway,
            self.sandbox,
            Arc::new(self.catalog),
            history,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, ToolError};
    use crate::events::EventEnvelope;
    use crate::gateway::Completion;
    use crate::message::Role;
    use crate::sandbox::SandboxReply;
    use crate::testing::{ScriptedGateway, ScriptedSandbox};
    use crate::session::SessionStatus::{AwaitingTool, Completed, Created, Executing, Failed, Planning};
    use serde_json::json;

    fn shell_call(id: &str) -> Completion {
        Completion::tool_calls(vec![
            ToolCall::new("shell_exec", json!({"command": "ls"})).with_id(id),
        ])
    }

    fn agent(gateway: Arc<ScriptedGateway>, sandbox: Option<Arc<ScriptedSandbox>>) -> AgentBuilder {
        let builder = AgentBuilder::new().gateway(gateway);
        match sandbox {
            Some(sandbox) => builder.sandbox(sandbox),
            None => builder,
        }
    }

    async fn run(agent: Agent, goal: &str) -> (SessionReport, Vec<EventEnvelope>, Session) {
        run_session(agent, Session::new(), goal).await
    }

    async fn run_session(
        agent: Agent,
        mut session: Session,
        goal: &str,
    ) -> (SessionReport, Vec<EventEnvelope>, Session) {
        let (emitter, stream) = event_channel(session.id.clone(), 256);
        let report = agent.run(&mut session, goal, &emitter).await;
        drop(emitter);
        (report, stream.collect().await, session)
    }

    fn kinds(events: &[EventEnvelope]) -> Vec<&'static str> {
        events.iter().map(|e| e.event.kind()).collect()
    }

    fn assert_well_formed(events: &[EventEnvelope]) {
        let terminal: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.event.is_terminal())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(terminal, [events.len() - 1], "exactly one terminal event, last");

        let mut open: Vec<&str> = Vec::new();
        for (i, envelope) in events.iter().enumerate() {
            assert_eq!(envelope.seq, i as u64);
            match &envelope.event {
                Event::StepStarted { call_id, .. } => open.push(call_id.as_str()),
                Event::StepFinished { call_id, .. } => {
                    assert!(
                        open.contains(&call_id.as_str()),
                        "step_finished before step_started for {call_id}"
                    );
                    open.retain(|c| *c != call_id.as_str());
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn final_answer_completes_the_session() {
        let gateway = Arc::new(ScriptedGateway::new().then(Completion::text("Paris")));
        let (report, events, session) =
            run(agent(gateway, None).build().unwrap(), "capital of France?").await;

        assert_eq!(report.status, Completed);
        assert_eq!(report.answer.as_deref(), Some("Paris"));
        assert_eq!(report.transitions, [Created, Planning, Completed]);
        assert_eq!(kinds(&events), ["message_delta", "completed"]);
        assert_eq!(session.history().len(), 2);
        assert_well_formed(&events);
    }

    #[tokio::test]
    async fn tool_loop_feeds_observation_back_to_the_model() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(shell_call("c1"))
                .then(Completion::text("Found 3 files.")),
        );
        let sandbox = Arc::new(ScriptedSandbox::new().reply(SandboxReply::success("a b c")));
        let history = Arc::new(MemoryHistoryStore::new());
        let agent = agent(gateway.clone(), Some(sandbox))
            .history(history.clone())
            .build()
            .unwrap();

        let (report, events, session) = run(agent, "count files").await;

        assert_eq!(report.status, Completed);
        assert_eq!(report.steps, 1);
        assert_eq!(
            report.transitions,
            [Created, Planning, Executing, AwaitingTool, Planning, Completed]
        );
        assert_eq!(
            kinds(&events),
            ["step_started", "tool_output_chunk", "step_finished", "message_delta", "completed"]
        );
        assert_well_formed(&events);

        let roles: Vec<Role> = session.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(history.load(&session.id).await.unwrap().len(), 4);

        let second = &gateway.requests()[1];
        assert!(second.last_text.contains("a b c"));
    }

    #[tokio::test]
    async fn multiple_invocations_run_in_order_with_one_tool_message_each() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(Completion::tool_calls(vec![
                    ToolCall::new("file_read", json!({"file": "/a"})).with_id("r"),
                    ToolCall::new("file_list", json!({"path": "/"})).with_id("l"),
                ]))
                .then(Completion::text("done")),
        );
        let sandbox = Arc::new(ScriptedSandbox::new());
        let (report, events, session) =
            run(agent(gateway, Some(sandbox.clone())).build().unwrap(), "inspect").await;

        assert_eq!(report.status, Completed);
        assert_eq!(sandbox.calls(), ["file_read", "file_list"]);
        assert_eq!(
            report.transitions,
            [Created, Planning, Executing, AwaitingTool, Planning, Completed]
        );
        let started: Vec<SessionStatus> = events
            .iter()
            .filter(|e| e.event.kind() == "step_started")
            .map(|e| e.status)
            .collect();
        assert_eq!(started, [Executing, AwaitingTool]);
        let tool_ids: Vec<&str> = session
            .history()
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, ["r", "l"]);
        assert_well_formed(&events);
    }

    #[tokio::test]
    async fn empty_plan_invokes_summarizer_once_then_completes() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(Completion::text(""))
                .then(Completion::text("Here is what I found.")),
        );
        let (report, events, _) = run(agent(gateway.clone(), None).build().unwrap(), "go").await;

        assert_eq!(report.status, Completed);
        assert_eq!(report.answer.as_deref(), Some("Here is what I found."));
        assert_eq!(report.transitions, [Created, Planning, Planning, Completed]);
        assert_eq!(gateway.requests().len(), 2);
        assert!(gateway.requests()[1].tools.is_empty());
        assert_well_formed(&events);
    }

    #[tokio::test]
    async fn empty_summary_fails_with_no_progress() {
        let gateway = Arc::new(ScriptedGateway::new().repeat(Completion::text("")));
        let (report, events, _) = run(agent(gateway.clone(), None).build().unwrap(), "go").await;

        assert_eq!(report.status, Failed);
        assert_eq!(report.failure.unwrap().reason, "no_progress");
        assert_eq!(gateway.requests().len(), 2, "one plan, one summary, no loop");
        assert_eq!(kinds(&events), ["error"]);
        assert_well_formed(&events);
    }

    #[tokio::test]
    async fn step_budget_stops_endless_tool_requests() {
        let gateway = Arc::new(ScriptedGateway::new().repeat(shell_call("loop")));
        let sandbox = Arc::new(ScriptedSandbox::new());
        let agent = agent(gateway.clone(), Some(sandbox.clone()))
            .max_steps(3)
            .build()
            .unwrap();

        let (report, events, _) = run(agent, "never stop").await;

        assert_eq!(report.status, Failed);
        assert_eq!(report.failure.unwrap().reason, "step_budget_exceeded");
        assert_eq!(report.steps, 3);
        assert_eq!(sandbox.calls().len(), 3);
        assert_eq!(gateway.requests().len(), 4);
        assert_eq!(report.transitions.last(), Some(&Failed));
        assert_eq!(report.transitions[report.transitions.len() - 2], Planning);
        assert_well_formed(&events);
    }

    #[tokio::test]
    async fn plan_larger_than_the_remaining_budget_is_not_recorded() {
        let gateway = Arc::new(ScriptedGateway::new().then(Completion::tool_calls(vec![
            ToolCall::new("file_list", json!({"path": "/a"})).with_id("a"),
            ToolCall::new("file_list", json!({"path": "/b"})).with_id("b"),
            ToolCall::new("file_list", json!({"path": "/c"})).with_id("c"),
        ])));
        let sandbox = Arc::new(ScriptedSandbox::new());
        let agent = agent(gateway, Some(sandbox.clone()))
            .max_steps(2)
            .build()
            .unwrap();

        let (report, events, session) = run(agent, "list everything").await;

        assert_eq!(report.failure.unwrap().reason, "step_budget_exceeded");
        assert_eq!(report.transitions, [Created, Planning, Failed]);
        assert!(sandbox.calls().is_empty());
        // no assistant message with tool calls left unanswered
        let roles: Vec<Role> = session.history().messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User]);
        assert_eq!(kinds(&events), ["error"]);
    }

    #[tokio::test]
    async fn tool_timeout_is_fed_back_and_the_session_continues() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(shell_call("slow"))
                .then(Completion::text("The command was too slow.")),
        );
        let sandbox = Arc::new(ScriptedSandbox::new().delay(Duration::from_millis(200)));
        let agent = agent(gateway, Some(sandbox))
            .tool_timeout(Duration::from_millis(1))
            .build()
            .unwrap();

        let (report, events, session) = run(agent, "run it").await;

        assert_eq!(report.status, Completed);
        let finished = events
            .iter()
            .find_map(|e| match &e.event {
                Event::StepFinished { success, reason, .. } => Some((*success, reason.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(finished, (false, Some("timeout".to_string())));
        let tool_msg = &session.history().messages()[2];
        assert!(tool_msg.text().contains("failed: timeout"));
    }

    #[tokio::test]
    async fn missing_sandbox_yields_unavailable_observation_not_failure() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(shell_call("c1"))
                .then(Completion::text("I cannot run commands here.")),
        );
        let (report, events, _) = run(agent(gateway, None).build().unwrap(), "ls").await;

        assert_eq!(report.status, Completed);
        assert!(events.iter().any(|e| matches!(
            &e.event,
            Event::StepFinished { reason: Some(r), .. } if r == "unavailable"
        )));
    }

    #[tokio::test]
    async fn cancellation_mid_tool_waits_for_the_observation() {
        let session = Session::new();
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(shell_call("c1"))
                .then(Completion::text("unreachable")),
        );
        let sandbox = Arc::new(
            ScriptedSandbox::new()
                .cancel_on_call(session.cancel_token())
                .delay(Duration::from_millis(20))
                .reply(SandboxReply::success("finished anyway")),
        );
        let agent = agent(gateway.clone(), Some(sandbox)).build().unwrap();

        let (report, events, session) = run_session(agent, session, "work").await;

        assert_eq!(report.status, Failed);
        assert_eq!(report.failure.unwrap().reason, "cancelled");
        assert_eq!(
            report.transitions,
            [Created, Planning, Executing, AwaitingTool, Failed]
        );
        let last = session.history().last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.text().contains("finished anyway"));
        assert_eq!(gateway.requests().len(), 1, "no planning after cancellation");
        assert_eq!(
            kinds(&events),
            ["step_started", "tool_output_chunk", "step_finished", "error"]
        );
    }

    #[tokio::test]
    async fn cancellation_before_planning_fails_without_calling_the_model() {
        let session = Session::new();
        session.cancel();
        let gateway = Arc::new(ScriptedGateway::new().then(Completion::text("hi")));

        let (report, events, _) =
            run_session(agent(gateway.clone(), None).build().unwrap(), session, "x").await;

        assert_eq!(report.status, Failed);
        assert_eq!(report.transitions, [Created, Planning, Failed]);
        assert!(gateway.requests().is_empty());
        assert_eq!(kinds(&events), ["error"]);
    }

    #[tokio::test]
    async fn cancellation_during_planning_call_runs_no_tool() {
        let session = Session::new();
        let gateway = Arc::new(
            ScriptedGateway::new()
                .cancel_on_call(session.cancel_token())
                .then(shell_call("c1")),
        );
        let sandbox = Arc::new(ScriptedSandbox::new());
        let agent = agent(gateway.clone(), Some(sandbox.clone())).build().unwrap();

        let (report, events, session) = run_session(agent, session, "work").await;

        assert_eq!(report.status, Failed);
        assert_eq!(report.failure.unwrap().reason, "cancelled");
        assert_eq!(report.transitions, [Created, Planning, Failed]);
        assert!(sandbox.calls().is_empty());
        assert_eq!(gateway.requests().len(), 1);
        assert_eq!(session.history().len(), 1);
        assert_eq!(kinds(&events), ["error"]);
    }

    #[tokio::test]
    async fn cancelled_session_finishes_without_an_event_consumer() {
        let mut completion = Completion::text("a b c d e f g h");
        completion.streamed = true;
        let gateway = Arc::new(ScriptedGateway::new().then(completion));
        let agent = Arc::new(agent(gateway, None).event_buffer(1).build().unwrap());

        let handle = agent.spawn("talk a lot");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.worker.is_finished(), "worker waits for a consumer");

        handle.cancel();
        let report = tokio::time::timeout(Duration::from_millis(500), handle.worker)
            .await
            .expect("cancellation should release the worker")
            .unwrap();
        assert_eq!(report.status, Failed);
        assert_eq!(report.failure.unwrap().reason, "cancelled");
    }

    #[tokio::test]
    async fn gateway_failure_is_terminal_with_reason_code() {
        let gateway = Arc::new(
            ScriptedGateway::new().then_err(GatewayError::Timeout("120s elapsed".into())),
        );
        let (report, events, _) = run(agent(gateway, None).build().unwrap(), "x").await;

        assert_eq!(report.status, Failed);
        match &events.last().unwrap().event {
            Event::Error { reason, detail } => {
                assert_eq!(reason, "gateway_timeout");
                assert!(detail.contains("120s elapsed"));
            }
            other => panic!("unexpected terminal event {other:?}"),
        }
    }

    #[tokio::test]
    async fn streamed_text_is_not_duplicated() {
        let mut completion = Completion::text("hello streaming world");
        completion.streamed = true;
        let gateway = Arc::new(ScriptedGateway::new().then(completion));

        let (_, events, _) = run(agent(gateway, None).build().unwrap(), "x").await;

        let deltas: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.event {
                Event::MessageDelta { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, ["hello ", "streaming ", "world"]);
    }

    #[tokio::test]
    async fn spawned_sessions_run_independently() {
        let gateway = Arc::new(ScriptedGateway::new().repeat(Completion::text("ok")));
        let agent = Arc::new(agent(gateway, None).build().unwrap());

        let first = agent.spawn("one");
        let second = agent.spawn("two");
        assert_ne!(first.id, second.id);

        for handle in [first, second] {
            let events = handle.events.collect().await;
            let report = handle.worker.await.unwrap();
            assert_eq!(report.status, Completed);
            assert_well_formed(&events);
        }
    }

    #[tokio::test]
    async fn tool_failure_reason_survives_into_history() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then(shell_call("c1"))
                .then(Completion::text("It failed.")),
        );
        let sandbox = Arc::new(
            ScriptedSandbox::new().error(ToolError::ExecutionFailed("exit 127".into())),
        );
        let (_, _, session) = run(agent(gateway, Some(sandbox)).build().unwrap(), "x").await;
        assert!(session.history().messages()[2].text().contains("exit 127"));
    }

    #[test]
    fn builder_requires_gateway_and_positive_budget() {
        assert!(AgentBuilder::new().build().is_err());
        let gateway = Arc::new(ScriptedGateway::new());
        assert!(AgentBuilder::new().gateway(gateway).max_steps(0).build().is_err());
    }
}
