//! Session Management
//!
//! A [`Session`] is one agent task: its history, its position in the status
//! graph, its tool step counter and its cancellation token. It is owned and
//! mutated by exactly one worker for its whole lifetime. A plan enters
//! `awaiting_tool` once and dispatches all of its invocations from there.
//!
//! ```text
//! created ──▶ planning ──▶ completed
//!               │  ▲ ╰──╮ (summarizer fallback)
//!               │  ╰────╯
//!               ▼
//!            executing ──▶ awaiting_tool ──▶ planning
//!               │                 │
//!               ▼                 ▼
//!             failed ◀────────────╯   (planning may also fail)
//! ```

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a session in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Planning,
    Executing,
    AwaitingTool,
    Completed,
    Failed,
}

impl SessionStatus {
    /// `completed` and `failed` have no outgoing transitions
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the status graph has an edge `self -> next`
    pub const fn can_transition_to(self, next: Self) -> bool {
        use super::SessionStatus::{AwaitingTool, Completed, Created, Executing, Failed, Planning};
        matches!(
            (self, next),
            (Created, Planning)
                | (Planning, Planning | Executing | Completed | Failed)
                | (Executing, AwaitingTool | Failed)
                | (AwaitingTool, Planning | Failed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::AwaitingTool => "awaiting_tool",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete agent session
#[derive(Debug)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    history: Conversation,
    status: SessionStatus,
    transitions: Vec<SessionStatus>,
    steps: usize,
    cancel: CancellationToken,
}

impl Session {
    /// Create a new session in `created`
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    /// Create with specific ID
    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            history: Conversation::new(),
            status: SessionStatus::Created,
            transitions: vec![SessionStatus::Created],
            steps: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Every status this session has been in, oldest first
    pub fn transitions(&self) -> &[SessionStatus] {
        &self.transitions
    }

    /// Move along the status graph
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(session = %self.id, from = %self.status, to = %next, "Session transition");
        self.status = next;
        self.transitions.push(next);
        Ok(())
    }

    pub fn history(&self) -> &Conversation {
        &self.history
    }

    /// Append to history. History never shrinks.
    pub fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Tool steps executed so far
    pub const fn steps(&self) -> usize {
        self.steps
    }

    pub(crate) fn record_step(&mut self) -> usize {
        self.steps += 1;
        self.steps
    }

    /// Token observed at each suspension point
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation; takes effect at the next safe boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::SessionStatus::{AwaitingTool, Completed, Created, Executing, Failed, Planning};

    #[test]
    fn test_session_creation() {
        let session = Session::new();
        assert_eq!(session.status(), Created);
        assert_eq!(session.steps(), 0);
        assert!(session.history().is_empty());
        assert!(!session.is_cancelled());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [Created, Planning, Executing, AwaitingTool, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn no_transition_skips_planning() {
        assert!(!Created.can_transition_to(Executing));
        assert!(!Created.can_transition_to(Completed));
        assert!(!Created.can_transition_to(Failed));
        assert!(!Executing.can_transition_to(Completed));
        assert!(!Executing.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Planning));
        assert!(AwaitingTool.can_transition_to(Planning));
        assert!(!AwaitingTool.can_transition_to(Executing));
    }

    #[test]
    fn illegal_transition_is_rejected_and_recorded_nowhere() {
        let mut session = Session::new();
        let err = session.transition(Executing).unwrap_err();
        assert_eq!(err.reason_code(), "invalid_transition");
        assert_eq!(session.status(), Created);

        session.transition(Planning).unwrap();
        session.transition(Completed).unwrap();
        assert!(session.transition(Planning).is_err());
        assert_eq!(session.transitions(), [Created, Planning, Completed]);
    }

    #[test]
    fn history_only_grows() {
        let mut session = Session::new();
        session.append(Message::user("Find the largest file in /tmp"));
        session.append(Message::assistant("/tmp/core"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().messages()[0].text(), "Find the largest file in /tmp");
    }

    #[test]
    fn cancellation_is_shared_through_the_token() {
        let session = Session::new();
        let token = session.cancel_token();
        token.cancel();
        assert!(session.is_cancelled());
    }
}
