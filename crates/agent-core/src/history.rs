//! History persistence
//!
//! The loop appends every message to an injected [`HistoryStore`] and waits
//! for the append to finish before planning the next step. The storage
//! format belongs to the implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::session::SessionId;

/// Ordered, durable message log per session
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one message; durable once this returns
    async fn append(&self, session: &SessionId, message: &Message) -> Result<()>;

    /// All messages of a session, oldest first
    async fn load(&self, session: &SessionId) -> Result<Vec<Message>>;

    /// Drop a session's history
    async fn archive(&self, session: &SessionId) -> Result<()>;
}

/// In-memory history store (for development/testing)
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    sessions: RwLock<HashMap<SessionId, Vec<Message>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AgentError {
    AgentError::Store("history lock poisoned".into())
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, session: &SessionId, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions
            .entry(session.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(session).cloned().unwrap_or_default())
    }

    async fn archive(&self, session: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.remove(session);
        Ok(())
    }
}
