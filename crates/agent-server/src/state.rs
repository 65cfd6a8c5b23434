//! Application State

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_core::error::Result;
use agent_core::events::EventStream;
use agent_core::gateway::LlmGateway;
use agent_core::history::HistoryStore;
use agent_core::reasoning::{Agent, SessionHandle, SessionReport};
use agent_core::session::SessionId;
use agent_runtime::{GatewayConfig, SandboxConfig};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// How long a session stays reachable after it ends, and how long an
/// unclaimed event stream may wait for its consumer
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator shared by all sessions
    pub agent: Arc<Agent>,

    /// Gateway, also used directly by the LLM health probe
    pub gateway: Arc<dyn LlmGateway>,

    pub gateway_config: Arc<GatewayConfig>,
    pub sandbox_config: Arc<SandboxConfig>,

    /// Sessions started by this process
    pub sessions: Arc<SessionRegistry>,
}

/// A session as tracked by the server
pub struct SessionEntry {
    pub cancel: CancellationToken,
    /// Taken by the first (and only) event consumer
    events: Mutex<Option<EventStream>>,
    report: RwLock<Option<SessionReport>>,
}

impl SessionEntry {
    /// Claim the event stream; `None` if another consumer has it
    pub async fn take_events(&self) -> Option<EventStream> {
        self.events.lock().await.take()
    }

    pub async fn report(&self) -> Option<SessionReport> {
        self.report.read().await.clone()
    }

    async fn events_unclaimed(&self) -> bool {
        self.events.lock().await.is_some()
    }
}

/// Live and recently finished sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    history: Arc<dyn HistoryStore>,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(history: Arc<dyn HistoryStore>, retention: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history,
            retention,
        }
    }

    /// Track a freshly spawned session.
    ///
    /// A watcher records the report once the worker ends and archives the
    /// session `retention` later. A session whose events nobody claimed
    /// within `retention` is cancelled.
    pub async fn track(self: &Arc<Self>, handle: SessionHandle) -> Arc<SessionEntry> {
        let SessionHandle {
            id,
            events,
            cancel,
            mut worker,
        } = handle;

        let entry = Arc::new(SessionEntry {
            cancel,
            events: Mutex::new(Some(events)),
            report: RwLock::new(None),
        });
        self.sessions.write().await.insert(id.clone(), Arc::clone(&entry));

        let watched = Arc::clone(&entry);
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = &mut worker => outcome,
                () = tokio::time::sleep(registry.retention) => {
                    if watched.events_unclaimed().await {
                        tracing::warn!(session = %id, "No consumer claimed the event stream, cancelling");
                        watched.cancel.cancel();
                    }
                    worker.await
                }
            };

            match outcome {
                Ok(report) => {
                    tracing::info!(session = %id, status = %report.status, steps = report.steps, "Session finished");
                    *watched.report.write().await = Some(report);
                }
                Err(e) => tracing::error!(session = %id, error = %e, "Session worker panicked"),
            }

            tokio::time::sleep(registry.retention).await;
            match registry.forget(&id).await {
                Ok(Some(_)) => tracing::debug!(session = %id, "Finished session archived"),
                Ok(None) => {}
                Err(e) => tracing::warn!(session = %id, error = %e, "Could not archive session history"),
            }
        });

        entry
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Remove a session: cancel it, drop any unclaimed event buffer so its
    /// worker is never left waiting, and archive its history
    pub async fn forget(&self, id: &SessionId) -> Result<Option<Arc<SessionEntry>>> {
        let Some(entry) = self.sessions.write().await.remove(id) else {
            return Ok(None);
        };
        entry.cancel.cancel();
        drop(entry.take_events().await);
        self.history.archive(id).await?;
        Ok(Some(entry))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
