//! Event Stream
//!
//! One bounded, ordered channel per session. The session worker is the only
//! producer and the transport adapter the only consumer. When the buffer is
//! full the producer waits; events are never reordered. Once the session is
//! cancelled the wait ends and events that do not fit are discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::session::{SessionId, SessionStatus};

/// Default number of buffered events before the producer suspends
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Something the client sees
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Incremental assistant text
    MessageDelta { text: String },

    /// A tool step was dispatched
    StepStarted {
        step: usize,
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },

    /// A tool step produced its observation
    StepFinished {
        step: usize,
        call_id: String,
        tool: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        elapsed_ms: u64,
    },

    /// Partial tool output
    ToolOutputChunk { call_id: String, chunk: String },

    /// Terminal: the session produced its answer
    Completed { answer: String },

    /// Terminal: the session failed
    Error { reason: String, detail: String },
}

impl Event {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MessageDelta { .. } => "message_delta",
            Self::StepStarted { .. } => "step_started",
            Self::StepFinished { .. } => "step_finished",
            Self::ToolOutputChunk { .. } => "tool_output_chunk",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }
}

/// Event plus ordering metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: SessionId,
    /// Position in the session's stream, starting at 0
    pub seq: u64,
    /// Session status when the event was produced
    pub status: SessionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

/// Create the producer/consumer pair for one session
pub fn event_channel(session_id: SessionId, capacity: usize) -> (EventEmitter, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let emitter = EventEmitter {
        session_id,
        tx,
        seq: AtomicU64::new(0),
        finished: AtomicBool::new(false),
        disconnected: AtomicBool::new(false),
        cancel: None,
    };
    (emitter, EventStream { rx })
}

/// Producer side, owned by the session worker
#[derive(Debug)]
pub struct EventEmitter {
    session_id: SessionId,
    tx: mpsc::Sender<EventEnvelope>,
    seq: AtomicU64,
    finished: AtomicBool,
    disconnected: AtomicBool,
    cancel: Option<CancellationToken>,
}

impl EventEmitter {
    /// Stop waiting on a full buffer once `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Deliver an event, suspending while the buffer is full.
    ///
    /// Nothing is delivered after a terminal event. A vanished consumer is
    /// logged once; the session itself keeps running to a terminal state.
    /// After cancellation an event that finds the buffer full is discarded
    /// so the worker can still reach its terminal state.
    pub async fn emit(&self, status: SessionStatus, event: Event) {
        if self.finished.load(Ordering::SeqCst) {
            tracing::warn!(session = %self.session_id, kind = event.kind(), "Event after terminal event discarded");
            return;
        }
        if event.is_terminal() {
            self.finished.store(true, Ordering::SeqCst);
        }

        let envelope = EventEnvelope {
            session_id: self.session_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            status,
            timestamp: Utc::now(),
            event,
        };

        let delivered = match &self.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    sent = self.tx.send(envelope) => sent.is_ok(),
                    () = cancel.cancelled() => {
                        tracing::debug!(session = %self.session_id, "Cancelled with a full event buffer, event discarded");
                        return;
                    }
                }
            }
            None => self.tx.send(envelope).await.is_ok(),
        };

        if !delivered && !self.disconnected.swap(true, Ordering::SeqCst) {
            tracing::warn!(session = %self.session_id, "Event consumer disconnected");
        }
    }

    /// Whether a terminal event has been emitted
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Events emitted so far
    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Sink turning text into `message_delta` events
    pub const fn deltas(&self, status: SessionStatus) -> DeltaSink<'_> {
        DeltaSink { emitter: self, status }
    }

    /// Sink turning text into `tool_output_chunk` events for `call_id`
    pub const fn tool_chunks<'a>(
        &'a self,
        call_id: &'a str,
        status: SessionStatus,
    ) -> ToolChunkSink<'a> {
        ToolChunkSink {
            emitter: self,
            call_id,
            status,
        }
    }
}

/// Consumer side, handed to the transport adapter
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<EventEnvelope>,
}

impl EventStream {
    /// Next event, `None` once the producer is gone and the buffer drained
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }

    /// Adapt into a `Stream` for transport adapters
    pub fn into_stream(self) -> ReceiverStream<EventEnvelope> {
        ReceiverStream::new(self.rx)
    }

    /// Read until the producer closes
    pub async fn collect(mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// Receiver of incremental text (model deltas, tool output chunks)
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn push(&self, text: &str);
}

/// Sink that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn push(&self, _text: &str) {}
}

/// Forwards model text as `message_delta` events
pub struct DeltaSink<'a> {
    emitter: &'a EventEmitter,
    status: SessionStatus,
}

#[async_trait]
impl OutputSink for DeltaSink<'_> {
    async fn push(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.emitter
            .emit(self.status, Event::MessageDelta { text: text.to_string() })
            .await;
    }
}

/// Forwards tool output as `tool_output_chunk` events
pub struct ToolChunkSink<'a> {
    emitter: &'a EventEmitter,
    call_id: &'a str,
    status: SessionStatus,
}

#[async_trait]
impl OutputSink for ToolChunkSink<'_> {
    async fn push(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.emitter
            .emit(
                self.status,
                Event::ToolOutputChunk {
                    call_id: self.call_id.to_string(),
                    chunk: text.to_string(),
                },
            )
            .await;
    }
}
