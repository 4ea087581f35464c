//! Progress events emitted by research and debate runs
//!
//! Events are instrumentation only. A run behaves identically with or without
//! a sink attached, and a failing sink is logged and ignored.

use crate::types::{Confidence, ProviderFamily, SessionId, TokenUsage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single timestamped event with its position in the emitter's sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonic sequence number, starting at 1 per emitter
    pub seq: u64,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Event payload
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A research specialist was launched
    AgentStart {
        role: String,
        model: String,
        provider: ProviderFamily,
    },
    /// A research specialist settled
    AgentComplete {
        role: String,
        tool_calls: u32,
        duration_ms: u64,
        error: Option<String>,
    },
    /// A debate round is about to query its agents
    RoundStarted { round: u32, agents: usize },
    /// One agent's response in a round settled
    ModelCompleted {
        round: u32,
        agent: String,
        model: String,
        provider: ProviderFamily,
        tokens: TokenUsage,
        duration_ms: u64,
        error: Option<String>,
    },
    /// A round settled and was scored
    RoundCompleted { round: u32, disagreement: f64 },
    /// Synthesis call launched
    SynthesisStarted,
    /// Synthesis produced
    SynthesisCompleted { confidence: Confidence },
    /// Terminal success
    DebateCompleted { session_id: SessionId, rounds: usize },
    /// Terminal failure
    Error { kind: String, message: String },
}

impl EventKind {
    /// Stable event type name
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AgentStart { .. } => "agent_start",
            EventKind::AgentComplete { .. } => "agent_complete",
            EventKind::RoundStarted { .. } => "round_started",
            EventKind::ModelCompleted { .. } => "model_completed",
            EventKind::RoundCompleted { .. } => "round_completed",
            EventKind::SynthesisStarted => "synthesis_started",
            EventKind::SynthesisCompleted { .. } => "synthesis_completed",
            EventKind::DebateCompleted { .. } => "debate_completed",
            EventKind::Error { .. } => "error",
        }
    }
}

/// Why a sink refused an event
#[derive(Debug, Error)]
pub enum SinkError {
    /// The receiving side is gone
    #[error("sink closed")]
    Closed,
    /// The buffer is full
    #[error("sink buffer full")]
    Full,
}

/// Receiver of progress events
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn send(&self, event: ProgressEvent) -> std::result::Result<(), SinkError>;
}

/// Sink that forwards events into a bounded channel, dropping when full
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: ProgressEvent) -> std::result::Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Sink that keeps every event in memory
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    /// Create an empty collecting sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Event type names in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind.name()).collect()
    }
}

impl EventSink for CollectingSink {
    fn send(&self, event: ProgressEvent) -> std::result::Result<(), SinkError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Stamps events with sequence numbers and forwards them to an optional sink
#[derive(Clone, Default)]
pub struct Emitter {
    sink: Option<Arc<dyn EventSink>>,
    seq: Arc<AtomicU64>,
}

impl Emitter {
    /// Emitter with a sink attached
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink: Some(sink),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emitter that discards everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build from an optional sink
    pub fn from_option(sink: Option<Arc<dyn EventSink>>) -> Self {
        sink.map(Self::new).unwrap_or_default()
    }

    /// Emit an event. Sink failures are logged and never surface.
    pub fn emit(&self, kind: EventKind) {
        let Some(sink) = &self.sink else {
            return;
        };
        let event = ProgressEvent {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            kind,
        };
        let name = event.kind.name();
        if let Err(e) = sink.send(event) {
            tracing::debug!(event = name, error = %e, "progress sink rejected event");
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("attached", &self.sink.is_some())
            .field("seq", &self.seq.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn send(&self, _event: ProgressEvent) -> std::result::Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let sink = Arc::new(CollectingSink::new());
        let emitter = Emitter::new(sink.clone());
        emitter.emit(EventKind::SynthesisStarted);
        emitter.emit(EventKind::RoundStarted { round: 1, agents: 3 });
        let events = sink.events();
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
        assert_eq!(sink.names(), vec!["synthesis_started", "round_started"]);
    }

    #[test]
    fn test_failing_sink_is_ignored() {
        let emitter = Emitter::new(Arc::new(FailingSink));
        emitter.emit(EventKind::SynthesisStarted);
        Emitter::disabled().emit(EventKind::SynthesisStarted);
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        let emitter = Emitter::new(Arc::new(sink));
        emitter.emit(EventKind::SynthesisStarted);
        emitter.emit(EventKind::RoundStarted { round: 1, agents: 2 });
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::SynthesisStarted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProgressEvent {
            seq: 1,
            timestamp: Utc::now(),
            kind: EventKind::RoundStarted { round: 2, agents: 3 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "round_started");
        assert_eq!(json["round"], 2);
    }
}
