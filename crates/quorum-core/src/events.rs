//! Broadcast event bus for orchestrator observability
//!
//! Uses `tokio::broadcast` so multiple subscribers receive the same events.
//! Slow subscribers miss events (lagged) rather than blocking publishers.

use crate::queue::{Lane, QueueSnapshot};
use quorum_llm::{Intent, RoutingDecision};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during routing, queueing and execution
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A query was classified
    IntentClassified {
        /// The detected intent
        intent: Intent,
        /// Rule or LLM confidence
        confidence: f64,
    },
    /// A routing decision was made; emitted before execution starts
    RoutingDecided(Box<RoutingDecision>),
    /// The primary model failed and an alternative is being tried
    FallbackTriggered {
        /// Model that failed
        failed_model: String,
        /// Model being tried next
        next_model: String,
    },
    /// A task entered a queue lane
    TaskQueued {
        /// Task identifier
        task_id: Uuid,
        /// Lane the task landed in
        lane: Lane,
    },
    /// A task started running
    TaskStarted {
        /// Task identifier
        task_id: Uuid,
    },
    /// A task completed successfully
    TaskCompleted {
        /// Task identifier
        task_id: Uuid,
        /// Wall-clock duration
        duration_ms: u64,
    },
    /// A task failed
    TaskFailed {
        /// Task identifier
        task_id: Uuid,
        /// Error description
        error: String,
    },
    /// Queue state changed; carries the full snapshot pushed to subscribers
    QueueUpdated(QueueSnapshot),
}

/// Broadcast-based event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that got it;
    /// with no subscribers the event is silently dropped.
    pub fn publish(&self, event: OrchestratorEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Current number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
