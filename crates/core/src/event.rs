//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the worker.
//! Other components (operator interface, logs) subscribe without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::blocker::BlockerKind;
use crate::context::Phase;
use crate::work::WorkStatus;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The control loop moved to a new phase
    PhaseChanged {
        from: Phase,
        to: Phase,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A blocker was detected
    BlockerDetected {
        kind: BlockerKind,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was parked waiting for an operator
    ApprovalRequested {
        approval_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// An operator approved or rejected a parked call
    ApprovalResolved {
        approval_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    CheckpointCreated {
        checkpoint_id: String,
        phase: Phase,
        timestamp: DateTime<Utc>,
    },

    /// A unit of work reached a final outcome
    WorkCompleted {
        work_id: String,
        status: WorkStatus,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
