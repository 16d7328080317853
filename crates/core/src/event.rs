//! Domain event system: decoupled communication between bounded contexts.
//!
//! Connection health, rebuilds, tool invocations and task lifecycle are
//! published here so the gateway and CLI can observe them without the
//! tool and agent crates knowing who listens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Liveness classification of a supervised tool-server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Reconnecting,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A supervised connection changed health state
    HealthChanged {
        server: String,
        state: HealthState,
        timestamp: DateTime<Utc>,
    },

    /// A managed connection was torn down and recreated
    ConnectionRebuilt {
        server: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was invoked through a managed connection
    ToolInvoked {
        server: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        deduplicated: bool,
        timestamp: DateTime<Utc>,
    },

    /// A generation task was registered and its worker spawned
    TaskStarted {
        task_id: String,
        conversation_key: String,
        timestamp: DateTime<Utc>,
    },

    /// A generation worker stopped producing
    TaskFinished {
        task_id: String,
        chunks: usize,
        failed: bool,
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
