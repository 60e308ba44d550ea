//! Sync progress events
//!
//! The engine publishes progress on a `tokio::sync::broadcast` channel.
//! Emission never blocks the engine; slow subscribers lag and lose events.

use crate::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Progress events emitted by the reconciliation engine and scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A bounded step began for a kind
    StepStarted {
        kind: EntityKind,
        /// Index the step resumes after (-1 = fresh pass)
        checkpoint_index: i64,
        total: i64,
        timestamp: DateTime<Utc>,
    },

    /// One remote item was processed and the checkpoint advanced
    ItemProcessed {
        kind: EntityKind,
        index: i64,
        external_id: i64,
        /// False when local persistence failed for this item
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// Stale cleanup finished for a kind
    KindCompleted {
        kind: EntityKind,
        total: i64,
        deleted: usize,
        timestamp: DateTime<Utc>,
    },

    /// Every kind finished; run status returned to idle
    RunCompleted { timestamp: DateTime<Utc> },

    /// Consecutive transport failures reached the threshold
    BreakerTripped {
        error_count: i64,
        threshold: i64,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Short name used in log lines
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::StepStarted { .. } => "StepStarted",
            SyncEvent::ItemProcessed { .. } => "ItemProcessed",
            SyncEvent::KindCompleted { .. } => "KindCompleted",
            SyncEvent::RunCompleted { .. } => "RunCompleted",
            SyncEvent::BreakerTripped { .. } => "BreakerTripped",
        }
    }
}

/// Broadcast event bus shared by the engine components
///
/// Cloning is cheap; clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let sent = bus
            .emit(SyncEvent::RunCompleted {
                timestamp: Utc::now(),
            })
            .unwrap();
        assert_eq!(sent, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "RunCompleted");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .emit(SyncEvent::RunCompleted {
                timestamp: Utc::now()
            })
            .is_err());

        // Lossy emission tolerates the missing subscriber
        bus.emit_lossy(SyncEvent::RunCompleted {
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SyncEvent::KindCompleted {
            kind: EntityKind::Project,
            total: 3,
            deleted: 1,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "KindCompleted");
        assert_eq!(json["kind"], "project");
    }
}
