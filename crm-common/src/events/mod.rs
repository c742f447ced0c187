//! In-process event bus
//!
//! Upstream writes publish [`CrmEvent::DataChanged`]; the engine's
//! orchestrator subscribes and drives identity resolution, aggregation and
//! activity recording. The engine itself publishes lossy notifications after
//! recalculations and recorded activities for any optional listener.
//!
//! Upstream changes and engine notifications travel on separate channels so
//! a burst of notifications (bulk recalculation) cannot push unread upstream
//! changes out of the orchestrator's buffer.

use crate::models::{ChangeOperation, Classification, SourceCollection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Events carried on the [`EventBus`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrmEvent {
    /// A raw upstream record was written
    DataChanged {
        collection: SourceCollection,
        operation: ChangeOperation,
        org_id: String,
        document_id: String,
        /// Full document after the write (before it, for deletes)
        document: Value,
        timestamp: DateTime<Utc>,
    },

    /// A customer's metrics and classification were recomputed
    CustomerRecalculated {
        unified_id: String,
        org_id: String,
        classification: Classification,
        timestamp: DateTime<Utc>,
    },

    /// A history entry was appended
    ActivityRecorded {
        unified_id: String,
        org_id: String,
        activity_type: String,
        activity_id: uuid::Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl CrmEvent {
    pub fn data_changed(
        collection: SourceCollection,
        operation: ChangeOperation,
        org_id: &str,
        document_id: &str,
        document: Value,
    ) -> Self {
        CrmEvent::DataChanged {
            collection,
            operation,
            org_id: org_id.to_string(),
            document_id: document_id.to_string(),
            document,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event belongs on the upstream change channel
    pub fn is_upstream(&self) -> bool {
        matches!(self, CrmEvent::DataChanged { .. })
    }

    pub fn org_id(&self) -> &str {
        match self {
            CrmEvent::DataChanged { org_id, .. }
            | CrmEvent::CustomerRecalculated { org_id, .. }
            | CrmEvent::ActivityRecorded { org_id, .. } => org_id,
        }
    }
}

/// Broadcast channels shared by publishers and subscribers
///
/// Cloning is cheap; all clones publish into the same channels. `emit`
/// routes `DataChanged` to the change channel and everything else to the
/// notification channel.
#[derive(Clone)]
pub struct EventBus {
    changes: broadcast::Sender<CrmEvent>,
    notifications: broadcast::Sender<CrmEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// ```
    /// use crm_common::events::EventBus;
    ///
    /// let bus = EventBus::new(100);
    /// assert_eq!(bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        let (notifications, _) = broadcast::channel(capacity.max(1));
        Self {
            changes,
            notifications,
            capacity,
        }
    }

    /// Subscribe to upstream `DataChanged` events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CrmEvent> {
        self.changes.subscribe()
    }

    /// Subscribe to engine notifications (recalculations, recorded activities)
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<CrmEvent> {
        self.notifications.subscribe()
    }

    fn sender_for(&self, event: &CrmEvent) -> &broadcast::Sender<CrmEvent> {
        if event.is_upstream() {
            &self.changes
        } else {
            &self.notifications
        }
    }

    /// Emit an event, returning the number of subscribers that received it
    ///
    /// Fails when nobody is subscribed to the event's channel.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CrmEvent) -> Result<usize, broadcast::error::SendError<CrmEvent>> {
        self.sender_for(&event).send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: CrmEvent) {
        let _ = self.sender_for(&event).send(event);
    }

    /// Subscribers to upstream changes
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn notification_subscriber_count(&self) -> usize {
        self.notifications.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
