//! Customer activity history

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const ORDER_CREATED: &str = "order_created";
pub const ORDER_COMPLETED: &str = "order_completed";
pub const ORDER_CANCELLED: &str = "order_cancelled";
pub const CONVERSATION_STARTED: &str = "conversation_started";
pub const NOTE_ADDED: &str = "note_added";
pub const NOTE_UPDATED: &str = "note_updated";
pub const NOTE_DELETED: &str = "note_deleted";
pub const PROFILE_VIEWED: &str = "profile_viewed";
pub const CUSTOMER_CREATED: &str = "customer_created";
pub const CUSTOMER_UPDATED: &str = "customer_updated";

label_enum!(
    /// Grouping used to filter activity history
    ActivityDomain {
        Order => "order",
        Conversation => "conversation",
        Note => "note",
        Profile => "profile",
        Customer => "customer",
        System => "system",
    }
);

impl ActivityDomain {
    /// Domain an activity type belongs to, by its prefix
    pub fn of(activity_type: &str) -> Self {
        match activity_type.split('_').next() {
            Some("order") => ActivityDomain::Order,
            Some("conversation") => ActivityDomain::Conversation,
            Some("note") => ActivityDomain::Note,
            Some("profile") => ActivityDomain::Profile,
            Some("customer") => ActivityDomain::Customer,
            _ => ActivityDomain::System,
        }
    }
}

/// Key map identifying the raw record that triggered an activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(pub BTreeMap<String, String>);

impl SourceRef {
    pub fn new(key: &str, value: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), value.to_string());
        Self(map)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Canonical string form used for equality lookups in the store
    ///
    /// ```
    /// use crm_common::models::SourceRef;
    ///
    /// let r = SourceRef::new("orderId", "42").with("a", "b");
    /// assert_eq!(r.key(), "a=b&orderId=42");
    /// ```
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Immutable, append-only history entry for one customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: Uuid,
    pub unified_id: String,
    pub org_id: String,
    pub domain: ActivityDomain,
    pub activity_type: String,
    pub source: String,
    pub source_ref: SourceRef,
    pub display_label: String,
    pub display_icon: String,
    pub display_subtext: String,
    pub actor_id: String,
    pub actor_name: String,
    /// Event details plus, for snapshot entries, `profileSnapshot`,
    /// `metricsSnapshot`, `snapshotChanges` and `snapshotAt`
    pub metadata: Map<String, Value>,
    /// Logical event time (epoch ms)
    pub activity_at: i64,
    pub created_at: i64,
}

impl ActivityRecord {
    pub fn profile_snapshot(&self) -> Option<&Map<String, Value>> {
        self.metadata.get("profileSnapshot").and_then(Value::as_object)
    }

    pub fn metrics_snapshot(&self) -> Option<&Map<String, Value>> {
        self.metadata.get("metricsSnapshot").and_then(Value::as_object)
    }

    pub fn snapshot_changes(&self) -> Vec<String> {
        self.metadata
            .get("snapshotChanges")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
