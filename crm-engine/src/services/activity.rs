//! Activity recorder
//!
//! Two write paths: plain audit entries (profile views, notes) and
//! snapshot-gated change entries, which are only written when the customer's
//! snapshot differs from the latest stored one.
//!
//! An event keeps a single entry per `(unified_id, activity_type, source_ref)`:
//! redelivery of an already recorded event revises that entry in place.

use super::snapshot::{diff_snapshots, metrics_snapshot, profile_snapshot};
use crate::db::activities;
use crm_common::events::{CrmEvent, EventBus};
use crm_common::models::{ActivityDomain, ActivityRecord, CustomerMetrics, SourceRef, UnifiedCustomer};
use crm_common::time::now_ms;
use crm_common::Result;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// Fields of an activity before it is stamped and stored
#[derive(Debug, Clone, Default)]
pub struct ActivityDraft {
    pub unified_id: String,
    pub org_id: String,
    pub activity_type: String,
    pub source: String,
    pub source_ref: SourceRef,
    pub display_label: String,
    pub display_icon: String,
    pub display_subtext: String,
    pub actor_id: String,
    pub actor_name: String,
    pub metadata: Map<String, Value>,
    pub activity_at: i64,
}

impl ActivityDraft {
    pub fn new(customer: &UnifiedCustomer, activity_type: &str, source: &str, activity_at: i64) -> Self {
        Self {
            unified_id: customer.unified_id.clone(),
            org_id: customer.org_id.clone(),
            activity_type: activity_type.to_string(),
            source: source.to_string(),
            activity_at,
            ..Default::default()
        }
    }

    pub fn source_ref(mut self, source_ref: SourceRef) -> Self {
        self.source_ref = source_ref;
        self
    }

    pub fn display(mut self, label: impl Into<String>, icon: &str, subtext: impl Into<String>) -> Self {
        self.display_label = label.into();
        self.display_icon = icon.to_string();
        self.display_subtext = subtext.into();
        self
    }

    pub fn actor(mut self, id: &str, name: &str) -> Self {
        self.actor_id = id.to_string();
        self.actor_name = name.to_string();
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn into_record(self) -> ActivityRecord {
        self.stamp(Uuid::new_v4(), now_ms())
    }

    /// Same entry identity as `previous`, new payload
    fn into_revision(self, previous: &ActivityRecord) -> ActivityRecord {
        self.stamp(previous.id, previous.created_at)
    }

    fn stamp(self, id: Uuid, created_at: i64) -> ActivityRecord {
        ActivityRecord {
            id,
            domain: ActivityDomain::of(&self.activity_type),
            unified_id: self.unified_id,
            org_id: self.org_id,
            activity_type: self.activity_type,
            source: self.source,
            source_ref: self.source_ref,
            display_label: self.display_label,
            display_icon: self.display_icon,
            display_subtext: self.display_subtext,
            actor_id: self.actor_id,
            actor_name: self.actor_name,
            metadata: self.metadata,
            activity_at: self.activity_at,
            created_at,
        }
    }
}

/// How a snapshot-gated entry picks its baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Compare against the latest snapshot at or before the event
    Change,
    /// Baseline ignores an earlier entry for this exact event, which is
    /// revised in place instead of appended to
    Event,
    /// Event mode, and skip entirely if this event was already recorded
    EventIfMissing,
}

#[derive(Clone)]
pub struct ActivityRecorder {
    db: SqlitePool,
    event_bus: Option<EventBus>,
}

impl ActivityRecorder {
    pub fn new(db: SqlitePool, event_bus: Option<EventBus>) -> Self {
        Self { db, event_bus }
    }

    /// Append an entry unconditionally
    pub async fn log(&self, draft: ActivityDraft) -> Result<ActivityRecord> {
        let record = draft.into_record();
        activities::insert_activity(&self.db, &record).await?;
        self.announce(&record);
        Ok(record)
    }

    /// Append unless `(unified_id, activity_type, source_ref)` already exists
    pub async fn log_if_not_exists(&self, draft: ActivityDraft) -> Result<Option<ActivityRecord>> {
        if self.exists(&draft).await? {
            return Ok(None);
        }
        self.log(draft).await.map(Some)
    }

    /// Append a snapshot-bearing entry if the customer's snapshot changed
    ///
    /// `metrics` must be computed as of `draft.activity_at`.
    pub async fn record_change(
        &self,
        draft: ActivityDraft,
        customer: &UnifiedCustomer,
        metrics: &CustomerMetrics,
        mode: RecordMode,
    ) -> Result<Option<ActivityRecord>> {
        if mode == RecordMode::EventIfMissing && self.exists(&draft).await? {
            return Ok(None);
        }
        let previous = match mode {
            RecordMode::Event => {
                activities::find_event_activity(
                    &self.db,
                    &draft.org_id,
                    &draft.unified_id,
                    &draft.activity_type,
                    &draft.source_ref,
                )
                .await?
            }
            _ => None,
        };

        let exclude = match mode {
            RecordMode::Change => None,
            _ => Some((draft.activity_type.as_str(), &draft.source_ref)),
        };
        let baseline = activities::latest_snapshot(
            &self.db,
            &draft.org_id,
            &draft.unified_id,
            draft.activity_at,
            exclude,
        )
        .await?;

        let mut snapshot_owner = customer.clone();
        snapshot_owner.metrics = metrics.clone();
        let profile = profile_snapshot(&snapshot_owner);
        let metrics_map = metrics_snapshot(metrics);

        let changes = diff_snapshots(
            baseline.as_ref().and_then(|b| b.profile_snapshot()),
            baseline.as_ref().and_then(|b| b.metrics_snapshot()),
            &profile,
            &metrics_map,
        );
        if changes.is_empty() {
            debug!(
                unified_id = %draft.unified_id,
                activity_type = %draft.activity_type,
                "Snapshot unchanged, activity not recorded"
            );
            return Ok(None);
        }

        let draft = draft
            .meta("profileSnapshot", Value::Object(profile))
            .meta("metricsSnapshot", Value::Object(metrics_map))
            .meta("snapshotChanges", json!(changes))
            .meta("snapshotAt", metrics.computed_at);
        match previous {
            Some(previous) => self.revise(&previous, draft).await,
            None => self.log(draft).await.map(Some),
        }
    }

    /// Overwrite an event's entry unless the payload is identical
    async fn revise(&self, previous: &ActivityRecord, draft: ActivityDraft) -> Result<Option<ActivityRecord>> {
        let record = draft.into_revision(previous);
        if record.metadata == previous.metadata
            && record.display_subtext == previous.display_subtext
            && record.activity_at == previous.activity_at
        {
            debug!(activity_id = %previous.id, "Event redelivered unchanged");
            return Ok(None);
        }
        activities::replace_activity(&self.db, &record).await?;
        self.announce(&record);
        Ok(Some(record))
    }

    async fn exists(&self, draft: &ActivityDraft) -> Result<bool> {
        activities::activity_exists(
            &self.db,
            &draft.org_id,
            &draft.unified_id,
            &draft.activity_type,
            &draft.source_ref,
        )
        .await
    }

    fn announce(&self, record: &ActivityRecord) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(CrmEvent::ActivityRecorded {
                unified_id: record.unified_id.clone(),
                org_id: record.org_id.clone(),
                activity_type: record.activity_type.clone(),
                activity_id: record.id,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_common::db::init_memory_database;
    use crm_common::models::Source;

    fn customer() -> UnifiedCustomer {
        let mut c = UnifiedCustomer::standalone("org", Source::Pos, "p1", 0);
        c.profile.name = "Mai".into();
        c
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_written_once() {
        let pool = init_memory_database().await.unwrap();
        let recorder = ActivityRecorder::new(pool.clone(), None);
        let c = customer();

        for at in [10, 20] {
            let draft = ActivityDraft::new(&c, "customer_updated", "system", at)
                .source_ref(SourceRef::new("trigger", "recalculate"));
            recorder.record_change(draft, &c, &c.metrics, RecordMode::Change).await.unwrap();
        }
        let n = activities::count_activities(&pool, "org", "p1", None).await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_if_missing_skips_existing_event() {
        let pool = init_memory_database().await.unwrap();
        let recorder = ActivityRecorder::new(pool.clone(), None);
        let mut c = customer();
        let draft = || {
            ActivityDraft::new(&customer(), "order_created", "pos", 50)
                .source_ref(SourceRef::new("orderId", "o1"))
        };

        let first = recorder
            .record_change(draft(), &c, &c.metrics.clone(), RecordMode::EventIfMissing)
            .await
            .unwrap();
        assert!(first.is_some());

        c.metrics.orders.order_count = 9;
        let second = recorder
            .record_change(draft(), &c, &c.metrics.clone(), RecordMode::EventIfMissing)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_event_mode_keeps_one_entry_per_event() {
        let pool = init_memory_database().await.unwrap();
        let recorder = ActivityRecorder::new(pool.clone(), None);
        let c = customer();
        let draft = || {
            ActivityDraft::new(&customer(), "conversation_started", "messaging", 50)
                .source_ref(SourceRef::new("conversationId", "cv1"))
        };

        let first = recorder
            .record_change(draft().meta("messageCount", 1), &c, &c.metrics, RecordMode::Event)
            .await
            .unwrap()
            .unwrap();

        // Unchanged redelivery writes nothing
        let same = recorder
            .record_change(draft().meta("messageCount", 1), &c, &c.metrics, RecordMode::Event)
            .await
            .unwrap();
        assert!(same.is_none());

        // A later update revises the same entry, still diffed against the pre-event state
        let revised = recorder
            .record_change(draft().meta("messageCount", 4), &c, &c.metrics, RecordMode::Event)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revised.id, first.id);
        assert_eq!(revised.created_at, first.created_at);
        assert_eq!(revised.metadata["messageCount"], json!(4));
        assert_eq!(revised.snapshot_changes().first().map(String::as_str), Some("profile.name"));

        let n = activities::count_activities(&pool, "org", "p1", Some("conversation_started"))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let stored = activities::list_activities(&pool, "org", "p1", &[], 10).await.unwrap();
        assert_eq!(stored[0].metadata["messageCount"], json!(4));
    }

    #[tokio::test]
    async fn test_plain_log_and_if_not_exists() {
        let pool = init_memory_database().await.unwrap();
        let recorder = ActivityRecorder::new(pool.clone(), None);
        let c = customer();
        let draft = ActivityDraft::new(&c, "note_added", "system", 5)
            .source_ref(SourceRef::new("noteId", "n1"))
            .meta("noteTextPreview", "call back");

        let rec = recorder.log_if_not_exists(draft.clone()).await.unwrap().unwrap();
        assert_eq!(rec.domain, ActivityDomain::Note);
        assert!(rec.metrics_snapshot().is_none());
        assert!(recorder.log_if_not_exists(draft).await.unwrap().is_none());
    }
}
