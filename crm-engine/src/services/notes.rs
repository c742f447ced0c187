//! Staff notes
//!
//! Writes publish `DataChanged` on the `notes` collection; the orchestrator
//! turns those into `note_*` history entries.

use super::{ActivityDraft, CustomerService};
use crate::db::{customers, notes};
use crm_common::events::CrmEvent;
use crm_common::models::activity::{NOTE_ADDED, NOTE_DELETED, NOTE_UPDATED};
use crm_common::models::{ActivityRecord, ChangeOperation, Note, NoteInput, SourceCollection, SourceRef};
use crm_common::time::now_ms;
use crm_common::{Error, Result};
use uuid::Uuid;

pub const DEFAULT_NOTE_LIMIT: i64 = 50;

impl CustomerService {
    pub async fn create_note(&self, org_id: &str, customer_id: &str, input: NoteInput) -> Result<Note> {
        let text = validated_text(&input)?;
        let customer = self
            .find_customer(org_id, customer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?;

        let now = now_ms();
        let note = Note {
            id: Uuid::new_v4(),
            unified_id: customer.unified_id,
            org_id: org_id.to_string(),
            note_text: text,
            next_action: input.next_action,
            next_action_date: input.next_action_date,
            is_deleted: false,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };
        notes::insert_note(&self.db, &note).await?;
        self.publish_note(&note, ChangeOperation::Insert)?;
        Ok(note)
    }

    /// Non-deleted notes for a customer, newest first
    pub async fn list_notes(&self, org_id: &str, customer_id: &str, limit: i64) -> Result<Vec<Note>> {
        let customer = self
            .find_customer(org_id, customer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {customer_id}")))?;
        let limit = if limit > 0 { limit } else { DEFAULT_NOTE_LIMIT };
        notes::list_notes(&self.db, org_id, &customer.unified_id, limit).await
    }

    pub async fn update_note(&self, org_id: &str, note_id: Uuid, input: NoteInput) -> Result<Note> {
        let text = validated_text(&input)?;
        let mut note = notes::load_note(&self.db, org_id, note_id)
            .await?
            .filter(|n| !n.is_deleted)
            .ok_or_else(|| Error::NotFound(format!("note {note_id}")))?;

        note.note_text = text;
        note.next_action = input.next_action;
        note.next_action_date = input.next_action_date;
        note.updated_at = now_ms();
        if !notes::update_note(&self.db, &note).await? {
            return Err(Error::NotFound(format!("note {note_id}")));
        }
        self.publish_note(&note, ChangeOperation::Update)?;
        Ok(note)
    }

    pub async fn soft_delete_note(&self, org_id: &str, note_id: Uuid) -> Result<()> {
        let mut note = notes::load_note(&self.db, org_id, note_id)
            .await?
            .filter(|n| !n.is_deleted)
            .ok_or_else(|| Error::NotFound(format!("note {note_id}")))?;
        let now = now_ms();
        notes::soft_delete_note(&self.db, org_id, note_id, now).await?;
        note.is_deleted = true;
        note.updated_at = now;
        self.publish_note(&note, ChangeOperation::Delete)
    }

    /// History entry for a note change, written at most once per change
    pub async fn record_note_activity(
        &self,
        note: &Note,
        operation: ChangeOperation,
    ) -> Result<Option<ActivityRecord>> {
        let Some(customer) = customers::load_customer(&self.db, &note.org_id, &note.unified_id).await? else {
            return Ok(None);
        };
        let note_id = note.id.to_string();
        let (activity_type, label, at, source_ref) = match operation {
            ChangeOperation::Insert => (
                NOTE_ADDED,
                "Note added",
                note.created_at,
                SourceRef::new("noteId", &note_id),
            ),
            ChangeOperation::Update => (
                NOTE_UPDATED,
                "Note updated",
                note.updated_at,
                SourceRef::new("noteId", &note_id).with("updatedAt", &note.updated_at.to_string()),
            ),
            ChangeOperation::Delete => (
                NOTE_DELETED,
                "Note deleted",
                note.updated_at,
                SourceRef::new("noteId", &note_id),
            ),
        };

        let mut draft = ActivityDraft::new(&customer, activity_type, "system", at)
            .source_ref(source_ref)
            .display(label, "note", note.preview())
            .actor(&note.created_by, &note.created_by)
            .meta("noteTextPreview", note.preview());
        if let Some(action) = &note.next_action {
            draft = draft.meta("nextAction", action.as_str());
        }
        if let Some(date) = note.next_action_date {
            draft = draft.meta("nextActionDate", date);
        }
        self.recorder.log_if_not_exists(draft).await
    }

    fn publish_note(&self, note: &Note, operation: ChangeOperation) -> Result<()> {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(CrmEvent::data_changed(
                SourceCollection::Notes,
                operation,
                &note.org_id,
                &note.id.to_string(),
                serde_json::to_value(note)?,
            ));
        }
        Ok(())
    }
}

fn validated_text(input: &NoteInput) -> Result<String> {
    let text = input.note_text.trim();
    if text.is_empty() {
        return Err(Error::InvalidInput("note text must not be blank".into()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_common::config::EngineSettings;
    use crm_common::db::init_memory_database;
    use crm_common::events::EventBus;
    use crm_common::models::{Source, UnifiedCustomer};
    use std::sync::Arc;

    fn input(text: &str) -> NoteInput {
        NoteInput {
            note_text: text.into(),
            created_by: "staff-1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_note_lifecycle_publishes_changes() {
        let pool = init_memory_database().await.unwrap();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let svc = CustomerService::new(pool.clone(), Arc::new(EngineSettings::default()), Some(bus));
        let c = UnifiedCustomer::standalone("org", Source::Pos, "p1", 1);
        customers::save_customer(&pool, &c).await.unwrap();

        assert!(matches!(
            svc.create_note("org", "p1", input("  ")).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        let note = svc.create_note("org", "p1", input("Call back Friday")).await.unwrap();
        match rx.recv().await.unwrap() {
            CrmEvent::DataChanged { collection, operation, .. } => {
                assert_eq!(collection, SourceCollection::Notes);
                assert_eq!(operation, ChangeOperation::Insert);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let edited = svc.update_note("org", note.id, input("Call back Monday")).await.unwrap();
        assert_eq!(edited.note_text, "Call back Monday");
        assert_eq!(svc.list_notes("org", "p1", 0).await.unwrap().len(), 1);

        svc.soft_delete_note("org", note.id).await.unwrap();
        assert!(svc.list_notes("org", "p1", 0).await.unwrap().is_empty());
        assert!(matches!(
            svc.soft_delete_note("org", note.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_note_activity_logged_once() {
        let pool = init_memory_database().await.unwrap();
        let svc = CustomerService::new(pool.clone(), Arc::new(EngineSettings::default()), None);
        let c = UnifiedCustomer::standalone("org", Source::Pos, "p1", 1);
        customers::save_customer(&pool, &c).await.unwrap();
        let note = svc.create_note("org", "p1", input("VIP gift")).await.unwrap();

        let first = svc.record_note_activity(&note, ChangeOperation::Insert).await.unwrap();
        assert_eq!(first.unwrap().activity_type, NOTE_ADDED);
        let second = svc.record_note_activity(&note, ChangeOperation::Insert).await.unwrap();
        assert!(second.is_none());
    }
}
