//! Historical activity backfill
//!
//! Replays stored touchpoints through the log-if-not-exists path so a second
//! pass adds nothing.

use super::CustomerService;
use crate::db::{notes, sources};
use crm_common::models::{ActivityDomain, ChangeOperation};
use crm_common::Result;
use serde::Serialize;
use tracing::{info, warn};

const BACKFILL_BATCH: i64 = 1000;

/// Touchpoint kinds a backfill run replays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillKinds {
    pub orders: bool,
    pub conversations: bool,
    pub notes: bool,
}

impl Default for BackfillKinds {
    fn default() -> Self {
        Self {
            orders: true,
            conversations: true,
            notes: true,
        }
    }
}

impl BackfillKinds {
    /// Parse a list of domain names; an empty list selects everything
    pub fn from_domains(domains: &[ActivityDomain]) -> Self {
        if domains.is_empty() {
            return Self::default();
        }
        Self {
            orders: domains.contains(&ActivityDomain::Order),
            conversations: domains.contains(&ActivityDomain::Conversation),
            notes: domains.contains(&ActivityDomain::Note),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillResult {
    pub orders_processed: i64,
    pub conversations_processed: i64,
    pub conversations_logged: i64,
    pub conversations_skipped: i64,
    pub notes_processed: i64,
}

impl CustomerService {
    /// Replay order, conversation and note touchpoints oldest first
    ///
    /// `limit > 0` caps the records read per kind.
    pub async fn backfill_activity(
        &self,
        org_id: &str,
        limit: i64,
        kinds: BackfillKinds,
    ) -> Result<BackfillResult> {
        let mut result = BackfillResult::default();
        let cap = if limit > 0 { limit } else { i64::MAX };

        if kinds.orders {
            let mut offset = 0;
            while offset < cap {
                let page = sources::list_orders(&self.db, org_id, false, BACKFILL_BATCH.min(cap - offset), offset).await?;
                if page.is_empty() {
                    break;
                }
                offset += page.len() as i64;
                for order in &page {
                    if let Err(e) = self.ingest_order(order, ChangeOperation::Insert, true).await {
                        warn!(org_id, order_id = %order.id, error = %e, "Order backfill failed");
                    }
                    result.orders_processed += 1;
                }
            }
        }

        if kinds.conversations {
            let mut offset = 0;
            while offset < cap {
                let page =
                    sources::list_conversations(&self.db, org_id, BACKFILL_BATCH.min(cap - offset), offset).await?;
                if page.is_empty() {
                    break;
                }
                offset += page.len() as i64;
                for conversation in &page {
                    result.conversations_processed += 1;
                    match self.ingest_conversation(conversation, true).await {
                        Ok(Some(_)) => result.conversations_logged += 1,
                        Ok(None) => result.conversations_skipped += 1,
                        Err(e) => {
                            result.conversations_skipped += 1;
                            warn!(org_id, conversation_id = %conversation.id, error = %e, "Conversation backfill failed");
                        }
                    }
                }
            }
        }

        if kinds.notes {
            let mut offset = 0;
            while offset < cap {
                let page = notes::list_org_notes(&self.db, org_id, BACKFILL_BATCH.min(cap - offset), offset).await?;
                if page.is_empty() {
                    break;
                }
                offset += page.len() as i64;
                for note in &page {
                    if let Err(e) = self.record_note_activity(note, ChangeOperation::Insert).await {
                        warn!(org_id, note_id = %note.id, error = %e, "Note backfill failed");
                    }
                    result.notes_processed += 1;
                }
            }
        }

        info!(
            org_id,
            orders = result.orders_processed,
            conversations = result.conversations_processed,
            logged = result.conversations_logged,
            notes = result.notes_processed,
            "Activity backfill finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::activities;
    use crm_common::config::EngineSettings;
    use crm_common::db::init_memory_database;
    use crm_common::models::{ConversationRecord, OrderRecord};
    use crm_common::time::{now_ms, MS_PER_DAY};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_kinds_from_domains() {
        assert_eq!(BackfillKinds::from_domains(&[]), BackfillKinds::default());
        let only_notes = BackfillKinds::from_domains(&[ActivityDomain::Note]);
        assert!(only_notes.notes && !only_notes.orders && !only_notes.conversations);
    }

    #[tokio::test]
    async fn test_two_passes_match_one() {
        let pool = init_memory_database().await.unwrap();
        let svc = CustomerService::new(pool.clone(), Arc::new(EngineSettings::default()), None);
        let base = now_ms() - 10 * MS_PER_DAY;

        for (i, status) in [(1, 1), (2, 1), (3, 6)] {
            let order = OrderRecord::from_document(
                "org",
                json!({"id": format!("o{i}"), "customer_id": "c1", "total_price": 100_000 * i,
                       "inserted_at": base + i * MS_PER_DAY, "status": status}),
            )
            .unwrap();
            sources::save_order(&pool, &order).await.unwrap();
        }
        let conv = ConversationRecord::from_document(
            "org",
            json!({"id": "cv1", "customer_id": "c1", "inserted_at": base}),
            base,
        )
        .unwrap();
        sources::save_conversation(&pool, &conv).await.unwrap();

        let first = svc.backfill_activity("org", 0, BackfillKinds::default()).await.unwrap();
        assert_eq!(first.orders_processed, 2);
        assert_eq!(first.conversations_processed, 1);
        let after_first = activities::count_activities(&pool, "org", "c1", None).await.unwrap();

        let second = svc.backfill_activity("org", 0, BackfillKinds::default()).await.unwrap();
        assert_eq!(second.conversations_logged, 0);
        assert_eq!(second.conversations_skipped, 1);
        let after_second = activities::count_activities(&pool, "org", "c1", None).await.unwrap();
        assert_eq!(after_first, after_second);
    }
}
