//! On-demand recalculation
//!
//! Rebuilds a customer from its raw source records, rediscovers phone links
//! the event path may have missed, recomputes metrics and fills in missing
//! conversation activities.

use super::identity::require_id;
use super::{ActivityDraft, CustomerService, RecordMode};
use crate::db::{customers, sources};
use crm_common::models::activity::CUSTOMER_UPDATED;
use crm_common::models::{Axis, CustomerProfile, MergeMethod, Source, SourceRef, UnifiedCustomer};
use crm_common::phone::all_variants;
use crm_common::time::now_ms;
use crm_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateResult {
    pub unified_id: String,
    pub updated_at: i64,
    pub profile_updated: bool,
    pub metrics_updated: bool,
    pub classification_updated: bool,
    pub activities_backfilled: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateAllResult {
    pub total_processed: i64,
    pub total_failed: i64,
    pub failed_ids: Vec<String>,
}

impl CustomerService {
    /// Rebuild profile, links and metrics for one customer
    pub async fn recalculate_customer(&self, org_id: &str, unified_id: &str) -> Result<RecalculateResult> {
        let unified_id = require_id(unified_id)?;
        let before = customers::load_customer(&self.db, org_id, unified_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("customer {unified_id}")))?;
        let mut customer = before.clone();
        let now = now_ms();

        let mut profile = self.source_profile(&customer).await?;
        let ids = self.expand_ids(&mut customer, &mut profile).await?;

        let latest_order = sources::fetch_orders_for(
            &self.db,
            org_id,
            &ids,
            &all_variants(&profile.phone_numbers),
            now,
            1,
        )
        .await?;
        if let Some(order) = latest_order.first() {
            profile.fill_gaps_from(&order.profile());
        }
        let latest_conversation = sources::fetch_conversations_for(&self.db, org_id, &ids, now, 1).await?;
        if let Some(conversation) = latest_conversation.first() {
            profile.fill_gaps_from(&conversation.profile());
        }
        profile.fill_gaps_from(&before.profile);
        customer.profile = profile;

        customer.metrics = self
            .compute_metrics(org_id, &ids, &customer.profile.phone_numbers, now)
            .await?;
        customer.updated_at = now;
        self.save(&customer).await?;

        let draft = ActivityDraft::new(&customer, CUSTOMER_UPDATED, "system", now)
            .source_ref(SourceRef::new("trigger", "recalculate"))
            .display("Customer recalculated", "refresh", customer.profile.name.clone())
            .meta("trigger", "recalculate");
        self.recorder
            .record_change(draft, &customer, &customer.metrics, RecordMode::Change)
            .await?;

        let activities_backfilled = self.backfill_conversations(&customer, &ids, now).await?;
        self.announce_recalculated(&customer);

        Ok(RecalculateResult {
            unified_id: customer.unified_id.clone(),
            updated_at: now,
            profile_updated: before.profile != customer.profile,
            metrics_updated: before.metrics.orders != customer.metrics.orders
                || before.metrics.conversations != customer.metrics.conversations,
            classification_updated: Axis::ALL.iter().any(|axis| {
                axis.label_of(&before.metrics.classification)
                    != axis.label_of(&customer.metrics.classification)
            }),
            activities_backfilled,
        })
    }

    /// Recalculate every customer of an organization (`limit <= 0` means all)
    ///
    /// Failures are counted and the run continues.
    pub async fn recalculate_all(&self, org_id: &str, limit: i64) -> Result<RecalculateAllResult> {
        let total = customers::count_customers(&self.db, org_id).await?;
        let wanted = if limit > 0 { limit.min(total) } else { total };
        let batch = self.settings.refresh_batch_size.max(1);
        let mut result = RecalculateAllResult::default();

        let mut offset = 0;
        while offset < wanted {
            let ids = customers::list_customer_ids(&self.db, org_id, batch.min(wanted - offset), offset).await?;
            if ids.is_empty() {
                break;
            }
            offset += ids.len() as i64;

            for id in ids {
                result.total_processed += 1;
                if let Err(e) = self.recalculate_customer(org_id, &id).await {
                    warn!(org_id, unified_id = %id, error = %e, "Recalculation failed");
                    result.total_failed += 1;
                    if result.failed_ids.len() < self.settings.max_failed_ids {
                        result.failed_ids.push(id);
                    }
                }
            }
        }

        info!(
            org_id,
            processed = result.total_processed,
            failed = result.total_failed,
            "Recalculated customers"
        );
        Ok(result)
    }

    /// Primary source record's profile, gaps filled from the secondary
    async fn source_profile(&self, customer: &UnifiedCustomer) -> Result<CustomerProfile> {
        let org_id = customer.org_id.as_str();
        let pos = match &customer.source_ids.pos {
            Some(id) => sources::load_pos_customer(&self.db, org_id, id).await?.map(|r| r.profile()),
            None => None,
        };
        let messaging = match &customer.source_ids.messaging {
            Some(id) => sources::load_messaging_customer(&self.db, org_id, id)
                .await?
                .map(|r| r.profile()),
            None => None,
        };

        let (primary, secondary) = match customer.primary_source {
            Source::Pos => (pos, messaging),
            Source::Messaging => (messaging, pos),
        };
        let mut profile = primary.unwrap_or_default();
        if let Some(secondary) = secondary {
            profile.fill_gaps_from(&secondary);
        }
        Ok(profile)
    }

    /// Known ids plus phone-matched ids of any source not yet linked
    ///
    /// The first unclaimed match becomes a persisted link.
    async fn expand_ids(
        &self,
        customer: &mut UnifiedCustomer,
        profile: &mut CustomerProfile,
    ) -> Result<Vec<String>> {
        let mut ids = customer.known_ids();
        let mut phones = profile.phone_numbers.clone();
        for phone in &customer.profile.phone_numbers {
            if !phones.contains(phone) {
                phones.push(phone.clone());
            }
        }
        if phones.is_empty() {
            return Ok(ids);
        }

        for source in [Source::Pos, Source::Messaging] {
            if customer.source_ids.get(source).is_some() {
                continue;
            }
            let matches = sources::find_ids_by_phones(&self.db, &customer.org_id, source, &phones).await?;
            for id in matches {
                if ids.contains(&id) {
                    continue;
                }
                if customer.source_ids.get(source).is_none()
                    && !self.link_taken(&customer.org_id, source, &id, &customer.unified_id).await?
                    && customer.source_ids.link(source, &id)
                {
                    customer.merge_method = MergeMethod::Phone;
                    customer.merged_at = now_ms();
                    info!(unified_id = %customer.unified_id, linked = %id, "Discovered {} link by phone", source);
                    let linked = match source {
                        Source::Pos => sources::load_pos_customer(&self.db, &customer.org_id, &id)
                            .await?
                            .map(|r| r.profile()),
                        Source::Messaging => sources::load_messaging_customer(&self.db, &customer.org_id, &id)
                            .await?
                            .map(|r| r.profile()),
                    };
                    if let Some(linked) = linked {
                        profile.fill_gaps_from(&linked);
                    }
                }
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Whether another unified customer already holds this source link
    async fn link_taken(&self, org_id: &str, source: Source, id: &str, unified_id: &str) -> Result<bool> {
        let holder = customers::find_by_source_link(&self.db, org_id, source, id).await?;
        Ok(holder.is_some_and(|c| c.unified_id != unified_id))
    }

    /// Log `conversation_started` for conversations that have none yet
    async fn backfill_conversations(&self, customer: &UnifiedCustomer, ids: &[String], now: i64) -> Result<i64> {
        let limit = self.settings.recalculate_conversation_activity_limit;
        let mut conversations = sources::fetch_conversations_for(&self.db, &customer.org_id, ids, now, limit).await?;
        conversations.sort_by_key(|c| (c.started_at(), c.id.clone()));

        let mut logged = 0;
        for conversation in &conversations {
            if self
                .record_conversation(customer, conversation, RecordMode::EventIfMissing)
                .await?
                .is_some()
            {
                logged += 1;
            }
        }
        if logged > 0 {
            debug!(unified_id = %customer.unified_id, logged, "Backfilled conversation activities");
        }
        Ok(logged)
    }
}
