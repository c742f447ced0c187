//! Engine services
//!
//! [`CustomerService`] owns the write side: identity resolution and merge,
//! metrics aggregation, recalculation, touchpoint ingestion and backfill.
//! [`Dashboard`] is the read-only aggregation side. The pure building blocks
//! (aggregators, classifier, snapshot diff) live in their own modules.

pub mod activity;
pub mod backfill;
pub mod classification;
pub mod conversation_metrics;
pub mod dashboard;
pub mod identity;
pub mod ingest;
pub mod notes;
pub mod order_metrics;
pub mod profile;
pub mod recalculate;
pub mod refresh;
pub mod snapshot;

pub use activity::{ActivityDraft, ActivityRecorder, RecordMode};
pub use dashboard::Dashboard;

use crate::db::{activities, customers, sources};
use crate::utils::retry_on_lock;
use classification::classify;
use conversation_metrics::aggregate_conversations;
use crm_common::config::EngineSettings;
use crm_common::events::{CrmEvent, EventBus};
use crm_common::models::activity::{CUSTOMER_CREATED, CUSTOMER_UPDATED};
use crm_common::models::{CustomerMetrics, SourceRef, UnifiedCustomer};
use crm_common::phone::all_variants;
use crm_common::time::now_ms;
use crm_common::Result;
use order_metrics::aggregate_orders;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Write-side engine entry point
#[derive(Clone)]
pub struct CustomerService {
    pub(crate) db: SqlitePool,
    pub(crate) settings: Arc<EngineSettings>,
    pub(crate) recorder: ActivityRecorder,
    event_bus: Option<EventBus>,
}

impl CustomerService {
    pub fn new(db: SqlitePool, settings: Arc<EngineSettings>, event_bus: Option<EventBus>) -> Self {
        Self {
            recorder: ActivityRecorder::new(db.clone(), event_bus.clone()),
            db,
            settings,
            event_bus,
        }
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        &self.recorder
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Aggregate and classify everything filed under `ids` or billed to `phones`
    pub async fn compute_metrics(
        &self,
        org_id: &str,
        ids: &[String],
        phones: &[String],
        as_of: i64,
    ) -> Result<CustomerMetrics> {
        let limit = self.settings.aggregation_scan_limit;
        let variants = all_variants(phones);
        let orders = sources::fetch_orders_for(&self.db, org_id, ids, &variants, as_of, limit).await?;
        let conversations = sources::fetch_conversations_for(&self.db, org_id, ids, as_of, limit).await?;

        let order_metrics = aggregate_orders(&orders, as_of);
        let conversation_metrics = aggregate_conversations(&conversations, as_of);
        let classification = classify(&order_metrics, &conversation_metrics, as_of);

        Ok(CustomerMetrics {
            orders: order_metrics,
            conversations: conversation_metrics,
            classification,
            computed_at: as_of,
        })
    }

    /// Metrics for a stored customer's known ids and phones
    pub async fn metrics_for(&self, customer: &UnifiedCustomer, as_of: i64) -> Result<CustomerMetrics> {
        self.compute_metrics(
            &customer.org_id,
            &customer.known_ids(),
            &customer.profile.phone_numbers,
            as_of,
        )
        .await
    }

    /// Upsert with lock retry; returns true when the row was new
    pub(crate) async fn save(&self, customer: &UnifiedCustomer) -> Result<bool> {
        retry_on_lock("save customer", self.settings.db_max_lock_wait_ms, || {
            customers::save_customer(&self.db, customer)
        })
        .await
    }

    /// Recompute current metrics, persist, and record the creation/update entry
    ///
    /// `customer_updated` is throttled per customer and, like every
    /// snapshot-gated entry, only written when the snapshot changed.
    pub(crate) async fn persist_merged(
        &self,
        mut customer: UnifiedCustomer,
        source: &str,
        native_id: &str,
    ) -> Result<(UnifiedCustomer, bool)> {
        let now = now_ms();
        customer.metrics = self.metrics_for(&customer, now).await?;
        customer.updated_at = now;
        let created = self.save(&customer).await?;

        let activity_type = if created { CUSTOMER_CREATED } else { CUSTOMER_UPDATED };
        if created || !self.update_throttled(&customer, now).await? {
            let (label, icon) = if created {
                ("Customer created", "person_add")
            } else {
                ("Customer updated", "edit")
            };
            let draft = ActivityDraft::new(&customer, activity_type, source, now)
                .source_ref(SourceRef::new("customerId", native_id))
                .display(label, icon, customer.profile.name.clone())
                .meta("mergeMethod", customer.merge_method.as_str());
            self.recorder
                .record_change(draft, &customer, &customer.metrics, RecordMode::Change)
                .await?;
        }

        self.announce_recalculated(&customer);
        Ok((customer, created))
    }

    async fn update_throttled(&self, customer: &UnifiedCustomer, now: i64) -> Result<bool> {
        let window = self.settings.customer_updated_throttle_hours * MS_PER_HOUR;
        let last = activities::last_created_at(
            &self.db,
            &customer.org_id,
            &customer.unified_id,
            CUSTOMER_UPDATED,
        )
        .await?;
        let throttled = last.is_some_and(|t| now - t < window);
        if throttled {
            debug!(unified_id = %customer.unified_id, "customer_updated throttled");
        }
        Ok(throttled)
    }

    pub(crate) fn announce_recalculated(&self, customer: &UnifiedCustomer) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(CrmEvent::CustomerRecalculated {
                unified_id: customer.unified_id.clone(),
                org_id: customer.org_id.clone(),
                classification: customer.metrics.classification,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}
