//! Order and conversation touchpoints
//!
//! Each touchpoint resolves (or creates) its customer, folds any profile data
//! it carries into the customer, then records a snapshot-gated activity whose
//! metrics are computed as of the touchpoint's own time.

use super::{ActivityDraft, CustomerService, RecordMode};
use crm_common::models::activity::{
    CONVERSATION_STARTED, ORDER_CANCELLED, ORDER_COMPLETED, ORDER_CREATED,
};
use crm_common::models::{
    ActivityRecord, ChangeOperation, ConversationRecord, OrderRecord, Source, SourceRef,
    UnifiedCustomer,
};
use crm_common::time::now_ms;
use crm_common::Result;
use crate::db::sources;
use serde_json::json;
use tracing::debug;

impl CustomerService {
    /// Record the activity for an order change
    ///
    /// With `skip_if_exists` an order already recorded under the same activity
    /// type is left alone (backfill). Returns the stored activity, or `None`
    /// when nothing changed or the order carries no customer.
    pub async fn ingest_order(
        &self,
        order: &OrderRecord,
        operation: ChangeOperation,
        skip_if_exists: bool,
    ) -> Result<Option<ActivityRecord>> {
        if operation == ChangeOperation::Delete {
            return Ok(None);
        }
        let Some(customer_id) = order.customer_id() else {
            debug!(order_id = %order.id, "Order has no customer, skipping");
            return Ok(None);
        };

        let customer = match self.find_customer(&order.org_id, &customer_id).await? {
            Some(c) => c,
            None => match sources::load_pos_customer(&self.db, &order.org_id, &customer_id).await? {
                Some(pos) => self.merge_from_pos_customer(&pos).await?,
                None => {
                    self.upsert_minimal(&order.org_id, Source::Pos, &customer_id, order.profile())
                        .await?
                }
            },
        };
        let customer = self.absorb_touchpoint_profile(customer, &order.profile(), skip_if_exists).await?;

        let activity_type = if order.is_cancelled() {
            ORDER_CANCELLED
        } else if operation == ChangeOperation::Update {
            ORDER_COMPLETED
        } else {
            ORDER_CREATED
        };
        let order_at = order.order_at().unwrap_or_else(now_ms);
        let event_metrics = self.metrics_for(&customer, order_at).await?;

        let (label, icon) = match activity_type {
            ORDER_CANCELLED => ("Order cancelled", "cancel"),
            ORDER_COMPLETED => ("Order completed", "check_circle"),
            _ => ("Order placed", "shopping_cart"),
        };
        let bag = order.bag();
        let subtext = format!("{} · {} item(s)", format_amount(order.amount()), order.item_count());
        let draft = ActivityDraft::new(&customer, activity_type, Source::Pos.as_str(), order_at)
            .source_ref(SourceRef::new("orderId", &order.id))
            .display(label, icon, subtext)
            .meta("channel", order.channel_label())
            .meta("amount", order.amount())
            .meta("status", order.status())
            .meta("statusName", order.status_name())
            .meta("pageId", order.page_id())
            .meta("itemCount", order.item_count())
            .meta("orderSource", order.order_source().as_str())
            .meta("adId", bag.text("ad_id"))
            .meta("postId", bag.text("post_id"))
            .meta("itemSkus", json!(order.item_skus()));

        self.recorder
            .record_change(draft, &customer, &event_metrics, event_mode(skip_if_exists))
            .await
    }

    /// Record `conversation_started` for a conversation
    pub async fn ingest_conversation(
        &self,
        conversation: &ConversationRecord,
        skip_if_exists: bool,
    ) -> Result<Option<ActivityRecord>> {
        let org_id = conversation.org_id.as_str();
        let Some(customer_id) = conversation.primary_customer_id() else {
            debug!(conversation_id = %conversation.id, "Conversation has no customer, skipping");
            return Ok(None);
        };

        let customer = match self.find_customer(org_id, &customer_id).await? {
            Some(c) => c,
            None => self.customer_from_raw(org_id, &customer_id, conversation).await?,
        };
        let customer = self
            .absorb_touchpoint_profile(customer, &conversation.profile(), skip_if_exists)
            .await?;

        self.record_conversation(&customer, conversation, event_mode(skip_if_exists))
            .await
    }

    async fn customer_from_raw(
        &self,
        org_id: &str,
        customer_id: &str,
        conversation: &ConversationRecord,
    ) -> Result<UnifiedCustomer> {
        if let Some(m) = sources::load_messaging_customer(&self.db, org_id, customer_id).await? {
            return self.merge_from_messaging_customer(&m).await;
        }
        if let Some(p) = sources::load_pos_customer(&self.db, org_id, customer_id).await? {
            return self.merge_from_pos_customer(&p).await;
        }
        self.upsert_minimal(org_id, Source::Messaging, customer_id, conversation.profile())
            .await
    }

    /// Snapshot-gated `conversation_started` for an already resolved customer
    pub(crate) async fn record_conversation(
        &self,
        customer: &UnifiedCustomer,
        conversation: &ConversationRecord,
        mode: RecordMode,
    ) -> Result<Option<ActivityRecord>> {
        let started_at = conversation.started_at();
        let event_metrics = self.metrics_for(customer, started_at).await?;

        let kind = conversation.kind();
        let label = if kind == "COMMENT" { "Commented on a post" } else { "Started a conversation" };
        let subtext = if conversation.from_ads() {
            "From ads".to_string()
        } else {
            conversation.tags().join(", ")
        };
        let draft = ActivityDraft::new(customer, CONVERSATION_STARTED, Source::Messaging.as_str(), started_at)
            .source_ref(SourceRef::new("conversationId", &conversation.id))
            .display(label, "chat", subtext)
            .meta("conversationType", kind)
            .meta("pageId", conversation.page_id())
            .meta("messageCount", conversation.message_count())
            .meta("fromAds", conversation.from_ads())
            .meta("tags", json!(conversation.tags()));

        self.recorder
            .record_change(draft, customer, &event_metrics, mode)
            .await
    }

    /// Fill profile gaps from a touchpoint and persist if anything was added
    ///
    /// Live events also refresh the stored metrics; backfill only writes when
    /// the profile actually gained data.
    async fn absorb_touchpoint_profile(
        &self,
        mut customer: UnifiedCustomer,
        touchpoint: &crm_common::models::CustomerProfile,
        backfill: bool,
    ) -> Result<UnifiedCustomer> {
        let before = customer.profile.clone();
        customer.profile.fill_gaps_from(touchpoint);
        if backfill && customer.profile == before {
            return Ok(customer);
        }

        let now = now_ms();
        customer.metrics = self.metrics_for(&customer, now).await?;
        customer.updated_at = now;
        self.save(&customer).await?;
        self.announce_recalculated(&customer);
        Ok(customer)
    }
}

fn event_mode(skip_if_exists: bool) -> RecordMode {
    if skip_if_exists {
        RecordMode::EventIfMissing
    } else {
        RecordMode::Event
    }
}

/// `1234567.8` -> `1,234,568`
fn format_amount(amount: f64) -> String {
    let whole = amount.round() as i64;
    let digits = whole.abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if whole < 0 {
        out.insert(0, '-');
    }
    out
}
