//! Profile reads

use super::identity::require_id;
use super::{ActivityDraft, CustomerService};
use crate::db::{activities, notes, sources};
use crm_common::models::activity::PROFILE_VIEWED;
use crm_common::models::{
    ActivityDomain, ActivityRecord, ConversationRecord, Note, OrderRecord, SourceRef,
    UnifiedCustomer,
};
use crm_common::phone::all_variants;
use crm_common::time::now_ms;
use crm_common::{Error, Result};
use serde::Serialize;
use tracing::warn;

const RECENT_ORDERS: i64 = 20;
const RECENT_CONVERSATIONS: i64 = 20;
const RECENT_NOTES: i64 = 50;
const RECENT_ACTIVITIES: i64 = 50;

#[derive(Debug, Clone, Default)]
pub struct FullProfileOptions {
    /// Restrict the activity history to these domains (empty = all)
    pub domains: Vec<ActivityDomain>,
    /// Who is looking, recorded on the `profile_viewed` entry
    pub viewer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: String,
    pub order_at: i64,
    pub amount: f64,
    pub status: i64,
    pub status_name: String,
    pub channel: &'static str,
    pub item_count: usize,
    pub item_skus: Vec<String>,
}

impl From<&OrderRecord> for OrderSummary {
    fn from(order: &OrderRecord) -> Self {
        Self {
            id: order.id.clone(),
            order_at: order.order_at().unwrap_or_default(),
            amount: order.amount(),
            status: order.status(),
            status_name: order.status_name(),
            channel: order.channel_label(),
            item_count: order.item_count(),
            item_skus: order.item_skus(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub page_id: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
    pub message_count: i64,
    pub from_ads: bool,
    pub tags: Vec<String>,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(c: &ConversationRecord) -> Self {
        Self {
            id: c.id.clone(),
            kind: c.kind(),
            page_id: c.page_id(),
            started_at: c.started_at(),
            updated_at: c.updated_at,
            message_count: c.message_count(),
            from_ads: c.from_ads(),
            tags: c.tags(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullProfile {
    pub customer: UnifiedCustomer,
    pub recent_orders: Vec<OrderSummary>,
    pub recent_conversations: Vec<ConversationSummary>,
    pub notes: Vec<Note>,
    pub activities: Vec<ActivityRecord>,
}

impl CustomerService {
    /// Customer by any of its ids, merged on demand from raw records
    pub async fn get_profile(&self, org_id: &str, id: &str) -> Result<UnifiedCustomer> {
        let id = require_id(id)?;
        if let Some(customer) = self.find_customer(org_id, id).await? {
            return Ok(customer);
        }
        if let Some(pos) = sources::load_pos_customer(&self.db, org_id, id).await? {
            return self.merge_from_pos_customer(&pos).await;
        }
        if let Some(messaging) = sources::load_messaging_customer(&self.db, org_id, id).await? {
            return self.merge_from_messaging_customer(&messaging).await;
        }
        Err(Error::NotFound(format!("customer {id}")))
    }

    /// Profile with recent touchpoints, notes and history; logs the view
    pub async fn get_full_profile(
        &self,
        org_id: &str,
        id: &str,
        options: &FullProfileOptions,
    ) -> Result<FullProfile> {
        let customer = self.get_profile(org_id, id).await?;
        let ids = customer.known_ids();
        let now = now_ms();

        let orders = sources::fetch_orders_for(
            &self.db,
            org_id,
            &ids,
            &all_variants(&customer.profile.phone_numbers),
            now,
            RECENT_ORDERS,
        )
        .await?;
        let conversations = sources::fetch_conversations_for(&self.db, org_id, &ids, now, RECENT_CONVERSATIONS).await?;
        let notes = notes::list_notes(&self.db, org_id, &customer.unified_id, RECENT_NOTES).await?;
        let activities = activities::list_activities(
            &self.db,
            org_id,
            &customer.unified_id,
            &options.domains,
            RECENT_ACTIVITIES,
        )
        .await?;

        let viewer = options.viewer.as_deref().unwrap_or_default();
        let draft = ActivityDraft::new(&customer, PROFILE_VIEWED, "system", now)
            .source_ref(SourceRef::new("viewedAt", &now.to_string()))
            .display("Profile viewed", "visibility", viewer)
            .actor(viewer, viewer);
        if let Err(e) = self.recorder.log(draft).await {
            warn!(unified_id = %customer.unified_id, error = %e, "Failed to log profile view");
        }

        Ok(FullProfile {
            recent_orders: orders.iter().map(OrderSummary::from).collect(),
            recent_conversations: conversations.iter().map(ConversationSummary::from).collect(),
            notes,
            activities,
            customer,
        })
    }
}
