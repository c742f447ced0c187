//! Unified customer, metrics and classification labels

use super::profile::CustomerProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

label_enum!(
    /// Layer 1: where the customer sits on the purchase journey
    JourneyStage {
        Visitor => "visitor",
        Engaged => "engaged",
        First => "first",
        Repeat => "repeat",
        Vip => "vip",
        Inactive => "inactive",
    }
);

label_enum!(
    /// Lifetime spend tier
    ValueTier {
        Vip => "vip",
        High => "high",
        Medium => "medium",
        Low => "low",
        New => "new",
    }
);

label_enum!(
    /// Recency of the last purchase
    LifecycleStage {
        Active => "active",
        Cooling => "cooling",
        Inactive => "inactive",
        Dead => "dead",
        NeverPurchased => "never_purchased",
    }
);

label_enum!(
    /// Where purchases happen; `Unset` means no purchases yet
    Channel {
        Online => "online",
        Offline => "offline",
        Omnichannel => "omnichannel",
        Unset => "",
    }
);

label_enum!(
    LoyaltyStage {
        Core => "core",
        Repeat => "repeat",
        OneTime => "one_time",
        Unset => "",
    }
);

label_enum!(
    /// Revenue trend from trailing 30-day vs 90-day revenue
    MomentumStage {
        Rising => "rising",
        Stable => "stable",
        Declining => "declining",
        Lost => "lost",
        Unset => "",
    }
);

label_enum!(
    /// Upstream system a record came from
    Source {
        Pos => "pos",
        Messaging => "messaging",
    }
);

label_enum!(
    /// How a unified customer's identity was established
    MergeMethod {
        SingleSource => "single_source",
        ExplicitLink => "explicit_link",
        Phone => "phone",
        CustomerId => "customer_id",
    }
);

label_enum!(
    /// Dashboard axes, named by their query-string key
    Axis {
        Journey => "journey",
        Channel => "channel",
        Value => "value",
        Lifecycle => "lifecycle",
        Loyalty => "loyalty",
        Momentum => "momentum",
    }
);

impl Axis {
    /// Denormalized column holding this axis on the `customers` table
    pub fn column(&self) -> &'static str {
        match self {
            Axis::Journey => "journey_stage",
            Axis::Channel => "channel",
            Axis::Value => "value_tier",
            Axis::Lifecycle => "lifecycle_stage",
            Axis::Loyalty => "loyalty_stage",
            Axis::Momentum => "momentum_stage",
        }
    }

    /// Fixed label order used for funnel breakdowns and matrix rows/columns
    pub fn labels(&self) -> Vec<&'static str> {
        match self {
            Axis::Journey => JourneyStage::ALL.iter().map(|l| l.as_str()).collect(),
            Axis::Channel => Channel::ALL.iter().map(|l| l.as_str()).collect(),
            Axis::Value => ValueTier::ALL.iter().map(|l| l.as_str()).collect(),
            Axis::Lifecycle => LifecycleStage::ALL.iter().map(|l| l.as_str()).collect(),
            Axis::Loyalty => LoyaltyStage::ALL.iter().map(|l| l.as_str()).collect(),
            Axis::Momentum => MomentumStage::ALL.iter().map(|l| l.as_str()).collect(),
        }
    }

    /// Label this axis assigns to a classification
    pub fn label_of(&self, c: &Classification) -> &'static str {
        match self {
            Axis::Journey => c.journey_stage.as_str(),
            Axis::Channel => c.channel.as_str(),
            Axis::Value => c.value_tier.as_str(),
            Axis::Lifecycle => c.lifecycle_stage.as_str(),
            Axis::Loyalty => c.loyalty_stage.as_str(),
            Axis::Momentum => c.momentum_stage.as_str(),
        }
    }
}

/// Native ids in each upstream system; once set, never unset or replaced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging: Option<String>,
}

impl SourceIds {
    pub fn get(&self, source: Source) -> Option<&str> {
        match source {
            Source::Pos => self.pos.as_deref(),
            Source::Messaging => self.messaging.as_deref(),
        }
    }

    /// Record a link for `source` unless one is already held
    ///
    /// Returns true when the link was newly added.
    pub fn link(&mut self, source: Source, id: &str) -> bool {
        let slot = match source {
            Source::Pos => &mut self.pos,
            Source::Messaging => &mut self.messaging,
        };
        if slot.is_some() || id.is_empty() {
            return false;
        }
        *slot = Some(id.to_string());
        true
    }

    pub fn is_fully_linked(&self) -> bool {
        self.pos.is_some() && self.messaging.is_some()
    }
}

/// Order-side aggregates
///
/// Timestamps are epoch milliseconds; 0 means "never".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderMetrics {
    pub total_spent: f64,
    pub order_count: i64,
    pub cancelled_order_count: i64,
    pub avg_order_value: f64,
    pub last_order_at: i64,
    pub second_last_order_at: i64,
    pub revenue_last_30d: f64,
    pub revenue_last_90d: f64,
    pub orders_last_30d: i64,
    pub orders_last_90d: i64,
    pub order_count_online: i64,
    pub order_count_offline: i64,
    pub first_order_channel: String,
    pub last_order_channel: String,
    pub orders_from_ads: i64,
    pub orders_from_organic: i64,
    pub orders_from_direct: i64,
    pub owned_sku_quantities: BTreeMap<String, i64>,
}

/// Conversation-side aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationMetrics {
    pub conversation_count: i64,
    pub conversation_count_by_inbox: i64,
    pub conversation_count_by_comment: i64,
    pub total_messages: i64,
    pub first_conversation_at: i64,
    pub last_conversation_at: i64,
    pub last_message_from_customer: bool,
    pub conversation_from_ads: bool,
    pub conversation_tags: Vec<String>,
    pub has_conversation: bool,
}

/// Two-layer taxonomy: journey stage plus five segmentation axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub journey_stage: JourneyStage,
    pub value_tier: ValueTier,
    pub lifecycle_stage: LifecycleStage,
    pub channel: Channel,
    pub loyalty_stage: LoyaltyStage,
    pub momentum_stage: MomentumStage,
    /// Days from the reference time to the last order, -1 without orders
    pub days_since_last_order: i64,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            journey_stage: JourneyStage::Visitor,
            value_tier: ValueTier::New,
            lifecycle_stage: LifecycleStage::NeverPurchased,
            channel: Channel::Unset,
            loyalty_stage: LoyaltyStage::Unset,
            momentum_stage: MomentumStage::Unset,
            days_since_last_order: -1,
        }
    }
}

/// Latest computed aggregation and classification for one customer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMetrics {
    #[serde(flatten)]
    pub orders: OrderMetrics,
    #[serde(flatten)]
    pub conversations: ConversationMetrics,
    #[serde(default)]
    pub classification: Classification,
    /// Reference time the metrics were computed against
    #[serde(default)]
    pub computed_at: i64,
}

impl CustomerMetrics {
    pub fn total_spent(&self) -> f64 {
        self.orders.total_spent
    }

    pub fn order_count(&self) -> i64 {
        self.orders.order_count
    }

    pub fn last_order_at(&self) -> i64 {
        self.orders.last_order_at
    }

    pub fn has_conversation(&self) -> bool {
        self.conversations.has_conversation
    }
}

/// Deduplicated customer merged from the POS and messaging systems
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedCustomer {
    pub unified_id: String,
    pub org_id: String,
    pub source_ids: SourceIds,
    pub primary_source: Source,
    pub profile: CustomerProfile,
    pub metrics: CustomerMetrics,
    pub merge_method: MergeMethod,
    pub merged_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UnifiedCustomer {
    /// Fresh customer standing alone under its own native id
    pub fn standalone(org_id: &str, source: Source, native_id: &str, now_ms: i64) -> Self {
        let mut source_ids = SourceIds::default();
        source_ids.link(source, native_id);
        Self {
            unified_id: native_id.to_string(),
            org_id: org_id.to_string(),
            source_ids,
            primary_source: source,
            profile: CustomerProfile::default(),
            metrics: CustomerMetrics::default(),
            merge_method: MergeMethod::SingleSource,
            merged_at: now_ms,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Every id under which this customer's raw records may be filed
    pub fn known_ids(&self) -> Vec<String> {
        let mut ids = vec![self.unified_id.clone()];
        for id in [&self.source_ids.pos, &self.source_ids.messaging].into_iter().flatten() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_str() {
        for axis in Axis::ALL {
            for label in axis.labels() {
                let parsed = match axis {
                    Axis::Journey => label.parse::<JourneyStage>().map(|l| l.as_str()),
                    Axis::Channel => label.parse::<Channel>().map(|l| l.as_str()),
                    Axis::Value => label.parse::<ValueTier>().map(|l| l.as_str()),
                    Axis::Lifecycle => label.parse::<LifecycleStage>().map(|l| l.as_str()),
                    Axis::Loyalty => label.parse::<LoyaltyStage>().map(|l| l.as_str()),
                    Axis::Momentum => label.parse::<MomentumStage>().map(|l| l.as_str()),
                };
                assert_eq!(parsed.ok(), Some(label));
            }
        }
        assert!("gold".parse::<ValueTier>().is_err());
    }

    #[test]
    fn test_unset_labels_serialize_as_empty_string() {
        let json = serde_json::to_string(&Channel::Unset).ok();
        assert_eq!(json.as_deref(), Some("\"\""));
        let back: LoyaltyStage = serde_json::from_str("\"\"").unwrap();
        assert_eq!(back, LoyaltyStage::Unset);
    }

    #[test]
    fn test_source_ids_are_append_only() {
        let mut ids = SourceIds::default();
        assert!(ids.link(Source::Pos, "p1"));
        assert!(!ids.link(Source::Pos, "p2"));
        assert_eq!(ids.pos.as_deref(), Some("p1"));
        assert!(!ids.link(Source::Messaging, ""));
        assert!(ids.link(Source::Messaging, "m1"));
        assert!(ids.is_fully_linked());
    }

    #[test]
    fn test_metrics_serialize_flat_camel_case() {
        let mut metrics = CustomerMetrics::default();
        metrics.orders.total_spent = 10.0;
        metrics.conversations.has_conversation = true;
        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["totalSpent"], 10.0);
        assert_eq!(value["hasConversation"], true);
        assert_eq!(value["classification"]["journeyStage"], "visitor");
        let back: CustomerMetrics = serde_json::from_value(value).unwrap();
        assert_eq!(back, metrics);
    }

    #[test]
    fn test_known_ids_dedup() {
        let mut c = UnifiedCustomer::standalone("org", Source::Pos, "p1", 1);
        c.source_ids.link(Source::Messaging, "m1");
        assert_eq!(c.known_ids(), vec!["p1".to_string(), "m1".to_string()]);
    }
}
