//! Raw upstream records
//!
//! Each record keeps the upstream document untouched in `data`; everything
//! the engine needs is read through [`ValueBag`] accessors so a malformed or
//! partial payload degrades to "unknown" instead of failing.

use super::profile::CustomerProfile;
use crate::phone::normalize_phone;
use crate::value_bag::ValueBag;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order status the POS system uses for cancelled orders
pub const ORDER_STATUS_CANCELLED: i64 = 6;

label_enum!(
    /// Logical collections upstream writers publish changes for
    SourceCollection {
        PosCustomers => "pos_customers",
        MessagingCustomers => "messaging_customers",
        PosOrders => "pos_orders",
        Conversations => "conversations",
        Notes => "notes",
    }
);

label_enum!(
    ChangeOperation {
        Insert => "insert",
        Update => "update",
        Delete => "delete",
    }
);

label_enum!(
    /// Acquisition path of an order
    OrderSource {
        Ads => "ads",
        Organic => "organic",
        Direct => "direct",
    }
);

fn require_id(data: &Value, collection: SourceCollection) -> Result<String> {
    ValueBag::new(data)
        .text("id")
        .ok_or_else(|| Error::InvalidInput(format!("{} document has no id", collection)))
}

/// Customer record from the POS system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosCustomerRecord {
    pub id: String,
    pub org_id: String,
    pub data: Value,
}

impl PosCustomerRecord {
    pub fn from_document(org_id: &str, data: Value) -> Result<Self> {
        Ok(Self {
            id: require_id(&data, SourceCollection::PosCustomers)?,
            org_id: org_id.to_string(),
            data,
        })
    }

    pub fn bag(&self) -> ValueBag<'_> {
        ValueBag::new(&self.data)
    }

    /// Messaging identity embedded as `fb_id = "<pageId>_<psid>"`
    pub fn explicit_link(&self) -> Option<String> {
        let raw = self.bag().text("fb_id")?;
        let (page, psid) = raw.split_once('_')?;
        (!page.is_empty() && !psid.is_empty()).then(|| format!("{page}_{psid}"))
    }

    pub fn profile(&self) -> CustomerProfile {
        CustomerProfile::from_object(self.bag())
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.bag().first_timestamp(&["updated_at", "inserted_at"])
    }
}

/// Customer record from the messaging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingCustomerRecord {
    pub id: String,
    pub org_id: String,
    pub data: Value,
}

impl MessagingCustomerRecord {
    pub fn from_document(org_id: &str, data: Value) -> Result<Self> {
        Ok(Self {
            id: require_id(&data, SourceCollection::MessagingCustomers)?,
            org_id: org_id.to_string(),
            data,
        })
    }

    pub fn bag(&self) -> ValueBag<'_> {
        ValueBag::new(&self.data)
    }

    pub fn page_id(&self) -> Option<String> {
        self.bag().text("page_id")
    }

    pub fn psid(&self) -> Option<String> {
        self.bag().text("psid")
    }

    /// Key matching a POS customer's `fb_id`
    pub fn explicit_link(&self) -> Option<String> {
        Some(format!("{}_{}", self.page_id()?, self.psid()?))
    }

    pub fn profile(&self) -> CustomerProfile {
        CustomerProfile::extract(self.bag())
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.bag().first_timestamp(&["updated_at", "inserted_at"])
    }
}

/// One line of an order that contributes to owned SKU quantities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: i64,
}

/// Order from the POS system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub org_id: String,
    pub data: Value,
}

impl OrderRecord {
    pub fn from_document(org_id: &str, data: Value) -> Result<Self> {
        Ok(Self {
            id: require_id(&data, SourceCollection::PosOrders)?,
            org_id: org_id.to_string(),
            data,
        })
    }

    pub fn bag(&self) -> ValueBag<'_> {
        ValueBag::new(&self.data)
    }

    pub fn customer_id(&self) -> Option<String> {
        let bag = self.bag();
        bag.child("customer").text("id").or_else(|| bag.text("customer_id"))
    }

    pub fn status(&self) -> i64 {
        self.bag().integer("status").unwrap_or(0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == ORDER_STATUS_CANCELLED
    }

    pub fn status_name(&self) -> String {
        match self.status() {
            0 => "new".into(),
            1 => "confirmed".into(),
            2 => "shipped".into(),
            3 => "delivered".into(),
            4 => "returning".into(),
            5 => "returned".into(),
            6 => "cancelled".into(),
            7 => "deleted".into(),
            8 => "packing".into(),
            9 => "waiting".into(),
            other => format!("status_{other}"),
        }
    }

    /// Normalized bill phone, empty when missing or unusable
    pub fn bill_phone(&self) -> String {
        self.bag()
            .text("bill_phone_number")
            .map(|p| normalize_phone(&p))
            .unwrap_or_default()
    }

    pub fn page_id(&self) -> Option<String> {
        self.bag().text("page_id")
    }

    /// Orders attributed to a messaging page were placed online
    pub fn is_online(&self) -> bool {
        self.page_id().is_some()
    }

    pub fn channel_label(&self) -> &'static str {
        if self.is_online() {
            "online"
        } else {
            "offline"
        }
    }

    pub fn order_at(&self) -> Option<i64> {
        self.bag().first_timestamp(&["inserted_at", "created_at"])
    }

    pub fn amount(&self) -> f64 {
        self.bag()
            .first_number(&["total_price_after_sub_discount", "total_price"])
            .unwrap_or(0.0)
    }

    pub fn order_source(&self) -> OrderSource {
        let bag = self.bag();
        if bag.text("ad_id").is_some() {
            OrderSource::Ads
        } else if bag.text("post_id").is_some() || bag.text("page_id").is_some() {
            OrderSource::Organic
        } else {
            OrderSource::Direct
        }
    }

    fn items(&self) -> Vec<ValueBag<'_>> {
        let bag = self.bag();
        bag.children("items").chain(bag.children("order_items")).collect()
    }

    pub fn item_count(&self) -> usize {
        self.items().len()
    }

    /// Kept quantity per SKU: ordered minus returned, lines at zero dropped
    pub fn lines(&self) -> Vec<OrderLine> {
        self.items()
            .into_iter()
            .filter_map(|item| {
                let sku = item
                    .child("variation_info")
                    .text("display_id")
                    .or_else(|| item.first_text(&["sku", "variation_id"]))?;
                let ordered = item.integer("quantity").unwrap_or(0);
                let returned = item.integer("returned_count").unwrap_or(0)
                    + item.integer("returning_quantity").unwrap_or(0);
                let quantity = (ordered - returned).max(0);
                (quantity > 0).then_some(OrderLine { sku, quantity })
            })
            .collect()
    }

    pub fn item_skus(&self) -> Vec<String> {
        let mut skus: Vec<String> = Vec::new();
        for line in self.lines() {
            if !skus.contains(&line.sku) {
                skus.push(line.sku);
            }
        }
        skus
    }

    pub fn profile(&self) -> CustomerProfile {
        CustomerProfile::extract(self.bag())
    }
}

/// Conversation thread from the messaging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub org_id: String,
    pub data: Value,
    /// Last update time; drives as-of filtering
    pub updated_at: i64,
}

impl ConversationRecord {
    /// Build from an upstream document; `received_at` stands in for a missing update time
    pub fn from_document(org_id: &str, data: Value, received_at: i64) -> Result<Self> {
        let id = require_id(&data, SourceCollection::Conversations)?;
        let updated_at = ValueBag::new(&data)
            .first_timestamp(&["updated_at", "inserted_at"])
            .unwrap_or(received_at);
        Ok(Self {
            id,
            org_id: org_id.to_string(),
            data,
            updated_at,
        })
    }

    pub fn bag(&self) -> ValueBag<'_> {
        ValueBag::new(&self.data)
    }

    /// Every customer id the thread references (numeric ids as text)
    pub fn customer_ids(&self) -> Vec<String> {
        let bag = self.bag();
        let mut ids: Vec<String> = Vec::new();
        let candidates = bag
            .text("customer_id")
            .into_iter()
            .chain(bag.child("customer").text("id"))
            .chain(bag.children("customers").filter_map(|c| c.text("id")));
        for id in candidates {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn primary_customer_id(&self) -> Option<String> {
        self.customer_ids().into_iter().next()
    }

    pub fn page_id(&self) -> Option<String> {
        self.bag().text("page_id")
    }

    /// `INBOX` or `COMMENT`
    pub fn kind(&self) -> &'static str {
        match self.bag().text("type") {
            Some(t) if t.eq_ignore_ascii_case("COMMENT") => "COMMENT",
            _ => "INBOX",
        }
    }

    pub fn message_count(&self) -> i64 {
        self.bag().integer("message_count").unwrap_or(0).max(0)
    }

    pub fn from_ads(&self) -> bool {
        let bag = self.bag();
        bag.has_items("ad_ids") || bag.has_items("ads")
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for entry in self.bag().list("tags") {
            let text = match entry {
                Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                other => ValueBag::new(other).text("text"),
            };
            if let Some(t) = text {
                if !tags.contains(&t) {
                    tags.push(t);
                }
            }
        }
        tags
    }

    /// Whether the customer (not the page) sent the last message
    pub fn last_sent_by_customer(&self) -> bool {
        self.bag()
            .child("last_sent_by")
            .text("email")
            .is_some_and(|e| e.contains("@facebook.com"))
    }

    /// Logical start of the thread, falling back to its last update
    pub fn started_at(&self) -> i64 {
        self.bag()
            .first_timestamp(&["inserted_at", "insertedAt", "created_at", "createdAt"])
            .unwrap_or(self.updated_at)
    }

    pub fn profile(&self) -> CustomerProfile {
        CustomerProfile::extract(self.bag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_id_rejected() {
        let err = OrderRecord::from_document("org", json!({"status": 1}));
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_numeric_ids_become_text() {
        let r = PosCustomerRecord::from_document("org", json!({"id": 1234})).unwrap();
        assert_eq!(r.id, "1234");
    }

    #[test]
    fn test_explicit_link_parsing() {
        let pos = PosCustomerRecord::from_document("o", json!({"id": "p", "fb_id": "page1_psid9"})).unwrap();
        assert_eq!(pos.explicit_link().as_deref(), Some("page1_psid9"));
        let bad = PosCustomerRecord::from_document("o", json!({"id": "p", "fb_id": "nounderscore"})).unwrap();
        assert_eq!(bad.explicit_link(), None);
        let msg = MessagingCustomerRecord::from_document(
            "o",
            json!({"id": "m", "page_id": "page1", "psid": "psid9"}),
        )
        .unwrap();
        assert_eq!(msg.explicit_link(), pos.explicit_link());
    }

    #[test]
    fn test_order_accessors() {
        let order = OrderRecord::from_document(
            "o",
            json!({
                "id": "o1",
                "status": "6",
                "customer": {"id": 77},
                "page_id": "pg",
                "ad_id": "ad",
                "total_price": 100,
                "total_price_after_sub_discount": 90,
                "inserted_at": "2024-03-01T10:00:00",
                "items": [
                    {"variation_info": {"display_id": "SKU-A"}, "quantity": 3, "returned_count": 1},
                    {"sku": "SKU-B", "quantity": 1, "returning_quantity": 1},
                    {"quantity": 5}
                ]
            }),
        )
        .unwrap();
        assert!(order.is_cancelled());
        assert_eq!(order.customer_id().as_deref(), Some("77"));
        assert_eq!(order.amount(), 90.0);
        assert!(order.is_online());
        assert_eq!(order.order_source(), OrderSource::Ads);
        assert_eq!(order.item_count(), 3);
        assert_eq!(order.lines(), vec![OrderLine { sku: "SKU-A".into(), quantity: 2 }]);
        assert!(order.order_at().is_some());
    }

    #[test]
    fn test_order_source_fallbacks() {
        let organic = OrderRecord::from_document("o", json!({"id": "1", "post_id": "p"})).unwrap();
        assert_eq!(organic.order_source(), OrderSource::Organic);
        let direct = OrderRecord::from_document("o", json!({"id": "2"})).unwrap();
        assert_eq!(direct.order_source(), OrderSource::Direct);
        assert_eq!(direct.channel_label(), "offline");
    }

    #[test]
    fn test_conversation_accessors() {
        let conv = ConversationRecord::from_document(
            "o",
            json!({
                "id": "c1",
                "customer_id": "m1",
                "customers": [{"id": 42}, {"id": "m1"}],
                "type": "comment",
                "message_count": 7,
                "ad_ids": ["a"],
                "tags": [{"text": "hot"}, "vip", {"text": "hot"}],
                "last_sent_by": {"email": "123@facebook.com"},
                "inserted_at": "2024-01-01T00:00:00",
                "updated_at": "2024-01-02T00:00:00"
            }),
            0,
        )
        .unwrap();
        assert_eq!(conv.customer_ids(), vec!["m1".to_string(), "42".to_string()]);
        assert_eq!(conv.kind(), "COMMENT");
        assert_eq!(conv.message_count(), 7);
        assert!(conv.from_ads());
        assert_eq!(conv.tags(), vec!["hot".to_string(), "vip".to_string()]);
        assert!(conv.last_sent_by_customer());
        assert!(conv.started_at() < conv.updated_at);
    }

    #[test]
    fn test_conversation_update_time_falls_back_to_receipt() {
        let conv = ConversationRecord::from_document("o", json!({"id": "c"}), 555).unwrap();
        assert_eq!(conv.updated_at, 555);
        assert_eq!(conv.started_at(), 555);
        assert_eq!(conv.kind(), "INBOX");
    }
}
