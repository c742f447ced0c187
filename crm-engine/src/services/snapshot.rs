//! Point-in-time customer snapshots and their diff
//!
//! A snapshot is two JSON maps: the profile, and the metrics split into
//! `raw` aggregates, `layer1` (journey) and `layer2` (segmentation axes).
//! Change keys are dotted paths such as `profile.name` or
//! `metrics.layer2.valueTier`.

use crm_common::models::{CustomerMetrics, UnifiedCustomer};
use serde_json::{json, Map, Value};

/// Owned SKU entries kept in a snapshot, highest quantity first
pub const SNAPSHOT_SKU_LIMIT: usize = 50;

const METRIC_LAYERS: [&str; 3] = ["raw", "layer1", "layer2"];

pub fn profile_snapshot(customer: &UnifiedCustomer) -> Map<String, Value> {
    let p = &customer.profile;
    let mut map = Map::new();
    map.insert("name".into(), json!(p.name));
    map.insert("phoneNumbers".into(), json!(p.phone_numbers));
    map.insert("emails".into(), json!(p.emails));
    map.insert("birthday".into(), json!(p.birthday));
    map.insert("gender".into(), json!(p.gender));
    map.insert("livesIn".into(), json!(p.lives_in));
    map.insert("referralCode".into(), json!(p.referral_code));
    map.insert("primarySource".into(), json!(customer.primary_source.as_str()));
    if !p.addresses.is_empty() {
        map.insert("addresses".into(), json!(p.addresses));
    }
    map
}

pub fn metrics_snapshot(metrics: &CustomerMetrics) -> Map<String, Value> {
    let mut raw = Map::new();
    for part in [
        serde_json::to_value(&metrics.orders),
        serde_json::to_value(&metrics.conversations),
    ]
    .into_iter()
    .flatten()
    {
        if let Value::Object(fields) = part {
            raw.extend(fields);
        }
    }

    if metrics.conversations.conversation_tags.is_empty() {
        raw.remove("conversationTags");
    }

    let mut skus: Vec<(&String, &i64)> = metrics.orders.owned_sku_quantities.iter().collect();
    skus.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let top: Map<String, Value> = skus
        .into_iter()
        .take(SNAPSHOT_SKU_LIMIT)
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    raw.insert("ownedSkuQuantities".into(), Value::Object(top));

    let c = &metrics.classification;
    let mut map = Map::new();
    map.insert("raw".into(), Value::Object(raw));
    map.insert(
        "layer1".into(),
        json!({
            "journeyStage": c.journey_stage.as_str(),
            "orderCount": metrics.orders.order_count,
        }),
    );
    map.insert(
        "layer2".into(),
        json!({
            "valueTier": c.value_tier.as_str(),
            "lifecycleStage": c.lifecycle_stage.as_str(),
            "channel": c.channel.as_str(),
            "loyaltyStage": c.loyalty_stage.as_str(),
            "momentumStage": c.momentum_stage.as_str(),
        }),
    );
    map
}

/// Changed field paths between a baseline and a new snapshot
///
/// Without a baseline every non-empty new value counts as a change.
pub fn diff_snapshots(
    old_profile: Option<&Map<String, Value>>,
    old_metrics: Option<&Map<String, Value>>,
    new_profile: &Map<String, Value>,
    new_metrics: &Map<String, Value>,
) -> Vec<String> {
    let mut changes = Vec::new();
    let baseline_exists = old_profile.is_some() || old_metrics.is_some();

    diff_level("profile", old_profile, new_profile, baseline_exists, &mut changes);

    let empty = Map::new();
    for layer in METRIC_LAYERS {
        let new_layer = new_metrics
            .get(layer)
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let old_layer = old_metrics.map(|m| m.get(layer).and_then(Value::as_object).unwrap_or(&empty));
        diff_level(
            &format!("metrics.{layer}"),
            old_layer,
            new_layer,
            baseline_exists,
            &mut changes,
        );
    }
    changes
}

fn diff_level(
    prefix: &str,
    old: Option<&Map<String, Value>>,
    new: &Map<String, Value>,
    baseline_exists: bool,
    changes: &mut Vec<String>,
) {
    match old {
        Some(old) if baseline_exists => {
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) if values_equal(old_value, new_value) => {}
                    _ => changes.push(format!("{prefix}.{key}")),
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    changes.push(format!("{prefix}.{key}"));
                }
            }
        }
        _ => {
            for (key, new_value) in new {
                if !is_empty_value(new_value) {
                    changes.push(format!("{prefix}.{key}"));
                }
            }
        }
    }
}

/// Structural equality with numbers compared as f64
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, l)| y.get(k).is_some_and(|r| values_equal(l, r)))
        }
        _ => a == b,
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
