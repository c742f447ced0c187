//! End-to-end engine behavior over an in-memory store
//!
//! Raw records are written the way the source endpoint writes them, then
//! driven through the service operations the orchestrator calls.

use std::sync::Arc;

use crm_common::config::EngineSettings;
use crm_common::db::init_memory_database;
use crm_common::models::activity::CUSTOMER_UPDATED;
use crm_common::models::{
    Channel, ChangeOperation, ConversationRecord, JourneyStage, LifecycleStage, LoyaltyStage,
    MessagingCustomerRecord, OrderRecord, PosCustomerRecord, UnifiedCustomer, ValueTier,
};
use crm_common::time::{now_ms, MS_PER_DAY};
use crm_engine::db::{activities, customers, sources};
use crm_engine::services::backfill::BackfillKinds;
use crm_engine::CustomerService;
use serde_json::{json, Value};
use sqlx::SqlitePool;

const ORG: &str = "org-1";

async fn setup() -> (CustomerService, SqlitePool) {
    let pool = init_memory_database().await.unwrap();
    let service = CustomerService::new(pool.clone(), Arc::new(EngineSettings::default()), None);
    (service, pool)
}

async fn store_pos_customer(pool: &SqlitePool, doc: Value) -> PosCustomerRecord {
    let record = PosCustomerRecord::from_document(ORG, doc).unwrap();
    sources::save_pos_customer(pool, &record, now_ms()).await.unwrap();
    record
}

async fn store_messaging_customer(pool: &SqlitePool, doc: Value) -> MessagingCustomerRecord {
    let record = MessagingCustomerRecord::from_document(ORG, doc).unwrap();
    sources::save_messaging_customer(pool, &record, now_ms()).await.unwrap();
    record
}

async fn store_order(pool: &SqlitePool, id: &str, customer: &str, amount: i64, days_ago: i64) -> OrderRecord {
    let order = OrderRecord::from_document(
        ORG,
        json!({
            "id": id,
            "customer_id": customer,
            "total_price": amount,
            "status": 1,
            "inserted_at": now_ms() - days_ago * MS_PER_DAY,
        }),
    )
    .unwrap();
    sources::save_order(pool, &order).await.unwrap();
    order
}

async fn load(pool: &SqlitePool, id: &str) -> UnifiedCustomer {
    customers::load_customer(pool, ORG, id).await.unwrap().unwrap()
}

// ===== Identity =====

#[tokio::test]
async fn test_merge_converges_regardless_of_order() {
    let pos_doc = json!({"id": "p-100", "name": "Tran Mai", "phone_numbers": ["0901 234 567"]});
    let msg_doc = json!({"id": "m-200", "name": "Mai T.", "phone_numbers": ["+84901234567"]});

    let (pos_first, pool_a) = setup().await;
    let pos = store_pos_customer(&pool_a, pos_doc.clone()).await;
    let msg = store_messaging_customer(&pool_a, msg_doc.clone()).await;
    pos_first.merge_from_pos_customer(&pos).await.unwrap();
    let a = pos_first.merge_from_messaging_customer(&msg).await.unwrap();

    let (msg_first, pool_b) = setup().await;
    let pos = store_pos_customer(&pool_b, pos_doc).await;
    let msg = store_messaging_customer(&pool_b, msg_doc).await;
    msg_first.merge_from_messaging_customer(&msg).await.unwrap();
    let b = msg_first.merge_from_pos_customer(&pos).await.unwrap();

    assert_eq!(a.unified_id, b.unified_id);
    assert_eq!(a.source_ids, b.source_ids);
    assert_eq!(a.profile.name, "Tran Mai");
    assert_eq!(b.profile.name, "Tran Mai");
}

#[tokio::test]
async fn test_repeated_merge_is_idempotent() {
    let (service, pool) = setup().await;
    let pos = store_pos_customer(&pool, json!({"id": "p-1", "name": "An", "phone": "0912000111"})).await;
    store_order(&pool, "o-1", "p-1", 3_000_000, 3).await;

    let first = service.merge_from_pos_customer(&pos).await.unwrap();
    let second = service.merge_from_pos_customer(&pos).await.unwrap();

    assert_eq!(first.unified_id, second.unified_id);
    assert_eq!(first.source_ids, second.source_ids);
    assert_eq!(first.profile, second.profile);
    assert_eq!(first.metrics.classification, second.metrics.classification);
    assert_eq!(customers::count_customers(&pool, ORG).await.unwrap(), 1);
}

// ===== Activity history =====

#[tokio::test]
async fn test_unchanged_recalculation_records_once() {
    let (service, pool) = setup().await;
    let customer = UnifiedCustomer::standalone(ORG, crm_common::models::Source::Pos, "p-9", now_ms());
    customers::save_customer(&pool, &customer).await.unwrap();
    store_order(&pool, "o-9", "p-9", 2_000_000, 12).await;

    service.recalculate_customer(ORG, "p-9").await.unwrap();
    service.recalculate_customer(ORG, "p-9").await.unwrap();

    let updates = activities::count_activities(&pool, ORG, "p-9", Some(CUSTOMER_UPDATED))
        .await
        .unwrap();
    assert_eq!(updates, 1);
}

#[tokio::test]
async fn test_backfill_twice_equals_once() {
    let (service, pool) = setup().await;
    store_order(&pool, "o-1", "c-1", 1_500_000, 40).await;
    store_order(&pool, "o-2", "c-1", 2_500_000, 10).await;
    let conversation = ConversationRecord::from_document(
        ORG,
        json!({"id": "cv-1", "customer_id": "c-1", "inserted_at": now_ms() - 50 * MS_PER_DAY}),
        now_ms(),
    )
    .unwrap();
    sources::save_conversation(&pool, &conversation).await.unwrap();

    service.backfill_activity(ORG, 0, BackfillKinds::default()).await.unwrap();
    let once = activities::count_activities(&pool, ORG, "c-1", None).await.unwrap();
    service.backfill_activity(ORG, 0, BackfillKinds::default()).await.unwrap();
    let twice = activities::count_activities(&pool, ORG, "c-1", None).await.unwrap();

    assert!(once >= 3);
    assert_eq!(once, twice);
}

// ===== Classification scenarios =====

#[tokio::test]
async fn test_single_large_order_is_first_purchase() {
    let (service, pool) = setup().await;
    let order = store_order(&pool, "o-a", "c-a", 25_000_000, 5).await;
    service.ingest_order(&order, ChangeOperation::Insert, false).await.unwrap();

    let c = load(&pool, "c-a").await.metrics.classification;
    assert_eq!(c.journey_stage, JourneyStage::First);
    assert_eq!(c.loyalty_stage, LoyaltyStage::OneTime);
    assert_eq!(c.value_tier, ValueTier::High);
    assert_eq!(c.lifecycle_stage, LifecycleStage::Active);
}

#[tokio::test]
async fn test_second_order_crossing_vip_threshold() {
    let (service, pool) = setup().await;
    let first = store_order(&pool, "o-a", "c-b", 25_000_000, 5).await;
    service.ingest_order(&first, ChangeOperation::Insert, false).await.unwrap();
    let second = store_order(&pool, "o-b", "c-b", 30_000_000, 1).await;
    let activity = service.ingest_order(&second, ChangeOperation::Insert, false).await.unwrap();

    let customer = load(&pool, "c-b").await;
    assert_eq!(customer.metrics.orders.order_count, 2);
    assert_eq!(customer.metrics.classification.value_tier, ValueTier::Vip);
    assert_eq!(customer.metrics.classification.journey_stage, JourneyStage::Vip);

    let activity = activity.expect("order activity recorded");
    let changes = activity.snapshot_changes();
    assert!(changes.iter().any(|c| c.contains("valueTier") || c.contains("value_tier")));
}

#[tokio::test]
async fn test_messaging_only_customer_is_engaged() {
    let (service, pool) = setup().await;
    let msg = store_messaging_customer(&pool, json!({"id": "m-c", "name": "Khoa"})).await;
    service.merge_from_messaging_customer(&msg).await.unwrap();

    let conversation = ConversationRecord::from_document(
        ORG,
        json!({"id": "cv-c", "customer_id": "m-c", "type": "INBOX", "inserted_at": now_ms() - MS_PER_DAY}),
        now_ms(),
    )
    .unwrap();
    sources::save_conversation(&pool, &conversation).await.unwrap();
    service.ingest_conversation(&conversation, false).await.unwrap();

    let c = load(&pool, "m-c").await.metrics.classification;
    assert_eq!(c.journey_stage, JourneyStage::Engaged);
    assert_eq!(c.channel, Channel::Unset);
    assert_eq!(c.loyalty_stage, LoyaltyStage::Unset);
    assert_eq!(c.lifecycle_stage, LifecycleStage::NeverPurchased);
}

#[tokio::test]
async fn test_long_silent_customer_is_dead() {
    let (service, pool) = setup().await;
    let order = store_order(&pool, "o-d", "c-d", 4_000_000, 200).await;
    service.ingest_order(&order, ChangeOperation::Insert, false).await.unwrap();

    let c = load(&pool, "c-d").await.metrics.classification;
    assert_eq!(c.lifecycle_stage, LifecycleStage::Dead);
    assert_eq!(c.journey_stage, JourneyStage::Inactive);
}
