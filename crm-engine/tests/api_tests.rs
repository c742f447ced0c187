//! HTTP API tests driven through the router with `oneshot`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use crm_common::config::EngineSettings;
use crm_common::db::init_memory_database;
use crm_common::events::EventBus;
use crm_common::time::{now_ms, MS_PER_DAY};
use crm_engine::{build_router, AppState, Orchestrator};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn create_test_app() -> (Router, AppState) {
    let pool = init_memory_database().await.unwrap();
    let state = AppState::new(pool, EventBus::new(100), Arc::new(EngineSettings::default()));
    (build_router(state.clone()), state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Store a POS customer with one order and merge it synchronously
async fn seed_customer(state: &AppState, id: &str, amount: i64, days_ago: i64) {
    use crm_common::models::{ChangeOperation, OrderRecord, PosCustomerRecord};
    use crm_engine::db::sources;

    let record = PosCustomerRecord::from_document("org", json!({"id": id, "name": format!("Customer {id}")})).unwrap();
    sources::save_pos_customer(&state.db, &record, now_ms()).await.unwrap();
    state.service.merge_from_pos_customer(&record).await.unwrap();

    let order = OrderRecord::from_document(
        "org",
        json!({"id": format!("o-{id}"), "customer_id": id, "total_price": amount, "status": 1,
               "inserted_at": now_ms() - days_ago * MS_PER_DAY}),
    )
    .unwrap();
    sources::save_order(&state.db, &order).await.unwrap();
    state.service.ingest_order(&order, ChangeOperation::Insert, false).await.unwrap();
}

// ===== Health =====

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "crm-engine");
}

// ===== Profiles =====

#[tokio::test]
async fn test_unknown_profile_is_404() {
    let (app, _) = create_test_app().await;
    let (status, body) = send(&app, "GET", "/api/orgs/org/customers/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_profile_merges_on_demand() {
    let (app, state) = create_test_app().await;
    let record = crm_common::models::PosCustomerRecord::from_document("org", json!({"id": "p1", "name": "Hoa"})).unwrap();
    crm_engine::db::sources::save_pos_customer(&state.db, &record, now_ms()).await.unwrap();

    let (status, body) = send(&app, "GET", "/api/orgs/org/customers/p1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unifiedId"], "p1");
    assert_eq!(body["profile"]["name"], "Hoa");
}

#[tokio::test]
async fn test_full_profile_with_domain_filter() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "c1", 3_000_000, 2).await;

    let (status, body) = send(&app, "GET", "/api/orgs/org/customers/c1/full?domains=order", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recentOrders"].as_array().unwrap().len(), 1);
    let activities = body["activities"].as_array().unwrap();
    assert!(!activities.is_empty());
    assert!(activities.iter().all(|a| a["domain"] == "order"));

    let (status, _) = send(&app, "GET", "/api/orgs/org/customers/c1/full?domains=weather", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recalculate_endpoints() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "c1", 3_000_000, 2).await;

    let (status, body) = send(&app, "POST", "/api/orgs/org/customers/c1/recalculate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unifiedId"], "c1");

    let (status, _) = send(&app, "POST", "/api/orgs/org/customers/missing/recalculate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/api/orgs/org/customers/recalculate-all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalProcessed"], 1);
    assert_eq!(body["totalFailed"], 0);
}

#[tokio::test]
async fn test_refresh_candidates() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "recent", 1_000_000, 3).await;
    seed_customer(&state, "edge", 1_000_000, 30).await;

    let (status, body) = send(&app, "GET", "/api/orgs/org/customers/refresh-candidates?mode=smart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unifiedIds"], json!(["edge"]));

    let (_, body) = send(&app, "GET", "/api/orgs/org/customers/refresh-candidates?batch=1", None).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["nextSkip"], 1);

    let (status, _) = send(&app, "GET", "/api/orgs/org/customers/refresh-candidates?mode=hourly", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===== Dashboard =====

#[tokio::test]
async fn test_dashboard_list_filter_and_sort() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "big", 60_000_000, 2).await;
    seed_customer(&state, "small", 2_000_000, 2).await;

    let (status, body) = send(&app, "GET", "/api/orgs/org/dashboard/customers?value=vip", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["unifiedId"], "big");

    let (_, body) = send(&app, "GET", "/api/orgs/org/dashboard/customers?sort=totalSpend&order=asc", None).await;
    assert_eq!(body["items"][0]["unifiedId"], "small");
    assert_eq!(body["page"], 1);

    let (status, _) = send(&app, "GET", "/api/orgs/org/dashboard/customers?sort=age", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dashboard_aggregates() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "big", 60_000_000, 2).await;

    let (status, body) = send(&app, "GET", "/api/orgs/org/dashboard/funnel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 6);

    let (status, body) = send(&app, "GET", "/api/orgs/org/dashboard/groups?top=5", None).await;
    assert_eq!(status, StatusCode::OK);
    let vip_active = body
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["group"] == "vip_active")
        .unwrap();
    assert_eq!(vip_active["count"], 1);

    let (status, body) = send(&app, "GET", "/api/orgs/org/dashboard/matrix?rows=value&cols=lifecycle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = send(&app, "GET", "/api/orgs/org/dashboard/matrix?rows=value", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/orgs/org/dashboard/customers?journey=omni", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_dashboard_distribution_as_of() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "big", 60_000_000, 2).await;

    let (status, body) = send(&app, "GET", "/api/orgs/org/dashboard/as-of", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    // A day ago the order entry (two days back) is the customer's latest snapshot
    let yesterday = now_ms() - MS_PER_DAY;
    let uri = format!("/api/orgs/org/dashboard/as-of?at={yesterday}");
    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    let value_axis = body["axes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|pair| pair[0] == "value")
        .unwrap();
    let vip = value_axis[1]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["label"] == "vip")
        .unwrap();
    assert_eq!(vip["count"], 1);

    let before = now_ms() - 10 * MS_PER_DAY;
    let uri = format!("/api/orgs/org/dashboard/as-of?at={before}");
    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["asOf"], before);
}

// ===== Notes =====

#[tokio::test]
async fn test_note_lifecycle() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "c1", 1_000_000, 2).await;

    let (status, note) = send(
        &app,
        "POST",
        "/api/orgs/org/customers/c1/notes",
        Some(json!({"noteText": "Call back about the blue jacket", "createdBy": "staff-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let note_id = note["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", "/api/orgs/org/customers/c1/notes", Some(json!({"noteText": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/orgs/org/notes/{note_id}");
    let (status, updated) = send(&app, "PUT", &uri, Some(json!({"noteText": "Called, will visit"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["noteText"], "Called, will visit");

    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = send(&app, "GET", "/api/orgs/org/customers/c1/notes", None).await;
    assert!(list.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "DELETE", "/api/orgs/org/notes/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===== Backfill =====

#[tokio::test]
async fn test_backfill_endpoint() {
    let (app, state) = create_test_app().await;
    seed_customer(&state, "c1", 1_000_000, 2).await;

    let (status, body) = send(&app, "POST", "/api/orgs/org/activities/backfill?types=order", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ordersProcessed"], 1);
    assert_eq!(body["conversationsProcessed"], 0);

    let (status, _) = send(&app, "POST", "/api/orgs/org/activities/backfill?types=profile", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===== Upstream writes =====

#[tokio::test]
async fn test_source_write_flows_through_orchestrator() {
    let (app, state) = create_test_app().await;
    let orchestrator = Orchestrator::new(state.service.clone()).spawn(state.event_bus.subscribe());

    let (status, body) = send(
        &app,
        "PUT",
        "/api/orgs/org/sources/pos_customers",
        Some(json!({"id": "p7", "name": "Linh", "phone_numbers": ["0987654321"]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["operation"], "insert");
    assert_eq!(body["documentId"], "p7");

    let (_, again) = send(
        &app,
        "PUT",
        "/api/orgs/org/sources/pos_customers",
        Some(json!({"id": "p7", "name": "Linh", "phone_numbers": ["0987654321"]})),
    )
    .await;
    assert_eq!(again["operation"], "update");

    let mut status = StatusCode::NOT_FOUND;
    for _ in 0..50 {
        let exists = crm_engine::db::customers::load_customer(&state.db, "org", "p7").await.unwrap();
        if exists.is_some() {
            status = send(&app, "GET", "/api/orgs/org/customers/p7", None).await.0;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, StatusCode::OK);
    orchestrator.abort();
}

#[tokio::test]
async fn test_source_write_rejects_bad_input() {
    let (app, _) = create_test_app().await;

    let (status, _) = send(&app, "PUT", "/api/orgs/org/sources/invoices", Some(json!({"id": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PUT", "/api/orgs/org/sources/pos_orders", Some(json!({"total_price": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PUT", "/api/orgs/org/sources/notes", Some(json!({"id": "n"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
