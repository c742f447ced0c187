//! Upstream record writes
//!
//! PUT /api/orgs/:org/sources/:collection stores the raw document and
//! publishes a `DataChanged` event. Merge, aggregation and activity logging
//! happen afterwards in the orchestrator, so the response only confirms the
//! write.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::put,
    Json, Router,
};
use crm_common::events::CrmEvent;
use crm_common::models::{
    ChangeOperation, ConversationRecord, MessagingCustomerRecord, OrderRecord, PosCustomerRecord,
    SourceCollection,
};
use crm_common::time::now_ms;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::db::sources;
use crate::error::{ApiError, ApiResult};
use crate::utils::retry_on_lock;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceWriteResponse {
    pub collection: SourceCollection,
    pub document_id: String,
    pub operation: ChangeOperation,
}

/// PUT /api/orgs/:org/sources/:collection
pub async fn put_source_record(
    State(state): State<AppState>,
    Path((org, collection)): Path<(String, String)>,
    Json(document): Json<Value>,
) -> ApiResult<(StatusCode, Json<SourceWriteResponse>)> {
    let collection: SourceCollection = collection.parse()?;
    let max_wait = state.service.settings().db_max_lock_wait_ms;
    let db = &state.db;
    let received_at = now_ms();

    let (document_id, created) = match collection {
        SourceCollection::PosCustomers => {
            let record = PosCustomerRecord::from_document(&org, document.clone())?;
            let created =
                retry_on_lock("save pos customer", max_wait, || sources::save_pos_customer(db, &record, received_at))
                    .await?;
            (record.id, created)
        }
        SourceCollection::MessagingCustomers => {
            let record = MessagingCustomerRecord::from_document(&org, document.clone())?;
            let created = retry_on_lock("save messaging customer", max_wait, || {
                sources::save_messaging_customer(db, &record, received_at)
            })
            .await?;
            (record.id, created)
        }
        SourceCollection::PosOrders => {
            let order = OrderRecord::from_document(&org, document.clone())?;
            let created = retry_on_lock("save order", max_wait, || sources::save_order(db, &order)).await?;
            (order.id, created)
        }
        SourceCollection::Conversations => {
            let conversation = ConversationRecord::from_document(&org, document.clone(), received_at)?;
            let created =
                retry_on_lock("save conversation", max_wait, || sources::save_conversation(db, &conversation))
                    .await?;
            (conversation.id, created)
        }
        SourceCollection::Notes => {
            return Err(ApiError::BadRequest(
                "notes are written through the notes endpoints".to_string(),
            ));
        }
    };

    let operation = if created {
        ChangeOperation::Insert
    } else {
        ChangeOperation::Update
    };
    debug!(%org, %collection, %document_id, %operation, "Stored upstream record");
    state
        .event_bus
        .emit_lossy(CrmEvent::data_changed(collection, operation, &org, &document_id, document));

    Ok((
        StatusCode::ACCEPTED,
        Json(SourceWriteResponse {
            collection,
            document_id,
            operation,
        }),
    ))
}

pub fn source_routes() -> Router<AppState> {
    Router::new().route("/api/orgs/:org/sources/:collection", put(put_source_record))
}
