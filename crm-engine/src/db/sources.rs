//! Raw upstream record persistence
//!
//! Documents are stored verbatim next to a few extracted columns used for
//! lookups: explicit-link keys, order customer/phone/time, conversation
//! customer ids and update time. Customer phone numbers are indexed in
//! normalized form in `source_phones`.

use super::json_set;
use crm_common::models::{
    ConversationRecord, MessagingCustomerRecord, OrderRecord, PosCustomerRecord, Source,
};
use crm_common::models::source::ORDER_STATUS_CANCELLED;
use crm_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

fn row_data(row: &SqliteRow) -> Result<serde_json::Value> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

async fn exists(pool: &SqlitePool, table: &str, org_id: &str, id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT 1 FROM {table} WHERE org_id = ? AND id = ?"
    ))
    .bind(org_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Replace the normalized phone index for one source customer
async fn replace_phones(
    pool: &SqlitePool,
    source: Source,
    org_id: &str,
    customer_id: &str,
    phones: &[String],
) -> Result<()> {
    sqlx::query("DELETE FROM source_phones WHERE source = ? AND customer_id = ? AND org_id = ?")
        .bind(source.as_str())
        .bind(customer_id)
        .bind(org_id)
        .execute(pool)
        .await?;

    for phone in phones {
        sqlx::query(
            "INSERT OR IGNORE INTO source_phones (source, customer_id, org_id, phone) VALUES (?, ?, ?, ?)",
        )
        .bind(source.as_str())
        .bind(customer_id)
        .bind(org_id)
        .bind(phone)
        .execute(pool)
        .await?;
    }
    Ok(())
}

// ===== Customers =====

/// Store a POS customer; returns true when it was not stored before
pub async fn save_pos_customer(
    pool: &SqlitePool,
    record: &PosCustomerRecord,
    received_at: i64,
) -> Result<bool> {
    let created = !exists(pool, "pos_customers", &record.org_id, &record.id).await?;
    sqlx::query(
        r#"
        INSERT INTO pos_customers (id, org_id, link_key, data, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id, org_id) DO UPDATE SET
            link_key = excluded.link_key,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.id)
    .bind(&record.org_id)
    .bind(record.explicit_link())
    .bind(record.data.to_string())
    .bind(record.updated_at().unwrap_or(received_at))
    .execute(pool)
    .await?;

    replace_phones(pool, Source::Pos, &record.org_id, &record.id, &record.profile().phone_numbers).await?;
    Ok(created)
}

/// Store a messaging customer; returns true when it was not stored before
pub async fn save_messaging_customer(
    pool: &SqlitePool,
    record: &MessagingCustomerRecord,
    received_at: i64,
) -> Result<bool> {
    let created = !exists(pool, "messaging_customers", &record.org_id, &record.id).await?;
    sqlx::query(
        r#"
        INSERT INTO messaging_customers (id, org_id, link_key, data, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id, org_id) DO UPDATE SET
            link_key = excluded.link_key,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.id)
    .bind(&record.org_id)
    .bind(record.explicit_link())
    .bind(record.data.to_string())
    .bind(record.updated_at().unwrap_or(received_at))
    .execute(pool)
    .await?;

    replace_phones(
        pool,
        Source::Messaging,
        &record.org_id,
        &record.id,
        &record.profile().phone_numbers,
    )
    .await?;
    Ok(created)
}

pub async fn load_pos_customer(
    pool: &SqlitePool,
    org_id: &str,
    id: &str,
) -> Result<Option<PosCustomerRecord>> {
    let row = sqlx::query("SELECT id, org_id, data FROM pos_customers WHERE org_id = ? AND id = ?")
        .bind(org_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(PosCustomerRecord {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            data: row_data(&row)?,
        })),
        None => Ok(None),
    }
}

pub async fn load_messaging_customer(
    pool: &SqlitePool,
    org_id: &str,
    id: &str,
) -> Result<Option<MessagingCustomerRecord>> {
    let row = sqlx::query(
        "SELECT id, org_id, data FROM messaging_customers WHERE org_id = ? AND id = ?",
    )
    .bind(org_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(MessagingCustomerRecord {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            data: row_data(&row)?,
        })),
        None => Ok(None),
    }
}

/// POS customer whose `fb_id` equals `link_key`
pub async fn find_pos_by_link(
    pool: &SqlitePool,
    org_id: &str,
    link_key: &str,
) -> Result<Option<PosCustomerRecord>> {
    let row = sqlx::query(
        "SELECT id, org_id, data FROM pos_customers WHERE org_id = ? AND link_key = ? \
         ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(org_id)
    .bind(link_key)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(PosCustomerRecord {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            data: row_data(&row)?,
        })),
        None => Ok(None),
    }
}

/// Messaging customer whose `<page_id>_<psid>` equals `link_key`
pub async fn find_messaging_by_link(
    pool: &SqlitePool,
    org_id: &str,
    link_key: &str,
) -> Result<Option<MessagingCustomerRecord>> {
    let row = sqlx::query(
        "SELECT id, org_id, data FROM messaging_customers WHERE org_id = ? AND link_key = ? \
         ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(org_id)
    .bind(link_key)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(MessagingCustomerRecord {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            data: row_data(&row)?,
        })),
        None => Ok(None),
    }
}

/// Ids of `source` customers sharing any of the normalized `phones`
pub async fn find_ids_by_phones(
    pool: &SqlitePool,
    org_id: &str,
    source: Source,
    phones: &[String],
) -> Result<Vec<String>> {
    if phones.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar(
        r#"
        SELECT DISTINCT customer_id FROM source_phones
        WHERE org_id = ? AND source = ? AND phone IN (SELECT value FROM json_each(?))
        ORDER BY customer_id
        "#,
    )
    .bind(org_id)
    .bind(source.as_str())
    .bind(json_set(phones))
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

// ===== Orders =====

fn row_to_order(row: &SqliteRow) -> Result<OrderRecord> {
    Ok(OrderRecord {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        data: row_data(row)?,
    })
}

/// Store an order; returns true when it was not stored before
pub async fn save_order(pool: &SqlitePool, order: &OrderRecord) -> Result<bool> {
    let created = !exists(pool, "pos_orders", &order.org_id, &order.id).await?;
    sqlx::query(
        r#"
        INSERT INTO pos_orders (id, org_id, customer_id, bill_phone, page_id, status, order_at, data)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id, org_id) DO UPDATE SET
            customer_id = excluded.customer_id,
            bill_phone = excluded.bill_phone,
            page_id = excluded.page_id,
            status = excluded.status,
            order_at = excluded.order_at,
            data = excluded.data
        "#,
    )
    .bind(&order.id)
    .bind(&order.org_id)
    .bind(order.customer_id())
    .bind(order.bill_phone())
    .bind(order.page_id())
    .bind(order.status())
    .bind(order.order_at().unwrap_or(0))
    .bind(order.data.to_string())
    .execute(pool)
    .await?;
    Ok(created)
}

pub async fn load_order(pool: &SqlitePool, org_id: &str, id: &str) -> Result<Option<OrderRecord>> {
    let row = sqlx::query("SELECT id, org_id, data FROM pos_orders WHERE org_id = ? AND id = ?")
        .bind(org_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_order).transpose()
}

/// Orders belonging to any of `ids` or billed to any of `phone_variants`,
/// dated at or before `as_of`, newest first
pub async fn fetch_orders_for(
    pool: &SqlitePool,
    org_id: &str,
    ids: &[String],
    phone_variants: &[String],
    as_of: i64,
    limit: i64,
) -> Result<Vec<OrderRecord>> {
    let ids_json = json_set(ids);
    let phones_json = json_set(phone_variants);
    let rows = sqlx::query(
        r#"
        SELECT id, org_id, data FROM pos_orders
        WHERE org_id = ? AND order_at <= ? AND (
            customer_id IN (SELECT value FROM json_each(?))
            OR CAST(json_extract(data, '$.customer_id') AS TEXT) IN (SELECT value FROM json_each(?))
            OR bill_phone IN (SELECT value FROM json_each(?))
            OR json_extract(data, '$.bill_phone_number') IN (SELECT value FROM json_each(?))
        )
        ORDER BY order_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .bind(&ids_json)
    .bind(&ids_json)
    .bind(&phones_json)
    .bind(&phones_json)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_order).collect()
}

/// Page of orders across the organization, oldest first
pub async fn list_orders(
    pool: &SqlitePool,
    org_id: &str,
    include_cancelled: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<OrderRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, org_id, data FROM pos_orders
        WHERE org_id = ? AND (? OR status <> ?)
        ORDER BY order_at ASC, id ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(org_id)
    .bind(include_cancelled)
    .bind(ORDER_STATUS_CANCELLED)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_order).collect()
}

// ===== Conversations =====

fn row_to_conversation(row: &SqliteRow) -> Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        data: row_data(row)?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Store a conversation; returns true when it was not stored before
pub async fn save_conversation(pool: &SqlitePool, conv: &ConversationRecord) -> Result<bool> {
    let created = !exists(pool, "conversations", &conv.org_id, &conv.id).await?;
    sqlx::query(
        r#"
        INSERT INTO conversations (id, org_id, customer_id, customer_ids, page_id, updated_at, data)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id, org_id) DO UPDATE SET
            customer_id = excluded.customer_id,
            customer_ids = excluded.customer_ids,
            page_id = excluded.page_id,
            updated_at = excluded.updated_at,
            data = excluded.data
        "#,
    )
    .bind(&conv.id)
    .bind(&conv.org_id)
    .bind(conv.primary_customer_id())
    .bind(json_set(&conv.customer_ids()))
    .bind(conv.page_id())
    .bind(conv.updated_at)
    .bind(conv.data.to_string())
    .execute(pool)
    .await?;
    Ok(created)
}

pub async fn load_conversation(
    pool: &SqlitePool,
    org_id: &str,
    id: &str,
) -> Result<Option<ConversationRecord>> {
    let row = sqlx::query(
        "SELECT id, org_id, data, updated_at FROM conversations WHERE org_id = ? AND id = ?",
    )
    .bind(org_id)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_conversation).transpose()
}

/// Conversations referencing any of `ids`, updated at or before `as_of`, newest first
pub async fn fetch_conversations_for(
    pool: &SqlitePool,
    org_id: &str,
    ids: &[String],
    as_of: i64,
    limit: i64,
) -> Result<Vec<ConversationRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, org_id, data, updated_at FROM conversations
        WHERE org_id = ? AND updated_at <= ?
          AND EXISTS (
            SELECT 1 FROM json_each(conversations.customer_ids) c
            WHERE c.value IN (SELECT value FROM json_each(?))
          )
        ORDER BY updated_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(org_id)
    .bind(as_of)
    .bind(json_set(ids))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_conversation).collect()
}

/// Page of conversations across the organization, oldest first
pub async fn list_conversations(
    pool: &SqlitePool,
    org_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<ConversationRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, org_id, data, updated_at FROM conversations
        WHERE org_id = ?
        ORDER BY updated_at ASC, id ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(org_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_conversation).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_common::db::init_memory_database;
    use serde_json::json;

    #[tokio::test]
    async fn test_phone_index_and_links() {
        let pool = init_memory_database().await.unwrap();
        let pos = PosCustomerRecord::from_document(
            "org",
            json!({"id": "p1", "phone_numbers": ["0912 345 678"], "fb_id": "pg_ps"}),
        )
        .unwrap();
        assert!(save_pos_customer(&pool, &pos, 1).await.unwrap());
        assert!(!save_pos_customer(&pool, &pos, 2).await.unwrap());

        let ids = find_ids_by_phones(&pool, "org", Source::Pos, &["84912345678".into()])
            .await
            .unwrap();
        assert_eq!(ids, vec!["p1".to_string()]);
        assert!(find_ids_by_phones(&pool, "org", Source::Messaging, &["84912345678".into()])
            .await
            .unwrap()
            .is_empty());

        let linked = find_pos_by_link(&pool, "org", "pg_ps").await.unwrap().unwrap();
        assert_eq!(linked.id, "p1");
    }

    #[tokio::test]
    async fn test_order_matching_by_id_and_phone() {
        let pool = init_memory_database().await.unwrap();
        for doc in [
            json!({"id": "o1", "customer": {"id": "p1"}, "inserted_at": "2024-01-01T00:00:00"}),
            json!({"id": "o2", "customer_id": 55, "inserted_at": "2024-01-02T00:00:00"}),
            json!({"id": "o3", "bill_phone_number": "0912345678", "inserted_at": "2024-01-03T00:00:00"}),
            json!({"id": "o4", "customer": {"id": "zz"}, "inserted_at": "2024-01-04T00:00:00"}),
        ] {
            save_order(&pool, &OrderRecord::from_document("org", doc).unwrap()).await.unwrap();
        }

        let found = fetch_orders_for(
            &pool,
            "org",
            &["p1".into(), "55".into()],
            &["84912345678".into(), "0912345678".into()],
            i64::MAX,
            100,
        )
        .await
        .unwrap();
        let ids: Vec<_> = found.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o3", "o2", "o1"]);

        let limited = fetch_orders_for(&pool, "org", &["p1".into()], &[], i64::MAX, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_conversation_matching_uses_all_customer_refs() {
        let pool = init_memory_database().await.unwrap();
        let conv = ConversationRecord::from_document(
            "org",
            json!({"id": "c1", "customers": [{"id": 42}], "updated_at": 1_700_000_000}),
            0,
        )
        .unwrap();
        assert!(save_conversation(&pool, &conv).await.unwrap());

        let hit = fetch_conversations_for(&pool, "org", &["42".into()], i64::MAX, 10).await.unwrap();
        assert_eq!(hit.len(), 1);
        let before = fetch_conversations_for(&pool, "org", &["42".into()], 1, 10).await.unwrap();
        assert!(before.is_empty());
    }
}
