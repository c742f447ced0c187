//! Activity history persistence (append-only)

use super::json_set;
use crm_common::models::{ActivityDomain, ActivityRecord, SourceRef};
use crm_common::Result;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const ACTIVITY_COLUMNS: &str = "id, unified_id, org_id, domain, activity_type, source, source_ref, \
     display_label, display_icon, display_subtext, actor_id, actor_name, metadata, \
     activity_at, created_at";

fn row_to_activity(row: &SqliteRow) -> Result<ActivityRecord> {
    let id: String = row.try_get("id")?;
    let domain: String = row.try_get("domain")?;
    let source_ref: String = row.try_get("source_ref")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(ActivityRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| crm_common::Error::Internal(format!("bad activity id {id}: {e}")))?,
        unified_id: row.try_get("unified_id")?,
        org_id: row.try_get("org_id")?,
        domain: domain.parse::<ActivityDomain>()?,
        activity_type: row.try_get("activity_type")?,
        source: row.try_get("source")?,
        source_ref: serde_json::from_str::<SourceRef>(&source_ref)?,
        display_label: row.try_get("display_label")?,
        display_icon: row.try_get("display_icon")?,
        display_subtext: row.try_get("display_subtext")?,
        actor_id: row.try_get("actor_id")?,
        actor_name: row.try_get("actor_name")?,
        metadata: serde_json::from_str(&metadata)?,
        activity_at: row.try_get("activity_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Append an activity
pub async fn insert_activity(pool: &SqlitePool, activity: &ActivityRecord) -> Result<()> {
    let has_snapshot = activity.metadata.contains_key("metricsSnapshot");
    sqlx::query(
        r#"
        INSERT INTO activities (
            id, unified_id, org_id, domain, activity_type, source, source_ref, source_ref_key,
            display_label, display_icon, display_subtext, actor_id, actor_name,
            metadata, has_snapshot, activity_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(activity.id.to_string())
    .bind(&activity.unified_id)
    .bind(&activity.org_id)
    .bind(activity.domain.as_str())
    .bind(&activity.activity_type)
    .bind(&activity.source)
    .bind(serde_json::to_string(&activity.source_ref)?)
    .bind(activity.source_ref.key())
    .bind(&activity.display_label)
    .bind(&activity.display_icon)
    .bind(&activity.display_subtext)
    .bind(&activity.actor_id)
    .bind(&activity.actor_name)
    .bind(serde_json::Value::Object(activity.metadata.clone()).to_string())
    .bind(has_snapshot)
    .bind(activity.activity_at)
    .bind(activity.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Rewrite an entry's payload in place, keeping its id and creation time
pub async fn replace_activity(pool: &SqlitePool, activity: &ActivityRecord) -> Result<()> {
    let has_snapshot = activity.metadata.contains_key("metricsSnapshot");
    let result = sqlx::query(
        r#"
        UPDATE activities
        SET display_label = ?, display_icon = ?, display_subtext = ?, actor_id = ?, actor_name = ?,
            metadata = ?, has_snapshot = ?, activity_at = ?
        WHERE id = ? AND org_id = ?
        "#,
    )
    .bind(&activity.display_label)
    .bind(&activity.display_icon)
    .bind(&activity.display_subtext)
    .bind(&activity.actor_id)
    .bind(&activity.actor_name)
    .bind(serde_json::Value::Object(activity.metadata.clone()).to_string())
    .bind(has_snapshot)
    .bind(activity.activity_at)
    .bind(activity.id.to_string())
    .bind(&activity.org_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(crm_common::Error::NotFound(format!("activity {}", activity.id)));
    }
    Ok(())
}

/// The newest entry for `(unified_id, activity_type, source_ref)`, if any
pub async fn find_event_activity(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    activity_type: &str,
    source_ref: &SourceRef,
) -> Result<Option<ActivityRecord>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {ACTIVITY_COLUMNS} FROM activities
        WHERE org_id = ? AND unified_id = ? AND activity_type = ? AND source_ref_key = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(org_id)
    .bind(unified_id)
    .bind(activity_type)
    .bind(source_ref.key())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_activity).transpose()
}

/// Whether an entry for `(unified_id, activity_type, source_ref)` already exists
pub async fn activity_exists(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    activity_type: &str,
    source_ref: &SourceRef,
) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM activities
        WHERE org_id = ? AND unified_id = ? AND activity_type = ? AND source_ref_key = ?
        LIMIT 1
        "#,
    )
    .bind(org_id)
    .bind(unified_id)
    .bind(activity_type)
    .bind(source_ref.key())
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Most recent snapshot-bearing entry at or before `at_or_before`
///
/// An entry matching `exclude = (activity_type, source_ref)` is skipped so
/// that re-recording an event compares against the state before it.
pub async fn latest_snapshot(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    at_or_before: i64,
    exclude: Option<(&str, &SourceRef)>,
) -> Result<Option<ActivityRecord>> {
    let (exclude_type, exclude_key) = match exclude {
        Some((activity_type, source_ref)) => (activity_type.to_string(), source_ref.key()),
        None => (String::new(), String::new()),
    };
    let row = sqlx::query(&format!(
        r#"
        SELECT {ACTIVITY_COLUMNS} FROM activities
        WHERE org_id = ? AND unified_id = ? AND has_snapshot = 1 AND activity_at <= ?
          AND NOT (activity_type = ? AND source_ref_key = ?)
        ORDER BY activity_at DESC, created_at DESC
        LIMIT 1
        "#
    ))
    .bind(org_id)
    .bind(unified_id)
    .bind(at_or_before)
    .bind(exclude_type)
    .bind(exclude_key)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_activity).transpose()
}

/// Newest metrics snapshot of every customer of an org at or before `at_or_before`
///
/// Rebuilds the customer base as it stood at a past moment. Customers with no
/// snapshot by then are absent.
pub async fn latest_snapshots_per_customer(
    pool: &SqlitePool,
    org_id: &str,
    at_or_before: i64,
) -> Result<Vec<(String, Map<String, Value>)>> {
    let rows = sqlx::query(
        r#"
        SELECT unified_id, metadata FROM (
            SELECT unified_id, metadata,
                   ROW_NUMBER() OVER (
                       PARTITION BY unified_id ORDER BY activity_at DESC, created_at DESC
                   ) AS rn
            FROM activities
            WHERE org_id = ? AND has_snapshot = 1 AND activity_at <= ?
        )
        WHERE rn = 1
        ORDER BY unified_id
        "#,
    )
    .bind(org_id)
    .bind(at_or_before)
    .fetch_all(pool)
    .await?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for row in &rows {
        let unified_id: String = row.try_get("unified_id")?;
        let metadata: String = row.try_get("metadata")?;
        let mut metadata: Map<String, Value> = serde_json::from_str(&metadata)?;
        if let Some(Value::Object(snapshot)) = metadata.remove("metricsSnapshot") {
            snapshots.push((unified_id, snapshot));
        }
    }
    Ok(snapshots)
}

/// Creation time of the newest entry of `activity_type`, if any
pub async fn last_created_at(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    activity_type: &str,
) -> Result<Option<i64>> {
    let ts: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(created_at) FROM activities WHERE org_id = ? AND unified_id = ? AND activity_type = ?",
    )
    .bind(org_id)
    .bind(unified_id)
    .bind(activity_type)
    .fetch_one(pool)
    .await?;
    Ok(ts)
}

/// History for one customer, newest first, optionally limited to some domains
pub async fn list_activities(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    domains: &[ActivityDomain],
    limit: i64,
) -> Result<Vec<ActivityRecord>> {
    let domain_names: Vec<String> = domains.iter().map(|d| d.as_str().to_string()).collect();
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ACTIVITY_COLUMNS} FROM activities
        WHERE org_id = ? AND unified_id = ?
          AND (? = 0 OR domain IN (SELECT value FROM json_each(?)))
        ORDER BY activity_at DESC, created_at DESC
        LIMIT ?
        "#
    ))
    .bind(org_id)
    .bind(unified_id)
    .bind(domain_names.len() as i64)
    .bind(json_set(&domain_names))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_activity).collect()
}

/// Number of entries for a customer, optionally of one type
pub async fn count_activities(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    activity_type: Option<&str>,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM activities
        WHERE org_id = ? AND unified_id = ? AND (? IS NULL OR activity_type = ?)
        "#,
    )
    .bind(org_id)
    .bind(unified_id)
    .bind(activity_type)
    .bind(activity_type)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
