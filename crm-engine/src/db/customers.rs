//! Unified customer persistence
//!
//! Profile and metrics are stored as JSON documents; the classification
//! labels and a few metrics are mirrored into plain columns so dashboard
//! filters, sorts and group counts run in SQL.

use super::json_set;
use crm_common::models::{Axis, MergeMethod, Source, SourceIds, UnifiedCustomer};
use crm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

const CUSTOMER_COLUMNS: &str = "unified_id, org_id, pos_id, messaging_id, primary_source, \
     profile, metrics, merge_method, merged_at, created_at, updated_at";

fn row_to_customer(row: &SqliteRow) -> Result<UnifiedCustomer> {
    let primary_source: String = row.try_get("primary_source")?;
    let merge_method: String = row.try_get("merge_method")?;
    let profile: String = row.try_get("profile")?;
    let metrics: String = row.try_get("metrics")?;

    Ok(UnifiedCustomer {
        unified_id: row.try_get("unified_id")?,
        org_id: row.try_get("org_id")?,
        source_ids: SourceIds {
            pos: row.try_get("pos_id")?,
            messaging: row.try_get("messaging_id")?,
        },
        primary_source: primary_source.parse::<Source>()?,
        profile: serde_json::from_str(&profile)?,
        metrics: serde_json::from_str(&metrics)?,
        merge_method: merge_method.parse::<MergeMethod>()?,
        merged_at: row.try_get("merged_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert or update a customer
///
/// Source links are append-only: a stored link is never replaced, and
/// `created_at` is only written on insert. Returns true when the row was new.
pub async fn save_customer(pool: &SqlitePool, customer: &UnifiedCustomer) -> Result<bool> {
    let existed: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM customers WHERE org_id = ? AND unified_id = ?",
    )
    .bind(&customer.org_id)
    .bind(&customer.unified_id)
    .fetch_optional(pool)
    .await?;

    let c = &customer.metrics.classification;
    sqlx::query(
        r#"
        INSERT INTO customers (
            unified_id, org_id, pos_id, messaging_id, primary_source,
            profile, metrics, name, phone,
            journey_stage, value_tier, lifecycle_stage, channel, loyalty_stage, momentum_stage,
            total_spent, order_count, last_order_at,
            merge_method, merged_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(unified_id, org_id) DO UPDATE SET
            pos_id = COALESCE(customers.pos_id, excluded.pos_id),
            messaging_id = COALESCE(customers.messaging_id, excluded.messaging_id),
            primary_source = excluded.primary_source,
            profile = excluded.profile,
            metrics = excluded.metrics,
            name = excluded.name,
            phone = excluded.phone,
            journey_stage = excluded.journey_stage,
            value_tier = excluded.value_tier,
            lifecycle_stage = excluded.lifecycle_stage,
            channel = excluded.channel,
            loyalty_stage = excluded.loyalty_stage,
            momentum_stage = excluded.momentum_stage,
            total_spent = excluded.total_spent,
            order_count = excluded.order_count,
            last_order_at = excluded.last_order_at,
            merge_method = excluded.merge_method,
            merged_at = excluded.merged_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&customer.unified_id)
    .bind(&customer.org_id)
    .bind(&customer.source_ids.pos)
    .bind(&customer.source_ids.messaging)
    .bind(customer.primary_source.as_str())
    .bind(serde_json::to_string(&customer.profile)?)
    .bind(serde_json::to_string(&customer.metrics)?)
    .bind(&customer.profile.name)
    .bind(customer.profile.phone_numbers.first().cloned().unwrap_or_default())
    .bind(c.journey_stage.as_str())
    .bind(c.value_tier.as_str())
    .bind(c.lifecycle_stage.as_str())
    .bind(c.channel.as_str())
    .bind(c.loyalty_stage.as_str())
    .bind(c.momentum_stage.as_str())
    .bind(customer.metrics.total_spent())
    .bind(customer.metrics.order_count())
    .bind(customer.metrics.last_order_at())
    .bind(customer.merge_method.as_str())
    .bind(customer.merged_at)
    .bind(customer.created_at)
    .bind(customer.updated_at)
    .execute(pool)
    .await?;

    Ok(existed.is_none())
}

/// Load a customer by unified id
pub async fn load_customer(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
) -> Result<Option<UnifiedCustomer>> {
    let row = sqlx::query(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE org_id = ? AND unified_id = ?"
    ))
    .bind(org_id)
    .bind(unified_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_customer).transpose()
}

/// Ranking among records that share a link: fully linked first, then newest
const HOLDER_ORDER: &str = "(pos_id IS NOT NULL AND messaging_id IS NOT NULL) DESC, updated_at DESC";

/// Customers filed under `id` as unified id or either source link
///
/// Fully linked records come first, then the most recently updated.
pub async fn find_by_any_id(
    pool: &SqlitePool,
    org_id: &str,
    id: &str,
) -> Result<Vec<UnifiedCustomer>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {CUSTOMER_COLUMNS} FROM customers
        WHERE org_id = ? AND (unified_id = ? OR pos_id = ? OR messaging_id = ?)
        ORDER BY {HOLDER_ORDER}
        "#
    ))
    .bind(org_id)
    .bind(id)
    .bind(id)
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_customer).collect()
}

/// Customer holding the given source link, if any
///
/// Ranked like [`find_by_any_id`] so both lookups agree on the holder.
pub async fn find_by_source_link(
    pool: &SqlitePool,
    org_id: &str,
    source: Source,
    native_id: &str,
) -> Result<Option<UnifiedCustomer>> {
    let column = match source {
        Source::Pos => "pos_id",
        Source::Messaging => "messaging_id",
    };
    let row = sqlx::query(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE org_id = ? AND {column} = ? \
         ORDER BY {HOLDER_ORDER} LIMIT 1"
    ))
    .bind(org_id)
    .bind(native_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_customer).transpose()
}

/// Customers whose unified id is in `ids`
pub async fn load_customers(
    pool: &SqlitePool,
    org_id: &str,
    ids: &[String],
) -> Result<Vec<UnifiedCustomer>> {
    let rows = sqlx::query(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers \
         WHERE org_id = ? AND unified_id IN (SELECT value FROM json_each(?))"
    ))
    .bind(org_id)
    .bind(json_set(ids))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_customer).collect()
}

/// Page of unified ids in stable order
pub async fn list_customer_ids(
    pool: &SqlitePool,
    org_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT unified_id FROM customers WHERE org_id = ? ORDER BY created_at, unified_id LIMIT ? OFFSET ?",
    )
    .bind(org_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn count_customers(pool: &SqlitePool, org_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE org_id = ?")
        .bind(org_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Customer ids due for reclassification
///
/// `smart` restricts to customers whose last order sits inside one of the
/// lifecycle boundary windows (`(min_days, max_days)` inclusive); otherwise
/// every customer with at least one order qualifies.
pub async fn list_refresh_candidates(
    pool: &SqlitePool,
    org_id: &str,
    windows: &[(i64, i64)],
    now_ms: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<String>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT unified_id FROM customers WHERE org_id = ");
    qb.push_bind(org_id);
    qb.push(" AND order_count >= 1");
    if !windows.is_empty() {
        qb.push(" AND (");
        for (i, (min_days, max_days)) in windows.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            let day = crm_common::time::MS_PER_DAY;
            qb.push("(last_order_at BETWEEN ");
            qb.push_bind(now_ms - max_days * day);
            qb.push(" AND ");
            qb.push_bind(now_ms - min_days * day);
            qb.push(")");
        }
        qb.push(")");
    }
    qb.push(" ORDER BY unified_id LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let ids = qb.build_query_scalar().fetch_all(pool).await?;
    Ok(ids)
}

/// Dashboard filter over the denormalized label columns
///
/// Values for one axis are alternatives; separate axes must all match. Group
/// conditions are alternatives as well.
#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub labels: Vec<(Axis, Vec<String>)>,
    /// Raw SQL conditions for priority groups (built from fixed strings only)
    pub group_conditions: Vec<&'static str>,
    /// Select no rows at all (a filter value that can never match)
    pub match_nothing: bool,
}

impl CustomerFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>, org_id: &str) {
        qb.push(" WHERE org_id = ");
        qb.push_bind(org_id.to_string());
        if self.match_nothing {
            qb.push(" AND 0");
        }
        for (axis, labels) in self.labels.iter().filter(|(_, l)| !l.is_empty()) {
            qb.push(format!(" AND {} IN (", axis.column()));
            let mut list = qb.separated(", ");
            for label in labels {
                list.push_bind(label.clone());
            }
            list.push_unseparated(")");
        }
        if !self.group_conditions.is_empty() {
            let joined = self
                .group_conditions
                .iter()
                .map(|c| format!("({c})"))
                .collect::<Vec<_>>()
                .join(" OR ");
            qb.push(format!(" AND ({joined})"));
        }
    }
}

/// Sortable dashboard columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    TotalSpend,
    LastOrderAt,
    Name,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::TotalSpend => "total_spent",
            SortField::LastOrderAt => "last_order_at",
            SortField::Name => "name",
        }
    }
}

pub async fn count_filtered(pool: &SqlitePool, org_id: &str, filter: &CustomerFilter) -> Result<i64> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM customers");
    filter.push_where(&mut qb, org_id);
    let count = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(count)
}

/// Filtered, sorted page of customers
pub async fn list_filtered(
    pool: &SqlitePool,
    org_id: &str,
    filter: &CustomerFilter,
    sort: SortField,
    ascending: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<UnifiedCustomer>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {CUSTOMER_COLUMNS} FROM customers"));
    filter.push_where(&mut qb, org_id);
    let direction = if ascending { "ASC" } else { "DESC" };
    qb.push(format!(
        " ORDER BY {} {direction}, unified_id ASC LIMIT ",
        sort.column()
    ));
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(row_to_customer).collect()
}

/// Customer counts grouped by two label columns
pub async fn count_by_axes(
    pool: &SqlitePool,
    org_id: &str,
    row_axis: Axis,
    col_axis: Axis,
) -> Result<Vec<(String, String, i64)>> {
    let sql = format!(
        "SELECT {r} AS row_label, {c} AS col_label, COUNT(*) AS n FROM customers \
         WHERE org_id = ? GROUP BY {r}, {c}",
        r = row_axis.column(),
        c = col_axis.column(),
    );
    let rows = sqlx::query(&sql).bind(org_id).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get("row_label")?,
                row.try_get("col_label")?,
                row.try_get("n")?,
            ))
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(Error::from)
}
