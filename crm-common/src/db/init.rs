//! Database initialization
//!
//! Creates the SQLite file on first run and brings every table up to the
//! current schema. All statements are `IF NOT EXISTS`, so this is safe to run
//! at every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path` and apply the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets dashboard reads proceed while recalculations write
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the full schema
///
/// Pinned to a single connection: every SQLite `:memory:` connection is a
/// separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_customers_table(pool).await?;
    create_activities_table(pool).await?;
    create_notes_table(pool).await?;

    // Raw upstream records
    create_pos_customers_table(pool).await?;
    create_messaging_customers_table(pool).await?;
    create_pos_orders_table(pool).await?;
    create_conversations_table(pool).await?;
    create_source_phones_table(pool).await?;

    Ok(())
}

async fn create_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            unified_id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            pos_id TEXT,
            messaging_id TEXT,
            primary_source TEXT NOT NULL,
            profile TEXT NOT NULL DEFAULT '{}',
            metrics TEXT NOT NULL DEFAULT '{}',
            name TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            journey_stage TEXT NOT NULL DEFAULT 'visitor',
            value_tier TEXT NOT NULL DEFAULT 'new',
            lifecycle_stage TEXT NOT NULL DEFAULT 'never_purchased',
            channel TEXT NOT NULL DEFAULT '',
            loyalty_stage TEXT NOT NULL DEFAULT '',
            momentum_stage TEXT NOT NULL DEFAULT '',
            total_spent REAL NOT NULL DEFAULT 0,
            order_count INTEGER NOT NULL DEFAULT 0,
            last_order_at INTEGER NOT NULL DEFAULT 0,
            merge_method TEXT NOT NULL,
            merged_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (unified_id, org_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_customers_pos ON customers(org_id, pos_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customers_messaging ON customers(org_id, messaging_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customers_last_order ON customers(org_id, last_order_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_activities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            unified_id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            domain TEXT NOT NULL,
            activity_type TEXT NOT NULL,
            source TEXT NOT NULL,
            source_ref TEXT NOT NULL DEFAULT '{}',
            source_ref_key TEXT NOT NULL DEFAULT '',
            display_label TEXT NOT NULL DEFAULT '',
            display_icon TEXT NOT NULL DEFAULT '',
            display_subtext TEXT NOT NULL DEFAULT '',
            actor_id TEXT NOT NULL DEFAULT '',
            actor_name TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}',
            has_snapshot INTEGER NOT NULL DEFAULT 0,
            activity_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_activities_customer_time ON activities(org_id, unified_id, activity_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_activities_source_ref ON activities(org_id, unified_id, activity_type, source_ref_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_notes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            unified_id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            note_text TEXT NOT NULL,
            next_action TEXT,
            next_action_date INTEGER,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notes_customer ON notes(org_id, unified_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pos_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pos_customers (
            id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            link_key TEXT,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (id, org_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pos_customers_link ON pos_customers(org_id, link_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_messaging_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messaging_customers (
            id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            link_key TEXT,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (id, org_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messaging_customers_link ON messaging_customers(org_id, link_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pos_orders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pos_orders (
            id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            customer_id TEXT,
            bill_phone TEXT NOT NULL DEFAULT '',
            page_id TEXT,
            status INTEGER NOT NULL DEFAULT 0,
            order_at INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL,
            PRIMARY KEY (id, org_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pos_orders_customer ON pos_orders(org_id, customer_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pos_orders_phone ON pos_orders(org_id, bill_phone)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pos_orders_time ON pos_orders(org_id, order_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_conversations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            customer_id TEXT,
            customer_ids TEXT NOT NULL DEFAULT '[]',
            page_id TEXT,
            updated_at INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (id, org_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_customer ON conversations(org_id, customer_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_time ON conversations(org_id, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Normalized phone index over both customer sources
async fn create_source_phones_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_phones (
            source TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            PRIMARY KEY (source, customer_id, org_id, phone)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_phones_lookup ON source_phones(org_id, source, phone)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
