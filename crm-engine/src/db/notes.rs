//! Customer note persistence

use crm_common::models::Note;
use crm_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const NOTE_COLUMNS: &str = "id, unified_id, org_id, note_text, next_action, next_action_date, \
     is_deleted, created_by, created_at, updated_at";

fn row_to_note(row: &SqliteRow) -> Result<Note> {
    let id: String = row.try_get("id")?;
    Ok(Note {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad note id {id}: {e}")))?,
        unified_id: row.try_get("unified_id")?,
        org_id: row.try_get("org_id")?,
        note_text: row.try_get("note_text")?,
        next_action: row.try_get("next_action")?,
        next_action_date: row.try_get("next_action_date")?,
        is_deleted: row.try_get("is_deleted")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn insert_note(pool: &SqlitePool, note: &Note) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notes (
            id, unified_id, org_id, note_text, next_action, next_action_date,
            is_deleted, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(note.id.to_string())
    .bind(&note.unified_id)
    .bind(&note.org_id)
    .bind(&note.note_text)
    .bind(&note.next_action)
    .bind(note.next_action_date)
    .bind(note.is_deleted)
    .bind(&note.created_by)
    .bind(note.created_at)
    .bind(note.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_note(pool: &SqlitePool, org_id: &str, id: Uuid) -> Result<Option<Note>> {
    let row = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes WHERE org_id = ? AND id = ?"
    ))
    .bind(org_id)
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_note).transpose()
}

/// Overwrite the editable fields of a live note; returns false if none matched
pub async fn update_note(pool: &SqlitePool, note: &Note) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE notes
        SET note_text = ?, next_action = ?, next_action_date = ?, updated_at = ?
        WHERE org_id = ? AND id = ? AND is_deleted = 0
        "#,
    )
    .bind(&note.note_text)
    .bind(&note.next_action)
    .bind(note.next_action_date)
    .bind(note.updated_at)
    .bind(&note.org_id)
    .bind(note.id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Flag a note as deleted; returns false if it was missing or already deleted
pub async fn soft_delete_note(pool: &SqlitePool, org_id: &str, id: Uuid, now_ms: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE notes SET is_deleted = 1, updated_at = ? WHERE org_id = ? AND id = ? AND is_deleted = 0",
    )
    .bind(now_ms)
    .bind(org_id)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Live notes for a customer, newest first
pub async fn list_notes(
    pool: &SqlitePool,
    org_id: &str,
    unified_id: &str,
    limit: i64,
) -> Result<Vec<Note>> {
    let rows = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes \
         WHERE org_id = ? AND unified_id = ? AND is_deleted = 0 \
         ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(org_id)
    .bind(unified_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_note).collect()
}

/// Page of live notes across the organization, oldest first
pub async fn list_org_notes(pool: &SqlitePool, org_id: &str, limit: i64, offset: i64) -> Result<Vec<Note>> {
    let rows = sqlx::query(&format!(
        "SELECT {NOTE_COLUMNS} FROM notes WHERE org_id = ? AND is_deleted = 0 \
         ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?"
    ))
    .bind(org_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_note).collect()
}
