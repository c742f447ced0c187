//! Free-text notes staff attach to a customer

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Uuid,
    pub unified_id: String,
    pub org_id: String,
    pub note_text: String,
    pub next_action: Option<String>,
    pub next_action_date: Option<i64>,
    pub is_deleted: bool,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Note {
    /// First 100 characters of the note, for activity previews
    pub fn preview(&self) -> String {
        self.note_text.chars().take(100).collect()
    }
}

/// Caller-supplied fields for creating or editing a note
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInput {
    pub note_text: String,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub next_action_date: Option<i64>,
    #[serde(default)]
    pub created_by: String,
}
