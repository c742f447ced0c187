//! Customer note endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use crm_common::models::{Note, NoteInput};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NoteListQuery {
    #[serde(default)]
    pub limit: i64,
}

fn parse_note_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid note id: {raw:?}")))
}

/// GET /api/orgs/:org/customers/:id/notes
pub async fn list_notes(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, String)>,
    Query(query): Query<NoteListQuery>,
) -> ApiResult<Json<Vec<Note>>> {
    Ok(Json(state.service.list_notes(&org, &id, query.limit).await?))
}

/// POST /api/orgs/:org/customers/:id/notes
pub async fn create_note(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, String)>,
    Json(input): Json<NoteInput>,
) -> ApiResult<(StatusCode, Json<Note>)> {
    let note = state.service.create_note(&org, &id, input).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// PUT /api/orgs/:org/notes/:note_id
pub async fn update_note(
    State(state): State<AppState>,
    Path((org, note_id)): Path<(String, String)>,
    Json(input): Json<NoteInput>,
) -> ApiResult<Json<Note>> {
    let note_id = parse_note_id(&note_id)?;
    Ok(Json(state.service.update_note(&org, note_id, input).await?))
}

/// DELETE /api/orgs/:org/notes/:note_id
pub async fn delete_note(
    State(state): State<AppState>,
    Path((org, note_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let note_id = parse_note_id(&note_id)?;
    state.service.soft_delete_note(&org, note_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn note_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orgs/:org/customers/:id/notes", get(list_notes).post(create_note))
        .route("/api/orgs/:org/notes/:note_id", put(update_note).delete(delete_note))
}
