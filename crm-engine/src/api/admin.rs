//! Maintenance endpoints

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};
use crm_common::models::ActivityDomain;
use serde::Deserialize;

use super::split_list;
use crate::error::{ApiError, ApiResult};
use crate::services::backfill::{BackfillKinds, BackfillResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct BackfillQuery {
    #[serde(default)]
    pub limit: i64,
    /// Comma-separated subset of `order,conversation,note`
    pub types: Option<String>,
}

/// POST /api/orgs/:org/activities/backfill?limit=N&types=order,note
pub async fn backfill_activity(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<BackfillQuery>,
) -> ApiResult<Json<BackfillResult>> {
    let domains = split_list(query.types.as_deref())
        .into_iter()
        .map(str::parse::<ActivityDomain>)
        .collect::<crm_common::Result<Vec<_>>>()?;
    if let Some(other) = domains.iter().find(|d| {
        !matches!(d, ActivityDomain::Order | ActivityDomain::Conversation | ActivityDomain::Note)
    }) {
        return Err(ApiError::BadRequest(format!("{other} activities cannot be backfilled")));
    }

    let kinds = BackfillKinds::from_domains(&domains);
    Ok(Json(state.service.backfill_activity(&org, query.limit, kinds).await?))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/api/orgs/:org/activities/backfill", post(backfill_activity))
}
