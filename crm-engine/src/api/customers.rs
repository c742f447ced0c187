//! Customer profile and recalculation endpoints
//!
//! GET  /api/orgs/:org/customers/:id
//! GET  /api/orgs/:org/customers/:id/full
//! POST /api/orgs/:org/customers/:id/recalculate
//! POST /api/orgs/:org/customers/recalculate-all
//! GET  /api/orgs/:org/customers/refresh-candidates

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use crm_common::models::{ActivityDomain, UnifiedCustomer};
use serde::{Deserialize, Serialize};

use super::split_list;
use crate::error::ApiResult;
use crate::services::profile::{FullProfile, FullProfileOptions};
use crate::services::recalculate::{RecalculateAllResult, RecalculateResult};
use crate::services::refresh::RefreshMode;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FullProfileQuery {
    /// Comma-separated activity domains
    pub domains: Option<String>,
    pub viewer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    pub mode: Option<String>,
    #[serde(default)]
    pub batch: i64,
    #[serde(default)]
    pub skip: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshCandidatesResponse {
    pub unified_ids: Vec<String>,
    pub count: usize,
    /// Offset for the next batch
    pub next_skip: i64,
}

/// GET /api/orgs/:org/customers/:id
pub async fn get_profile(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, String)>,
) -> ApiResult<Json<UnifiedCustomer>> {
    Ok(Json(state.service.get_profile(&org, &id).await?))
}

/// GET /api/orgs/:org/customers/:id/full?domains=order,note
pub async fn get_full_profile(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, String)>,
    Query(query): Query<FullProfileQuery>,
) -> ApiResult<Json<FullProfile>> {
    let domains = split_list(query.domains.as_deref())
        .into_iter()
        .map(str::parse::<ActivityDomain>)
        .collect::<crm_common::Result<Vec<_>>>()?;
    let options = FullProfileOptions {
        domains,
        viewer: query.viewer,
    };
    Ok(Json(state.service.get_full_profile(&org, &id, &options).await?))
}

/// POST /api/orgs/:org/customers/:id/recalculate
pub async fn recalculate_customer(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, String)>,
) -> ApiResult<Json<RecalculateResult>> {
    Ok(Json(state.service.recalculate_customer(&org, &id).await?))
}

/// POST /api/orgs/:org/customers/recalculate-all?limit=N
pub async fn recalculate_all(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<RecalculateAllResult>> {
    Ok(Json(state.service.recalculate_all(&org, query.limit).await?))
}

/// GET /api/orgs/:org/customers/refresh-candidates?mode=smart&batch=500&skip=0
pub async fn refresh_candidates(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<Json<RefreshCandidatesResponse>> {
    let mode = match query.mode.as_deref() {
        Some(raw) => raw.parse::<RefreshMode>()?,
        None => RefreshMode::default(),
    };
    let unified_ids = state
        .service
        .list_refresh_candidates(&org, mode, query.batch, query.skip)
        .await?;
    let count = unified_ids.len();
    Ok(Json(RefreshCandidatesResponse {
        next_skip: query.skip.max(0) + count as i64,
        count,
        unified_ids,
    }))
}

pub fn customer_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orgs/:org/customers/refresh-candidates", get(refresh_candidates))
        .route("/api/orgs/:org/customers/recalculate-all", post(recalculate_all))
        .route("/api/orgs/:org/customers/:id", get(get_profile))
        .route("/api/orgs/:org/customers/:id/full", get(get_full_profile))
        .route("/api/orgs/:org/customers/:id/recalculate", post(recalculate_customer))
}
