//! Dashboard endpoints
//!
//! Axis filters take comma-separated labels; several labels for one axis
//! are alternatives, different axes must all match.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use crm_common::models::Axis;
use crm_common::time::now_ms;
use serde::Deserialize;

use super::split_list;
use crate::error::{ApiError, ApiResult};
use crate::pagination::Page;
use crate::services::dashboard::{
    normalize_journey_filter, parse_sort_field, DashboardItem, DashboardQuery, Distribution,
    FunnelStage, GroupSummary, Matrix, PriorityGroup,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CustomerListQuery {
    pub journey: Option<String>,
    pub channel: Option<String>,
    pub value: Option<String>,
    pub lifecycle: Option<String>,
    pub loyalty: Option<String>,
    pub momentum: Option<String>,
    pub group: Option<String>,
    pub sort: Option<String>,
    /// "asc" or "desc" (default)
    pub order: Option<String>,
    pub page: Option<i64>,
}

impl CustomerListQuery {
    fn axis_values(&self, axis: Axis) -> Option<&str> {
        match axis {
            Axis::Journey => self.journey.as_deref(),
            Axis::Channel => self.channel.as_deref(),
            Axis::Value => self.value.as_deref(),
            Axis::Lifecycle => self.lifecycle.as_deref(),
            Axis::Loyalty => self.loyalty.as_deref(),
            Axis::Momentum => self.momentum.as_deref(),
        }
    }

    fn into_dashboard_query(self) -> ApiResult<DashboardQuery> {
        let mut query = DashboardQuery::default();

        for &axis in Axis::ALL {
            let raw = split_list(self.axis_values(axis));
            if raw.is_empty() {
                continue;
            }
            let known = axis.labels();
            let mut labels = Vec::with_capacity(raw.len());
            for value in raw {
                let label = match axis {
                    // Legacy journey names; some of them select nothing
                    Axis::Journey => match normalize_journey_filter(value) {
                        Some(label) => label,
                        None => continue,
                    },
                    _ => value.to_string(),
                };
                if !known.contains(&label.as_str()) {
                    return Err(ApiError::BadRequest(format!("unknown {axis} label: {value:?}")));
                }
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            if labels.is_empty() {
                // Only unsupported legacy values: match nobody rather than everybody
                query.match_nothing = true;
                continue;
            }
            query.labels.push((axis, labels));
        }

        query.groups = split_list(self.group.as_deref())
            .into_iter()
            .map(str::parse::<PriorityGroup>)
            .collect::<crm_common::Result<_>>()?;

        if let Some(sort) = self.sort.as_deref() {
            query.sort = parse_sort_field(sort)?;
        }
        query.ascending = match self.order.as_deref() {
            None | Some("desc") => false,
            Some("asc") => true,
            Some(other) => return Err(ApiError::BadRequest(format!("unknown sort order: {other:?}"))),
        };
        if let Some(page) = self.page {
            query.page = page;
        }
        Ok(query)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupsQuery {
    pub top: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatrixQuery {
    pub rows: Option<String>,
    pub cols: Option<String>,
}

/// GET /api/orgs/:org/dashboard/customers
pub async fn list_customers(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(params): Query<CustomerListQuery>,
) -> ApiResult<Json<Page<DashboardItem>>> {
    let query = params.into_dashboard_query()?;
    Ok(Json(state.dashboard.list_customers(&org, &query).await?))
}

/// GET /api/orgs/:org/dashboard/funnel
pub async fn journey_funnel(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> ApiResult<Json<Vec<FunnelStage>>> {
    Ok(Json(state.dashboard.journey_funnel(&org).await?))
}

/// GET /api/orgs/:org/dashboard/groups?top=10
pub async fn priority_groups(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<GroupsQuery>,
) -> ApiResult<Json<Vec<GroupSummary>>> {
    Ok(Json(state.dashboard.priority_groups(&org, query.top).await?))
}

/// GET /api/orgs/:org/dashboard/matrix?rows=value&cols=lifecycle
pub async fn matrix(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<MatrixQuery>,
) -> ApiResult<Json<Matrix>> {
    let (Some(rows), Some(cols)) = (query.rows.as_deref(), query.cols.as_deref()) else {
        return Err(ApiError::BadRequest("rows and cols are required".to_string()));
    };
    let row_axis: Axis = rows.parse()?;
    let col_axis: Axis = cols.parse()?;
    Ok(Json(state.dashboard.matrix(&org, row_axis, col_axis).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AsOfQuery {
    /// Epoch milliseconds; defaults to now
    pub at: Option<i64>,
}

/// GET /api/orgs/:org/dashboard/as-of?at=1700000000000
pub async fn distribution_as_of(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<Json<Distribution>> {
    let at = query.at.unwrap_or_else(now_ms);
    if at < 0 {
        return Err(ApiError::BadRequest(format!("invalid as-of time: {at}")));
    }
    Ok(Json(state.dashboard.distribution_as_of(&org, at).await?))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orgs/:org/dashboard/customers", get(list_customers))
        .route("/api/orgs/:org/dashboard/funnel", get(journey_funnel))
        .route("/api/orgs/:org/dashboard/groups", get(priority_groups))
        .route("/api/orgs/:org/dashboard/matrix", get(matrix))
        .route("/api/orgs/:org/dashboard/as-of", get(distribution_as_of))
}
