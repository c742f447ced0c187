//! crm-engine library
//!
//! Identity resolution, metrics aggregation, classification and activity
//! history for unified customers, served over an organization-scoped HTTP API.

pub mod api;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod pagination;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};
pub use crate::orchestrator::Orchestrator;
pub use crate::services::{CustomerService, Dashboard};

use axum::Router;
use chrono::{DateTime, Utc};
use crm_common::config::EngineSettings;
use crm_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub service: CustomerService,
    pub dashboard: Dashboard,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: Arc<EngineSettings>) -> Self {
        Self {
            service: CustomerService::new(db.clone(), settings.clone(), Some(event_bus.clone())),
            dashboard: Dashboard::new(db.clone(), settings),
            db,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::customer_routes())
        .merge(api::dashboard_routes())
        .merge(api::note_routes())
        .merge(api::admin_routes())
        .merge(api::source_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
