//! HTTP-facing error type
//!
//! Handlers return [`ApiResult`]; engine errors convert through `?` and are
//! mapped onto a status code by their kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] crm_common::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        use crm_common::Error as E;
        match self {
            ApiError::NotFound(msg) | ApiError::Engine(E::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
            }
            ApiError::BadRequest(msg) | ApiError::Engine(E::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
            }
            ApiError::Conflict(msg) | ApiError::Engine(E::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone()),
            ApiError::Engine(E::Database(e)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", e.to_string())
            }
            ApiError::Engine(other) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", other.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            error!(code, %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
