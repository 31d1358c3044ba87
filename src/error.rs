//! Engine error types shared by the metrics, quota and live view layers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;

/// Errors surfaced to API consumers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A result or metadata fetch failed. Retried on the next refresh.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("not found")]
    NotFound,
    #[error("check limit reached ({current}/{limit})")]
    QuotaExceeded { current: u32, limit: u32 },
    #[error("interval of {requested} minutes is below the plan minimum of {minimum} minutes")]
    InvalidInterval { requested: u32, minimum: u32 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("view closed")]
    ViewClosed,
    #[error("billing provider error: {0}")]
    Billing(String),
}

impl EngineError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::SourceUnavailable(_) => "source_unavailable",
            EngineError::NotFound => "not_found",
            EngineError::QuotaExceeded { .. } => "quota_exceeded",
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::ViewClosed => "view_closed",
            EngineError::Billing(_) => "billing",
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::SourceUnavailable(_) | EngineError::Billing(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            EngineError::InvalidInterval { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::ViewClosed => StatusCode::GONE,
            EngineError::Billing(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => EngineError::NotFound,
            DbError::QuotaExceeded { current, limit } => EngineError::QuotaExceeded { current, limit },
            other => EngineError::SourceUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            retryable: self.is_recoverable(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
