use std::sync::OnceLock;

use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::config::Environment;
use crate::job_store::JobStoreError;
use crate::storage::StorageError;

use super::models::ErrorResponse;

/// Set once at startup from `telemetry.environment` (§7 "production omits
/// stack traces and internal paths; development may include them"). A
/// process-wide flag rather than threading `Config` through every error
/// conversion site keeps `?` ergonomic across the handler layer; the
/// single-instance non-goal (§1) means there is only ever one process to
/// configure.
static PRODUCTION: OnceLock<bool> = OnceLock::new();

pub fn set_environment(environment: Environment) {
    let _ = PRODUCTION.set(environment.is_production());
}

fn is_production() -> bool {
    *PRODUCTION.get().unwrap_or(&false)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),
    #[error("signature verification failed")]
    Unauthorized,
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("sku has reached its configured image limit")]
    RateLimited,
    #[error("job is not in a state that allows this action: {0}")]
    Conflict(String),
    #[error("server misconfigured: {0}")]
    Misconfigured(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Misconfigured(_) => "MISCONFIGURED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Validation(fields) => Some(fields.join("; ")),
            ApiError::NotFound(msg) | ApiError::Conflict(msg) => Some(msg.clone()),
            ApiError::PayloadTooLarge(bytes) => Some(format!("{bytes} bytes exceeds configured cap")),
            ApiError::Misconfigured(msg) | ApiError::Internal(msg) => {
                if is_production() {
                    None
                } else {
                    Some(msg.clone())
                }
            }
            ApiError::Unauthorized | ApiError::RateLimited => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, ApiError::Internal(_) | ApiError::Misconfigured(_)) {
            tracing::error!(error = %self, "request failed");
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JobStoreError> for ApiError {
    fn from(value: JobStoreError) -> Self {
        match value {
            JobStoreError::JobNotFound(id) => ApiError::NotFound(id),
            JobStoreError::Transition(e) => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        ApiError::Internal(value.to_string())
    }
}
