//! Error types for qs-api

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use qs_schedule::ScheduleError;

/// qs-api error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Mailbox is not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Core(#[from] qs_core::Error),
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NotAuthenticated => ApiError::NotAuthenticated,
            ScheduleError::Mailbox(e) => ApiError::Core(e.into()),
            ScheduleError::Core(e) => ApiError::Core(e),
        }
    }
}

impl From<qs_email::EmailError> for ApiError {
    fn from(err: qs_email::EmailError) -> Self {
        ApiError::Core(err.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;

/// Rejection body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    pub retryable: bool,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::NotAuthenticated => (StatusCode::CONFLICT, "invalid_state"),
            ApiError::Core(e) => {
                let status = match e {
                    qs_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    qs_core::Error::InvalidState { .. }
                    | qs_core::Error::InvalidTransition { .. } => StatusCode::CONFLICT,
                    qs_core::Error::UpstreamUnavailable(_) | qs_core::Error::Http(_) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind())
            }
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Core(e) if e.is_retryable())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!("API error: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
