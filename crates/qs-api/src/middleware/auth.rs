//! Authentication middleware
//!
//! API key check for mutating endpoints.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::server::AppState;

/// Require `Authorization: Bearer <key>` when an API key is configured
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if validate_api_key(provided, state.api.key.as_deref()) {
        Ok(next.run(request).await)
    } else {
        warn!("Rejected request to {} without a valid API key", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// No key configured means open access
pub fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> bool {
    match (provided, expected) {
        (Some(p), Some(e)) => p == e,
        (_, None) => true,
        (None, Some(_)) => false,
    }
}
