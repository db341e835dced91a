//! Route definitions
//!
//! Reads and the OAuth flow are public; everything that changes state sits
//! behind the API key middleware.

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers::{
    auth_callback, auth_login, auth_logout, auth_status, generate_quotation, get_email, health,
    list_emails, monitor_start, monitor_status, monitor_stop, reprocess_email, stats,
};
use crate::middleware::auth::auth_middleware;
use crate::server::AppState;

/// Create the API router
pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/emails/{external_id}/reprocess", post(reprocess_email))
        .route("/api/monitor/start", post(monitor_start))
        .route("/api/monitor/stop", post(monitor_stop))
        .route("/api/auth/logout", post(auth_logout))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/api/health", get(health))
        // Items
        .route("/api/emails", get(list_emails))
        .route("/api/emails/stats", get(stats))
        .route("/api/emails/{external_id}", get(get_email))
        .route("/api/quotation/generate/{external_id}", get(generate_quotation))
        // Monitor
        .route("/api/monitor/status", get(monitor_status))
        // Mailbox OAuth
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/login", get(auth_login))
        .route("/api/auth/callback", get(auth_callback))
        .merge(protected)
}
