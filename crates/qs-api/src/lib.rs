//! qs-api: HTTP API for QuoteSnap
//!
//! Read-only views over the item store, reprocess requests, document
//! download, monitor control and the mailbox OAuth flow. Built with axum.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod oauth;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, router, start_server};
