//! Error types for qs-core

use thiserror::Error;

use crate::item::Disposition;

/// Main error type for qs-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for {external_id}: {from} -> {to}")]
    InvalidTransition {
        external_id: String,
        from: Disposition,
        to: Disposition,
    },

    #[error("Invalid state for {external_id}: expected {expected}, found {actual}")]
    InvalidState {
        external_id: String,
        expected: Disposition,
        actual: Disposition,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_) | Error::Http(_))
    }

    /// Short machine-readable name used in API rejection bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::InvalidState { .. } => "invalid_state",
            Error::UpstreamUnavailable(_) | Error::Http(_) => "upstream_unavailable",
            _ => "internal",
        }
    }
}

/// Result type alias for qs-core
pub type Result<T> = std::result::Result<T, Error>;
