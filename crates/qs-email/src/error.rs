//! Error types for qs-email

use thiserror::Error;

/// qs-email error type
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Mailbox configuration error: {0}")]
    Config(String),

    #[error("Mailbox not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Mailbox API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email parsing error: {0}")]
    Parsing(String),

    #[error("Token storage error: {0}")]
    TokenStorage(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EmailError>;

impl From<EmailError> for qs_core::Error {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::Config(msg) => qs_core::Error::Config(msg),
            EmailError::TokenStorage(e) => qs_core::Error::Io(e),
            other => qs_core::Error::UpstreamUnavailable(other.to_string()),
        }
    }
}
