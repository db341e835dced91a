//! Error types for qs-schedule

use thiserror::Error;

/// qs-schedule error type
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Mailbox is not authenticated")]
    NotAuthenticated,

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] qs_email::EmailError),

    #[error("Core error: {0}")]
    Core(#[from] qs_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ScheduleError>;
