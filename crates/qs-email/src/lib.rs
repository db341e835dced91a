//! qs-email: Mailbox access for QuoteSnap
//!
//! The [`MailboxClient`] trait the ingestion pipeline reads from, and its
//! Gmail implementation with OAuth2 token handling.

pub mod error;
pub mod gmail;
pub mod mailbox;
pub mod token;

pub use error::{EmailError, Result};
pub use gmail::{GmailClient, GmailEndpoints};
pub use mailbox::{MailboxClient, MailboxMessage};
pub use token::{Token, TokenStore};
