//! Mailbox client abstraction

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use qs_core::RawContent;

use crate::error::Result;

/// One message as delivered by the mailbox
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxMessage {
    /// Stable mailbox-assigned id
    pub external_id: String,
    pub raw_content: RawContent,
    pub received_at: DateTime<Utc>,
}

/// Source of inbound messages plus the OAuth handshake that unlocks it
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// URL the user visits to grant access; `state` is echoed to the callback
    fn authorization_url(&self, state: &str) -> Result<String>;

    /// Exchange an authorization code for a token and persist it
    async fn authenticate(&self, code: &str) -> Result<()>;

    async fn is_authenticated(&self) -> bool;

    /// Forget the stored token
    async fn logout(&self) -> Result<()>;

    /// Up to `limit` messages received at or after `since` (any time when
    /// `None`) whose id `known` rejects, returned oldest first.
    ///
    /// When more than `limit` qualify, the newest ones are returned; a batch
    /// of exactly `limit` therefore may leave older messages behind.
    async fn list_new_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        known: &(dyn for<'k> Fn(&'k str) -> bool + Sync),
    ) -> Result<Vec<MailboxMessage>>;
}
