//! In-process fakes for the mailbox and the extraction service

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use qs_core::{Classification, Extractor, RawContent};
use qs_email::{EmailError, MailboxClient, MailboxMessage};

/// Message whose subject doubles as its id, so the extractor can key on it
pub fn message(id: &str, minute: u32) -> MailboxMessage {
    MailboxMessage {
        external_id: id.to_string(),
        raw_content: RawContent::new(id, "buyer@example.com", format!("Request {id}")),
        received_at: Utc.with_ymd_and_hms(2025, 1, 6, 9, minute, 0).unwrap(),
    }
}

#[derive(Default)]
pub struct FakeMailbox {
    pub messages: Mutex<Vec<MailboxMessage>>,
    pub authenticated: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub calls: Mutex<Vec<(Option<DateTime<Utc>>, usize)>>,
}

impl FakeMailbox {
    pub fn with_messages(messages: Vec<MailboxMessage>) -> Self {
        let mailbox = Self::default();
        *mailbox.messages.lock().unwrap() = messages;
        mailbox.authenticated.store(true, Ordering::SeqCst);
        mailbox
    }
}

#[async_trait]
impl MailboxClient for FakeMailbox {
    fn authorization_url(&self, state: &str) -> qs_email::Result<String> {
        Ok(format!("https://auth.example.com/?state={state}"))
    }

    async fn authenticate(&self, code: &str) -> qs_email::Result<()> {
        if code == "bad" {
            return Err(EmailError::AuthFailed("invalid_grant".into()));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn logout(&self) -> qs_email::Result<()> {
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_new_messages(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        known: &(dyn for<'k> Fn(&'k str) -> bool + Sync),
    ) -> qs_email::Result<Vec<MailboxMessage>> {
        self.calls.lock().unwrap().push((since, limit));
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(EmailError::Api {
                status: 503,
                body: "backend error".into(),
            });
        }
        // newest first, like Gmail, then handed back oldest first
        let mut matching: Vec<MailboxMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| since.is_none_or(|s| m.received_at >= s))
            .filter(|m| !known(m.external_id.as_str()))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        matching.truncate(limit);
        matching.reverse();
        Ok(matching)
    }
}

/// Scripted extractor: answers per subject, in order; unscripted subjects
/// come back `IRRELEVANT`
#[derive(Default)]
pub struct FakeExtractor {
    pub script: Mutex<HashMap<String, VecDeque<qs_core::Result<Classification>>>>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn answer(&self, subject: &str, result: qs_core::Result<Classification>) {
        self.script
            .lock()
            .unwrap()
            .entry(subject.to_string())
            .or_default()
            .push_back(result);
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn classify(&self, raw: &RawContent) -> qs_core::Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&raw.subject)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Classification::irrelevant()))
    }
}
