//! Ingestion pipeline
//!
//! One cycle: drain the reprocess queue and reopen those items, fetch new
//! messages, insert unseen ones as `PENDING`, then classify every pending item
//! up to the batch limit.
//!
//! The mailbox hands back the newest unseen messages first, so a full batch
//! may leave older ones behind. The fetch cursor only moves once a batch
//! comes back short, which means the backlog below it has been drained.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use qs_core::{Disposition, Error as CoreError, Extractor, ItemStore, ReprocessQueue};
use qs_email::{MailboxClient, MailboxMessage};

use crate::config::PipelineSettings;

/// Outcome of one ingestion cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub inserted: usize,
    pub reset: usize,
    pub classified: usize,
    pub failed: usize,
    /// Set when the mailbox fetch failed; the rest of the cycle still ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

/// Something the monitoring scheduler can run once per tick
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> CycleReport;
}

/// The only writer of classification results
pub struct IngestionPipeline {
    store: ItemStore,
    queue: ReprocessQueue,
    mailbox: Arc<dyn MailboxClient>,
    extractor: Arc<dyn Extractor>,
    settings: PipelineSettings,
    cursor: Mutex<FetchCursor>,
}

#[derive(Debug, Default)]
struct FetchCursor {
    /// Lower bound handed to the mailbox
    committed: Option<DateTime<Utc>>,
    /// Newest `received_at` fetched since `committed` last moved
    seen: Option<DateTime<Utc>>,
}

impl IngestionPipeline {
    pub fn new(
        store: ItemStore,
        queue: ReprocessQueue,
        mailbox: Arc<dyn MailboxClient>,
        extractor: Arc<dyn Extractor>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            queue,
            mailbox,
            extractor,
            settings,
            cursor: Mutex::new(FetchCursor::default()),
        }
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor.lock().map(|c| c.committed).unwrap_or(None)
    }

    fn advance_cursor(&self, messages: &[MailboxMessage]) {
        let Ok(mut cursor) = self.cursor.lock() else {
            return;
        };
        if let Some(newest) = messages.iter().map(|m| m.received_at).max() {
            if cursor.seen.is_none_or(|s| newest > s) {
                cursor.seen = Some(newest);
            }
        }
        if messages.len() >= self.settings.batch_limit {
            debug!("Full batch, holding fetch cursor until the backlog drains");
            return;
        }
        if let Some(seen) = cursor.seen.take() {
            if cursor.committed.is_none_or(|c| seen > c) {
                cursor.committed = Some(seen);
            }
        }
    }

    /// Step 1: reopen every item waiting in the reprocess queue
    fn reset_drained(&self, report: &mut CycleReport) {
        match self.queue.reopen_queued() {
            Ok(items) => report.reset = items.len(),
            Err(e) => error!("Failed to reopen queued items, will retry next cycle: {}", e),
        }
    }

    /// Step 2: fetch new messages, bounded in time and count
    async fn fetch(&self) -> qs_core::Result<Vec<MailboxMessage>> {
        let since = self.cursor();
        let known = |id: &str| self.store.contains(id).unwrap_or(false);
        let fetch = self
            .mailbox
            .list_new_messages(since, self.settings.batch_limit, &known);
        match timeout(self.settings.fetch_timeout, fetch).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CoreError::UpstreamUnavailable(format!(
                "mailbox fetch timed out after {:?}",
                self.settings.fetch_timeout
            ))),
        }
    }

    /// Step 3: dedup gate
    fn ingest(&self, messages: &[MailboxMessage], report: &mut CycleReport) {
        for message in messages {
            match self.store.upsert_if_absent(
                &message.external_id,
                &message.raw_content,
                message.received_at,
            ) {
                Ok((_, true)) => report.inserted += 1,
                Ok((_, false)) => {
                    debug!(external_id = %message.external_id, "Already ingested, skipping");
                }
                Err(e) => {
                    error!(external_id = %message.external_id, "Failed to store message: {}", e);
                }
            }
        }
    }

    /// Note an attempt that left the item `PENDING`, so it yields its batch
    /// slot to items that were tried less recently
    fn record_failure(&self, id: &str, report: &mut CycleReport) {
        report.failed += 1;
        if let Err(e) = self.store.record_failed_attempt(id, Utc::now()) {
            error!(external_id = id, "Failed to record attempt: {}", e);
        }
    }

    /// Step 4: classify pending items, least recently tried first
    async fn classify_pending(&self, report: &mut CycleReport) {
        let pending = match self.store.list_pending(self.settings.batch_limit) {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to list pending items: {}", e);
                return;
            }
        };

        for item in pending {
            let id = item.external_id.as_str();
            let verdict = match timeout(
                self.settings.extract_timeout,
                self.extractor.classify(&item.raw_content),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CoreError::UpstreamUnavailable(format!(
                    "extraction timed out after {:?}",
                    self.settings.extract_timeout
                ))),
            };

            let classification = match verdict {
                Ok(c) if c.disposition == Disposition::Pending => {
                    warn!(external_id = id, "Extractor returned PENDING, will retry");
                    self.record_failure(id, report);
                    continue;
                }
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        external_id = id,
                        retryable = e.is_retryable(),
                        attempts = item.attempts + 1,
                        "Extraction failed: {}",
                        e
                    );
                    self.record_failure(id, report);
                    continue;
                }
            };

            match self.store.mark_classified(
                id,
                classification.disposition,
                classification.fields.as_ref(),
                Utc::now(),
                None,
            ) {
                Ok(_) => {
                    report.classified += 1;
                    info!(external_id = id, disposition = %classification.disposition, "Item classified");
                }
                Err(e @ CoreError::InvalidTransition { .. }) => {
                    warn!(external_id = id, "Skipping item: {}", e);
                }
                Err(e) => {
                    error!(external_id = id, "Failed to record classification: {}", e);
                    report.failed += 1;
                }
            }
        }
    }
}

#[async_trait]
impl CycleRunner for IngestionPipeline {
    async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport {
            started_at: Utc::now(),
            ..Default::default()
        };

        self.reset_drained(&mut report);

        match self.fetch().await {
            Ok(messages) => {
                report.fetched = messages.len();
                self.ingest(&messages, &mut report);
                self.advance_cursor(&messages);
            }
            Err(e) => {
                warn!("Mailbox fetch failed, cursor unchanged: {}", e);
                report.fetch_error = Some(e.to_string());
            }
        }

        self.classify_pending(&mut report).await;

        report.finished_at = Utc::now();
        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            reset = report.reset,
            classified = report.classified,
            failed = report.failed,
            "Ingestion cycle finished"
        );
        report
    }
}
