//! Extraction service
//!
//! Turns the raw content of an inbound message into a [`Classification`].

mod llm;

use async_trait::async_trait;

use crate::item::{Classification, RawContent};
use crate::Result;

pub use llm::LlmExtractor;

/// Classifier for inbound messages
///
/// Failures are reported as [`crate::Error::UpstreamUnavailable`]; an
/// implementation must never encode a failure as a disposition, and must
/// never return `PENDING`.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Classify one message and extract quotation fields when relevant
    async fn classify(&self, raw: &RawContent) -> Result<Classification>;
}
