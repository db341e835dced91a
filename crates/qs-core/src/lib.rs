//! qs-core: QuoteSnap core library
//!
//! Item model and SQLite store, the reprocess queue, the extraction service
//! abstraction with its LLM adapter, quotation rendering and the read-only
//! query surface.

pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod item;
pub mod llm;
pub mod query;
pub mod render;

pub use config::{
    ApiConfig, Config, ExtractionConfig, LlmProvider, MailboxConfig, MonitorConfig, StoreConfig,
};
pub use db::Database;
pub use error::{Error, Result};
pub use extraction::{Extractor, LlmExtractor};
pub use item::{
    AggregateCounts, AttachmentRef, Classification, Disposition, ExtractedFields, Item, ItemStore,
    RawContent, ReprocessAuthorization, ReprocessQueue, RequirementLine,
};
pub use llm::LlmClient;
pub use query::QueryService;
pub use render::{CsvQuotationRenderer, DocumentRenderer, RenderedDocument};
