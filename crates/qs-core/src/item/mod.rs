//! Ingested items, their store and the reprocess queue
//!
//! Items are persisted in SQLite. The store owns `external_id` uniqueness and
//! the disposition state machine; the reprocess queue is the single, explicit
//! exception to monotonic transitions.

mod reprocess;
mod store;
mod types;

pub use reprocess::{ReprocessAuthorization, ReprocessQueue};
pub use store::ItemStore;
pub use types::{
    AggregateCounts, AttachmentRef, Classification, Disposition, ExtractedFields, Item, RawContent,
    RequirementLine,
};
