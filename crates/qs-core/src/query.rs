//! Read-only query surface over the item store

use std::sync::Arc;

use chrono::Utc;

use crate::item::{AggregateCounts, Disposition, Item, ItemStore};
use crate::render::{DocumentRenderer, RenderedDocument};
use crate::{Error, Result};

/// Hard cap on one page of items
pub const MAX_PAGE_SIZE: usize = 500;

/// Read access for the HTTP layer; never writes
#[derive(Clone)]
pub struct QueryService {
    store: ItemStore,
    renderer: Arc<dyn DocumentRenderer>,
}

impl QueryService {
    pub fn new(store: ItemStore, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { store, renderer }
    }

    pub fn list_items(&self, limit: usize, offset: usize, newest_first: bool) -> Result<Vec<Item>> {
        self.store
            .list_items(limit.min(MAX_PAGE_SIZE), offset, newest_first)
    }

    pub fn get_item(&self, external_id: &str) -> Result<Item> {
        self.store
            .get(external_id)?
            .ok_or_else(|| Error::NotFound(external_id.to_string()))
    }

    pub fn aggregate_counts(&self) -> Result<AggregateCounts> {
        self.store.aggregate_counts()
    }

    /// Render the quotation document for a `VALID` item
    pub fn render_document(&self, external_id: &str) -> Result<RenderedDocument> {
        let item = self.get_item(external_id)?;
        let fields = item.valid_fields().ok_or_else(|| Error::InvalidState {
            external_id: external_id.to_string(),
            expected: Disposition::Valid,
            actual: item.disposition,
        })?;
        self.renderer.render(&item, fields, Utc::now())
    }
}
