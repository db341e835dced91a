//! Item storage implementation using SQLite

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::db::{Database, parse_db_timestamp, to_db_timestamp};
use crate::item::{
    AggregateCounts, Disposition, ExtractedFields, Item, RawContent, ReprocessAuthorization,
};
use crate::{Error, Result};

const ITEM_COLUMNS: &str = "external_id, received_at, raw_content, disposition, \
     extracted_fields, processed_at, created_at, updated_at, attempts";

/// Durable keyed storage for ingested items
///
/// Owns uniqueness of `external_id`. Every write is a single transaction, so a
/// concurrent reader sees either the old or the new row, never a mix.
#[derive(Clone)]
pub struct ItemStore {
    db: Database,
}

impl ItemStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a store over a fresh in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert a new `PENDING` item unless `external_id` is already known.
    ///
    /// Returns the stored item and whether this call inserted it. An existing
    /// item is returned unchanged.
    pub fn upsert_if_absent(
        &self,
        external_id: &str,
        raw_content: &RawContent,
        received_at: DateTime<Utc>,
    ) -> Result<(Item, bool)> {
        let raw_json = serde_json::to_string(raw_content)?;
        let now = to_db_timestamp(&Utc::now());

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO items (external_id, received_at, raw_content, disposition, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4, ?4)
                 ON CONFLICT(external_id) DO NOTHING",
                params![external_id, to_db_timestamp(&received_at), raw_json, now],
            )? == 1;
            let item = query_item(&tx, external_id)?
                .ok_or_else(|| Error::NotFound(external_id.to_string()))?;
            tx.commit()?;

            if inserted {
                debug!(external_id, "Inserted new pending item");
            }
            Ok((item, inserted))
        })
    }

    /// Whether `external_id` has already been ingested
    pub fn contains(&self, external_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM items WHERE external_id = ?1)",
                params![external_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Note a classification attempt that produced no verdict. The item stays
    /// `PENDING` and moves behind items that were tried less recently.
    pub fn record_failed_attempt(&self, external_id: &str, at: DateTime<Utc>) -> Result<()> {
        let at = to_db_timestamp(&at);
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE items SET attempts = attempts + 1, last_attempt_at = ?2
                 WHERE external_id = ?1 AND disposition = 'PENDING'",
                params![external_id, at],
            )?;
            Ok(())
        })
    }

    /// Load an item by external id
    pub fn get(&self, external_id: &str) -> Result<Option<Item>> {
        self.db.with_conn(|conn| query_item(conn, external_id))
    }

    /// Record a classification verdict.
    ///
    /// Fails with `NotFound` when the item is absent, and with
    /// `InvalidTransition` when the item is already terminal and no matching
    /// reprocess authorization is supplied. `PENDING` is never a valid target.
    pub fn mark_classified(
        &self,
        external_id: &str,
        disposition: Disposition,
        extracted_fields: Option<&ExtractedFields>,
        processed_at: DateTime<Utc>,
        authorization: Option<&ReprocessAuthorization>,
    ) -> Result<Item> {
        let authorized = authorization.is_some_and(|a| a.external_id() == external_id);
        if authorization.is_some() && !authorized {
            warn!(external_id, "Ignoring reprocess authorization issued for another item");
        }

        let fields_json = extracted_fields.map(serde_json::to_string).transpose()?;
        let now = to_db_timestamp(&Utc::now());

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let current = query_disposition(&tx, external_id)?
                .ok_or_else(|| Error::NotFound(external_id.to_string()))?;

            if disposition == Disposition::Pending || (current.is_terminal() && !authorized) {
                return Err(Error::InvalidTransition {
                    external_id: external_id.to_string(),
                    from: current,
                    to: disposition,
                });
            }

            tx.execute(
                "UPDATE items
                 SET disposition = ?2, extracted_fields = ?3, processed_at = ?4, updated_at = ?5
                 WHERE external_id = ?1",
                params![
                    external_id,
                    disposition.as_str(),
                    fields_json,
                    to_db_timestamp(&processed_at),
                    now,
                ],
            )?;
            let item = query_item(&tx, external_id)?
                .ok_or_else(|| Error::NotFound(external_id.to_string()))?;
            tx.commit()?;

            debug!(external_id, from = %current, to = %disposition, "Item classified");
            Ok(item)
        })
    }

    /// Reopen a terminal item for reclassification.
    ///
    /// The only path from a terminal disposition back to `PENDING`; it needs an
    /// authorization drained from the reprocess queue.
    pub fn reset_to_pending(&self, authorization: &ReprocessAuthorization) -> Result<Item> {
        let external_id = authorization.external_id();
        let now = to_db_timestamp(&Utc::now());

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !reopen_item(&tx, external_id, &now)? {
                return Err(Error::NotFound(external_id.to_string()));
            }
            let item = query_item(&tx, external_id)?
                .ok_or_else(|| Error::NotFound(external_id.to_string()))?;
            tx.commit()?;

            info!(external_id, "Item reset to PENDING for reprocessing");
            Ok(item)
        })
    }

    /// List items ordered by `received_at`, ties broken by `external_id`
    pub fn list_items(
        &self,
        limit: usize,
        offset: usize,
        order_by_received_desc: bool,
    ) -> Result<Vec<Item>> {
        let order = if order_by_received_desc { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             ORDER BY received_at {order}, external_id ASC
             LIMIT ?1 OFFSET ?2"
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params![limit as i64, offset as i64], item_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    /// Pending items, at most `limit`: never-tried first, then least recently
    /// tried, oldest message first within each group
    pub fn list_pending(&self, limit: usize) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE disposition = 'PENDING'
             ORDER BY last_attempt_at IS NOT NULL, last_attempt_at ASC,
                      received_at ASC, external_id ASC
             LIMIT ?1"
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params![limit as i64], item_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    /// Counts per disposition, taken in one statement
    pub fn aggregate_counts(&self) -> Result<AggregateCounts> {
        self.db.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN disposition = 'VALID' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN disposition = 'IRRELEVANT' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN disposition = 'NOT_VALID' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN disposition = 'PENDING' THEN 1 ELSE 0 END), 0)
                 FROM items",
                [],
                |row| {
                    Ok(AggregateCounts {
                        total: row.get::<_, i64>(0)? as u64,
                        valid: row.get::<_, i64>(1)? as u64,
                        irrelevant: row.get::<_, i64>(2)? as u64,
                        not_valid: row.get::<_, i64>(3)? as u64,
                        pending: row.get::<_, i64>(4)? as u64,
                    })
                },
            )?;
            Ok(counts)
        })
    }

    /// Number of items classified at or after `since`
    pub fn count_processed_since(&self, since: DateTime<Utc>) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM items WHERE processed_at IS NOT NULL AND processed_at >= ?1",
                params![to_db_timestamp(&since)],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

/// Put an item back to `PENDING` with a clean attempt history. Returns
/// `false` when the item does not exist.
pub(crate) fn reopen_item(conn: &Connection, external_id: &str, now: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE items
         SET disposition = 'PENDING', extracted_fields = NULL, processed_at = NULL,
             attempts = 0, last_attempt_at = NULL, updated_at = ?2
         WHERE external_id = ?1",
        params![external_id, now],
    )?;
    Ok(updated > 0)
}

pub(crate) fn query_item(conn: &Connection, external_id: &str) -> Result<Option<Item>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE external_id = ?1");
    let item = conn
        .query_row(&sql, params![external_id], item_from_row)
        .optional()?;
    Ok(item)
}

fn query_disposition(conn: &Connection, external_id: &str) -> Result<Option<Disposition>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT disposition FROM items WHERE external_id = ?1",
            params![external_id],
            |row| row.get(0),
        )
        .optional()?;
    value.map(|v| v.parse()).transpose()
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let received_at: String = row.get(1)?;
    let raw_content: String = row.get(2)?;
    let disposition: String = row.get(3)?;
    let extracted_fields: Option<String> = row.get(4)?;
    let processed_at: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let attempts: i64 = row.get(8)?;

    let raw_content: RawContent = serde_json::from_str(&raw_content).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let disposition: Disposition = disposition.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let extracted_fields = extracted_fields
        .map(|json| serde_json::from_str::<ExtractedFields>(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Item {
        external_id: row.get(0)?,
        received_at: parse_db_timestamp(1, &received_at)?,
        raw_content,
        disposition,
        extracted_fields,
        processed_at: processed_at
            .map(|ts| parse_db_timestamp(5, &ts))
            .transpose()?,
        created_at: parse_db_timestamp(6, &created_at)?,
        updated_at: parse_db_timestamp(7, &updated_at)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
    })
}
