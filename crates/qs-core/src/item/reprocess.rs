//! Reprocess queue
//!
//! Durable set of item ids awaiting forced reclassification. Draining the
//! queue is the only way to obtain a [`ReprocessAuthorization`], which in turn
//! is the only way to move a terminal item back to `PENDING`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::db::{Database, parse_db_timestamp, to_db_timestamp};
use crate::item::Item;
use crate::item::store::{query_item, reopen_item};
use crate::{Error, Result};

/// Permission to reopen one specific item, issued by [`ReprocessQueue::drain`]
#[derive(Debug, PartialEq, Eq)]
pub struct ReprocessAuthorization {
    external_id: String,
    enqueued_at: DateTime<Utc>,
    drained_at: DateTime<Utc>,
}

impl ReprocessAuthorization {
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn drained_at(&self) -> DateTime<Utc> {
        self.drained_at
    }
}

/// Queue of items awaiting reclassification
#[derive(Clone)]
pub struct ReprocessQueue {
    db: Database,
}

impl ReprocessQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Queue an existing item for reprocessing; returns the queue depth.
    ///
    /// Enqueuing an id that is already queued is a no-op.
    pub fn enqueue(&self, external_id: &str) -> Result<u64> {
        let now = to_db_timestamp(&Utc::now());

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM items WHERE external_id = ?1)",
                params![external_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::NotFound(external_id.to_string()));
            }

            let added = tx.execute(
                "INSERT OR IGNORE INTO reprocess_queue (external_id, enqueued_at) VALUES (?1, ?2)",
                params![external_id, now],
            )?;
            let depth: i64 = tx.query_row("SELECT COUNT(*) FROM reprocess_queue", [], |row| row.get(0))?;
            tx.commit()?;

            if added > 0 {
                info!(external_id, depth, "Item queued for reprocessing");
            } else {
                debug!(external_id, "Item already queued for reprocessing");
            }
            Ok(depth as u64)
        })
    }

    /// Remove and return every queued id, oldest request first.
    ///
    /// A single `DELETE ... RETURNING` statement, so an id enqueued
    /// concurrently lands either in this drain or in the next one.
    pub fn drain(&self) -> Result<Vec<ReprocessAuthorization>> {
        let drained_at = Utc::now();

        let grants = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let grants = take_queued(&tx, drained_at)?;
            tx.commit()?;
            Ok(grants)
        })?;

        if !grants.is_empty() {
            info!("Drained {} reprocess entries", grants.len());
        }
        Ok(grants)
    }

    /// Drain the queue and reopen every drained item as `PENDING`.
    ///
    /// Both happen in one transaction: if any reset fails, nothing is removed
    /// from the queue and no item changes. Entries whose item no longer exists
    /// are dropped. Returns the reopened items, oldest request first.
    pub fn reopen_queued(&self) -> Result<Vec<Item>> {
        let drained_at = Utc::now();
        let now = to_db_timestamp(&drained_at);

        let reopened = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut reopened = Vec::new();
            for grant in take_queued(&tx, drained_at)? {
                let external_id = grant.external_id();
                if !reopen_item(&tx, external_id, &now)? {
                    warn!(external_id, "Dropping reprocess entry for unknown item");
                    continue;
                }
                let item = query_item(&tx, external_id)?
                    .ok_or_else(|| Error::NotFound(external_id.to_string()))?;
                reopened.push(item);
            }
            tx.commit()?;
            Ok(reopened)
        })?;

        for item in &reopened {
            info!(external_id = %item.external_id, "Item reset to PENDING for reprocessing");
        }
        Ok(reopened)
    }

    /// Current queue length
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM reprocess_queue", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

/// Delete every queued entry inside `conn`'s transaction and turn each into
/// an authorization, oldest request first
fn take_queued(
    conn: &Connection,
    drained_at: DateTime<Utc>,
) -> Result<Vec<ReprocessAuthorization>> {
    let mut stmt = conn.prepare("DELETE FROM reprocess_queue RETURNING external_id, enqueued_at")?;
    let mut grants = stmt
        .query_map([], |row| {
            let enqueued_at: String = row.get(1)?;
            Ok(ReprocessAuthorization {
                external_id: row.get(0)?,
                enqueued_at: parse_db_timestamp(1, &enqueued_at)?,
                drained_at,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    grants.sort_by(|a, b| {
        a.enqueued_at
            .cmp(&b.enqueued_at)
            .then_with(|| a.external_id.cmp(&b.external_id))
    });
    Ok(grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Disposition, ItemStore, RawContent};

    fn setup(ids: &[&str]) -> Result<(ItemStore, ReprocessQueue)> {
        let store = ItemStore::in_memory()?;
        for id in ids {
            store.upsert_if_absent(id, &RawContent::new("RFQ", "a@b.c", "body"), Utc::now())?;
        }
        let queue = ReprocessQueue::new(store.database().clone());
        Ok((store, queue))
    }

    #[test]
    fn test_enqueue_unknown_item() -> Result<()> {
        let (_, queue) = setup(&[])?;
        let err = queue.enqueue("ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == "ghost"));
        assert_eq!(queue.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_enqueue_is_idempotent() -> Result<()> {
        let (_, queue) = setup(&["g-1", "g-2"])?;
        assert_eq!(queue.enqueue("g-1")?, 1);
        assert_eq!(queue.enqueue("g-1")?, 1);
        assert_eq!(queue.enqueue("g-2")?, 2);
        assert_eq!(queue.count()?, 2);
        Ok(())
    }

    #[test]
    fn test_drain_empties_queue_once() -> Result<()> {
        let (_, queue) = setup(&["g-1", "g-2"])?;
        queue.enqueue("g-2")?;
        queue.enqueue("g-1")?;

        let ids: Vec<_> = queue
            .drain()?
            .iter()
            .map(|g| g.external_id().to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"g-1".to_string()));
        assert!(ids.contains(&"g-2".to_string()));

        assert_eq!(queue.count()?, 0);
        assert!(queue.drain()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_concurrent_enqueue_and_drain_never_lose_or_duplicate() -> Result<()> {
        let ids: Vec<String> = (0..50).map(|i| format!("g-{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (_, queue) = setup(&id_refs)?;

        let producer = {
            let queue = queue.clone();
            let ids = ids.clone();
            std::thread::spawn(move || {
                for id in &ids {
                    queue.enqueue(id).unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        while !producer.is_finished() {
            seen.extend(queue.drain()?.into_iter().map(|g| g.external_id().to_string()));
        }
        producer.join().unwrap();
        seen.extend(queue.drain()?.into_iter().map(|g| g.external_id().to_string()));

        seen.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(seen, expected);
        Ok(())
    }

    #[test]
    fn test_reopen_queued_resets_items() -> Result<()> {
        let (store, queue) = setup(&["g-1", "g-2", "g-3"])?;
        for id in ["g-1", "g-2", "g-3"] {
            store.mark_classified(id, Disposition::Irrelevant, None, Utc::now(), None)?;
        }
        queue.enqueue("g-2")?;
        queue.enqueue("g-1")?;

        let mut ids: Vec<_> = queue
            .reopen_queued()?
            .into_iter()
            .map(|i| i.external_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["g-1", "g-2"]);
        assert_eq!(queue.count()?, 0);
        assert_eq!(store.get("g-1")?.unwrap().disposition, Disposition::Pending);
        assert_eq!(store.get("g-3")?.unwrap().disposition, Disposition::Irrelevant);
        Ok(())
    }

    #[test]
    fn test_failed_reset_keeps_queue_entries() -> Result<()> {
        let (store, queue) = setup(&["g-1", "g-2"])?;
        for id in ["g-1", "g-2"] {
            store.mark_classified(id, Disposition::Valid, None, Utc::now(), None)?;
        }
        queue.enqueue("g-1")?;
        queue.enqueue("g-2")?;

        store.database().with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_g2 BEFORE UPDATE ON items
                 WHEN NEW.external_id = 'g-2'
                 BEGIN SELECT RAISE(ABORT, 'write rejected'); END;",
            )?;
            Ok(())
        })?;

        assert!(queue.reopen_queued().is_err());
        assert_eq!(queue.count()?, 2);
        assert_eq!(store.get("g-1")?.unwrap().disposition, Disposition::Valid);

        store.database().with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER reject_g2")?;
            Ok(())
        })?;

        assert_eq!(queue.reopen_queued()?.len(), 2);
        assert_eq!(queue.count()?, 0);
        assert_eq!(store.get("g-2")?.unwrap().disposition, Disposition::Pending);
        Ok(())
    }
}
