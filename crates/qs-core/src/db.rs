//! Shared SQLite connection
//!
//! The item store and the reprocess queue live in the same database file and
//! share one connection. The lock is held for a single statement or a single
//! transaction, never across an `.await`, so readers on request-handling tasks
//! are never stuck behind a whole ingestion cycle.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::{Error, Result};

/// Cloneable handle to the SQLite database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        debug!("Opening database at: {}", db_path);
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        // WAL keeps readers from blocking on the ingestion writer at the file level
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_tables(&conn)?;
        info!("Database initialized at {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS items (
                external_id TEXT PRIMARY KEY,
                received_at TEXT NOT NULL,
                raw_content TEXT NOT NULL,
                disposition TEXT NOT NULL DEFAULT 'PENDING',
                extracted_fields TEXT,
                processed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_items_received_at
                ON items(received_at DESC, external_id);
            CREATE INDEX IF NOT EXISTS idx_items_disposition ON items(disposition);

            CREATE TABLE IF NOT EXISTS reprocess_queue (
                external_id TEXT PRIMARY KEY REFERENCES items(external_id),
                enqueued_at TEXT NOT NULL
            );",
        )?;
        Self::migrate(conn)?;
        Ok(())
    }

    /// Add columns introduced after the first schema to older database files
    fn migrate(conn: &Connection) -> Result<()> {
        for (column, ddl) in [
            ("attempts", "ALTER TABLE items ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0"),
            ("last_attempt_at", "ALTER TABLE items ADD COLUMN last_attempt_at TEXT"),
        ] {
            let present: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_table_info('items') WHERE name = ?1)",
                [column],
                |row| row.get(0),
            )?;
            if !present {
                info!("Migrating items table: adding {}", column);
                conn.execute(ddl, [])?;
            }
        }
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_items_pending_attempts
                ON items(disposition, last_attempt_at, received_at)",
        )?;
        Ok(())
    }

    /// Run `f` with exclusive access to the connection
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Other("database lock poisoned".to_string()))?;
        f(&mut conn)
    }
}

/// Fixed-width UTC timestamp so that text ordering matches time ordering
pub(crate) fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
