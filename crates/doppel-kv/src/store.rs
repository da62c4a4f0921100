use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use doppel_core::types::now_ms;

use crate::db::init_db;
use crate::error::Result;

/// Thread-safe KV store.
///
/// Wraps a single SQLite connection in a `Mutex`; every public operation
/// locks, runs one statement or transaction, and unlocks. Callers never
/// hold the lock across an await point because all methods are synchronous.
pub struct KvStore {
    pub(crate) db: Mutex<Connection>,
}

impl KvStore {
    /// Open (or create) a file-backed store at `path`.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap()
    }

    /// Remove every expired row across TTL-carrying tables.
    ///
    /// Expired rows already read as absent; this only reclaims space, so it
    /// is safe to run at any cadence (the gateway runs it hourly).
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let db = self.conn();
        let mut purged = 0;
        for table in ["counters", "marks", "history", "token_stats", "caches"] {
            purged += db.execute(
                &format!("DELETE FROM {table} WHERE expires_at_ms <= ?1"),
                [now],
            )?;
        }
        if purged > 0 {
            debug!(purged, "purged expired KV rows");
        }
        Ok(purged)
    }
}
