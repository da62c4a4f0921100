use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::db::init_db;
use crate::error::Result;

/// Thread-safe handle to the MEM database.
///
/// Wraps a single SQLite connection in a `Mutex`, the same pattern as the
/// KV store: all methods are synchronous, so the lock is never held across
/// an await point.
pub struct MemoryStore {
    pub(crate) db: Mutex<Connection>,
}

impl MemoryStore {
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
}
