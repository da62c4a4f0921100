//! Sliding-window counters.
//!
//! The increment and the conditional TTL arm run in one transaction: the
//! expiry is written only when the counter is created (the 0→1 transition),
//! so a burst of messages cannot slide the window forward.

use rusqlite::params;

use doppel_core::types::now_ms;

use crate::error::Result;
use crate::store::KvStore;

impl KvStore {
    /// Atomically increment `key` and return the new count.
    ///
    /// On the 0→1 transition (no live row), the window TTL is armed; on
    /// every later increment the stored expiry is left untouched.
    pub fn incr_with_window(&self, key: &str, window_seconds: u32) -> Result<i64> {
        let now = now_ms();
        let expires = now + i64::from(window_seconds) * 1_000;
        let mut db = self.conn();
        let tx = db.transaction()?;
        // An expired row counts as absent, so the upsert below re-arms the TTL.
        tx.execute(
            "DELETE FROM counters WHERE key = ?1 AND expires_at_ms <= ?2",
            params![key, now],
        )?;
        let count: i64 = tx.query_row(
            "INSERT INTO counters (key, count, expires_at_ms) VALUES (?1, 1, ?2)
             ON CONFLICT(key) DO UPDATE SET count = count + 1
             RETURNING count",
            params![key, expires],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count)
    }

    /// Current count for `key`, or 0 when absent or expired.
    pub fn counter(&self, key: &str) -> Result<i64> {
        let db = self.conn();
        let count = db
            .query_row(
                "SELECT count FROM counters WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now_ms()],
                |row| row.get(0),
            )
            .unwrap_or(0);
        Ok(count)
    }

    /// Expiry (epoch ms) of the live counter row, if any.
    pub fn counter_expiry(&self, key: &str) -> Result<Option<i64>> {
        let db = self.conn();
        match db.query_row(
            "SELECT expires_at_ms FROM counters WHERE key = ?1 AND expires_at_ms > ?2",
            params![key, now_ms()],
            |row| row.get(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the counter row so the next increment starts a fresh window.
    pub fn clear_counter(&self, key: &str) -> Result<()> {
        let db = self.conn();
        db.execute("DELETE FROM counters WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::KvStore;

    #[test]
    fn incr_counts_up() {
        let kv = KvStore::open_in_memory().unwrap();
        assert_eq!(kv.incr_with_window("c", 60).unwrap(), 1);
        assert_eq!(kv.incr_with_window("c", 60).unwrap(), 2);
        assert_eq!(kv.incr_with_window("c", 60).unwrap(), 3);
        assert_eq!(kv.counter("c").unwrap(), 3);
    }

    #[test]
    fn ttl_armed_only_on_first_increment() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.incr_with_window("c", 60).unwrap();
        let first = kv.counter_expiry("c").unwrap().unwrap();
        for _ in 0..5 {
            kv.incr_with_window("c", 60).unwrap();
        }
        // A burst must not slide the window.
        assert_eq!(kv.counter_expiry("c").unwrap().unwrap(), first);
    }

    #[test]
    fn missing_counter_reads_zero() {
        let kv = KvStore::open_in_memory().unwrap();
        assert_eq!(kv.counter("nope").unwrap(), 0);
        assert!(kv.counter_expiry("nope").unwrap().is_none());
    }

    #[test]
    fn clear_counter_restarts_window() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.incr_with_window("c", 60).unwrap();
        kv.incr_with_window("c", 60).unwrap();
        kv.clear_counter("c").unwrap();
        assert_eq!(kv.incr_with_window("c", 60).unwrap(), 1);
    }
}
