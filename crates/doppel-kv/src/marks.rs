//! Timestamp marks with TTL (`HTS:lastMessage:{contact}`).

use rusqlite::params;

use doppel_core::types::now_ms;

use crate::error::Result;
use crate::store::KvStore;

impl KvStore {
    /// Write `value_ms` under `key`, replacing any previous value and
    /// re-arming the TTL.
    pub fn set_mark(&self, key: &str, value_ms: i64, ttl_seconds: u64) -> Result<()> {
        let expires = now_ms() + ttl_seconds as i64 * 1_000;
        let db = self.conn();
        db.execute(
            "INSERT INTO marks (key, value_ms, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 value_ms      = excluded.value_ms,
                 expires_at_ms = excluded.expires_at_ms",
            params![key, value_ms, expires],
        )?;
        Ok(())
    }

    /// Read the mark, or `None` when absent or expired.
    pub fn get_mark(&self, key: &str) -> Result<Option<i64>> {
        let db = self.conn();
        match db.query_row(
            "SELECT value_ms FROM marks WHERE key = ?1 AND expires_at_ms > ?2",
            params![key, now_ms()],
            |row| row.get(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::KvStore;

    #[test]
    fn mark_round_trip() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.set_mark("HTS:lastMessage:telegram:1", 1_000, 3_600)
            .unwrap();
        assert_eq!(
            kv.get_mark("HTS:lastMessage:telegram:1").unwrap(),
            Some(1_000)
        );
        assert_eq!(kv.get_mark("HTS:lastMessage:telegram:2").unwrap(), None);
    }

    #[test]
    fn expired_mark_reads_as_absent() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.set_mark("m", 1, 0).unwrap();
        assert_eq!(kv.get_mark("m").unwrap(), None);
    }
}
