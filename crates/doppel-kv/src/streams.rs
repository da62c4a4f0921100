//! Append-only streams (`QUEUE:*`).
//!
//! Entries get an auto-generated monotonically increasing sequence number.
//! Consumers keep their own cursor and read with `stream_read_after`;
//! acknowledged prefixes can be deleted with `stream_delete_upto`.

use rusqlite::params;

use doppel_core::types::now_ms;

use crate::error::Result;
use crate::store::KvStore;

/// One stream record.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub seq: i64,
    pub payload: serde_json::Value,
}

impl KvStore {
    /// Append `payload` to `stream`, returning the assigned sequence number.
    pub fn stream_append(&self, stream: &str, payload: &serde_json::Value) -> Result<i64> {
        let db = self.conn();
        db.execute(
            "INSERT INTO streams (stream, payload, added_at_ms) VALUES (?1, ?2, ?3)",
            params![stream, payload.to_string(), now_ms()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Read up to `limit` entries with seq > `after_seq`, in order.
    ///
    /// Rows whose payload fails to parse are skipped — a malformed producer
    /// must not wedge a consumer.
    pub fn stream_read_after(
        &self,
        stream: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<StreamEntry>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT seq, payload FROM streams
             WHERE stream = ?1 AND seq > ?2
             ORDER BY seq LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![stream, after_seq, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(seq, payload)| {
                serde_json::from_str(&payload)
                    .ok()
                    .map(|payload| StreamEntry { seq, payload })
            })
            .collect())
    }

    /// Delete every entry of `stream` with seq ≤ `upto_seq`.
    pub fn stream_delete_upto(&self, stream: &str, upto_seq: i64) -> Result<usize> {
        let db = self.conn();
        Ok(db.execute(
            "DELETE FROM streams WHERE stream = ?1 AND seq <= ?2",
            params![stream, upto_seq],
        )?)
    }

    /// Highest assigned sequence for `stream`, or 0 when empty.
    pub fn stream_last_seq(&self, stream: &str) -> Result<i64> {
        let db = self.conn();
        Ok(db.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM streams WHERE stream = ?1",
            params![stream],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::KvStore;

    #[test]
    fn sequences_increase_and_cursor_reads_work() {
        let kv = KvStore::open_in_memory().unwrap();
        let s1 = kv
            .stream_append("QUEUE:messages", &serde_json::json!({"n": 1}))
            .unwrap();
        let s2 = kv
            .stream_append("QUEUE:messages", &serde_json::json!({"n": 2}))
            .unwrap();
        assert!(s2 > s1);

        let all = kv.stream_read_after("QUEUE:messages", 0, 10).unwrap();
        assert_eq!(all.len(), 2);
        let tail = kv.stream_read_after("QUEUE:messages", s1, 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].payload["n"], 2);
    }

    #[test]
    fn streams_are_isolated() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.stream_append("QUEUE:a", &serde_json::json!({})).unwrap();
        kv.stream_append("QUEUE:b", &serde_json::json!({})).unwrap();
        assert_eq!(kv.stream_read_after("QUEUE:a", 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn delete_upto_reclaims_acknowledged_prefix() {
        let kv = KvStore::open_in_memory().unwrap();
        let s1 = kv.stream_append("QUEUE:a", &serde_json::json!({})).unwrap();
        kv.stream_append("QUEUE:a", &serde_json::json!({})).unwrap();
        assert_eq!(kv.stream_delete_upto("QUEUE:a", s1).unwrap(), 1);
        assert_eq!(kv.stream_read_after("QUEUE:a", 0, 10).unwrap().len(), 1);
    }
}
