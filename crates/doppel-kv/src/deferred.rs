//! Deferred-message queue (`DEFERRED:messages`).
//!
//! A sorted sequence scored by `process_after_ms`. The sleep gate pushes
//! here; the scheduler loop pops due entries and re-injects them into the
//! pipeline. Popping removes the rows in the same transaction as the read,
//! so a crash between pop and re-inject loses at most one poll batch.

use rusqlite::params;
use uuid::Uuid;

use doppel_core::types::now_ms;

use crate::error::Result;
use crate::store::KvStore;

/// One parked message awaiting its wake-up time.
#[derive(Debug, Clone)]
pub struct DeferredEntry {
    pub id: String,
    pub payload: serde_json::Value,
    pub process_after_ms: i64,
}

impl KvStore {
    /// Park `payload` until `process_after_ms`. Returns the entry id.
    pub fn defer_push(
        &self,
        payload: &serde_json::Value,
        process_after_ms: i64,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let db = self.conn();
        db.execute(
            "INSERT INTO deferred (id, payload, process_after_ms) VALUES (?1, ?2, ?3)",
            params![id, payload.to_string(), process_after_ms],
        )?;
        Ok(id)
    }

    /// Pop up to `limit` entries whose wake-up time has passed, oldest first.
    pub fn defer_pop_due(&self, limit: usize) -> Result<Vec<DeferredEntry>> {
        let now = now_ms();
        let mut db = self.conn();
        let tx = db.transaction()?;
        let entries: Vec<DeferredEntry> = {
            let mut stmt = tx.prepare(
                "SELECT id, payload, process_after_ms FROM deferred
                 WHERE process_after_ms <= ?1
                 ORDER BY process_after_ms
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![now, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            rows.filter_map(|r| r.ok())
                .filter_map(|(id, payload, process_after_ms)| {
                    serde_json::from_str(&payload)
                        .ok()
                        .map(|payload| DeferredEntry {
                            id,
                            payload,
                            process_after_ms,
                        })
                })
                .collect()
        };
        for entry in &entries {
            tx.execute("DELETE FROM deferred WHERE id = ?1", params![entry.id])?;
        }
        tx.commit()?;
        Ok(entries)
    }

    /// Number of parked entries.
    pub fn defer_len(&self) -> Result<i64> {
        let db = self.conn();
        Ok(db.query_row("SELECT COUNT(*) FROM deferred", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use doppel_core::types::now_ms;

    use crate::store::KvStore;

    #[test]
    fn due_entries_pop_in_score_order() {
        let kv = KvStore::open_in_memory().unwrap();
        let now = now_ms();
        kv.defer_push(&serde_json::json!({"n": 2}), now - 1_000)
            .unwrap();
        kv.defer_push(&serde_json::json!({"n": 1}), now - 2_000)
            .unwrap();
        kv.defer_push(&serde_json::json!({"n": 3}), now + 60_000)
            .unwrap();

        let due = kv.defer_pop_due(10).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].payload["n"], 1);
        assert_eq!(due[1].payload["n"], 2);
        // Future entry stays parked.
        assert_eq!(kv.defer_len().unwrap(), 1);
    }

    #[test]
    fn pop_removes_entries() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.defer_push(&serde_json::json!({}), 0).unwrap();
        assert_eq!(kv.defer_pop_due(10).unwrap().len(), 1);
        assert!(kv.defer_pop_due(10).unwrap().is_empty());
    }
}
