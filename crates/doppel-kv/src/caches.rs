//! JSON snapshot caches with TTL (`CACHE:persona:*`, `CACHE:style:*`).
//!
//! Read-through caches in front of MEM. Invalidation on write is
//! best-effort across processes; the TTL bounds staleness either way.

use rusqlite::params;

use doppel_core::types::now_ms;

use crate::error::Result;
use crate::store::KvStore;

impl KvStore {
    pub fn cache_put(
        &self,
        key: &str,
        payload: &serde_json::Value,
        ttl_seconds: u64,
    ) -> Result<()> {
        let expires = now_ms() + ttl_seconds as i64 * 1_000;
        let db = self.conn();
        db.execute(
            "INSERT INTO caches (key, payload, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 payload       = excluded.payload,
                 expires_at_ms = excluded.expires_at_ms",
            params![key, payload.to_string(), expires],
        )?;
        Ok(())
    }

    pub fn cache_get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let db = self.conn();
        let payload: Option<String> = match db.query_row(
            "SELECT payload FROM caches WHERE key = ?1 AND expires_at_ms > ?2",
            params![key, now_ms()],
            |row| row.get(0),
        ) {
            Ok(p) => Some(p),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(payload.and_then(|p| serde_json::from_str(&p).ok()))
    }

    pub fn cache_delete(&self, key: &str) -> Result<()> {
        let db = self.conn();
        db.execute("DELETE FROM caches WHERE key = ?1", params![key])?;
        Ok(())
    }
}
