//! Daily token accounting (`STATS:tokens:{YYYY-MM-DD}`).

use rusqlite::params;

use doppel_core::types::now_ms;

use crate::error::Result;
use crate::keys::STATS_TTL_SECS;
use crate::store::KvStore;

/// Increments to apply to one day's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenDelta {
    pub classification: i64,
    pub response: i64,
    pub cache_read: i64,
    pub cache_write: i64,
    pub total_messages: i64,
}

/// Snapshot of one day's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStats {
    pub classification: i64,
    pub response: i64,
    pub cache_read: i64,
    pub cache_write: i64,
    pub total_messages: i64,
}

impl KvStore {
    /// Add `delta` to the counters for `date_key` (creates the row on first
    /// write of the day; rows expire after 30 days).
    pub fn record_tokens(&self, date_key: &str, delta: TokenDelta) -> Result<()> {
        let expires = now_ms() + STATS_TTL_SECS as i64 * 1_000;
        let db = self.conn();
        db.execute(
            "INSERT INTO token_stats
                 (date_key, classification, response, cache_read, cache_write,
                  total_messages, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(date_key) DO UPDATE SET
                 classification = classification + excluded.classification,
                 response       = response       + excluded.response,
                 cache_read     = cache_read     + excluded.cache_read,
                 cache_write    = cache_write    + excluded.cache_write,
                 total_messages = total_messages + excluded.total_messages",
            params![
                date_key,
                delta.classification,
                delta.response,
                delta.cache_read,
                delta.cache_write,
                delta.total_messages,
                expires
            ],
        )?;
        Ok(())
    }

    /// Counters for `date_key`; all-zero when no row exists.
    pub fn tokens(&self, date_key: &str) -> Result<TokenStats> {
        let db = self.conn();
        match db.query_row(
            "SELECT classification, response, cache_read, cache_write, total_messages
             FROM token_stats WHERE date_key = ?1 AND expires_at_ms > ?2",
            params![date_key, now_ms()],
            |row| {
                Ok(TokenStats {
                    classification: row.get(0)?,
                    response: row.get(1)?,
                    cache_read: row.get(2)?,
                    cache_write: row.get(3)?,
                    total_messages: row.get(4)?,
                })
            },
        ) {
            Ok(s) => Ok(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(TokenStats::default()),
            Err(e) => Err(e.into()),
        }
    }
}
