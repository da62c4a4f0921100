//! Bounded per-contact conversation history (`HISTORY:{contact}`).
//!
//! De-duplicated by message id, trimmed to the newest `max_messages`
//! entries, and expired wholesale after `ttl_seconds`.

use rusqlite::params;
use tracing::warn;

use doppel_core::types::{now_ms, ConversationTurn};

use crate::error::Result;
use crate::store::KvStore;

impl KvStore {
    /// Append a turn. Returns `false` when the id was already present
    /// (adapter redeliveries are silently de-duplicated).
    pub fn history_append(
        &self,
        contact_key: &str,
        turn: &ConversationTurn,
        max_messages: u32,
        ttl_seconds: u64,
    ) -> Result<bool> {
        let expires = now_ms() + ttl_seconds as i64 * 1_000;
        let role = serde_plain(&turn.role)?;
        let kind = serde_plain(&turn.kind)?;
        let mut db = self.conn();
        let tx = db.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO history
                 (contact_key, id, role, kind, content, timestamp_ms, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                contact_key,
                turn.id,
                role,
                kind,
                turn.content,
                turn.timestamp_ms,
                expires
            ],
        )?;
        // Trim to the newest `max_messages` rows for this contact.
        tx.execute(
            "DELETE FROM history
             WHERE contact_key = ?1 AND id NOT IN (
                 SELECT id FROM history WHERE contact_key = ?1
                 ORDER BY timestamp_ms DESC, id DESC LIMIT ?2
             )",
            params![contact_key, i64::from(max_messages)],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    /// Last `limit` turns for a contact, oldest first, expired rows skipped.
    pub fn history_recent(&self, contact_key: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, role, kind, content, timestamp_ms
             FROM (
                 SELECT * FROM history
                 WHERE contact_key = ?1 AND expires_at_ms > ?2
                 ORDER BY timestamp_ms DESC, id DESC LIMIT ?3
             )
             ORDER BY timestamp_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![contact_key, now_ms(), limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(id, role, kind, content, timestamp_ms)| {
                let role = match serde_json::from_value(serde_json::Value::String(role.clone())) {
                    Ok(r) => r,
                    Err(_) => {
                        warn!(contact_key, id = %id, role = %role, "discarding history row with bad role");
                        return None;
                    }
                };
                let kind = serde_json::from_value(serde_json::Value::String(kind)).ok()?;
                Some(ConversationTurn {
                    id,
                    role,
                    kind,
                    content,
                    timestamp_ms,
                })
            })
            .collect())
    }

    /// Count of live history rows for a contact.
    pub fn history_len(&self, contact_key: &str) -> Result<i64> {
        let db = self.conn();
        Ok(db.query_row(
            "SELECT COUNT(*) FROM history WHERE contact_key = ?1 AND expires_at_ms > ?2",
            params![contact_key, now_ms()],
            |row| row.get(0),
        )?)
    }
}

/// Render a unit enum through its serde string form ("user", "from_me", …).
fn serde_plain<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(crate::error::KvError::Corrupt {
            key: "history".into(),
            reason: format!("non-string enum encoding: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use doppel_core::types::{ConversationTurn, TurnKind, TurnRole};

    use crate::store::KvStore;

    fn turn(id: &str, ts: i64) -> ConversationTurn {
        ConversationTurn {
            id: id.into(),
            role: TurnRole::User,
            kind: TurnKind::Incoming,
            content: format!("msg {id}"),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn append_and_read_back_in_order() {
        let kv = KvStore::open_in_memory().unwrap();
        for i in 0..5 {
            kv.history_append("telegram:1", &turn(&format!("m{i}"), 1_000 + i), 100, 3_600)
                .unwrap();
        }
        let recent = kv.history_recent("telegram:1", 10).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].id, "m0");
        assert_eq!(recent[4].id, "m4");
    }

    #[test]
    fn duplicate_id_is_ignored() {
        let kv = KvStore::open_in_memory().unwrap();
        assert!(kv
            .history_append("telegram:1", &turn("m1", 1_000), 100, 3_600)
            .unwrap());
        assert!(!kv
            .history_append("telegram:1", &turn("m1", 2_000), 100, 3_600)
            .unwrap());
        assert_eq!(kv.history_len("telegram:1").unwrap(), 1);
    }

    #[test]
    fn trims_to_max_messages() {
        let kv = KvStore::open_in_memory().unwrap();
        for i in 0..10 {
            kv.history_append("telegram:1", &turn(&format!("m{i}"), 1_000 + i), 3, 3_600)
                .unwrap();
        }
        let recent = kv.history_recent("telegram:1", 10).unwrap();
        assert_eq!(recent.len(), 3);
        // Oldest surviving entry is m7.
        assert_eq!(recent[0].id, "m7");
    }

    #[test]
    fn contacts_are_partitioned() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.history_append("telegram:1", &turn("m1", 1), 100, 3_600)
            .unwrap();
        kv.history_append("telegram:2", &turn("m1", 1), 100, 3_600)
            .unwrap();
        assert_eq!(kv.history_len("telegram:1").unwrap(), 1);
        assert_eq!(kv.history_len("telegram:2").unwrap(), 1);
    }
}
