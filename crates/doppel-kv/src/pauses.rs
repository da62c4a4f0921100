//! Pause keys.
//!
//! `PAUSE:ALL` and `PAUSE:{contact}` rows carry no TTL — a pause survives
//! process restarts and stays until an explicit resume. Records with an
//! unknown reason string fail the type-guard and read as absent.

use rusqlite::params;
use tracing::warn;

use doppel_core::types::PauseState;

use crate::error::Result;
use crate::store::KvStore;

impl KvStore {
    /// Write (or overwrite) the pause record for `scope`.
    pub fn set_pause(&self, scope: &str, state: PauseState) -> Result<()> {
        let db = self.conn();
        db.execute(
            "INSERT INTO pauses (scope, paused_at_ms, reason) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope) DO UPDATE SET
                 paused_at_ms = excluded.paused_at_ms,
                 reason       = excluded.reason",
            params![scope, state.paused_at_ms, state.reason.to_string()],
        )?;
        Ok(())
    }

    /// Read the pause record for `scope`, if present and well-formed.
    pub fn get_pause(&self, scope: &str) -> Result<Option<PauseState>> {
        let db = self.conn();
        let row: Option<(i64, String)> = match db.query_row(
            "SELECT paused_at_ms, reason FROM pauses WHERE scope = ?1",
            params![scope],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(r) => Some(r),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(row.and_then(|(paused_at_ms, reason)| match reason.parse() {
            Ok(reason) => Some(PauseState {
                paused_at_ms,
                reason,
            }),
            Err(e) => {
                warn!(scope, error = %e, "discarding malformed pause record");
                None
            }
        }))
    }

    /// Remove the pause for `scope`. Returns whether a row was removed.
    pub fn clear_pause(&self, scope: &str) -> Result<bool> {
        let db = self.conn();
        let n = db.execute("DELETE FROM pauses WHERE scope = ?1", params![scope])?;
        Ok(n > 0)
    }

    /// All live pause records, sorted by scope for deterministic output.
    pub fn list_pauses(&self) -> Result<Vec<(String, PauseState)>> {
        let db = self.conn();
        let mut stmt =
            db.prepare("SELECT scope, paused_at_ms, reason FROM pauses ORDER BY scope")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(scope, paused_at_ms, reason)| {
                reason.parse().ok().map(|reason| {
                    (
                        scope,
                        PauseState {
                            paused_at_ms,
                            reason,
                        },
                    )
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use doppel_core::types::{now_ms, PauseReason, PauseState};

    use crate::store::KvStore;

    #[test]
    fn pause_round_trip() {
        let kv = KvStore::open_in_memory().unwrap();
        let state = PauseState {
            paused_at_ms: now_ms(),
            reason: PauseReason::FromMe,
        };
        kv.set_pause("PAUSE:telegram:1", state).unwrap();
        let read = kv.get_pause("PAUSE:telegram:1").unwrap().unwrap();
        assert_eq!(read, state);
    }

    #[test]
    fn clear_reports_whether_present() {
        let kv = KvStore::open_in_memory().unwrap();
        assert!(!kv.clear_pause("PAUSE:ALL").unwrap());
        kv.set_pause(
            "PAUSE:ALL",
            PauseState {
                paused_at_ms: 1,
                reason: PauseReason::Manual,
            },
        )
        .unwrap();
        assert!(kv.clear_pause("PAUSE:ALL").unwrap());
        assert!(kv.get_pause("PAUSE:ALL").unwrap().is_none());
    }

    #[test]
    fn malformed_reason_reads_as_absent() {
        let kv = KvStore::open_in_memory().unwrap();
        kv.conn()
            .execute(
                "INSERT INTO pauses (scope, paused_at_ms, reason) VALUES ('PAUSE:x', 1, 'nap')",
                [],
            )
            .unwrap();
        assert!(kv.get_pause("PAUSE:x").unwrap().is_none());
    }
}
