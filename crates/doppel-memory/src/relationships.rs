//! Accumulated relationship scores.

use rusqlite::params;

use doppel_core::types::RelationshipType;

use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::AccumulatedScores;

impl MemoryStore {
    pub fn get_scores(&self, contact_key: &str) -> Result<Option<AccumulatedScores>> {
        let db = self.conn();
        match db.query_row(
            "SELECT contact_key, scores, current_type, current_confidence,
                    signal_count, last_updated
             FROM relationship_scores WHERE contact_key = ?1",
            params![contact_key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        ) {
            Ok((contact_key, scores, current_type, current_confidence, signal_count, last_updated)) => {
                Ok(Some(AccumulatedScores {
                    contact_key,
                    scores: serde_json::from_str(&scores).unwrap_or_default(),
                    current_type: current_type.and_then(|t| t.parse::<RelationshipType>().ok()),
                    current_confidence,
                    signal_count: signal_count as u32,
                    last_updated,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert_scores(&self, scores: &AccumulatedScores) -> Result<()> {
        let encoded = serde_json::to_string(&scores.scores)?;
        let db = self.conn();
        db.execute(
            "INSERT INTO relationship_scores
                 (contact_key, scores, current_type, current_confidence,
                  signal_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(contact_key) DO UPDATE SET
                 scores             = excluded.scores,
                 current_type       = excluded.current_type,
                 current_confidence = excluded.current_confidence,
                 signal_count       = excluded.signal_count,
                 last_updated       = excluded.last_updated",
            params![
                scores.contact_key,
                encoded,
                scores.current_type.map(|t| t.to_string()),
                scores.current_confidence,
                scores.signal_count,
                scores.last_updated
            ],
        )?;
        Ok(())
    }

    /// Stored relationship type for persona selection, if one has been
    /// durably established.
    pub fn relationship_type(&self, contact_key: &str) -> Result<Option<RelationshipType>> {
        Ok(self.get_scores(contact_key)?.and_then(|s| s.current_type))
    }
}

#[cfg(test)]
mod tests {
    use doppel_core::types::RelationshipType;

    use crate::store::MemoryStore;
    use crate::types::AccumulatedScores;

    #[test]
    fn scores_round_trip() {
        let mem = MemoryStore::open_in_memory().unwrap();
        let mut scores = AccumulatedScores::new("telegram:1");
        scores.scores.insert(RelationshipType::Friend, 2.4);
        scores.scores.insert(RelationshipType::Colleague, 0.7);
        scores.current_type = Some(RelationshipType::Friend);
        scores.current_confidence = 0.8;
        scores.signal_count = 5;
        mem.upsert_scores(&scores).unwrap();

        let read = mem.get_scores("telegram:1").unwrap().unwrap();
        assert_eq!(read.current_type, Some(RelationshipType::Friend));
        assert_eq!(read.signal_count, 5);
        assert_eq!(read.scores[&RelationshipType::Friend], 2.4);
        assert_eq!(
            mem.relationship_type("telegram:1").unwrap(),
            Some(RelationshipType::Friend)
        );
    }

    #[test]
    fn top_ignores_zero_scores() {
        let mut scores = AccumulatedScores::new("telegram:1");
        assert!(scores.top().is_none());
        scores.scores.insert(RelationshipType::Client, 1.1);
        scores.scores.insert(RelationshipType::Manager, 0.0);
        assert_eq!(scores.top().unwrap().0, RelationshipType::Client);
    }
}
