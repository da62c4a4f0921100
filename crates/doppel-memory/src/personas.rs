//! Persona records.
//!
//! Selection precedence lives in the context assembler; this module only
//! answers the individual lookups (by id, by relationship type, default).

use rusqlite::params;

use doppel_core::types::RelationshipType;

use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::Persona;

impl MemoryStore {
    /// Insert or replace a persona. `is_default` marks the fallback used
    /// when no relationship-specific persona applies; setting it clears the
    /// flag on every other persona.
    pub fn upsert_persona(&self, persona: &Persona, is_default: bool) -> Result<()> {
        let examples = serde_json::to_string(&persona.example_messages)?;
        let applicable = serde_json::to_string(&persona.applicable_to)?;
        let mut db = self.conn();
        let tx = db.transaction()?;
        if is_default {
            tx.execute("UPDATE personas SET is_default = 0", [])?;
        }
        tx.execute(
            "INSERT INTO personas
                 (id, name, style_guide, tone, example_messages, applicable_to, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 name             = excluded.name,
                 style_guide      = excluded.style_guide,
                 tone             = excluded.tone,
                 example_messages = excluded.example_messages,
                 applicable_to    = excluded.applicable_to,
                 is_default       = excluded.is_default",
            params![
                persona.id,
                persona.name,
                persona.style_guide,
                persona.tone,
                examples,
                applicable,
                is_default as i64
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_persona(&self, id: &str) -> Result<Option<Persona>> {
        let db = self.conn();
        match db.query_row(
            "SELECT id, name, style_guide, tone, example_messages, applicable_to
             FROM personas WHERE id = ?1",
            params![id],
            row_to_persona,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// First persona whose `applicable_to` contains `relationship`.
    pub fn persona_for_relationship(
        &self,
        relationship: RelationshipType,
    ) -> Result<Option<Persona>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, name, style_guide, tone, example_messages, applicable_to
             FROM personas ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_persona)?;
        for persona in rows.filter_map(|r| r.ok()) {
            if persona.applicable_to.contains(&relationship) {
                return Ok(Some(persona));
            }
        }
        Ok(None)
    }

    /// The persona flagged as default, if any.
    pub fn default_persona(&self) -> Result<Option<Persona>> {
        let db = self.conn();
        match db.query_row(
            "SELECT id, name, style_guide, tone, example_messages, applicable_to
             FROM personas WHERE is_default = 1 LIMIT 1",
            [],
            row_to_persona,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_persona(row: &rusqlite::Row<'_>) -> rusqlite::Result<Persona> {
    let examples: String = row.get(4)?;
    let applicable: String = row.get(5)?;
    Ok(Persona {
        id: row.get(0)?,
        name: row.get(1)?,
        style_guide: row.get(2)?,
        tone: row.get(3)?,
        example_messages: serde_json::from_str(&examples).unwrap_or_default(),
        applicable_to: serde_json::from_str(&applicable).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use doppel_core::types::RelationshipType;

    use crate::store::MemoryStore;
    use crate::types::Persona;

    fn persona(id: &str, applicable: Vec<RelationshipType>) -> Persona {
        Persona {
            id: id.into(),
            name: id.into(),
            style_guide: "keep it short".into(),
            tone: "warm".into(),
            example_messages: vec!["sure thing!".into()],
            applicable_to: applicable,
        }
    }

    #[test]
    fn lookup_by_relationship() {
        let mem = MemoryStore::open_in_memory().unwrap();
        mem.upsert_persona(&persona("work", vec![RelationshipType::Colleague]), false)
            .unwrap();
        mem.upsert_persona(&persona("casual", vec![RelationshipType::Friend]), true)
            .unwrap();

        let found = mem
            .persona_for_relationship(RelationshipType::Colleague)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "work");
        assert!(mem
            .persona_for_relationship(RelationshipType::Family)
            .unwrap()
            .is_none());
    }

    #[test]
    fn only_one_default_at_a_time() {
        let mem = MemoryStore::open_in_memory().unwrap();
        mem.upsert_persona(&persona("a", vec![]), true).unwrap();
        mem.upsert_persona(&persona("b", vec![]), true).unwrap();
        assert_eq!(mem.default_persona().unwrap().unwrap().id, "b");
    }
}
