//! Contact-centric knowledge graph queries.
//!
//! The graph itself (entity extraction, embeddings) is maintained by an
//! external service; this module only reads and links records.

use rusqlite::params;

use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::{EntityKind, GraphContext, GraphEntity};

/// Cap on related entities returned per kind.
const MAX_PER_KIND: usize = 10;

impl MemoryStore {
    pub fn upsert_entity(&self, entity: &GraphEntity) -> Result<()> {
        let db = self.conn();
        db.execute(
            "INSERT INTO entities (id, kind, name, summary) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 kind    = excluded.kind,
                 name    = excluded.name,
                 summary = excluded.summary",
            params![entity.id, entity.kind.to_string(), entity.name, entity.summary],
        )?;
        Ok(())
    }

    /// Link an entity to a contact (idempotent).
    pub fn link_entity(
        &self,
        contact_key: &str,
        entity_id: &str,
        relation: Option<&str>,
    ) -> Result<()> {
        let db = self.conn();
        db.execute(
            "INSERT INTO contact_entities (contact_key, entity_id, relation)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(contact_key, entity_id) DO UPDATE SET
                 relation = excluded.relation",
            params![contact_key, entity_id, relation],
        )?;
        Ok(())
    }

    /// The contact's display name plus related people, topics, and events.
    pub fn graph_context(&self, contact_key: &str) -> Result<GraphContext> {
        let db = self.conn();

        let display_name: Option<String> = db
            .query_row(
                "SELECT display_name FROM approved_contacts WHERE contact_key = ?1",
                params![contact_key],
                |row| row.get(0),
            )
            .unwrap_or(None);

        let mut ctx = GraphContext {
            display_name,
            ..Default::default()
        };

        let mut stmt = db.prepare(
            "SELECT e.id, e.kind, e.name, e.summary
             FROM contact_entities ce
             JOIN entities e ON e.id = ce.entity_id
             WHERE ce.contact_key = ?1
             ORDER BY e.kind, e.name",
        )?;
        let rows = stmt.query_map(params![contact_key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        for (id, kind, name, summary) in rows.filter_map(|r| r.ok()) {
            let Ok(kind) = kind.parse::<EntityKind>() else {
                continue;
            };
            let entity = GraphEntity {
                id,
                kind,
                name,
                summary,
            };
            let bucket = match kind {
                EntityKind::Person => &mut ctx.people,
                EntityKind::Topic => &mut ctx.topics,
                EntityKind::Event => &mut ctx.events,
            };
            if bucket.len() < MAX_PER_KIND {
                bucket.push(entity);
            }
        }

        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::MemoryStore;
    use crate::types::{EntityKind, GraphEntity, Tier};

    #[test]
    fn graph_context_groups_by_kind() {
        let mem = MemoryStore::open_in_memory().unwrap();
        mem.approve(
            "telegram:1",
            "+1555",
            "operator",
            Tier::Standard,
            Some("Ada"),
            None,
        )
        .unwrap();
        mem.upsert_entity(&GraphEntity {
            id: "e1".into(),
            kind: EntityKind::Person,
            name: "Grace".into(),
            summary: Some("mutual friend".into()),
        })
        .unwrap();
        mem.upsert_entity(&GraphEntity {
            id: "e2".into(),
            kind: EntityKind::Topic,
            name: "rust meetup".into(),
            summary: None,
        })
        .unwrap();
        mem.link_entity("telegram:1", "e1", Some("friend_of")).unwrap();
        mem.link_entity("telegram:1", "e2", None).unwrap();

        let ctx = mem.graph_context("telegram:1").unwrap();
        assert_eq!(ctx.display_name.as_deref(), Some("Ada"));
        assert_eq!(ctx.people.len(), 1);
        assert_eq!(ctx.topics.len(), 1);
        assert!(ctx.events.is_empty());
        assert!(!ctx.is_empty());
    }

    #[test]
    fn unknown_contact_yields_empty_context() {
        let mem = MemoryStore::open_in_memory().unwrap();
        let ctx = mem.graph_context("telegram:404").unwrap();
        assert!(ctx.is_empty());
    }
}
