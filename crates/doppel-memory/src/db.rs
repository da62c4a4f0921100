use rusqlite::Connection;

use crate::error::Result;

/// Initialise the MEM schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS approved_contacts (
            contact_key  TEXT NOT NULL PRIMARY KEY,
            phone_number TEXT NOT NULL,
            approved_at  TEXT NOT NULL,
            approved_by  TEXT NOT NULL,
            tier         TEXT NOT NULL DEFAULT 'standard',
            display_name TEXT,
            channel      TEXT,
            notes        TEXT,
            persona_id   TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS denied_contacts (
            contact_key  TEXT NOT NULL PRIMARY KEY,
            phone_number TEXT NOT NULL,
            denied_at    TEXT NOT NULL,
            denied_by    TEXT NOT NULL,
            expires_at   TEXT NOT NULL,   -- ISO-8601; lexicographic compare
            reason       TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS pairing_requests (
            contact_key   TEXT NOT NULL PRIMARY KEY,
            phone_number  TEXT NOT NULL,
            requested_at  TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            display_name  TEXT,
            channel       TEXT,
            first_message TEXT,
            approved_by   TEXT,
            approved_at   TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS personas (
            id               TEXT NOT NULL PRIMARY KEY,
            name             TEXT NOT NULL,
            style_guide      TEXT NOT NULL,
            tone             TEXT NOT NULL,
            example_messages TEXT NOT NULL,  -- JSON array
            applicable_to    TEXT NOT NULL,  -- JSON array of relationship types
            is_default       INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE TABLE IF NOT EXISTS style_profiles (
            contact_key        TEXT NOT NULL PRIMARY KEY,
            avg_message_length REAL NOT NULL DEFAULT 0,
            emoji_frequency    REAL NOT NULL DEFAULT 0,
            formality_score    REAL NOT NULL DEFAULT 0.5,
            punctuation_style  TEXT NOT NULL,  -- JSON object
            greeting_style     TEXT NOT NULL,  -- JSON array, max 5
            sign_off_style     TEXT NOT NULL,  -- JSON array, max 5
            sample_count       INTEGER NOT NULL DEFAULT 0,
            feature_confidence TEXT NOT NULL,  -- JSON object
            last_updated       TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS relationship_scores (
            contact_key        TEXT NOT NULL PRIMARY KEY,
            scores             TEXT NOT NULL,  -- JSON object type -> score
            current_type       TEXT,
            current_confidence REAL NOT NULL DEFAULT 0,
            signal_count       INTEGER NOT NULL DEFAULT 0,
            last_updated       TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS entities (
            id      TEXT NOT NULL PRIMARY KEY,
            kind    TEXT NOT NULL,
            name    TEXT NOT NULL,
            summary TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS contact_entities (
            contact_key TEXT NOT NULL,
            entity_id   TEXT NOT NULL,
            relation    TEXT,
            PRIMARY KEY (contact_key, entity_id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_contact_entities_contact
            ON contact_entities (contact_key);
        ",
    )?;
    Ok(())
}
