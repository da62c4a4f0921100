use rusqlite::Connection;

use crate::error::Result;

/// Initialise the KV schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS counters (
            key           TEXT    NOT NULL PRIMARY KEY,
            count         INTEGER NOT NULL,
            expires_at_ms INTEGER NOT NULL
        ) STRICT;

        -- No TTL: a pause stays until explicitly resumed.
        CREATE TABLE IF NOT EXISTS pauses (
            scope         TEXT    NOT NULL PRIMARY KEY,
            paused_at_ms  INTEGER NOT NULL,
            reason        TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS marks (
            key           TEXT    NOT NULL PRIMARY KEY,
            value_ms      INTEGER NOT NULL,
            expires_at_ms INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS deferred (
            id               TEXT    NOT NULL PRIMARY KEY,
            payload          TEXT    NOT NULL,
            process_after_ms INTEGER NOT NULL
        ) STRICT;

        -- Efficient polling: SELECT … WHERE process_after_ms <= ?
        CREATE INDEX IF NOT EXISTS idx_deferred_after
            ON deferred (process_after_ms);

        CREATE TABLE IF NOT EXISTS history (
            contact_key   TEXT    NOT NULL,
            id            TEXT    NOT NULL,
            role          TEXT    NOT NULL,
            kind          TEXT    NOT NULL,
            content       TEXT    NOT NULL,
            timestamp_ms  INTEGER NOT NULL,
            expires_at_ms INTEGER NOT NULL,
            PRIMARY KEY (contact_key, id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_history_contact_ts
            ON history (contact_key, timestamp_ms);

        CREATE TABLE IF NOT EXISTS streams (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            stream      TEXT    NOT NULL,
            payload     TEXT    NOT NULL,
            added_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_streams_stream_seq
            ON streams (stream, seq);

        CREATE TABLE IF NOT EXISTS token_stats (
            date_key       TEXT    NOT NULL PRIMARY KEY,
            classification INTEGER NOT NULL DEFAULT 0,
            response       INTEGER NOT NULL DEFAULT 0,
            cache_read     INTEGER NOT NULL DEFAULT 0,
            cache_write    INTEGER NOT NULL DEFAULT 0,
            total_messages INTEGER NOT NULL DEFAULT 0,
            expires_at_ms  INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS caches (
            key           TEXT    NOT NULL PRIMARY KEY,
            payload       TEXT    NOT NULL,
            expires_at_ms INTEGER NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
