//! SQLite layout of the event log.
//!
//! - `events` holds every appended event; `(stream, version)` is unique and
//!   `position` is the global, monotonically increasing log order
//! - `stream_metadata` holds administrative settings such as the TTL set
//!   by stream deletion, and the highest version removed by scavenging so
//!   the stream version survives truncation

use rusqlite::Connection;

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

/// Migration v1: events and stream metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    stream TEXT NOT NULL CHECK (length(trim(stream)) > 0),
    version INTEGER NOT NULL CHECK (version > 0),
    aggregate_type TEXT NOT NULL,
    event_type TEXT NOT NULL,
    timestamp_us INTEGER NOT NULL,
    data TEXT NOT NULL CHECK (json_valid(data)),
    metadata TEXT NOT NULL CHECK (json_valid(metadata)),
    UNIQUE (stream, version)
);

CREATE TABLE IF NOT EXISTS stream_metadata (
    stream TEXT PRIMARY KEY,
    max_age_minutes INTEGER,
    truncated_version INTEGER NOT NULL DEFAULT 0,
    updated_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_stream_version ON events(stream, version);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL)];

pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(u32::try_from(version).unwrap_or(0))
}

/// Apply pending migrations in ascending order.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        current = *version;
    }
    Ok(current)
}
