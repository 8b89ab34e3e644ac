//! SQLite-backed [`EventStore`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info, instrument};

use super::{EventStore, RecordedEvent, StreamMetadata, schema};
use crate::aggregate::{Event, EventMetadata};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::graph::props::from_micros;
use crate::graph::{DEFAULT_BUSY_TIMEOUT, acquire_connection, configure_connection};
use crate::model::now;

const MICROS_PER_MINUTE: i64 = 60_000_000;

/// Cloneable handle to an on-disk or in-memory event log.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
    busy_timeout: Duration,
}

/// Raw `events` row before JSON decoding.
struct StoredEvent {
    position: i64,
    stream: String,
    version: i64,
    aggregate_type: String,
    event_type: String,
    timestamp_us: i64,
    data: String,
    metadata: String,
}

impl StoredEvent {
    const COLUMNS: &'static str =
        "position, stream, version, aggregate_type, event_type, timestamp_us, data, metadata";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            position: row.get(0)?,
            stream: row.get(1)?,
            version: row.get(2)?,
            aggregate_type: row.get(3)?,
            event_type: row.get(4)?,
            timestamp_us: row.get(5)?,
            data: row.get(6)?,
            metadata: row.get(7)?,
        })
    }

    fn decode(self) -> Result<RecordedEvent> {
        let timestamp = from_micros(self.timestamp_us).ok_or_else(|| {
            Error::Internal(format!("event timestamp {} out of range", self.timestamp_us))
        })?;
        let metadata: EventMetadata = serde_json::from_str(&self.metadata)?;
        Ok(RecordedEvent {
            position: self.position,
            event: Event {
                aggregate_id: self.stream,
                aggregate_type: self.aggregate_type,
                event_type: self.event_type,
                version: self.version,
                timestamp,
                data: serde_json::from_str(&self.data)?,
                metadata,
            },
        })
    }
}

impl SqliteEventStore {
    /// Open (or create) the event log and migrate it.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    Error::Internal(format!(
                        "create event store directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }
        }
        let mut conn = Connection::open(path)?;
        configure_connection(&conn, busy_timeout)?;
        let version = schema::migrate(&mut conn)?;
        info!(path = %path.display(), schema_version = version, "event store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            busy_timeout,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    fn acquire(&self, ctx: &Ctx) -> Result<MutexGuard<'_, Connection>> {
        acquire_connection(&self.conn, ctx, self.busy_timeout)
    }

    /// Physically remove events hidden by a stream TTL as of `at`.
    ///
    /// The removed versions stay reserved so appends keep their numbering.
    #[instrument(level = "debug", skip(self, ctx))]
    pub fn scavenge(&self, ctx: &Ctx, at: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.acquire(ctx)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let at_us = at.timestamp_micros();
        tx.execute(
            "UPDATE stream_metadata SET truncated_version = MAX(truncated_version, COALESCE((
                 SELECT MAX(e.version) FROM events e
                 WHERE e.stream = stream_metadata.stream
                   AND e.timestamp_us < ?1 - stream_metadata.max_age_minutes * ?2
             ), 0))
             WHERE max_age_minutes IS NOT NULL",
            params![at_us, MICROS_PER_MINUTE],
        )?;
        let removed = tx.execute(
            "DELETE FROM events WHERE position IN (
                 SELECT e.position FROM events e
                 JOIN stream_metadata m ON m.stream = e.stream
                 WHERE m.max_age_minutes IS NOT NULL
                   AND e.timestamp_us < ?1 - m.max_age_minutes * ?2
             )",
            params![at_us, MICROS_PER_MINUTE],
        )?;
        tx.commit()?;
        info!(removed, "expired events scavenged");
        Ok(removed)
    }
}

fn current_version(conn: &Connection, stream: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT MAX(
             COALESCE((SELECT MAX(version) FROM events WHERE stream = ?1), 0),
             COALESCE((SELECT truncated_version FROM stream_metadata WHERE stream = ?1), 0)
         )",
        [stream],
        |row| row.get(0),
    )
}

fn max_age_minutes(conn: &Connection, stream: &str) -> rusqlite::Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT max_age_minutes FROM stream_metadata WHERE stream = ?1",
            [stream],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?
        .flatten())
}

impl EventStore for SqliteEventStore {
    #[instrument(level = "debug", skip(self, ctx, events), fields(count = events.len()))]
    fn append(
        &self,
        ctx: &Ctx,
        stream: &str,
        expected_version: i64,
        events: &[Event],
    ) -> Result<i64> {
        let mut conn = self.acquire(ctx)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let actual = current_version(&tx, stream)?;
        if actual != expected_version {
            return Err(Error::WrongExpectedVersion {
                stream: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let mut version = expected_version;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO events
                     (stream, version, aggregate_type, event_type, timestamp_us, data, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for event in events {
                version += 1;
                if event.aggregate_id != stream {
                    return Err(Error::InvalidArgument(format!(
                        "event for `{}` appended to stream `{stream}`",
                        event.aggregate_id
                    )));
                }
                if event.version != version {
                    return Err(Error::InvalidArgument(format!(
                        "event version {} does not follow stream version {}",
                        event.version,
                        version - 1
                    )));
                }
                insert.execute(params![
                    stream,
                    event.version,
                    event.aggregate_type,
                    event.event_type,
                    event.timestamp.timestamp_micros(),
                    serde_json::to_string(&event.data)?,
                    serde_json::to_string(&event.metadata)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(stream, version, "events appended");
        Ok(version)
    }

    #[instrument(level = "debug", skip(self, ctx))]
    fn load(&self, ctx: &Ctx, stream: &str) -> Result<Vec<Event>> {
        let conn = self.acquire(ctx)?;
        let cutoff_us = max_age_minutes(&conn, stream)?.map_or(i64::MIN, |minutes| {
            now().timestamp_micros() - minutes.saturating_mul(MICROS_PER_MINUTE)
        });
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM events WHERE stream = ?1 AND timestamp_us >= ?2 ORDER BY version",
            StoredEvent::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![stream, cutoff_us], StoredEvent::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| row.decode().map(|recorded| recorded.event))
            .collect()
    }

    fn stream_version(&self, ctx: &Ctx, stream: &str) -> Result<i64> {
        let conn = self.acquire(ctx)?;
        Ok(current_version(&conn, stream)?)
    }

    #[instrument(level = "debug", skip(self, ctx))]
    fn read_all(&self, ctx: &Ctx, after_position: i64, limit: usize) -> Result<Vec<RecordedEvent>> {
        let conn = self.acquire(ctx)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM events WHERE position > ?1 ORDER BY position LIMIT ?2",
            StoredEvent::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![after_position, limit], StoredEvent::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StoredEvent::decode).collect()
    }

    #[instrument(level = "debug", skip(self, ctx))]
    fn set_stream_metadata(
        &self,
        ctx: &Ctx,
        stream: &str,
        metadata: &StreamMetadata,
    ) -> Result<()> {
        let conn = self.acquire(ctx)?;
        conn.execute(
            "INSERT INTO stream_metadata (stream, max_age_minutes, updated_at_us)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(stream) DO UPDATE SET
                 max_age_minutes = excluded.max_age_minutes,
                 updated_at_us = excluded.updated_at_us",
            params![stream, metadata.max_age_minutes, now().timestamp_micros()],
        )?;
        info!(stream, max_age_minutes = ?metadata.max_age_minutes, "stream metadata set");
        Ok(())
    }

    fn stream_metadata(&self, ctx: &Ctx, stream: &str) -> Result<StreamMetadata> {
        let conn = self.acquire(ctx)?;
        Ok(StreamMetadata {
            max_age_minutes: max_age_minutes(&conn, stream)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn event(stream: &str, version: i64, at: DateTime<Utc>) -> Event {
        Event {
            aggregate_id: stream.to_string(),
            aggregate_type: "contact".to_string(),
            event_type: "V1_CONTACT_UPDATE".to_string(),
            version,
            timestamp: at,
            data: json!({"firstName": format!("v{version}")}),
            metadata: EventMetadata {
                tenant: "ziggy".to_string(),
                user_id: "u1".to_string(),
                app: "test".to_string(),
            },
        }
    }

    #[test]
    fn append_checks_expected_version() {
        let store = SqliteEventStore::open_in_memory().expect("open");
        let ctx = Ctx::background();
        let stream = "contact-ziggy-c1";
        let at = now();

        assert_eq!(store.append(&ctx, stream, 0, &[event(stream, 1, at)]).expect("first"), 1);
        let err = store
            .append(&ctx, stream, 0, &[event(stream, 1, at)])
            .expect_err("stale append");
        assert!(matches!(
            err,
            Error::WrongExpectedVersion { expected: 0, actual: 1, .. }
        ));
        assert_eq!(
            store
                .append(&ctx, stream, 1, &[event(stream, 2, at), event(stream, 3, at)])
                .expect("batch"),
            3
        );
        let loaded = store.load(&ctx, stream).expect("load");
        assert_eq!(loaded.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(loaded[0].metadata.user_id, "u1");
    }

    #[test]
    fn non_contiguous_versions_are_refused_atomically() {
        let store = SqliteEventStore::open_in_memory().expect("open");
        let ctx = Ctx::background();
        let stream = "contact-ziggy-c1";
        let err = store
            .append(&ctx, stream, 0, &[event(stream, 1, now()), event(stream, 5, now())])
            .expect_err("gap");
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(store.stream_version(&ctx, stream).expect("version"), 0);
    }

    #[test]
    fn read_all_follows_global_position() {
        let store = SqliteEventStore::open_in_memory().expect("open");
        let ctx = Ctx::background();
        store.append(&ctx, "a", 0, &[event("a", 1, now())]).expect("a");
        store.append(&ctx, "b", 0, &[event("b", 1, now())]).expect("b");
        store.append(&ctx, "a", 1, &[event("a", 2, now())]).expect("a2");

        let all = store.read_all(&ctx, 0, 10).expect("read");
        let order: Vec<_> = all
            .iter()
            .map(|r| (r.event.aggregate_id.as_str(), r.event.version))
            .collect();
        assert_eq!(order, vec![("a", 1), ("b", 1), ("a", 2)]);

        let tail = store.read_all(&ctx, all[0].position, 1).expect("tail");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event.aggregate_id, "b");
    }

    #[test]
    fn ttl_hides_old_events_and_scavenge_keeps_numbering() {
        let store = SqliteEventStore::open_in_memory().expect("open");
        let ctx = Ctx::background();
        let stream = "contact-ziggy-c1";
        let old = now() - ChronoDuration::days(3);
        store
            .append(&ctx, stream, 0, &[event(stream, 1, old), event(stream, 2, now())])
            .expect("append");

        store
            .set_stream_metadata(&ctx, stream, &StreamMetadata { max_age_minutes: Some(1440) })
            .expect("ttl");
        assert_eq!(
            store.stream_metadata(&ctx, stream).expect("meta").max_age_minutes,
            Some(1440)
        );
        let visible = store.load(&ctx, stream).expect("load");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].version, 2);

        assert_eq!(store.scavenge(&ctx, now()).expect("scavenge"), 1);
        assert_eq!(store.stream_version(&ctx, stream).expect("version"), 2);
        store.append(&ctx, stream, 2, &[event(stream, 3, now())]).expect("append after");
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("events.sqlite3");
        let ctx = Ctx::background();
        {
            let store = SqliteEventStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open");
            store.append(&ctx, "s", 0, &[event("s", 1, now())]).expect("append");
        }
        let store = SqliteEventStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("reopen");
        assert_eq!(store.stream_version(&ctx, "s").expect("version"), 1);
    }
}
