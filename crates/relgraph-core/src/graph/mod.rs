//! Embedded labeled property graph over SQLite.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so readers are not blocked by the writer
//! - `busy_timeout` from configuration to absorb transient lock failures
//! - `foreign_keys = ON` so edges and labels never outlive their nodes
//!
//! Work is funneled through [`GraphDriver::execute_read_in_transaction`] and
//! [`GraphDriver::execute_write_in_transaction`]: when the caller already
//! holds a [`GraphTx`] it is reused, otherwise a session is opened and the
//! work runs as one transaction that rolls back on error.

pub mod extract;
pub mod labels;
pub mod migrations;
pub mod props;
pub mod schema;
pub mod tx;

pub use extract::NodeAndId;
pub use props::{Edge, Node, PropertyPatch, Props};
pub use tx::{AccessMode, GraphTx, Record};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

use crate::context::Ctx;
use crate::error::{Error, Result};

/// Busy timeout used for graph connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Long-lived, cloneable handle to the graph database.
#[derive(Debug, Clone)]
pub struct GraphDriver {
    conn: Arc<Mutex<Connection>>,
    busy_timeout: Duration,
}

impl GraphDriver {
    /// Open (or create) the graph database, apply pragmas and migrate.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    Error::Internal(format!("create graph directory {}: {err}", parent.display()))
                })?;
            }
        }
        let mut conn = Connection::open(path)?;
        configure_connection(&conn, busy_timeout)?;
        migrations::migrate(&mut conn)?;
        debug!(path = %path.display(), "graph database opened");
        Ok(Self::from_connection(conn, busy_timeout))
    }

    /// A private in-memory graph, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::migrate(&mut conn)?;
        Ok(Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT))
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            busy_timeout,
        }
    }

    fn acquire(&self, ctx: &Ctx) -> Result<MutexGuard<'_, Connection>> {
        acquire_connection(&self.conn, ctx, self.busy_timeout)
    }

    /// Scoped read session; the connection is released when it drops.
    pub fn read_session(&self, ctx: &Ctx) -> Result<Session<'_>> {
        Ok(Session {
            conn: self.acquire(ctx)?,
            mode: AccessMode::Read,
            ctx: ctx.clone(),
        })
    }

    /// Scoped write session; the connection is released when it drops.
    pub fn write_session(&self, ctx: &Ctx) -> Result<Session<'_>> {
        Ok(Session {
            conn: self.acquire(ctx)?,
            mode: AccessMode::Write,
            ctx: ctx.clone(),
        })
    }

    /// Run `work` in `tx` when given, otherwise in a fresh read transaction.
    pub fn execute_read_in_transaction<T>(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        work: impl FnOnce(&GraphTx<'_>) -> Result<T>,
    ) -> Result<T> {
        match tx {
            Some(tx) => work(tx),
            None => self.read_session(ctx)?.run(work),
        }
    }

    /// Run `work` in `tx` when given, otherwise in a fresh write
    /// transaction. Reusing a read transaction for writes is refused.
    pub fn execute_write_in_transaction<T>(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        work: impl FnOnce(&GraphTx<'_>) -> Result<T>,
    ) -> Result<T> {
        match tx {
            Some(tx) if tx.is_write() => work(tx),
            Some(_) => Err(Error::Internal(
                "write work requested inside a read transaction".to_string(),
            )),
            None => self.write_session(ctx)?.run(work),
        }
    }
}

/// Poll the shared connection until it is free, the context fails or
/// `busy_timeout` elapses.
pub(crate) fn acquire_connection<'c>(
    conn: &'c Mutex<Connection>,
    ctx: &Ctx,
    busy_timeout: Duration,
) -> Result<MutexGuard<'c, Connection>> {
    let start = Instant::now();
    loop {
        ctx.check()?;
        match conn.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(_)) => {
                return Err(Error::Internal("connection mutex poisoned".to_string()));
            }
            Err(TryLockError::WouldBlock) => {}
        }
        if start.elapsed() >= busy_timeout {
            return Err(Error::DeadlineExceeded);
        }
        thread::sleep(LOCK_POLL_INTERVAL);
    }
}

pub(crate) fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Exclusive use of the graph connection.
pub struct Session<'d> {
    conn: MutexGuard<'d, Connection>,
    mode: AccessMode,
    ctx: Ctx,
}

impl Session<'_> {
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Run `work` as one transaction: commit on `Ok`, roll back on `Err`.
    pub fn run<T>(&mut self, work: impl FnOnce(&GraphTx<'_>) -> Result<T>) -> Result<T> {
        self.ctx.check()?;
        let behavior = match self.mode {
            AccessMode::Read => TransactionBehavior::Deferred,
            AccessMode::Write => TransactionBehavior::Immediate,
        };
        let inner = self.conn.transaction_with_behavior(behavior)?;
        let tx = GraphTx::new(inner, self.mode, self.ctx.clone());
        let out = work(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::labels::{CONTACT, LOCATION};
    use serde_json::json;

    fn props(value: serde_json::Value) -> Props {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Props::new(),
        }
    }

    #[test]
    fn open_sets_wal_and_busy_timeout() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("graph.sqlite3");
        let driver = GraphDriver::open(&path, Duration::from_millis(1500)).expect("open");
        let guard = driver.acquire(&Ctx::background()).expect("lock");

        let journal_mode: String = guard
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");
        let busy_timeout_ms: u64 = guard
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(busy_timeout_ms, 1500);
        assert_eq!(
            migrations::current_schema_version(&guard).expect("version"),
            migrations::LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn failed_work_rolls_back() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        let result: Result<()> = driver.execute_write_in_transaction(&ctx, None, |tx| {
            tx.create_node(&[CONTACT], &props(json!({"id": "c1"})))?;
            Err(Error::Internal("boom".to_string()))
        });
        assert!(result.is_err());

        let count = driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_label(CONTACT))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn outer_transaction_is_reused() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        driver
            .execute_write_in_transaction(&ctx, None, |outer| {
                let contact = outer.create_node(&[CONTACT], &props(json!({"id": "c1"})))?;
                driver.execute_write_in_transaction(&ctx, Some(outer), |inner| {
                    let location = inner.create_node(&[LOCATION], &props(json!({"id": "l1"})))?;
                    inner.create_edge(contact, "ASSOCIATED_WITH", location, &Props::new())
                })?;
                assert_eq!(outer.count_edges("ASSOCIATED_WITH")?, 1);
                Ok(())
            })
            .expect("nested write");
    }

    #[test]
    fn cancelled_context_never_acquires() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        ctx.cancel();
        let err = driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_label(CONTACT))
            .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn write_inside_read_transaction_is_refused() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        let err = driver
            .execute_read_in_transaction(&ctx, None, |read| {
                driver.execute_write_in_transaction(&ctx, Some(read), |_| Ok(()))
            })
            .expect_err("refused");
        assert!(matches!(err, Error::Internal(_)));
    }
}
