//! Append-only event log.
//!
//! Streams are keyed by aggregate id (`<type>-<tenant>-<objectId>`). Event
//! versions inside a stream are contiguous and start at 1; an append names
//! the version it expects the stream to be at and fails with
//! [`Error::WrongExpectedVersion`](crate::error::Error::WrongExpectedVersion)
//! otherwise. Every event also receives a global position used by
//! subscriptions.
//!
//! Deletion is administrative: [`EventStore::set_stream_metadata`] puts a
//! maximum age on the stream, after which its events are no longer loaded
//! and may be scavenged.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteEventStore;

use serde::{Deserialize, Serialize};

use crate::aggregate::Event;
use crate::context::Ctx;
use crate::error::Result;

/// Default TTL applied by stream deletion, in minutes.
pub const DEFAULT_STREAM_TTL_MINUTES: i64 = 24 * 60;

/// An event together with its global log position.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub position: i64,
    pub event: Event,
}

/// Administrative metadata of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    /// Events older than this many minutes are hidden from reads.
    pub max_age_minutes: Option<i64>,
}

pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Append `events` when the stream is at `expected_version`; returns
    /// the new stream version.
    fn append(&self, ctx: &Ctx, stream: &str, expected_version: i64, events: &[Event])
    -> Result<i64>;

    /// Visible events of the stream in version order.
    fn load(&self, ctx: &Ctx, stream: &str) -> Result<Vec<Event>>;

    /// Highest version ever appended to the stream, 0 when empty.
    fn stream_version(&self, ctx: &Ctx, stream: &str) -> Result<i64>;

    /// Events of every stream after `after_position`, in log order.
    fn read_all(&self, ctx: &Ctx, after_position: i64, limit: usize) -> Result<Vec<RecordedEvent>>;

    fn set_stream_metadata(&self, ctx: &Ctx, stream: &str, metadata: &StreamMetadata)
    -> Result<()>;

    fn stream_metadata(&self, ctx: &Ctx, stream: &str) -> Result<StreamMetadata>;
}
