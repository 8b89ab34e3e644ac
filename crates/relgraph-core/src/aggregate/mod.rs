//! Aggregate/event core.
//!
//! An aggregate is a consistency boundary identified by `(type, tenant,
//! id)`. Its state is the fold of its events: [`AggregateRoot::apply`]
//! enriches a new event with metadata, folds it and buffers it as
//! uncommitted; [`AggregateStore::save`] appends the buffer under the
//! version the aggregate was loaded at, so concurrent writers to the same
//! aggregate cannot both succeed.

pub mod contact;
pub mod contract;
pub mod email;
pub mod event;
pub mod opportunity;
pub mod organization;
pub mod payload;

pub use event::{DomainEvent, Event, EventMetadata, aggregate_id};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::eventstore::EventStore;

/// Fold over one aggregate type's events.
pub trait Aggregate: Default {
    type Event: DomainEvent;

    /// Stream type prefix, e.g. `contact`.
    const TYPE: &'static str;

    /// Apply one event to the in-memory state.
    fn when(&mut self, event: &Self::Event, metadata: &EventMetadata, at: DateTime<Utc>)
    -> Result<()>;
}

/// Loaded aggregate plus its version bookkeeping.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: String,
    tenant: String,
    object_id: String,
    version: i64,
    original_version: i64,
    uncommitted: Vec<Event>,
    state: A,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Empty aggregate at version 0.
    #[must_use]
    pub fn new(tenant: &str, object_id: &str) -> Self {
        Self {
            id: aggregate_id(A::TYPE, tenant, object_id),
            tenant: tenant.to_string(),
            object_id: object_id.to_string(),
            version: 0,
            original_version: 0,
            uncommitted: Vec::new(),
            state: A::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    #[must_use]
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Version after the last applied event.
    #[must_use]
    pub const fn version(&self) -> i64 {
        self.version
    }

    /// Version the aggregate had in the event log when it was loaded.
    #[must_use]
    pub const fn original_version(&self) -> i64 {
        self.original_version
    }

    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    #[must_use]
    pub fn uncommitted(&self) -> &[Event] {
        &self.uncommitted
    }

    /// Fold and buffer a new event.
    ///
    /// The metadata tenant always names this aggregate's tenant.
    pub fn apply(
        &mut self,
        event: &A::Event,
        mut metadata: EventMetadata,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let (event_type, data) = event.encode()?;
        metadata.tenant.clone_from(&self.tenant);
        self.state.when(event, &metadata, at)?;
        self.version += 1;
        self.uncommitted.push(Event {
            aggregate_id: self.id.clone(),
            aggregate_type: A::TYPE.to_string(),
            event_type,
            version: self.version,
            timestamp: at,
            data,
            metadata,
        });
        Ok(())
    }

    /// Replay stored events without buffering them.
    pub fn raise_from_history(&mut self, events: &[Event]) -> Result<()> {
        for event in events {
            let typed = event.payload::<A::Event>()?;
            self.state.when(&typed, &event.metadata, event.timestamp)?;
            self.version = event.version;
            self.original_version = event.version;
        }
        Ok(())
    }

    /// Reset the buffer after a successful append.
    pub fn mark_committed(&mut self) {
        self.original_version = self.version;
        self.uncommitted.clear();
    }

    /// Advance an empty aggregate to the stream's version, for streams
    /// whose events are all hidden by a TTL.
    fn seed_version(&mut self, version: i64) {
        self.version = version;
        self.original_version = version;
    }
}

/// Loads and saves aggregates through an [`EventStore`].
#[derive(Debug, Clone)]
pub struct AggregateStore {
    events: Arc<dyn EventStore>,
}

impl AggregateStore {
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Load an existing aggregate; a stream without visible events is
    /// [`Error::AggregateNotFound`].
    pub fn load<A: Aggregate>(
        &self,
        ctx: &Ctx,
        tenant: &str,
        object_id: &str,
    ) -> Result<AggregateRoot<A>> {
        let mut root = AggregateRoot::<A>::new(tenant, object_id);
        let events = self.events.load(ctx, root.id())?;
        if events.is_empty() {
            return Err(Error::AggregateNotFound(root.id().to_string()));
        }
        root.raise_from_history(&events)?;
        debug!(aggregate_id = %root.id(), version = root.version(), "aggregate loaded");
        Ok(root)
    }

    /// Load the aggregate, or start an empty one positioned at the stream
    /// version.
    pub fn load_or_new<A: Aggregate>(
        &self,
        ctx: &Ctx,
        tenant: &str,
        object_id: &str,
    ) -> Result<AggregateRoot<A>> {
        match self.load(ctx, tenant, object_id) {
            Ok(root) => Ok(root),
            Err(Error::AggregateNotFound(stream)) => {
                let mut root = AggregateRoot::<A>::new(tenant, object_id);
                root.seed_version(self.events.stream_version(ctx, &stream)?);
                Ok(root)
            }
            Err(err) => Err(err),
        }
    }

    /// Append the uncommitted events; a no-op when there are none.
    pub fn save<A: Aggregate>(&self, ctx: &Ctx, root: &mut AggregateRoot<A>) -> Result<()> {
        if root.uncommitted.is_empty() {
            return Ok(());
        }
        let version = self
            .events
            .append(ctx, &root.id, root.original_version, &root.uncommitted)?;
        debug!(aggregate_id = %root.id, version, "aggregate saved");
        root.mark_committed();
        Ok(())
    }
}

/// Content hash of an update request, used to skip repeated identical
/// updates.
pub fn update_hash<T: Serialize>(fields: &T, source: &str) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(fields)?);
    hasher.update(b"\0");
    hasher.update(source.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::SqliteEventStore;
    use crate::model::now;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Added {
        amount: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "eventType", content = "data")]
    enum CounterEvent {
        #[serde(rename = "COUNTER_ADDED")]
        Added(Added),
    }

    impl DomainEvent for CounterEvent {}

    #[derive(Debug, Default)]
    struct Counter {
        total: i64,
        last_user: String,
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        const TYPE: &'static str = "counter";

        fn when(&mut self, event: &CounterEvent, metadata: &EventMetadata, _: DateTime<Utc>) -> Result<()> {
            match event {
                CounterEvent::Added(added) => self.total += added.amount,
            }
            self.last_user.clone_from(&metadata.user_id);
            Ok(())
        }
    }

    fn store() -> AggregateStore {
        AggregateStore::new(Arc::new(SqliteEventStore::open_in_memory().expect("open")))
    }

    fn add(root: &mut AggregateRoot<Counter>, amount: i64) {
        let meta = EventMetadata {
            user_id: "u1".into(),
            ..EventMetadata::default()
        };
        root.apply(&CounterEvent::Added(Added { amount }), meta, now())
            .expect("apply");
    }

    #[test]
    fn missing_aggregate_is_reported() {
        let err = store()
            .load::<Counter>(&Ctx::background(), "ziggy", "c1")
            .expect_err("missing");
        assert!(matches!(err, Error::AggregateNotFound(id) if id == "counter-ziggy-c1"));
    }

    #[test]
    fn save_then_load_folds_history() {
        let store = store();
        let ctx = Ctx::background();
        let mut root = store.load_or_new::<Counter>(&ctx, "ziggy", "c1").expect("new");
        add(&mut root, 2);
        add(&mut root, 3);
        assert_eq!(root.uncommitted().len(), 2);
        assert_eq!(root.uncommitted()[0].metadata.tenant, "ziggy");
        store.save(&ctx, &mut root).expect("save");
        assert!(root.uncommitted().is_empty());

        let loaded = store.load::<Counter>(&ctx, "ziggy", "c1").expect("load");
        assert_eq!(loaded.state().total, 5);
        assert_eq!(loaded.state().last_user, "u1");
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.original_version(), 2);
    }

    #[test]
    fn concurrent_writers_conflict() {
        let store = store();
        let ctx = Ctx::background();
        let mut first = store.load_or_new::<Counter>(&ctx, "ziggy", "c1").expect("first");
        let mut second = store.load_or_new::<Counter>(&ctx, "ziggy", "c1").expect("second");
        add(&mut first, 1);
        add(&mut second, 1);
        store.save(&ctx, &mut first).expect("first wins");
        let err = store.save(&ctx, &mut second).expect_err("second loses");
        assert!(matches!(err, Error::WrongExpectedVersion { .. }));
    }

    #[test]
    fn update_hash_depends_on_values_and_source() {
        let a = update_hash(&Added { amount: 1 }, "hubspot").expect("hash");
        assert_eq!(a, update_hash(&Added { amount: 1 }, "hubspot").expect("hash"));
        assert_ne!(a, update_hash(&Added { amount: 2 }, "hubspot").expect("hash"));
        assert_ne!(a, update_hash(&Added { amount: 1 }, "openline").expect("hash"));
    }
}
