#![allow(dead_code)]

use std::sync::Arc;

use relgraph_core::Ctx;
use relgraph_core::aggregate::AggregateStore;
use relgraph_core::command::{CommandGateway, CommandMeta};
use relgraph_core::eventstore::{EventStore, SqliteEventStore};
use relgraph_core::graph::GraphDriver;
use relgraph_core::graph::extract;
use relgraph_core::projection::subscription::PollStats;
use relgraph_core::projection::{
    EventCompletionSink, EventHandler, RecordingCompletionSink, Subscription,
};
use relgraph_core::repository::Repositories;

pub const TENANT: &str = "ziggy";

/// Commands, event log, projector and graph wired together in memory.
pub struct Stack {
    pub driver: GraphDriver,
    pub events: Arc<SqliteEventStore>,
    pub gateway: CommandGateway,
    pub handler: EventHandler,
    pub sink: Arc<RecordingCompletionSink>,
    pub subscription: Subscription,
    pub repos: Repositories,
}

impl Stack {
    pub fn new() -> Self {
        let driver = GraphDriver::open_in_memory().expect("graph");
        let events = Arc::new(SqliteEventStore::open_in_memory().expect("event store"));
        let store = Arc::clone(&events) as Arc<dyn EventStore>;
        let gateway = CommandGateway::new(AggregateStore::new(Arc::clone(&store)));
        let sink = Arc::new(RecordingCompletionSink::default());
        let handler = EventHandler::new(
            &driver,
            Arc::new(gateway.clone()),
            Arc::clone(&sink) as Arc<dyn EventCompletionSink>,
        );
        let subscription = Subscription::new("graph", store, handler.clone(), driver.clone())
            .expect("subscription");
        let repos = Repositories::new(&driver);
        repos
            .tenants
            .create(&Ctx::background(), None, TENANT)
            .expect("tenant");
        Self {
            driver,
            events,
            gateway,
            handler,
            sink,
            subscription,
            repos,
        }
    }

    pub fn meta() -> CommandMeta {
        CommandMeta::system(TENANT)
    }

    /// Project everything appended so far, follow-ups included.
    pub fn project(&self) -> PollStats {
        self.subscription
            .run_until_idle(&Ctx::background())
            .expect("projection")
    }

    pub fn count_label(&self, label: &str) -> i64 {
        self.driver
            .execute_read_in_transaction(&Ctx::background(), None, |tx| tx.count_label(label))
            .expect("count label")
    }

    pub fn count_edges(&self, rel_type: &str) -> i64 {
        self.driver
            .execute_read_in_transaction(&Ctx::background(), None, |tx| tx.count_edges(rel_type))
            .expect("count edges")
    }

    pub fn scalar(&self, sql: &str) -> i64 {
        self.driver
            .execute_read_in_transaction(&Ctx::background(), None, |tx| {
                let records = tx.query(sql, &[])?;
                Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0))
            })
            .expect("scalar")
    }

    pub fn event_types(&self, stream: &str) -> Vec<String> {
        self.events
            .load(&Ctx::background(), stream)
            .expect("load")
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }
}
