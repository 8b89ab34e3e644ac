use std::sync::Arc;

use anyhow::{Context, Result};
use relgraph_core::RelgraphConfig;
use relgraph_core::aggregate::AggregateStore;
use relgraph_core::command::CommandGateway;
use relgraph_core::eventstore::{EventStore, SqliteEventStore};
use relgraph_core::graph::GraphDriver;
use relgraph_core::repository::Repositories;

/// Open stores for one CLI invocation.
#[derive(Debug, Clone)]
pub struct App {
    pub config: RelgraphConfig,
    pub driver: GraphDriver,
    pub events: Arc<SqliteEventStore>,
}

impl App {
    pub fn open(config: RelgraphConfig) -> Result<Self> {
        let busy_timeout = config.graph.busy_timeout();
        let driver = GraphDriver::open(&config.graph.path, busy_timeout)
            .with_context(|| format!("Failed to open graph at {}", config.graph.path.display()))?;
        let events = SqliteEventStore::open(&config.event_store.path, busy_timeout).with_context(
            || {
                format!(
                    "Failed to open event store at {}",
                    config.event_store.path.display()
                )
            },
        )?;
        Ok(Self {
            config,
            driver,
            events: Arc::new(events),
        })
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.events) as Arc<dyn EventStore>
    }

    pub fn gateway(&self) -> CommandGateway {
        CommandGateway::new(AggregateStore::new(self.event_store()))
            .with_stream_ttl(self.config.event_store.default_stream_ttl_minutes)
    }

    pub fn repositories(&self) -> Repositories {
        Repositories::new(&self.driver)
    }
}
