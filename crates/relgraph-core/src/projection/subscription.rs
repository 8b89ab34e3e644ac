//! Catch-up subscription feeding the event log into the projectors.
//!
//! The subscription reads events after its checkpoint in log order, hands
//! each one to the [`EventHandler`] and persists the position of every
//! handled event in `projection_checkpoints`. Events the handler can never
//! process (unknown aggregate or event type, undecodable payload) are logged
//! and passed over; any other failure stops the poll with the checkpoint
//! left on the last handled event, so the next poll retries it.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{EventHandler, HandleOutcome};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::eventstore::{EventStore, RecordedEvent};
use crate::graph::{GraphDriver, extract};
use crate::model::now;

/// Events read per poll unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub applied: usize,
    pub skipped: usize,
    pub rejected: usize,
}

impl PollStats {
    #[must_use]
    pub const fn handled(&self) -> usize {
        self.applied + self.skipped + self.rejected
    }

    const fn add(&mut self, other: Self) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    name: String,
    events: Arc<dyn EventStore>,
    handler: EventHandler,
    driver: GraphDriver,
    batch_size: usize,
}

impl Subscription {
    pub fn new(
        name: &str,
        events: Arc<dyn EventStore>,
        handler: EventHandler,
        driver: GraphDriver,
    ) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::MissingField("subscription"));
        }
        Ok(Self {
            name: name.to_string(),
            events,
            handler,
            driver,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log position of the last handled event, 0 before the first poll.
    pub fn checkpoint(&self, ctx: &Ctx) -> Result<i64> {
        self.driver.execute_read_in_transaction(ctx, None, |tx| {
            let records = tx.query(
                "SELECT position FROM projection_checkpoints WHERE subscription = :name",
                &[(":name", &self.name)],
            )?;
            Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0))
        })
    }

    /// Handle one batch of events after the checkpoint.
    #[instrument(skip_all, fields(subscription = %self.name))]
    pub fn poll(&self, ctx: &Ctx) -> Result<PollStats> {
        let after = self.checkpoint(ctx)?;
        let batch = self.events.read_all(ctx, after, self.batch_size)?;
        let mut stats = PollStats::default();
        for recorded in &batch {
            ctx.check()?;
            self.handle_one(ctx, recorded, &mut stats)?;
            self.store_checkpoint(ctx, recorded.position)?;
        }
        if stats.handled() > 0 {
            debug!(
                applied = stats.applied,
                skipped = stats.skipped,
                rejected = stats.rejected,
                "subscription batch handled"
            );
        }
        Ok(stats)
    }

    /// Poll until the log holds nothing past the checkpoint, including the
    /// follow-up events projectors appended on the way.
    pub fn run_until_idle(&self, ctx: &Ctx) -> Result<PollStats> {
        let mut total = PollStats::default();
        loop {
            let stats = self.poll(ctx)?;
            if stats.handled() == 0 {
                break;
            }
            total.add(stats);
        }
        info!(
            subscription = %self.name,
            applied = total.applied,
            skipped = total.skipped,
            rejected = total.rejected,
            "subscription idle"
        );
        Ok(total)
    }

    fn handle_one(&self, ctx: &Ctx, recorded: &RecordedEvent, stats: &mut PollStats) -> Result<()> {
        let event = &recorded.event;
        match self.handler.handle(ctx, event) {
            Ok(HandleOutcome::Applied) => stats.applied += 1,
            Ok(HandleOutcome::Skipped) => stats.skipped += 1,
            Err(
                err @ (Error::UnknownAggregateType(_)
                | Error::InvalidRequestType(_)
                | Error::Codec(_)),
            ) => {
                warn!(
                    position = recorded.position,
                    aggregate_id = %event.aggregate_id,
                    event_type = %event.event_type,
                    code = %err.code(),
                    error = %err,
                    "event cannot be projected, passing over it"
                );
                stats.rejected += 1;
            }
            Err(err) => {
                warn!(
                    position = recorded.position,
                    aggregate_id = %event.aggregate_id,
                    error = %err,
                    "projection failed, checkpoint kept"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    fn store_checkpoint(&self, ctx: &Ctx, position: i64) -> Result<()> {
        let updated_at = now().timestamp_micros();
        self.driver.execute_write_in_transaction(ctx, None, |tx| {
            tx.execute(
                "INSERT INTO projection_checkpoints (subscription, position, updated_at_us)
                 VALUES (:name, :position, :updated_at)
                 ON CONFLICT(subscription) DO UPDATE SET
                     position = MAX(position, excluded.position),
                     updated_at_us = excluded.updated_at_us",
                &[
                    (":name", &self.name),
                    (":position", &position),
                    (":updated_at", &updated_at),
                ],
            )?;
            Ok(())
        })
    }
}
