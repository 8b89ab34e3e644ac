//! Mailbox slot planning on top of the flow execution read queries.
//!
//! A mailbox sends at most `emails_per_mailbox_per_day` emails per UTC day,
//! and consecutive sends are at least `min_minutes_between_emails` apart. New slots are planned strictly after
//! the last scheduled one and never inside the gap of a booked execution.

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::graph::GraphDriver;
use crate::repository::FlowActionExecutionReadRepository;

/// Candidate moves tried before planning gives up.
const MAX_PLANNING_STEPS: usize = 4096;

/// Upper bound for `min_minutes_between_emails`; a wider gap cannot fit a
/// second send into the daily window.
pub const MAX_MINUTES_BETWEEN_EMAILS: i64 = 24 * 60;

/// Per-mailbox sending limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxLimits {
    pub emails_per_mailbox_per_day: i64,
    pub min_minutes_between_emails: i64,
}

impl Default for MailboxLimits {
    fn default() -> Self {
        Self {
            emails_per_mailbox_per_day: 40,
            min_minutes_between_emails: 2,
        }
    }
}

impl MailboxLimits {
    fn gap(self) -> Result<Duration> {
        let minutes = self.min_minutes_between_emails;
        if minutes > MAX_MINUTES_BETWEEN_EMAILS {
            return Err(Error::InvalidArgument(format!(
                "minutes between emails must be at most {MAX_MINUTES_BETWEEN_EMAILS}, got {minutes}"
            )));
        }
        let gap = Duration::try_minutes(minutes).ok_or_else(|| {
            Error::InvalidArgument(format!("minutes between emails out of range: {minutes}"))
        })?;
        Ok(gap.max(Duration::microseconds(1)))
    }
}

#[derive(Debug, Clone)]
pub struct MailboxPlanner {
    reads: FlowActionExecutionReadRepository,
    limits: MailboxLimits,
}

impl MailboxPlanner {
    #[must_use]
    pub fn new(driver: &GraphDriver, limits: MailboxLimits) -> Self {
        Self {
            reads: FlowActionExecutionReadRepository::new(driver.clone()),
            limits,
        }
    }

    #[must_use]
    pub const fn limits(&self) -> MailboxLimits {
        self.limits
    }

    /// Earliest free slot for `mailbox` at or after `not_before`.
    #[instrument(skip(self, ctx))]
    pub fn next_slot(
        &self,
        ctx: &Ctx,
        tenant: &str,
        mailbox: &str,
        not_before: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        if mailbox.trim().is_empty() {
            return Err(Error::MissingField("mailbox"));
        }
        let daily_cap = self.limits.emails_per_mailbox_per_day;
        if daily_cap <= 0 {
            return Err(Error::InvalidArgument(format!(
                "emails per mailbox per day must be positive, got {daily_cap}"
            )));
        }
        let gap = self.limits.gap()?;
        let mut candidate = not_before;
        if let Some(last) = self.reads.get_first_slot_for_mailbox(ctx, None, tenant, mailbox)? {
            candidate = candidate.max(shift(last, gap)?);
        }

        for _ in 0..MAX_PLANNING_STEPS {
            ctx.check()?;
            let day_start = start_of_day(candidate);
            let day_end = shift(next_day(day_start)?, -Duration::microseconds(1))?;
            let sent = self
                .reads
                .count_emails_per_mailbox_per_day(ctx, None, tenant, mailbox, day_start, day_end)?;
            if sent >= daily_cap {
                debug!(day = %day_start.date_naive(), sent, "mailbox day full");
                candidate = next_day(day_start)?;
                continue;
            }

            let window_start = shift(candidate, Duration::microseconds(1) - gap)?;
            let booked = self.reads.get_by_mailbox_and_time_interval(
                ctx,
                None,
                tenant,
                mailbox,
                window_start,
                shift(candidate, gap)?,
            )?;
            match booked.and_then(|execution| execution.time("scheduledAt")) {
                Some(booked_at) => candidate = shift(booked_at, gap)?,
                None => return Ok(candidate),
            }
        }
        Err(Error::not_found("mailbox slot", mailbox))
    }
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn next_day(day_start: DateTime<Utc>) -> Result<DateTime<Utc>> {
    day_start
        .checked_add_days(Days::new(1))
        .ok_or_else(|| Error::InvalidArgument(format!("no day after {day_start}")))
}

fn shift(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>> {
    at.checked_add_signed(by)
        .ok_or_else(|| Error::InvalidArgument(format!("slot out of range: {at} + {by}")))
}
