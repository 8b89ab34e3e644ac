use tracing::{debug, instrument};

use super::{Change, Deps, HandleOutcome};
use crate::aggregate::Event;
use crate::aggregate::email::EmailEvent;
use crate::context::Ctx;
use crate::error::Result;

const ENTITY: &str = "email";

#[derive(Debug, Clone)]
pub struct EmailProjector {
    deps: Deps,
}

impl EmailProjector {
    pub(crate) const fn new(deps: Deps) -> Self {
        Self { deps }
    }

    #[instrument(level = "debug", skip_all, fields(tenant = %event.tenant(), email_id = %event.object_id()))]
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<HandleOutcome> {
        let payload: EmailEvent = event.payload()?;
        let tenant = event.tenant();
        let email_id = event.object_id();
        let emails = &self.deps.repos.emails;
        let at = event.timestamp;

        let (applied, change) = match &payload {
            EmailEvent::Upsert(upserted) => (
                emails.create_email(
                    ctx,
                    None,
                    tenant,
                    email_id,
                    &upserted.raw_email,
                    &upserted.source,
                    upserted.created_at.unwrap_or(at),
                    at,
                    event.version,
                )?,
                Change::Create,
            ),
            EmailEvent::Validated(validated) => (
                emails.email_validated(
                    ctx,
                    None,
                    tenant,
                    email_id,
                    &validated.validation,
                    validated.validated_at.unwrap_or(at),
                )?,
                Change::Update,
            ),
            EmailEvent::CleanValidation(_) => (
                emails.clean_email_validation(ctx, None, tenant, email_id, at)?,
                Change::Update,
            ),
            EmailEvent::Delete(_) => (
                emails.delete_email(ctx, None, tenant, email_id)?,
                Change::Delete,
            ),
        };

        if !applied {
            debug!(event_type = %event.event_type, "email event skipped");
            return Ok(HandleOutcome::Skipped);
        }
        self.deps.notify(event, ENTITY, change);
        Ok(HandleOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::email::{Email, EmailUpserted, EmailValidated};
    use crate::graph::labels::{DOMAIN, rel};
    use crate::model::email::EmailValidation;
    use crate::projection::test_support::{Harness, event};

    fn upsert(harness: &Harness, id: &str, raw: &str) {
        harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Email>(
                    id,
                    1,
                    &EmailEvent::Upsert(EmailUpserted {
                        raw_email: raw.into(),
                        ..EmailUpserted::default()
                    }),
                ),
            )
            .expect("upsert");
    }

    fn validate(harness: &Harness, id: &str, email: &str) {
        harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Email>(
                    id,
                    2,
                    &EmailEvent::Validated(EmailValidated {
                        validation: EmailValidation {
                            email: email.into(),
                            domain: "Acme.com".into(),
                            ..EmailValidation::default()
                        },
                        validated_at: None,
                    }),
                ),
            )
            .expect("validated");
    }

    #[test]
    fn validations_share_one_domain_node() {
        let harness = Harness::new();
        upsert(&harness, "e1", "ada@acme.com");
        upsert(&harness, "e2", "bob@acme.com");
        validate(&harness, "e1", "ada@acme.com");
        validate(&harness, "e2", "bob@acme.com");
        let (domains, edges) = harness
            .driver
            .execute_read_in_transaction(&Ctx::background(), None, |tx| {
                Ok((tx.count_label(DOMAIN)?, tx.count_edges(rel::HAS_DOMAIN)?))
            })
            .expect("count");
        assert_eq!((domains, edges), (1, 2));
    }

    #[test]
    fn delete_of_missing_email_is_skipped() {
        let harness = Harness::new();
        let outcome = harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Email>("missing", 1, &EmailEvent::Delete(crate::aggregate::payload::Marker {})),
            )
            .expect("delete");
        assert_eq!(outcome, HandleOutcome::Skipped);
        assert!(harness.sink.take().is_empty());
    }
}
