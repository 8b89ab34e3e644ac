use tracing::{debug, instrument};

use super::{Change, Deps, HandleOutcome};
use crate::aggregate::Event;
use crate::aggregate::organization::OrganizationEvent;
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::props::SOURCE_OF_TRUTH;
use crate::model::organization::OrganizationFields;
use crate::model::source::Source;
use crate::repository::{LinkedEntity, OrganizationSaveData};

const ENTITY: &str = "organization";

#[derive(Debug, Clone)]
pub struct OrganizationProjector {
    deps: Deps,
}

impl OrganizationProjector {
    pub(crate) const fn new(deps: Deps) -> Self {
        Self { deps }
    }

    #[instrument(level = "debug", skip_all, fields(tenant = %event.tenant(), organization_id = %event.object_id()))]
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<HandleOutcome> {
        let payload: OrganizationEvent = event.payload()?;
        let tenant = event.tenant();
        let organization_id = event.object_id();
        let repos = &self.deps.repos;
        let driver = &self.deps.driver;
        let at = event.timestamp;

        let (applied, change) = match &payload {
            OrganizationEvent::Create(created) => {
                let data = OrganizationSaveData {
                    fields: created.fields.clone(),
                    source: created.source.clone(),
                    overwrite: false,
                    created_at: Some(created.created_at.unwrap_or(at)),
                    updated_at: Some(at),
                    aggregate_version: event.version,
                };
                let applied = driver.execute_write_in_transaction(ctx, None, |tx| {
                    let applied =
                        repos.organizations.save(ctx, Some(tx), tenant, organization_id, &data)?;
                    self.deps.link_external_system(
                        ctx,
                        tx,
                        event,
                        LinkedEntity::Organization,
                        created.external_system.as_ref(),
                    )?;
                    Ok(applied)
                })?;
                (applied, Change::Create)
            }
            OrganizationEvent::Update(updated) => {
                let data = OrganizationSaveData {
                    fields: updated.fields.clone(),
                    source: Source {
                        source: updated.source.clone(),
                        ..Source::default()
                    },
                    overwrite: updated.overwrite,
                    created_at: None,
                    updated_at: Some(at),
                    aggregate_version: event.version,
                };
                let applied = driver.execute_write_in_transaction(ctx, None, |tx| {
                    let applied =
                        repos.organizations.save(ctx, Some(tx), tenant, organization_id, &data)?;
                    self.deps.link_external_system(
                        ctx,
                        tx,
                        event,
                        LinkedEntity::Organization,
                        updated.external_system.as_ref(),
                    )?;
                    Ok(applied)
                })?;
                (applied, Change::Update)
            }
            OrganizationEvent::LinkDomain(linked) => (
                repos
                    .organizations
                    .link_with_domain(ctx, None, tenant, organization_id, &linked.domain)?,
                Change::Update,
            ),
            OrganizationEvent::AddSocial(added) => (
                repos.socials.merge_and_link(
                    ctx,
                    None,
                    tenant,
                    LinkedEntity::Organization,
                    organization_id,
                    &added.social_id,
                    &added.social,
                    &added.source,
                    at,
                )?,
                Change::Update,
            ),
            OrganizationEvent::LinkEmail(link) => {
                let applied = driver.execute_write_in_transaction(ctx, None, |tx| {
                    let linked = repos.emails.link_with_organization(
                        ctx,
                        Some(tx),
                        tenant,
                        organization_id,
                        &link.email_id,
                        link.primary,
                    )?;
                    if linked && link.primary {
                        repos.emails.set_primary_for_entity(
                            ctx,
                            Some(tx),
                            tenant,
                            LinkedEntity::Organization,
                            organization_id,
                            &link.email_id,
                        )?;
                    }
                    Ok(linked)
                })?;
                (applied, Change::Update)
            }
            OrganizationEvent::LinkExternalSystem(system) => (
                repos.external_systems.link_with_entity(
                    ctx,
                    None,
                    tenant,
                    LinkedEntity::Organization,
                    organization_id,
                    system,
                )?,
                Change::Update,
            ),
            OrganizationEvent::Hide(_) | OrganizationEvent::Show(_) => {
                let hide = matches!(payload, OrganizationEvent::Hide(_));
                (self.set_hidden(ctx, event, hide)?, Change::Update)
            }
            OrganizationEvent::Archive(_) => {
                repos
                    .organizations
                    .archive(ctx, None, tenant, organization_id, at)?;
                (true, Change::Delete)
            }
            OrganizationEvent::UpdateOnboardingStatus(update) => {
                repos.organizations.update_onboarding_status(
                    ctx,
                    None,
                    tenant,
                    organization_id,
                    update.status,
                    &update.comments,
                    at,
                )?;
                (true, Change::Update)
            }
            OrganizationEvent::RefreshArr(_) => {
                driver.execute_write_in_transaction(ctx, None, |tx| {
                    let (arr, max_arr) = repos.organization_reads.calculate_arr(
                        ctx,
                        Some(tx),
                        tenant,
                        organization_id,
                    )?;
                    debug!(arr, max_arr, "organization ARR recomputed");
                    repos
                        .organizations
                        .update_arr(ctx, Some(tx), tenant, organization_id, arr, max_arr)
                })?;
                (true, Change::Update)
            }
            OrganizationEvent::RefreshRenewalSummary(_) => {
                driver.execute_write_in_transaction(ctx, None, |tx| {
                    let summary = repos.organization_reads.renewal_summary(
                        ctx,
                        Some(tx),
                        tenant,
                        organization_id,
                    )?;
                    repos.organizations.update_renewal_summary(
                        ctx,
                        Some(tx),
                        tenant,
                        organization_id,
                        &summary,
                    )
                })?;
                (true, Change::Update)
            }
            OrganizationEvent::RefreshLastTouchpoint(_) => {
                let applied = driver.execute_write_in_transaction(ctx, None, |tx| {
                    let Some(touchpoint) = repos.organization_reads.last_touchpoint(
                        ctx,
                        Some(tx),
                        tenant,
                        organization_id,
                    )?
                    else {
                        return Ok(false);
                    };
                    repos.organizations.update_last_touchpoint(
                        ctx,
                        Some(tx),
                        tenant,
                        organization_id,
                        &touchpoint,
                    )?;
                    Ok(true)
                })?;
                (applied, Change::Update)
            }
        };

        if !applied {
            debug!(event_type = %event.event_type, "organization event skipped");
            return Ok(HandleOutcome::Skipped);
        }
        self.deps.notify(event, ENTITY, change);
        Ok(HandleOutcome::Applied)
    }

    /// Toggle visibility without moving the source of truth.
    fn set_hidden(&self, ctx: &Ctx, event: &Event, hide: bool) -> Result<bool> {
        let repos = &self.deps.repos;
        let tenant = event.tenant();
        let organization_id = event.object_id();
        self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
            let Some(current) =
                repos
                    .organization_reads
                    .get_by_id(ctx, Some(tx), tenant, organization_id)?
            else {
                return Ok(false);
            };
            let owner = current.string(SOURCE_OF_TRUTH);
            let data = OrganizationSaveData {
                fields: OrganizationFields {
                    hide: Some(hide),
                    ..OrganizationFields::default()
                },
                source: Source {
                    source: owner.clone(),
                    source_of_truth: owner,
                    app_source: event.metadata.app.clone(),
                },
                overwrite: false,
                created_at: None,
                updated_at: Some(event.timestamp),
                aggregate_version: event.version,
            };
            repos
                .organizations
                .save(ctx, Some(tx), tenant, organization_id, &data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::organization::{DomainLinked, Organization, OrganizationCreated};
    use crate::aggregate::payload::Marker;
    use crate::projection::test_support::{Harness, event};

    fn create(harness: &Harness, id: &str) {
        harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Organization>(
                    id,
                    1,
                    &OrganizationEvent::Create(OrganizationCreated {
                        fields: OrganizationFields {
                            name: Some("Acme".into()),
                            ..OrganizationFields::default()
                        },
                        source: Source::new("hubspot", "sync"),
                        ..OrganizationCreated::default()
                    }),
                ),
            )
            .expect("create");
    }

    #[test]
    fn hide_keeps_source_of_truth() {
        let harness = Harness::new();
        create(&harness, "o1");
        let outcome = harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Organization>("o1", 2, &OrganizationEvent::Hide(Marker {})),
            )
            .expect("hide");
        assert_eq!(outcome, HandleOutcome::Applied);
        let org = harness
            .repos
            .organization_reads
            .get_by_id(&Ctx::background(), None, "ziggy", "o1")
            .expect("read")
            .expect("org");
        assert_eq!(org.bool("hide"), Some(true));
        assert_eq!(org.str(SOURCE_OF_TRUTH), Some("hubspot"));
    }

    #[test]
    fn second_organization_cannot_take_a_linked_domain() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        create(&harness, "o1");
        create(&harness, "o2");
        let link = |id: &str| {
            event::<Organization>(
                id,
                2,
                &OrganizationEvent::LinkDomain(DomainLinked {
                    domain: "acme.com".into(),
                }),
            )
        };
        assert_eq!(
            harness.handler.handle(&ctx, &link("o1")).expect("o1"),
            HandleOutcome::Applied
        );
        assert_eq!(
            harness.handler.handle(&ctx, &link("o2")).expect("o2"),
            HandleOutcome::Skipped
        );
        let owner = harness
            .repos
            .organization_reads
            .get_by_domain(&ctx, None, "ziggy", "acme.com")
            .expect("read")
            .expect("owner");
        assert_eq!(owner.id(), "o1");
    }

    #[test]
    fn archive_moves_tenant_label() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        create(&harness, "o1");
        harness
            .handler
            .handle(
                &ctx,
                &event::<Organization>("o1", 2, &OrganizationEvent::Archive(Marker {})),
            )
            .expect("archive");
        let (active, archived) = harness
            .driver
            .execute_read_in_transaction(&ctx, None, |tx| {
                Ok((
                    tx.count_label("Organization_ziggy")?,
                    tx.count_label("ArchivedOrganization_ziggy")?,
                ))
            })
            .expect("count");
        assert_eq!((active, archived), (0, 1));
    }
}
