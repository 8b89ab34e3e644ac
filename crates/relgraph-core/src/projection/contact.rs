use tracing::{debug, instrument};

use super::{Change, Deps, HandleOutcome};
use crate::aggregate::Event;
use crate::aggregate::contact::ContactEvent;
use crate::context::Ctx;
use crate::error::Result;
use crate::model::source::Source;
use crate::repository::{ContactSaveData, LinkedEntity};

const ENTITY: &str = "contact";

#[derive(Debug, Clone)]
pub struct ContactProjector {
    deps: Deps,
}

impl ContactProjector {
    pub(crate) const fn new(deps: Deps) -> Self {
        Self { deps }
    }

    #[instrument(level = "debug", skip_all, fields(tenant = %event.tenant(), contact_id = %event.object_id()))]
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<HandleOutcome> {
        let payload: ContactEvent = event.payload()?;
        let tenant = event.tenant();
        let contact_id = event.object_id();
        let repos = &self.deps.repos;
        let at = event.timestamp;

        let (applied, change) = match &payload {
            ContactEvent::Create(created) => {
                let data = ContactSaveData {
                    fields: created.fields.clone(),
                    source: created.source.clone(),
                    overwrite: false,
                    created_at: Some(created.created_at.unwrap_or(at)),
                    updated_at: Some(at),
                    aggregate_version: event.version,
                };
                let applied = self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
                    let applied = repos.contacts.create(ctx, Some(tx), tenant, contact_id, &data)?;
                    self.deps.link_external_system(
                        ctx,
                        tx,
                        event,
                        LinkedEntity::Contact,
                        created.external_system.as_ref(),
                    )?;
                    Ok(applied)
                })?;
                (applied, Change::Create)
            }
            ContactEvent::Update(updated) => {
                let data = ContactSaveData {
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
                let applied = self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
                    let applied = repos.contacts.update(ctx, Some(tx), tenant, contact_id, &data)?;
                    self.deps.link_external_system(
                        ctx,
                        tx,
                        event,
                        LinkedEntity::Contact,
                        updated.external_system.as_ref(),
                    )?;
                    Ok(applied)
                })?;
                (applied, Change::Update)
            }
            ContactEvent::PhoneNumberLink(link) => (
                repos.contacts.link_with_phone_number(
                    ctx,
                    None,
                    tenant,
                    contact_id,
                    &link.phone_number_id,
                    link.primary,
                    &link.label,
                )?,
                Change::Update,
            ),
            ContactEvent::EmailLink(link) => {
                let applied = self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
                    let linked = repos.emails.link_with_contact(
                        ctx,
                        Some(tx),
                        tenant,
                        contact_id,
                        &link.email_id,
                        link.primary,
                    )?;
                    if linked && link.primary {
                        repos.emails.set_primary_for_entity(
                            ctx,
                            Some(tx),
                            tenant,
                            LinkedEntity::Contact,
                            contact_id,
                            &link.email_id,
                        )?;
                    }
                    Ok(linked)
                })?;
                (applied, Change::Update)
            }
            ContactEvent::EmailUnlink(unlink) => (
                repos
                    .emails
                    .unlink_from_contact(ctx, None, tenant, contact_id, &unlink.email_id)?,
                Change::Update,
            ),
            ContactEvent::LocationLink(link) => (
                repos
                    .contacts
                    .link_with_location(ctx, None, tenant, contact_id, &link.location_id)?,
                Change::Update,
            ),
            ContactEvent::LocationAdd(added) => (
                repos.contacts.create_location_and_link(
                    ctx,
                    None,
                    tenant,
                    contact_id,
                    &added.location_id,
                    &added.location,
                    &added.source,
                    at,
                )?,
                Change::Update,
            ),
            ContactEvent::OrganizationLink(link) => (
                repos.contacts.link_with_organization(
                    ctx,
                    None,
                    tenant,
                    contact_id,
                    &link.organization_id,
                    &link.job_role,
                    &link.source,
                    at,
                )?,
                Change::Update,
            ),
            ContactEvent::SocialAdd(added) => (
                repos.socials.merge_and_link(
                    ctx,
                    None,
                    tenant,
                    LinkedEntity::Contact,
                    contact_id,
                    &added.social_id,
                    &added.social,
                    &added.source,
                    at,
                )?,
                Change::Update,
            ),
            ContactEvent::SocialRemove(removed) => (
                repos.socials.remove_from_entity(
                    ctx,
                    None,
                    tenant,
                    LinkedEntity::Contact,
                    contact_id,
                    &removed.social_id,
                )?,
                Change::Update,
            ),
            ContactEvent::ExternalSystemLink(system) => (
                repos.external_systems.link_with_entity(
                    ctx,
                    None,
                    tenant,
                    LinkedEntity::Contact,
                    contact_id,
                    system,
                )?,
                Change::Update,
            ),
            ContactEvent::Hide(_) | ContactEvent::Show(_) => {
                let hide = matches!(payload, ContactEvent::Hide(_));
                (
                    repos.contacts.set_hidden(
                        ctx,
                        None,
                        tenant,
                        contact_id,
                        hide,
                        at,
                        event.version,
                    )?,
                    Change::Update,
                )
            }
        };

        if !applied {
            debug!(event_type = %event.event_type, "contact event skipped");
            return Ok(HandleOutcome::Skipped);
        }
        self.deps.notify(event, ENTITY, change);
        Ok(HandleOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::contact::{Contact, ContactCreated, ContactUpdated};
    use crate::aggregate::payload::LocationLinked;
    use crate::graph::labels::{CONTACT, rel};
    use crate::model::contact::ContactFields;
    use crate::model::satellite::LocationFields;
    use crate::model::source::OPENLINE;
    use crate::projection::test_support::{Harness, event};

    fn create(harness: &Harness, fields: ContactFields, source: Source) {
        let outcome = harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Contact>(
                    "c1",
                    1,
                    &ContactEvent::Create(ContactCreated {
                        fields,
                        source,
                        ..ContactCreated::default()
                    }),
                ),
            )
            .expect("create");
        assert_eq!(outcome, HandleOutcome::Applied);
    }

    #[test]
    fn create_writes_tenant_scoped_node() {
        let harness = Harness::new();
        create(&harness, ContactFields::default(), Source::new("hubspot", "sync"));
        let ctx = Ctx::background();
        let contact = harness
            .repos
            .contact_reads
            .get_by_id(&ctx, None, "ziggy", "c1")
            .expect("read")
            .expect("contact");
        assert!(contact.has_label(CONTACT));
        assert!(contact.has_label("Contact_ziggy"));
        assert_eq!(harness.sink.take().len(), 1);
    }

    #[test]
    fn openline_fields_survive_updates_from_other_sources() {
        let harness = Harness::new();
        create(
            &harness,
            ContactFields {
                description: Some("Key account".into()),
                ..ContactFields::default()
            },
            Source::new(OPENLINE, "web"),
        );
        harness
            .handler
            .handle(
                &Ctx::background(),
                &event::<Contact>(
                    "c1",
                    2,
                    &ContactEvent::Update(ContactUpdated {
                        fields: ContactFields {
                            description: Some("Imported".into()),
                            timezone: Some("Europe/Berlin".into()),
                            ..ContactFields::default()
                        },
                        source: "hubspot".into(),
                        ..ContactUpdated::default()
                    }),
                ),
            )
            .expect("update");
        let contact = harness
            .repos
            .contact_reads
            .get_by_id(&Ctx::background(), None, "ziggy", "c1")
            .expect("read")
            .expect("contact");
        assert_eq!(contact.str("description"), Some("Key account"));
        assert_eq!(contact.str("timezone"), Some("Europe/Berlin"));
        assert_eq!(contact.str("sourceOfTruth"), Some(OPENLINE));
    }

    #[test]
    fn location_link_creates_one_edge_and_notifies() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        create(&harness, ContactFields::default(), Source::new("hubspot", "sync"));
        harness
            .repos
            .locations
            .create(
                &ctx,
                None,
                "ziggy",
                "l1",
                &LocationFields::default(),
                &Source::new("hubspot", "sync"),
                crate::model::now(),
            )
            .expect("location");
        harness.sink.take();

        let link = event::<Contact>(
            "c1",
            2,
            &ContactEvent::LocationLink(LocationLinked {
                location_id: "l1".into(),
            }),
        );
        harness.handler.handle(&ctx, &link).expect("link");
        harness.handler.handle(&ctx, &link).expect("relink");

        let edges = harness
            .driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_edges(rel::ASSOCIATED_WITH))
            .expect("count");
        assert_eq!(edges, 1);
        let notices = harness.sink.take();
        assert!(!notices.is_empty());
        assert_eq!(notices[0].entity_id, "c1");
        assert_eq!(notices[0].change, Change::Update);
    }

    #[test]
    fn stale_update_is_skipped() {
        let harness = Harness::new();
        create(&harness, ContactFields::default(), Source::new("hubspot", "sync"));
        let ctx = Ctx::background();
        let update = |version, name: &str| {
            event::<Contact>(
                "c1",
                version,
                &ContactEvent::Update(ContactUpdated {
                    fields: ContactFields {
                        name: Some(name.into()),
                        ..ContactFields::default()
                    },
                    source: OPENLINE.into(),
                    ..ContactUpdated::default()
                }),
            )
        };
        assert_eq!(
            harness.handler.handle(&ctx, &update(3, "newer")).expect("v3"),
            HandleOutcome::Applied
        );
        assert_eq!(
            harness.handler.handle(&ctx, &update(2, "older")).expect("v2"),
            HandleOutcome::Skipped
        );
        let contact = harness
            .repos
            .contact_reads
            .get_by_id(&ctx, None, "ziggy", "c1")
            .expect("read")
            .expect("contact");
        assert_eq!(contact.str("name"), Some("newer"));
    }
}
