use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{CommandMeta, IdResponse, Load, handle, id_or_new, require};
use crate::aggregate::AggregateStore;
use crate::aggregate::contact::{
    Contact, ContactCreated, ContactEvent, ContactUpdated, LocationAdded, OrganizationLinked,
};
use crate::aggregate::payload::{
    EmailLinked, EmailUnlinked, LocationLinked, Marker, SocialAdded, SocialRemoved,
};
use crate::context::Ctx;
use crate::error::Result;
use crate::model::contact::{ContactFields, JobRoleFields};
use crate::model::satellite::{ExternalSystem, LocationFields, PhoneNumberLink, SocialFields};
use crate::model::source::Source;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateContactRequest {
    /// Generated when empty.
    pub id: String,
    pub fields: ContactFields,
    pub source: Source,
    pub external_system: Option<ExternalSystem>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateContactRequest {
    pub id: String,
    pub fields: ContactFields,
    pub source: String,
    pub overwrite: bool,
    pub external_system: Option<ExternalSystem>,
}

#[derive(Debug, Clone)]
pub struct ContactService {
    store: AggregateStore,
}

impl ContactService {
    #[must_use]
    pub const fn new(store: AggregateStore) -> Self {
        Self { store }
    }

    /// Create a contact. Creating an id that already exists is applied as an
    /// update from the request's source.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "create_contact"))]
    pub fn create_contact(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &CreateContactRequest,
    ) -> Result<IdResponse> {
        let id = id_or_new(&request.id);
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            &id,
            Load::OrNew,
            |contact| {
                Ok(contact.is_created()
                    && contact.is_repeated_update(&request.fields, &request.source.source)?)
            },
            |contact| {
                Ok(if contact.is_created() {
                    ContactEvent::Update(ContactUpdated {
                        fields: request.fields.clone(),
                        source: request.source.source.clone(),
                        overwrite: false,
                        external_system: request.external_system.clone(),
                    })
                } else {
                    ContactEvent::Create(ContactCreated {
                        fields: request.fields.clone(),
                        source: request.source.clone(),
                        external_system: request.external_system.clone(),
                        created_at: request.created_at,
                    })
                })
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "update_contact", id = %request.id))]
    pub fn update_contact(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &UpdateContactRequest,
    ) -> Result<IdResponse> {
        let id = require(&request.id, "contactId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            id,
            Load::Existing,
            |contact| {
                let system_known = request
                    .external_system
                    .as_ref()
                    .is_none_or(|system| contact.has_external_system(system));
                Ok(system_known && contact.is_repeated_update(&request.fields, &request.source)?)
            },
            |_| {
                Ok(ContactEvent::Update(ContactUpdated {
                    fields: request.fields.clone(),
                    source: request.source.clone(),
                    overwrite: request.overwrite,
                    external_system: request.external_system.clone(),
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_phone_number", id = %contact_id))]
    pub fn link_phone_number(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        phone_number_id: &str,
        primary: bool,
        label: &str,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let phone_number_id = require(phone_number_id, "phoneNumberId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.has_phone_number(phone_number_id, primary, label)),
            |_| {
                Ok(ContactEvent::PhoneNumberLink(PhoneNumberLink {
                    phone_number_id: phone_number_id.to_string(),
                    primary,
                    label: label.to_string(),
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_email", id = %contact_id))]
    pub fn link_email(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        email_id: &str,
        primary: bool,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let email_id = require(email_id, "emailId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.has_email(email_id, primary)),
            |_| {
                Ok(ContactEvent::EmailLink(EmailLinked {
                    email_id: email_id.to_string(),
                    primary,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "unlink_email", id = %contact_id))]
    pub fn unlink_email(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        email_id: &str,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let email_id = require(email_id, "emailId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(!contact.emails.contains_key(email_id)),
            |_| {
                Ok(ContactEvent::EmailUnlink(EmailUnlinked {
                    email_id: email_id.to_string(),
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_location", id = %contact_id))]
    pub fn link_location(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        location_id: &str,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let location_id = require(location_id, "locationId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.has_location(location_id)),
            |_| {
                Ok(ContactEvent::LocationLink(LocationLinked {
                    location_id: location_id.to_string(),
                }))
            },
        )
    }

    /// Create a location and link it; the response carries the location id.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "add_location", id = %contact_id))]
    pub fn add_location(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        location_id: &str,
        location: &LocationFields,
        source: &Source,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let location_id = id_or_new(location_id);
        let mut response = handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.has_location(&location_id)),
            |_| {
                Ok(ContactEvent::LocationAdd(LocationAdded {
                    location_id: location_id.clone(),
                    location: location.clone(),
                    source: source.clone(),
                }))
            },
        )?;
        response.id = location_id;
        Ok(response)
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_organization", id = %contact_id))]
    pub fn link_organization(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        organization_id: &str,
        job_role: &JobRoleFields,
        source: &Source,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let organization_id = require(organization_id, "organizationId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.job_roles.get(organization_id) == Some(job_role)),
            |_| {
                Ok(ContactEvent::OrganizationLink(OrganizationLinked {
                    organization_id: organization_id.to_string(),
                    job_role: job_role.clone(),
                    source: source.clone(),
                }))
            },
        )
    }

    /// Add a social profile; the response carries the social id.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "add_social", id = %contact_id))]
    pub fn add_social(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        social_id: &str,
        social: &SocialFields,
        source: &Source,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        require(&social.url, "url")?;
        let social_id = id_or_new(social_id);
        let mut response = handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.has_social(&social_id, &social.url)),
            |_| {
                Ok(ContactEvent::SocialAdd(SocialAdded {
                    social_id: social_id.clone(),
                    social: social.clone(),
                    source: source.clone(),
                }))
            },
        )?;
        response.id = social_id;
        Ok(response)
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "remove_social", id = %contact_id))]
    pub fn remove_social(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        social_id: &str,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        let social_id = require(social_id, "socialId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(!contact.socials.contains_key(social_id)),
            |_| {
                Ok(ContactEvent::SocialRemove(SocialRemoved {
                    social_id: social_id.to_string(),
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_external_system", id = %contact_id))]
    pub fn link_external_system(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contact_id: &str,
        system: &ExternalSystem,
    ) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        require(&system.external_system_id, "externalSystemId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.has_external_system(system)),
            |_| Ok(ContactEvent::ExternalSystemLink(system.clone())),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "hide_contact", id = %contact_id))]
    pub fn hide(&self, ctx: &Ctx, meta: &CommandMeta, contact_id: &str) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(contact.hide),
            |_| Ok(ContactEvent::Hide(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "show_contact", id = %contact_id))]
    pub fn show(&self, ctx: &Ctx, meta: &CommandMeta, contact_id: &str) -> Result<IdResponse> {
        let contact_id = require(contact_id, "contactId")?;
        handle::<Contact>(
            &self.store,
            ctx,
            meta,
            contact_id,
            Load::Existing,
            |contact| Ok(!contact.hide),
            |_| Ok(ContactEvent::Show(Marker {})),
        )
    }
}
