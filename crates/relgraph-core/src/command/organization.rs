use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{CommandMeta, IdResponse, Load, handle, id_or_new, require};
use crate::aggregate::AggregateStore;
use crate::aggregate::organization::{
    DomainLinked, OnboardingStatusUpdated, Organization, OrganizationCreated, OrganizationEvent,
    OrganizationUpdated,
};
use crate::aggregate::payload::{EmailLinked, Marker, SocialAdded};
use crate::context::Ctx;
use crate::error::Result;
use crate::model::organization::{OnboardingStatus, OrganizationFields};
use crate::model::satellite::{ExternalSystem, SocialFields};
use crate::model::source::Source;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOrganizationRequest {
    /// Generated when empty.
    pub id: String,
    pub fields: OrganizationFields,
    pub source: Source,
    pub external_system: Option<ExternalSystem>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOrganizationRequest {
    pub id: String,
    pub fields: OrganizationFields,
    pub source: String,
    pub overwrite: bool,
    pub external_system: Option<ExternalSystem>,
}

#[derive(Debug, Clone)]
pub struct OrganizationService {
    store: AggregateStore,
}

impl OrganizationService {
    #[must_use]
    pub const fn new(store: AggregateStore) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "create_organization"))]
    pub fn create_organization(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &CreateOrganizationRequest,
    ) -> Result<IdResponse> {
        let id = id_or_new(&request.id);
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            &id,
            Load::OrNew,
            |org| {
                Ok(org.is_created()
                    && org.is_repeated_update(&request.fields, &request.source.source)?)
            },
            |org| {
                Ok(if org.is_created() {
                    OrganizationEvent::Update(OrganizationUpdated {
                        fields: request.fields.clone(),
                        source: request.source.source.clone(),
                        overwrite: false,
                        external_system: request.external_system.clone(),
                    })
                } else {
                    OrganizationEvent::Create(OrganizationCreated {
                        fields: request.fields.clone(),
                        source: request.source.clone(),
                        external_system: request.external_system.clone(),
                        created_at: request.created_at,
                    })
                })
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "update_organization", id = %request.id))]
    pub fn update_organization(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &UpdateOrganizationRequest,
    ) -> Result<IdResponse> {
        let id = require(&request.id, "organizationId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            id,
            Load::Existing,
            |org| {
                let system_known = request
                    .external_system
                    .as_ref()
                    .is_none_or(|system| org.has_external_system(system));
                Ok(system_known && org.is_repeated_update(&request.fields, &request.source)?)
            },
            |_| {
                Ok(OrganizationEvent::Update(OrganizationUpdated {
                    fields: request.fields.clone(),
                    source: request.source.clone(),
                    overwrite: request.overwrite,
                    external_system: request.external_system.clone(),
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_domain", id = %organization_id))]
    pub fn link_domain(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        domain: &str,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        let domain = require(domain, "domain")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(org.has_domain(domain)),
            |_| {
                Ok(OrganizationEvent::LinkDomain(DomainLinked {
                    domain: domain.trim().to_ascii_lowercase(),
                }))
            },
        )
    }

    /// Add a social profile; the response carries the social id.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "add_social", id = %organization_id))]
    pub fn add_social(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        social_id: &str,
        social: &SocialFields,
        source: &Source,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        require(&social.url, "url")?;
        let social_id = id_or_new(social_id);
        let mut response = handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(org.has_social(&social_id, &social.url)),
            |_| {
                Ok(OrganizationEvent::AddSocial(SocialAdded {
                    social_id: social_id.clone(),
                    social: social.clone(),
                    source: source.clone(),
                }))
            },
        )?;
        response.id = social_id;
        Ok(response)
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_email", id = %organization_id))]
    pub fn link_email(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        email_id: &str,
        primary: bool,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        let email_id = require(email_id, "emailId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(org.has_email(email_id, primary)),
            |_| {
                Ok(OrganizationEvent::LinkEmail(EmailLinked {
                    email_id: email_id.to_string(),
                    primary,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "link_external_system", id = %organization_id))]
    pub fn link_external_system(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        system: &ExternalSystem,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        require(&system.external_system_id, "externalSystemId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(org.has_external_system(system)),
            |_| Ok(OrganizationEvent::LinkExternalSystem(system.clone())),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "hide_organization", id = %organization_id))]
    pub fn hide(&self, ctx: &Ctx, meta: &CommandMeta, organization_id: &str) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(org.hide),
            |_| Ok(OrganizationEvent::Hide(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "show_organization", id = %organization_id))]
    pub fn show(&self, ctx: &Ctx, meta: &CommandMeta, organization_id: &str) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(!org.hide),
            |_| Ok(OrganizationEvent::Show(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "archive_organization", id = %organization_id))]
    pub fn archive(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |org| Ok(org.archived),
            |_| Ok(OrganizationEvent::Archive(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "update_onboarding_status", id = %organization_id))]
    pub fn update_onboarding_status(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        status: OnboardingStatus,
        comments: &str,
        caused_by_contract_id: Option<&str>,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::OrNew,
            |org| Ok(org.has_onboarding_status(status, comments)),
            |_| {
                Ok(OrganizationEvent::UpdateOnboardingStatus(
                    OnboardingStatusUpdated {
                        status,
                        comments: comments.to_string(),
                        caused_by_contract_id: caused_by_contract_id.map(str::to_string),
                    },
                ))
            },
        )
    }

    /// Ask the projector to recompute the organization's ARR forecast.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "refresh_arr", id = %organization_id))]
    pub fn refresh_arr(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<IdResponse> {
        self.refresh(ctx, meta, organization_id, OrganizationEvent::RefreshArr(Marker {}))
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "refresh_renewal_summary", id = %organization_id))]
    pub fn refresh_renewal_summary(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<IdResponse> {
        self.refresh(
            ctx,
            meta,
            organization_id,
            OrganizationEvent::RefreshRenewalSummary(Marker {}),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "refresh_last_touchpoint", id = %organization_id))]
    pub fn refresh_last_touchpoint(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<IdResponse> {
        self.refresh(
            ctx,
            meta,
            organization_id,
            OrganizationEvent::RefreshLastTouchpoint(Marker {}),
        )
    }

    /// Refresh requests are never redundant. An unknown organization is
    /// `AggregateNotFound`; nothing is appended.
    fn refresh(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        event: OrganizationEvent,
    ) -> Result<IdResponse> {
        let organization_id = require(organization_id, "organizationId")?;
        handle::<Organization>(
            &self.store,
            ctx,
            meta,
            organization_id,
            Load::Existing,
            |_| Ok(false),
            |_| Ok(event),
        )
    }
}
