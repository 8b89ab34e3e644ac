use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{CommandMeta, IdResponse, Load, handle, id_or_new, require};
use crate::aggregate::AggregateStore;
use crate::aggregate::email::{Email, EmailEvent, EmailUpserted, EmailValidated};
use crate::aggregate::payload::Marker;
use crate::context::Ctx;
use crate::error::Result;
use crate::model::email::EmailValidation;
use crate::model::source::Source;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertEmailRequest {
    /// Generated when empty.
    pub id: String,
    pub raw_email: String,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EmailService {
    store: AggregateStore,
}

impl EmailService {
    #[must_use]
    pub const fn new(store: AggregateStore) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "upsert_email"))]
    pub fn upsert_email(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &UpsertEmailRequest,
    ) -> Result<IdResponse> {
        let raw_email = require(&request.raw_email, "rawEmail")?;
        let id = id_or_new(&request.id);
        handle::<Email>(
            &self.store,
            ctx,
            meta,
            &id,
            Load::OrNew,
            |email| Ok(email.has_raw_email(raw_email)),
            |_| {
                Ok(EmailEvent::Upsert(EmailUpserted {
                    raw_email: raw_email.trim().to_string(),
                    source: request.source.clone(),
                    created_at: request.created_at,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "email_validated", id = %email_id))]
    pub fn email_validated(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        email_id: &str,
        validation: &EmailValidation,
    ) -> Result<IdResponse> {
        let email_id = require(email_id, "emailId")?;
        handle::<Email>(
            &self.store,
            ctx,
            meta,
            email_id,
            Load::Existing,
            |email| Ok(email.validation.as_ref() == Some(validation)),
            |_| {
                Ok(EmailEvent::Validated(EmailValidated {
                    validation: validation.clone(),
                    validated_at: None,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "clean_validation", id = %email_id))]
    pub fn clean_validation(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        email_id: &str,
    ) -> Result<IdResponse> {
        let email_id = require(email_id, "emailId")?;
        handle::<Email>(
            &self.store,
            ctx,
            meta,
            email_id,
            Load::Existing,
            |email| Ok(email.validation.is_none()),
            |_| Ok(EmailEvent::CleanValidation(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "delete_email", id = %email_id))]
    pub fn delete_email(&self, ctx: &Ctx, meta: &CommandMeta, email_id: &str) -> Result<()> {
        let email_id = require(email_id, "emailId")?;
        handle::<Email>(
            &self.store,
            ctx,
            meta,
            email_id,
            Load::Existing,
            |email| Ok(email.deleted),
            |_| Ok(EmailEvent::Delete(Marker {})),
        )
        .map(drop)
    }
}
