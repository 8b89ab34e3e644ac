use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{LinkedEntity, ensure_scoped_node, props, scoped_node, scoped_node_id, touched};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::extract::{self, NodeAndId};
use crate::graph::labels::{DOMAIN, EMAIL, rel, tenant_label};
use crate::graph::props::{SOURCE_OF_TRUTH, ts};
use crate::graph::tx::node_json;
use crate::graph::{GraphDriver, GraphTx, Node, PropertyPatch, Props};
use crate::model::email::{EmailValidation, VALIDATION_PROPERTIES};
use crate::model::source::Source;

#[derive(Debug, Clone)]
pub struct EmailWriteRepository {
    driver: GraphDriver,
}

impl EmailWriteRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Merge the email by id and record its raw address.
    ///
    /// Returns `false` when the tenant is missing or the version is stale.
    #[instrument(level = "debug", skip(self, ctx, tx, source))]
    pub fn create_email(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        email_id: &str,
        raw_email: &str,
        source: &Source,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        aggregate_version: i64,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let mut source = source.clone();
            source.normalize();
            let on_create = props([
                ("source", source.source.into()),
                (SOURCE_OF_TRUTH, source.source_of_truth.into()),
                ("appSource", source.app_source.into()),
                ("createdAt", ts(created_at)),
            ]);
            let Some(email) = ensure_scoped_node(
                tx,
                tenant,
                EMAIL,
                email_id,
                rel::EMAIL_ADDRESS_BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                debug!("tenant not found, email create skipped");
                return Ok(false);
            };
            let patch = touched(updated_at).set("rawEmail", raw_email);
            tx.patch_node_versioned(email.node_id, &patch, aggregate_version)
        })
    }

    /// Store the validation bundle and attach the global domain node.
    /// `work` is derived once and never overwritten afterwards.
    #[instrument(level = "debug", skip(self, ctx, tx, validation))]
    pub fn email_validated(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        email_id: &str,
        validation: &EmailValidation,
        validated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(email) = scoped_node_id(tx, EMAIL, tenant, email_id)? else {
                return Ok(false);
            };
            let patch = touched(validated_at)
                .set("validatedAt", ts(validated_at))
                .set("email", validation.email.as_str())
                .set("username", validation.username.as_str())
                .set("deliverable", validation.deliverable.as_str())
                .set("isRisky", validation.is_risky)
                .set("isFirewalled", validation.is_firewalled)
                .set("provider", validation.provider.as_str())
                .set("firewall", validation.firewall.as_str())
                .set("isCatchAll", validation.is_catch_all)
                .set("isMailboxFull", validation.is_mailbox_full)
                .set("isRoleAccount", validation.is_role_account)
                .set("isSystemGenerated", validation.is_system_generated)
                .set("isFreeAccount", validation.is_free_account)
                .set("smtpSuccess", validation.smtp_success)
                .set("responseCode", validation.response_code.as_str())
                .set("errorCode", validation.error_code.as_str())
                .set("validationDescription", validation.description.as_str())
                .set("isPrimaryDomain", validation.is_primary_domain)
                .set("primaryDomain", validation.primary_domain.as_str())
                .set("alternateEmail", validation.alternate_email.as_str())
                .set("retryValidation", validation.retry_validation)
                .set_if_null("work", !validation.is_free_account);
            tx.patch_node(email, &patch)?;

            let domain = validation.domain.trim().to_ascii_lowercase();
            if !domain.is_empty() {
                let (domain_node, _) = tx.merge_node::<&str>(
                    DOMAIN,
                    &domain,
                    &[],
                    &props([("domain", domain.clone().into()), ("createdAt", ts(validated_at))]),
                )?;
                tx.merge_edge(email, rel::HAS_DOMAIN, domain_node, &Props::new())?;
            }
            Ok(true)
        })
    }

    /// Clear the validation bundle.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn clean_email_validation(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        email_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(email) = scoped_node_id(tx, EMAIL, tenant, email_id)? else {
                return Ok(false);
            };
            let patch = VALIDATION_PROPERTIES
                .iter()
                .fold(touched(updated_at), |patch, key| patch.remove(key));
            tx.patch_node(email, &patch)?;
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_contact(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        email_id: &str,
        primary: bool,
    ) -> Result<bool> {
        self.link(ctx, tx, tenant, LinkedEntity::Contact, contact_id, email_id, primary)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_organization(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        email_id: &str,
        primary: bool,
    ) -> Result<bool> {
        self.link(ctx, tx, tenant, LinkedEntity::Organization, organization_id, email_id, primary)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_user(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        user_id: &str,
        email_id: &str,
        primary: bool,
    ) -> Result<bool> {
        self.link(ctx, tx, tenant, LinkedEntity::User, user_id, email_id, primary)
    }

    /// Mark `email_id` as the entity's only primary email.
    ///
    /// Returns `false` when the email is not linked with the entity.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn set_primary_for_entity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        email_id: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let entity = scoped_node_id(tx, owner.label(), tenant, owner_id)?;
            let email = scoped_node_id(tx, EMAIL, tenant, email_id)?;
            let (Some(entity), Some(email)) = (entity, email) else {
                return Ok(false);
            };
            if tx.edges_between(entity, rel::HAS, email)?.is_empty() {
                return Ok(false);
            }
            let email_label = tenant_label(EMAIL, tenant);
            for linked in tx.out_neighbors(entity, rel::HAS, Some(&email_label))? {
                let primary = linked.node_id == email;
                tx.merge_edge(entity, rel::HAS, linked.node_id, &props([("primary", primary.into())]))?;
            }
            tx.patch_node(entity, &touched(crate::model::now()))?;
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn unlink_from_contact(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        email_id: &str,
    ) -> Result<bool> {
        self.unlink(ctx, tx, tenant, LinkedEntity::Contact, contact_id, email_id)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn unlink_from_organization(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        email_id: &str,
    ) -> Result<bool> {
        self.unlink(ctx, tx, tenant, LinkedEntity::Organization, organization_id, email_id)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn unlink_from_user(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        user_id: &str,
        email_id: &str,
    ) -> Result<bool> {
        self.unlink(ctx, tx, tenant, LinkedEntity::User, user_id, email_id)
    }

    /// Delete the email together with its links and domain edge.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn delete_email(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        email_id: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(email) = scoped_node_id(tx, EMAIL, tenant, email_id)? else {
                return Ok(false);
            };
            tx.detach_delete(email)?;
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        email_id: &str,
    ) -> Result<Option<Node>> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| scoped_node(tx, EMAIL, tenant, email_id))
    }

    /// Emails of every listed entity, each paired with the owning entity id.
    #[instrument(level = "debug", skip(self, ctx, tx, owner_ids))]
    pub fn get_emails_for_entities(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_ids: &[String],
    ) -> Result<Vec<NodeAndId>> {
        let ids = serde_json::to_string(owner_ids)?;
        let owner_label = tenant_label(owner.label(), tenant);
        let email_label = tenant_label(EMAIL, tenant);
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("e"),
                    ", o.entity_id
                     FROM nodes o
                     JOIN node_labels ol ON ol.node_id = o.node_id AND ol.label = :owner_label
                     JOIN edges h ON h.src = o.node_id AND h.rel_type = :has
                     JOIN nodes e ON e.node_id = h.dst
                     JOIN node_labels el ON el.node_id = e.node_id AND el.label = :email_label
                     WHERE o.entity_id IN (SELECT value FROM json_each(:ids))
                     ORDER BY o.entity_id, h.edge_id"
                ),
                &[
                    (":owner_label", &owner_label),
                    (":has", &rel::HAS),
                    (":email_label", &email_label),
                    (":ids", &ids),
                ],
            )?;
            extract::all_records_as_node_and_id(&records)
        })
    }

    fn link(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        email_id: &str,
        primary: bool,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let entity = scoped_node_id(tx, owner.label(), tenant, owner_id)?;
            let email = scoped_node_id(tx, EMAIL, tenant, email_id)?;
            let (Some(entity), Some(email)) = (entity, email) else {
                return Ok(false);
            };
            tx.merge_edge(entity, rel::HAS, email, &props([("primary", primary.into())]))?;
            tx.patch_node(entity, &touched(crate::model::now()))?;
            Ok(true)
        })
    }

    fn unlink(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        email_id: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let entity = scoped_node_id(tx, owner.label(), tenant, owner_id)?;
            let email = scoped_node_id(tx, EMAIL, tenant, email_id)?;
            let (Some(entity), Some(email)) = (entity, email) else {
                return Ok(false);
            };
            let removed = tx.delete_edges(entity, rel::HAS, Some(email))? > 0;
            if removed {
                tx.patch_node(entity, &PropertyPatch::new().set("updatedAt", ts(crate::model::now())))?;
            }
            Ok(removed)
        })
    }
}
