use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{
    Ensured, LinkedEntity, LocationRepository, PhoneNumberRepository, ensure_scoped_node, props,
    scoped_node, scoped_node_id, touched,
};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::labels::{CONTACT, JOB_ROLE, LOCATION, ORGANIZATION, rel, tenant_label};
use crate::graph::props::{SOURCE_OF_TRUTH, to_props, ts};
use crate::graph::{GraphDriver, GraphTx, Node, PropertyPatch, Props};
use crate::model::contact::{ContactFields, JobRoleFields};
use crate::model::now;
use crate::model::satellite::LocationFields;
use crate::model::source::{Source, SourceRule};

/// Input of [`ContactWriteRepository::create`] and
/// [`ContactWriteRepository::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactSaveData {
    pub fields: ContactFields,
    pub source: Source,
    pub overwrite: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub aggregate_version: i64,
}

#[derive(Debug, Clone)]
pub struct ContactWriteRepository {
    driver: GraphDriver,
}

impl ContactWriteRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Ensure the contact exists and write the provided fields.
    ///
    /// Returns `false` when the tenant is missing or the version is stale.
    #[instrument(level = "debug", skip(self, ctx, tx, data))]
    pub fn create(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        data: &ContactSaveData,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let created_at = data.created_at.unwrap_or_else(now);
            let updated_at = data.updated_at.unwrap_or(created_at);
            let mut source = data.source.clone();
            source.normalize();

            let on_create = props([
                ("source", source.source.clone().into()),
                (SOURCE_OF_TRUTH, source.source_of_truth.clone().into()),
                ("appSource", source.app_source.clone().into()),
                ("hide", false.into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(updated_at)),
            ]);
            let Some(Ensured { node_id, .. }) = ensure_scoped_node(
                tx,
                tenant,
                CONTACT,
                contact_id,
                rel::CONTACT_BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                debug!("tenant not found, contact create skipped");
                return Ok(false);
            };
            let rule = SourceRule::for_source(&source.source, data.overwrite);
            let patch = fields_patch(&data.fields, rule, updated_at)?;
            tx.patch_node_versioned(node_id, &patch, data.aggregate_version)
        })
    }

    /// Apply the provided fields under the source-of-truth rule.
    ///
    /// Returns `false` when the contact is missing or the version is stale.
    #[instrument(level = "debug", skip(self, ctx, tx, data))]
    pub fn update(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        data: &ContactSaveData,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(node_id) = scoped_node_id(tx, CONTACT, tenant, contact_id)? else {
                return Ok(false);
            };
            let updated_at = data.updated_at.unwrap_or_else(now);
            let rule = SourceRule::for_source(&data.source.source, data.overwrite);
            let patch = fields_patch(&data.fields, rule, updated_at)?;
            tx.patch_node_versioned(node_id, &patch, data.aggregate_version)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_phone_number(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        phone_number_id: &str,
        primary: bool,
        label: &str,
    ) -> Result<bool> {
        PhoneNumberRepository::new(self.driver.clone()).link_with_entity(
            ctx,
            tx,
            tenant,
            LinkedEntity::Contact,
            contact_id,
            phone_number_id,
            primary,
            label,
        )
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_location(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        location_id: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let contact = scoped_node_id(tx, CONTACT, tenant, contact_id)?;
            let location = scoped_node_id(tx, LOCATION, tenant, location_id)?;
            let (Some(contact), Some(location)) = (contact, location) else {
                return Ok(false);
            };
            tx.merge_edge(contact, rel::ASSOCIATED_WITH, location, &Props::new())?;
            tx.patch_node(contact, &touched(now()))?;
            Ok(true)
        })
    }

    /// Create a location and associate it with the contact in one unit of
    /// work.
    #[instrument(level = "debug", skip(self, ctx, tx, fields, source))]
    pub fn create_location_and_link(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        location_id: &str,
        fields: &LocationFields,
        source: &Source,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        let locations = LocationRepository::new(self.driver.clone());
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            if scoped_node_id(tx, CONTACT, tenant, contact_id)?.is_none() {
                return Ok(false);
            }
            locations.create(ctx, Some(tx), tenant, location_id, fields, source, created_at)?;
            self.link_with_location(ctx, Some(tx), tenant, contact_id, location_id)
        })
    }

    /// Record the contact's role at an organization. A contact holds at
    /// most one job role per organization; a repeated link updates it.
    #[instrument(level = "debug", skip(self, ctx, tx, role, source))]
    pub fn link_with_organization(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        organization_id: &str,
        role: &JobRoleFields,
        source: &Source,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let contact = scoped_node_id(tx, CONTACT, tenant, contact_id)?;
            let org = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)?;
            let (Some(contact), Some(org)) = (contact, org) else {
                return Ok(false);
            };

            let role_label = tenant_label(JOB_ROLE, tenant);
            let mut existing = None;
            for candidate in tx.out_neighbors(contact, rel::WORKS_AS, Some(&role_label))? {
                if !tx.edges_between(candidate.node_id, rel::ROLE_IN, org)?.is_empty() {
                    existing = Some(candidate.node_id);
                    break;
                }
            }

            let role_props = to_props(role)?;
            let job_role = match existing {
                Some(node_id) => node_id,
                None => {
                    let mut source = source.clone();
                    source.normalize();
                    let mut on_create = props([
                        ("source", source.source.into()),
                        (SOURCE_OF_TRUTH, source.source_of_truth.into()),
                        ("appSource", source.app_source.into()),
                        ("createdAt", ts(updated_at)),
                    ]);
                    on_create.extend(role_props.clone());
                    let role_id = uuid::Uuid::new_v4().to_string();
                    let Some(created) = ensure_scoped_node(
                        tx,
                        tenant,
                        JOB_ROLE,
                        &role_id,
                        rel::BELONGS_TO_TENANT,
                        &on_create,
                    )?
                    else {
                        return Ok(false);
                    };
                    tx.create_edge(contact, rel::WORKS_AS, created.node_id, &Props::new())?;
                    tx.create_edge(created.node_id, rel::ROLE_IN, org, &Props::new())?;
                    created.node_id
                }
            };
            let patch = role_props
                .into_iter()
                .fold(touched(updated_at), |patch, (key, value)| patch.set(&key, value));
            tx.patch_node(job_role, &patch)?;
            tx.patch_node(contact, &touched(updated_at))?;
            Ok(true)
        })
    }

    /// Hide or show the contact.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn set_hidden(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
        hide: bool,
        updated_at: DateTime<Utc>,
        aggregate_version: i64,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(node_id) = scoped_node_id(tx, CONTACT, tenant, contact_id)? else {
                return Ok(false);
            };
            let patch = if hide {
                touched(updated_at).set("hide", true).set("hiddenAt", ts(updated_at))
            } else {
                touched(updated_at).set("hide", false).remove("hiddenAt")
            };
            tx.patch_node_versioned(node_id, &patch, aggregate_version)
        })
    }
}

fn fields_patch(
    fields: &ContactFields,
    rule: SourceRule,
    updated_at: DateTime<Utc>,
) -> Result<PropertyPatch> {
    Ok(PropertyPatch::with_rule(rule)
        .merge_props(to_props(fields)?)
        .set("updatedAt", ts(updated_at))
        .stamp_source_of_truth())
}

#[derive(Debug, Clone)]
pub struct ContactReadRepository {
    driver: GraphDriver,
}

impl ContactReadRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
    ) -> Result<Option<Node>> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| scoped_node(tx, CONTACT, tenant, contact_id))
    }

    /// Job roles of the contact paired with the organization they are in.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_job_roles(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contact_id: &str,
    ) -> Result<Vec<(Node, String)>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(contact) = scoped_node_id(tx, CONTACT, tenant, contact_id)? else {
                return Ok(Vec::new());
            };
            let role_label = tenant_label(JOB_ROLE, tenant);
            let org_label = tenant_label(ORGANIZATION, tenant);
            let mut roles = Vec::new();
            for role in tx.out_neighbors(contact, rel::WORKS_AS, Some(&role_label))? {
                if let Some(org) = tx.out_neighbors(role.node_id, rel::ROLE_IN, Some(&org_label))?.first() {
                    let org_id = org.id().to_string();
                    roles.push((role, org_id));
                }
            }
            Ok(roles)
        })
    }
}
