//! Satellite nodes written by the projectors: phone numbers, locations,
//! socials, external system links and timeline actions.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{LinkedEntity, ensure_scoped_node, props, scoped_node, scoped_node_id, touched};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::labels::{
    ACTION, EXTERNAL_SYSTEM, LOCATION, PHONE_NUMBER, SOCIAL, TIMELINE_EVENT, rel, tenant_label,
};
use crate::graph::props::{SOURCE_OF_TRUTH, to_props, ts, ts_opt};
use crate::graph::{GraphDriver, GraphTx, Node, Props};
use crate::model::satellite::{ExternalSystem, LocationFields, SocialFields};
use crate::model::source::Source;

fn source_props(source: &Source, created_at: DateTime<Utc>) -> Props {
    let mut source = source.clone();
    source.normalize();
    props([
        ("source", source.source.into()),
        (SOURCE_OF_TRUTH, source.source_of_truth.into()),
        ("appSource", source.app_source.into()),
        ("createdAt", ts(created_at)),
        ("updatedAt", ts(created_at)),
    ])
}

// ---------------------------------------------------------------------------
// Phone numbers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PhoneNumberRepository {
    driver: GraphDriver,
}

impl PhoneNumberRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Ensure the phone number exists. Returns whether it was created.
    #[instrument(level = "debug", skip(self, ctx, tx, source))]
    pub fn merge(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        phone_number_id: &str,
        raw_phone_number: &str,
        source: &Source,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let mut on_create = source_props(source, created_at);
            on_create.insert("rawPhoneNumber".to_string(), raw_phone_number.into());
            let ensured = ensure_scoped_node(
                tx,
                tenant,
                PHONE_NUMBER,
                phone_number_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?;
            Ok(ensured.is_some_and(|ensured| ensured.created))
        })
    }

    /// Link the phone number to its owner. A primary link demotes every
    /// other phone number of the owner.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_entity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        phone_number_id: &str,
        primary: bool,
        label: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let entity = scoped_node_id(tx, owner.label(), tenant, owner_id)?;
            let phone = scoped_node_id(tx, PHONE_NUMBER, tenant, phone_number_id)?;
            let (Some(entity), Some(phone)) = (entity, phone) else {
                return Ok(false);
            };
            let phone_label = tenant_label(PHONE_NUMBER, tenant);
            if primary {
                for other in tx.out_neighbors(entity, rel::HAS, Some(&phone_label))? {
                    if other.node_id == phone {
                        continue;
                    }
                    tx.merge_edge(entity, rel::HAS, other.node_id, &props([("primary", false.into())]))?;
                }
            }
            tx.merge_edge(
                entity,
                rel::HAS,
                phone,
                &props([("primary", primary.into()), ("label", label.into())]),
            )?;
            tx.patch_node(entity, &touched(crate::model::now()))?;
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        phone_number_id: &str,
    ) -> Result<Option<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            scoped_node(tx, PHONE_NUMBER, tenant, phone_number_id)
        })
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocationRepository {
    driver: GraphDriver,
}

impl LocationRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create the location. Returns whether it was created.
    #[instrument(level = "debug", skip(self, ctx, tx, fields, source))]
    pub fn create(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        location_id: &str,
        fields: &LocationFields,
        source: &Source,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let mut on_create = source_props(source, created_at);
            on_create.extend(to_props(fields)?);
            let ensured = ensure_scoped_node(
                tx,
                tenant,
                LOCATION,
                location_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?;
            Ok(ensured.is_some_and(|ensured| ensured.created))
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        location_id: &str,
    ) -> Result<Option<Node>> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| scoped_node(tx, LOCATION, tenant, location_id))
    }
}

// ---------------------------------------------------------------------------
// Socials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SocialRepository {
    driver: GraphDriver,
}

impl SocialRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Merge the social profile and link it to its owner.
    #[instrument(level = "debug", skip(self, ctx, tx, fields, source))]
    pub fn merge_and_link(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        social_id: &str,
        fields: &SocialFields,
        source: &Source,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(entity) = scoped_node_id(tx, owner.label(), tenant, owner_id)? else {
                return Ok(false);
            };
            let mut on_create = source_props(source, created_at);
            on_create.extend(to_props(fields)?);
            let Some(social) = ensure_scoped_node(
                tx,
                tenant,
                SOCIAL,
                social_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };
            if !social.created {
                tx.patch_node(
                    social.node_id,
                    &touched(created_at)
                        .set("url", fields.url.as_str())
                        .set("alias", fields.alias.as_str())
                        .set("followersCount", fields.followers_count),
                )?;
            }
            tx.merge_edge(entity, rel::HAS, social.node_id, &props([]))?;
            tx.patch_node(entity, &touched(created_at))?;
            Ok(true)
        })
    }

    /// Unlink the social profile and delete it once nothing references it.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn remove_from_entity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        social_id: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let entity = scoped_node_id(tx, owner.label(), tenant, owner_id)?;
            let social = scoped_node_id(tx, SOCIAL, tenant, social_id)?;
            let (Some(entity), Some(social)) = (entity, social) else {
                return Ok(false);
            };
            let removed = tx.delete_edges(entity, rel::HAS, Some(social))? > 0;
            if tx.in_edges(social, rel::HAS)?.is_empty() {
                tx.detach_delete(social)?;
            }
            if removed {
                tx.patch_node(entity, &touched(crate::model::now()))?;
            }
            Ok(removed)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_for_entity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
    ) -> Result<Vec<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(entity) = scoped_node_id(tx, owner.label(), tenant, owner_id)? else {
                return Ok(Vec::new());
            };
            let label = tenant_label(SOCIAL, tenant);
            tx.out_neighbors(entity, rel::HAS, Some(&label))
        })
    }
}

// ---------------------------------------------------------------------------
// External systems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExternalSystemRepository {
    driver: GraphDriver,
}

impl ExternalSystemRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Link the entity with an external system. One `IS_LINKED_WITH` edge
    /// exists per `externalId`; a repeated link refreshes its properties.
    #[instrument(level = "debug", skip(self, ctx, tx, external), fields(system = %external.external_system_id))]
    pub fn link_with_entity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
        external: &ExternalSystem,
    ) -> Result<bool> {
        if !external.is_available() {
            return Ok(false);
        }
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(entity) = scoped_node_id(tx, owner.label(), tenant, owner_id)? else {
                return Ok(false);
            };
            let at = crate::model::now();
            let on_create = props([("name", external.external_system_id.clone().into()), ("createdAt", ts(at))]);
            let Some(system) = ensure_scoped_node(
                tx,
                tenant,
                EXTERNAL_SYSTEM,
                &external.external_system_id,
                rel::EXTERNAL_SYSTEM_BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };

            let link = props([
                ("externalId", external.external_id.clone().into()),
                ("externalIdSecond", external.external_id_second.clone().map_or(Value::Null, Value::from)),
                ("externalUrl", external.external_url.clone().map_or(Value::Null, Value::from)),
                ("externalSource", external.external_source.clone().map_or(Value::Null, Value::from)),
                ("syncDate", ts_opt(external.sync_date)),
            ]);
            let existing = tx
                .edges_between(entity, rel::IS_LINKED_WITH, system.node_id)?
                .into_iter()
                .find(|edge| {
                    edge.props.get("externalId").and_then(Value::as_str)
                        == Some(external.external_id.as_str())
                });
            match existing {
                Some(edge) => tx.set_edge_props(edge.edge_id, &link)?,
                None => {
                    tx.create_edge(entity, rel::IS_LINKED_WITH, system.node_id, &link)?;
                }
            }
            Ok(true)
        })
    }

    /// External links of the entity as `(systemId, edge properties)`.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_links(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        owner: LinkedEntity,
        owner_id: &str,
    ) -> Result<Vec<(String, Props)>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(entity) = scoped_node_id(tx, owner.label(), tenant, owner_id)? else {
                return Ok(Vec::new());
            };
            let mut links = Vec::new();
            for edge in tx.out_edges(entity, rel::IS_LINKED_WITH)? {
                if let Some(system) = tx.node(edge.dst)? {
                    links.push((system.id().to_string(), edge.props));
                }
            }
            Ok(links)
        })
    }
}

// ---------------------------------------------------------------------------
// Timeline actions
// ---------------------------------------------------------------------------

/// A timeline entry attached to one or more entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub id: String,
    pub action_type: String,
    pub content: String,
    pub metadata: String,
    pub app_source: String,
    pub created_at: DateTime<Utc>,
    pub targets: Vec<(LinkedEntity, String)>,
}

#[derive(Debug, Clone)]
pub struct ActionRepository {
    driver: GraphDriver,
}

impl ActionRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create the action with an `ACTION_ON` edge to every existing target.
    #[instrument(level = "debug", skip(self, ctx, tx, action), fields(action_id = %action.id, action_type = %action.action_type))]
    pub fn create(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        action: &ActionRecord,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let on_create = props([
                ("actionType", action.action_type.clone().into()),
                ("content", action.content.clone().into()),
                ("metadata", action.metadata.clone().into()),
                ("appSource", action.app_source.clone().into()),
                ("createdAt", ts(action.created_at)),
            ]);
            let Some(node) = ensure_scoped_node(
                tx,
                tenant,
                ACTION,
                &action.id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };
            tx.add_labels(node.node_id, &[TIMELINE_EVENT])?;
            for (kind, id) in &action.targets {
                match scoped_node_id(tx, kind.label(), tenant, id)? {
                    Some(target) => {
                        tx.merge_edge(node.node_id, rel::ACTION_ON, target, &props([]))?;
                    }
                    None => debug!(target = %id, "action target not found"),
                }
            }
            Ok(node.created)
        })
    }
}
