use tracing::instrument;

use super::props;
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::labels::{TENANT, WORKSPACE, rel, validate_tenant};
use crate::graph::props::ts;
use crate::graph::{GraphDriver, GraphTx, Node};
use crate::model::now;

#[derive(Debug, Clone)]
pub struct TenantRepository {
    driver: GraphDriver,
}

impl TenantRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create the tenant root node. Returns `false` when it already exists.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn create(&self, ctx: &Ctx, tx: Option<&GraphTx<'_>>, tenant: &str) -> Result<bool> {
        validate_tenant(tenant)?;
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let at = ts(now());
            let on_create = props([
                ("name", tenant.into()),
                ("createdAt", at.clone()),
                ("updatedAt", at),
            ]);
            let (_, created) = tx.merge_node::<&str>(TENANT, tenant, &[], &on_create)?;
            Ok(created)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn exists(&self, ctx: &Ctx, tx: Option<&GraphTx<'_>>, tenant: &str) -> Result<bool> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| Ok(tx.tenant_node_id(tenant)?.is_some()))
    }

    /// Attach a workspace to the tenant. No-op when the tenant is missing.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn add_workspace(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        name: &str,
        provider: &str,
    ) -> Result<()> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(tenant_node) = tx.tenant_node_id(tenant)? else {
                return Ok(());
            };
            let id = format!("{provider}:{name}");
            let on_create = props([
                ("name", name.into()),
                ("provider", provider.into()),
                ("createdAt", ts(now())),
            ]);
            let (workspace, _) = tx.merge_node::<&str>(WORKSPACE, &id, &[], &on_create)?;
            tx.merge_edge(tenant_node, rel::HAS_WORKSPACE, workspace, &props([]))?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_workspaces(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
    ) -> Result<Vec<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            match tx.tenant_node_id(tenant)? {
                Some(tenant_node) => tx.out_neighbors(tenant_node, rel::HAS_WORKSPACE, Some(WORKSPACE)),
                None => Ok(Vec::new()),
            }
        })
    }
}
