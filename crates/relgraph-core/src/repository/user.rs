use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{ensure_scoped_node, props, scoped_node};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::labels::{USER, rel};
use crate::graph::props::ts;
use crate::graph::{GraphDriver, GraphTx, Node};

#[derive(Debug, Clone)]
pub struct UserRepository {
    driver: GraphDriver,
}

impl UserRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create the user under the tenant. Returns whether it was created.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn create(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        user_id: &str,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let on_create = props([
                ("name", name.into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(created_at)),
            ]);
            let ensured = ensure_scoped_node(
                tx,
                tenant,
                USER,
                user_id,
                rel::USER_BELONGS_TO_TENANT,
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
        user_id: &str,
    ) -> Result<Option<Node>> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| scoped_node(tx, USER, tenant, user_id))
    }
}
