//! Statement execution inside one graph transaction.
//!
//! Every method checks the request context before touching SQLite and logs
//! the statement with the names of its bound parameters. Labels,
//! relationship types and property values are always bound; no caller data
//! is ever spliced into SQL text.

use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::{ToSql, Transaction};
use tracing::debug;

use super::extract;
use super::props::{AGGREGATE_VERSION, Edge, Node, PropertyPatch, Props};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::graph::labels::TENANT;

/// Named parameters for one statement.
pub type Params<'a> = [(&'a str, &'a dyn ToSql)];

/// SQL expression projecting node alias `n` into the JSON shape decoded by
/// [`Node`].
macro_rules! node_json {
    ($alias:literal) => {
        concat!(
            "json_object('nodeId', ",
            $alias,
            ".node_id, 'labels', json((SELECT json_group_array(label) FROM (SELECT label FROM node_labels WHERE node_id = ",
            $alias,
            ".node_id ORDER BY label))), 'props', json(",
            $alias,
            ".props))"
        )
    };
}
pub(crate) use node_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record(pub Vec<Value>);

impl Record {
    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    /// Typed read of column `idx`.
    pub fn get<T: FromSql>(&self, idx: usize) -> Result<T> {
        let value = self
            .0
            .get(idx)
            .ok_or_else(|| Error::Internal(format!("record has no column {idx}")))?;
        T::column_result(ValueRef::from(value))
            .map_err(|err| Error::Internal(format!("column {idx}: {err}")))
    }

    /// Decode column `idx` produced by `node_json!`.
    pub fn node(&self, idx: usize) -> Result<Node> {
        let text: String = self.get(idx)?;
        let mut node: Node = serde_json::from_str(&text)?;
        node.labels.sort_unstable();
        Ok(node)
    }
}

/// A transaction handed to repository work.
pub struct GraphTx<'c> {
    inner: Transaction<'c>,
    mode: AccessMode,
    ctx: Ctx,
}

impl<'c> GraphTx<'c> {
    pub(crate) fn new(inner: Transaction<'c>, mode: AccessMode, ctx: Ctx) -> Self {
        Self { inner, mode, ctx }
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.inner.commit()?;
        Ok(())
    }

    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.mode == AccessMode::Write
    }

    #[must_use]
    pub const fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    fn log(sql: &str, params: &Params<'_>) {
        let names: Vec<&str> = params.iter().map(|(name, _)| *name).collect();
        debug!(sql = sql.trim(), params = ?names, "graph statement");
    }

    // -----------------------------------------------------------------------
    // Raw statements
    // -----------------------------------------------------------------------

    /// Run a read statement and collect every row.
    pub fn query(&self, sql: &str, params: &Params<'_>) -> Result<Vec<Record>> {
        self.ctx.check()?;
        Self::log(sql, params);
        let mut stmt = self.inner.prepare_cached(sql)?;
        let columns = stmt.column_count();
        let rows = stmt.query_map(params, |row| {
            (0..columns)
                .map(|idx| row.get::<_, Value>(idx))
                .collect::<rusqlite::Result<Vec<_>>>()
                .map(Record)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Run a mutating statement; returns the number of affected rows.
    pub fn execute(&self, sql: &str, params: &Params<'_>) -> Result<usize> {
        self.ctx.check()?;
        if !self.is_write() {
            return Err(Error::Internal(
                "mutating statement issued on a read transaction".to_string(),
            ));
        }
        Self::log(sql, params);
        let mut stmt = self.inner.prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    fn last_insert_rowid(&self) -> i64 {
        self.inner.last_insert_rowid()
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Node with `label` whose `id` property is `id`.
    pub fn find_node(&self, label: &str, id: &str) -> Result<Option<Node>> {
        let records = self.query(
            concat!(
                "SELECT ",
                node_json!("n"),
                " FROM nodes n JOIN node_labels l ON l.node_id = n.node_id AND l.label = :label
                 WHERE n.entity_id = :id ORDER BY n.node_id LIMIT 1"
            ),
            &[(":label", &label), (":id", &id)],
        )?;
        extract::first_record_first_value_as_node_or_none(&records)
    }

    pub fn find_node_id(&self, label: &str, id: &str) -> Result<Option<i64>> {
        let records = self.query(
            "SELECT n.node_id FROM nodes n
             JOIN node_labels l ON l.node_id = n.node_id AND l.label = :label
             WHERE n.entity_id = :id ORDER BY n.node_id LIMIT 1",
            &[(":label", &label), (":id", &id)],
        )?;
        extract::single_record_first_value_as(&records)
    }

    pub fn node(&self, node_id: i64) -> Result<Option<Node>> {
        let records = self.query(
            concat!("SELECT ", node_json!("n"), " FROM nodes n WHERE n.node_id = :node_id"),
            &[(":node_id", &node_id)],
        )?;
        extract::first_record_first_value_as_node_or_none(&records)
    }

    fn props_of(&self, node_id: i64) -> Result<Props> {
        let records = self.query(
            "SELECT props FROM nodes WHERE node_id = :node_id",
            &[(":node_id", &node_id)],
        )?;
        let text: Option<String> = extract::single_record_first_value_as(&records)?;
        let text =
            text.ok_or_else(|| Error::Internal(format!("node {node_id} vanished mid-transaction")))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Create a node with the given labels and properties.
    pub fn create_node<L: AsRef<str>>(&self, labels: &[L], props: &Props) -> Result<i64> {
        let entity_id = props.get("id").and_then(serde_json::Value::as_str);
        let text = serde_json::to_string(props)?;
        self.execute(
            "INSERT INTO nodes (entity_id, props) VALUES (:entity_id, :props)",
            &[(":entity_id", &entity_id), (":props", &text)],
        )?;
        let node_id = self.last_insert_rowid();
        self.add_labels(node_id, labels)?;
        Ok(node_id)
    }

    /// Find the node with `match_label` and `id`, creating it with
    /// `match_label`, `extra_labels` and `on_create` otherwise.
    ///
    /// Returns the node id and whether the node was created.
    pub fn merge_node<L: AsRef<str>>(
        &self,
        match_label: &str,
        id: &str,
        extra_labels: &[L],
        on_create: &Props,
    ) -> Result<(i64, bool)> {
        if let Some(node_id) = self.find_node_id(match_label, id)? {
            return Ok((node_id, false));
        }
        let mut props = on_create.clone();
        props.insert("id".to_string(), id.into());
        let mut labels: Vec<&str> = vec![match_label];
        labels.extend(extra_labels.iter().map(AsRef::as_ref));
        let node_id = self.create_node(&labels, &props)?;
        Ok((node_id, true))
    }

    /// Overwrite the full property map of a node.
    pub fn write_props(&self, node_id: i64, props: &Props) -> Result<()> {
        let text = serde_json::to_string(props)?;
        self.execute(
            "UPDATE nodes SET props = :props WHERE node_id = :node_id",
            &[(":props", &text), (":node_id", &node_id)],
        )?;
        Ok(())
    }

    /// Apply a property patch and return the resulting properties.
    pub fn patch_node(&self, node_id: i64, patch: &PropertyPatch) -> Result<Props> {
        let current = self.props_of(node_id)?;
        let next = patch.apply(&current);
        if next != current {
            self.write_props(node_id, &next)?;
        }
        Ok(next)
    }

    /// Apply a patch only when `version` is newer than the stored
    /// `aggregateVersion` (a missing version counts as older).
    ///
    /// Returns `false` when the write was refused.
    pub fn patch_node_versioned(
        &self,
        node_id: i64,
        patch: &PropertyPatch,
        version: i64,
    ) -> Result<bool> {
        let current = self.props_of(node_id)?;
        let mut next = patch.apply(&current);
        next.insert(AGGREGATE_VERSION.to_string(), version.into());
        let text = serde_json::to_string(&next)?;
        let changed = self.execute(
            "UPDATE nodes SET props = :props
             WHERE node_id = :node_id
               AND (json_extract(props, '$.aggregateVersion') IS NULL
                    OR json_extract(props, '$.aggregateVersion') < :version)",
            &[(":props", &text), (":node_id", &node_id), (":version", &version)],
        )?;
        if changed == 0 {
            debug!(node_id, version, "stale aggregate version, write skipped");
        }
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Labels
    // -----------------------------------------------------------------------

    pub fn add_labels<L: AsRef<str>>(&self, node_id: i64, labels: &[L]) -> Result<()> {
        for label in labels {
            let label = label.as_ref();
            self.execute(
                "INSERT OR IGNORE INTO node_labels (node_id, label) VALUES (:node_id, :label)",
                &[(":node_id", &node_id), (":label", &label)],
            )?;
        }
        Ok(())
    }

    pub fn remove_labels<L: AsRef<str>>(&self, node_id: i64, labels: &[L]) -> Result<()> {
        for label in labels {
            let label = label.as_ref();
            self.execute(
                "DELETE FROM node_labels WHERE node_id = :node_id AND label = :label",
                &[(":node_id", &node_id), (":label", &label)],
            )?;
        }
        Ok(())
    }

    pub fn labels(&self, node_id: i64) -> Result<Vec<String>> {
        let records = self.query(
            "SELECT label FROM node_labels WHERE node_id = :node_id ORDER BY label",
            &[(":node_id", &node_id)],
        )?;
        extract::all_records_as_string_list(&records)
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    fn edges_from(records: &[Record]) -> Result<Vec<Edge>> {
        records
            .iter()
            .map(|record| {
                let props: String = record.get(4)?;
                Ok(Edge {
                    edge_id: record.get(0)?,
                    rel_type: record.get(1)?,
                    src: record.get(2)?,
                    dst: record.get(3)?,
                    props: serde_json::from_str(&props)?,
                })
            })
            .collect()
    }

    pub fn create_edge(&self, src: i64, rel_type: &str, dst: i64, props: &Props) -> Result<i64> {
        let text = serde_json::to_string(props)?;
        self.execute(
            "INSERT INTO edges (rel_type, src, dst, props) VALUES (:rel, :src, :dst, :props)",
            &[(":rel", &rel_type), (":src", &src), (":dst", &dst), (":props", &text)],
        )?;
        Ok(self.last_insert_rowid())
    }

    /// Ensure exactly one `rel_type` edge between `src` and `dst`; `props`
    /// are merged into an existing edge. Returns the edge id and whether it
    /// was created.
    pub fn merge_edge(
        &self,
        src: i64,
        rel_type: &str,
        dst: i64,
        props: &Props,
    ) -> Result<(i64, bool)> {
        let existing = self.edges_between(src, rel_type, dst)?;
        if let Some(edge) = existing.into_iter().next() {
            if !props.is_empty() {
                let mut merged = edge.props.clone();
                merged.extend(props.clone());
                self.set_edge_props(edge.edge_id, &merged)?;
            }
            return Ok((edge.edge_id, false));
        }
        Ok((self.create_edge(src, rel_type, dst, props)?, true))
    }

    pub fn set_edge_props(&self, edge_id: i64, props: &Props) -> Result<()> {
        let text = serde_json::to_string(props)?;
        self.execute(
            "UPDATE edges SET props = :props WHERE edge_id = :edge_id",
            &[(":props", &text), (":edge_id", &edge_id)],
        )?;
        Ok(())
    }

    /// Delete `rel_type` edges out of `src`, optionally only those to `dst`.
    pub fn delete_edges(&self, src: i64, rel_type: &str, dst: Option<i64>) -> Result<usize> {
        self.execute(
            "DELETE FROM edges
             WHERE src = :src AND rel_type = :rel AND (:dst IS NULL OR dst = :dst)",
            &[(":src", &src), (":rel", &rel_type), (":dst", &dst)],
        )
    }

    pub fn edges_between(&self, src: i64, rel_type: &str, dst: i64) -> Result<Vec<Edge>> {
        let records = self.query(
            "SELECT edge_id, rel_type, src, dst, props FROM edges
             WHERE src = :src AND rel_type = :rel AND dst = :dst ORDER BY edge_id",
            &[(":src", &src), (":rel", &rel_type), (":dst", &dst)],
        )?;
        Self::edges_from(&records)
    }

    pub fn out_edges(&self, src: i64, rel_type: &str) -> Result<Vec<Edge>> {
        let records = self.query(
            "SELECT edge_id, rel_type, src, dst, props FROM edges
             WHERE src = :src AND rel_type = :rel ORDER BY edge_id",
            &[(":src", &src), (":rel", &rel_type)],
        )?;
        Self::edges_from(&records)
    }

    pub fn in_edges(&self, dst: i64, rel_type: &str) -> Result<Vec<Edge>> {
        let records = self.query(
            "SELECT edge_id, rel_type, src, dst, props FROM edges
             WHERE dst = :dst AND rel_type = :rel ORDER BY edge_id",
            &[(":dst", &dst), (":rel", &rel_type)],
        )?;
        Self::edges_from(&records)
    }

    /// Nodes reached from `src` over `rel_type`, optionally restricted to
    /// nodes carrying `label`.
    pub fn out_neighbors(&self, src: i64, rel_type: &str, label: Option<&str>) -> Result<Vec<Node>> {
        let records = self.query(
            concat!(
                "SELECT ",
                node_json!("n"),
                " FROM edges e JOIN nodes n ON n.node_id = e.dst
                 WHERE e.src = :src AND e.rel_type = :rel
                   AND (:label IS NULL OR EXISTS (
                        SELECT 1 FROM node_labels l WHERE l.node_id = n.node_id AND l.label = :label))
                 ORDER BY e.edge_id"
            ),
            &[(":src", &src), (":rel", &rel_type), (":label", &label)],
        )?;
        extract::all_records_first_value_as_node_list(&records)
    }

    /// Nodes with a `rel_type` edge into `dst`, optionally restricted to
    /// nodes carrying `label`.
    pub fn in_neighbors(&self, dst: i64, rel_type: &str, label: Option<&str>) -> Result<Vec<Node>> {
        let records = self.query(
            concat!(
                "SELECT ",
                node_json!("n"),
                " FROM edges e JOIN nodes n ON n.node_id = e.src
                 WHERE e.dst = :dst AND e.rel_type = :rel
                   AND (:label IS NULL OR EXISTS (
                        SELECT 1 FROM node_labels l WHERE l.node_id = n.node_id AND l.label = :label))
                 ORDER BY e.edge_id"
            ),
            &[(":dst", &dst), (":rel", &rel_type), (":label", &label)],
        )?;
        extract::all_records_first_value_as_node_list(&records)
    }

    // -----------------------------------------------------------------------
    // Deletion / counting
    // -----------------------------------------------------------------------

    /// Delete a node together with all of its edges and labels.
    pub fn detach_delete(&self, node_id: i64) -> Result<()> {
        self.execute(
            "DELETE FROM edges WHERE src = :node_id OR dst = :node_id",
            &[(":node_id", &node_id)],
        )?;
        self.execute(
            "DELETE FROM node_labels WHERE node_id = :node_id",
            &[(":node_id", &node_id)],
        )?;
        self.execute("DELETE FROM nodes WHERE node_id = :node_id", &[(":node_id", &node_id)])?;
        Ok(())
    }

    pub fn count_label(&self, label: &str) -> Result<i64> {
        let records = self.query(
            "SELECT COUNT(*) FROM node_labels WHERE label = :label",
            &[(":label", &label)],
        )?;
        Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0))
    }

    pub fn count_edges(&self, rel_type: &str) -> Result<i64> {
        let records = self.query(
            "SELECT COUNT(*) FROM edges WHERE rel_type = :rel",
            &[(":rel", &rel_type)],
        )?;
        Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0))
    }

    /// Node id of the `Tenant` named `tenant`.
    pub fn tenant_node_id(&self, tenant: &str) -> Result<Option<i64>> {
        self.find_node_id(TENANT, tenant)
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Ctx;
    use crate::graph::GraphDriver;
    use crate::graph::props::{PropertyPatch, Props};
    use serde_json::json;

    fn props(value: serde_json::Value) -> Props {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Props::new(),
        }
    }

    #[test]
    fn merge_node_is_idempotent() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        driver
            .execute_write_in_transaction(&ctx, None, |tx| {
                let (first, created) = tx.merge_node("Domain", "acme.com", &["Domain"], &Props::new())?;
                assert!(created);
                let (second, created) = tx.merge_node("Domain", "acme.com", &["Domain"], &Props::new())?;
                assert!(!created);
                assert_eq!(first, second);
                assert_eq!(tx.count_label("Domain")?, 1);
                Ok(())
            })
            .expect("write");
    }

    #[test]
    fn versioned_patch_refuses_older_versions() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        driver
            .execute_write_in_transaction(&ctx, None, |tx| {
                let node = tx.create_node(&["Organization"], &props(json!({"id": "o1"})))?;
                assert!(tx.patch_node_versioned(node, &PropertyPatch::new().set("name", "v2"), 2)?);
                assert!(!tx.patch_node_versioned(node, &PropertyPatch::new().set("name", "v1"), 1)?);
                assert!(!tx.patch_node_versioned(node, &PropertyPatch::new().set("name", "again"), 2)?);
                let stored = tx.node(node)?.expect("node");
                assert_eq!(stored.str("name"), Some("v2"));
                assert_eq!(stored.i64("aggregateVersion"), Some(2));
                Ok(())
            })
            .expect("write");
    }

    #[test]
    fn edges_merge_and_delete() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        driver
            .execute_write_in_transaction(&ctx, None, |tx| {
                let a = tx.create_node(&["Contact"], &props(json!({"id": "a"})))?;
                let b = tx.create_node(&["Location"], &props(json!({"id": "b"})))?;
                tx.merge_edge(a, "ASSOCIATED_WITH", b, &Props::new())?;
                tx.merge_edge(a, "ASSOCIATED_WITH", b, &props(json!({"primary": true})))?;
                let edges = tx.out_edges(a, "ASSOCIATED_WITH")?;
                assert_eq!(edges.len(), 1);
                assert_eq!(edges[0].bool("primary"), Some(true));
                assert_eq!(tx.out_neighbors(a, "ASSOCIATED_WITH", Some("Location"))?.len(), 1);
                assert_eq!(tx.out_neighbors(a, "ASSOCIATED_WITH", Some("Tag"))?.len(), 0);
                assert_eq!(tx.in_neighbors(b, "ASSOCIATED_WITH", None)?[0].id(), "a");
                assert_eq!(tx.delete_edges(a, "ASSOCIATED_WITH", Some(b))?, 1);
                assert_eq!(tx.count_edges("ASSOCIATED_WITH")?, 0);
                tx.detach_delete(b)?;
                assert!(tx.node(b)?.is_none());
                Ok(())
            })
            .expect("write");
    }

    #[test]
    fn labels_are_sorted_and_removable() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        driver
            .execute_write_in_transaction(&ctx, None, |tx| {
                let node = tx.create_node(&["Contract_ziggy", "Contract"], &props(json!({"id": "c1"})))?;
                assert_eq!(tx.labels(node)?, vec!["Contract", "Contract_ziggy"]);
                tx.remove_labels(node, &["Contract_ziggy"])?;
                tx.add_labels(node, &["DeletedContract_ziggy"])?;
                assert_eq!(tx.node(node)?.expect("node").labels, vec!["Contract", "DeletedContract_ziggy"]);
                Ok(())
            })
            .expect("write");
    }

    #[test]
    fn read_transaction_rejects_mutation() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        let err = driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.create_node(&["Tag"], &Props::new()))
            .expect_err("must refuse");
        assert!(err.to_string().contains("read transaction"));
    }
}
