//! Nodes, edges and property patches.
//!
//! Properties are JSON objects. Timestamps are stored as integer
//! microseconds since the Unix epoch so that range predicates compare
//! numerically inside SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::source::SourceRule;

pub type Props = Map<String, Value>;

/// Property key holding the aggregate version of the last applied event.
pub const AGGREGATE_VERSION: &str = "aggregateVersion";
/// Property key holding the authoritative source of a node.
pub const SOURCE_OF_TRUTH: &str = "sourceOfTruth";

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

#[must_use]
pub fn ts(value: DateTime<Utc>) -> Value {
    Value::from(value.timestamp_micros())
}

#[must_use]
pub fn ts_opt(value: Option<DateTime<Utc>>) -> Value {
    value.map_or(Value::Null, ts)
}

#[must_use]
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Serialize a sparse field set into properties, dropping absent fields.
pub fn to_props<T: Serialize>(fields: &T) -> serde_json::Result<Props> {
    match serde_json::to_value(fields)? {
        Value::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        _ => Ok(Props::new()),
    }
}

// ---------------------------------------------------------------------------
// Node / Edge
// ---------------------------------------------------------------------------

/// A node as returned by graph queries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: i64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub props: Props,
}

impl Node {
    /// The entity id (`id` property).
    #[must_use]
    pub fn id(&self) -> &str {
        self.str("id").unwrap_or_default()
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn string(&self, key: &str) -> String {
        self.str(key).unwrap_or_default().to_string()
    }

    #[must_use]
    pub fn i64(&self, key: &str) -> Option<i64> {
        self.props.get(key).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn f64(&self, key: &str) -> Option<f64> {
        self.props.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.props.get(key).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.i64(key).and_then(from_micros)
    }
}

/// A relationship between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub edge_id: i64,
    pub rel_type: String,
    pub src: i64,
    pub dst: i64,
    pub props: Props,
}

impl Edge {
    #[must_use]
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.props.get(key).and_then(Value::as_bool)
    }
}

// ---------------------------------------------------------------------------
// PropertyPatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum PatchOp {
    Set(String, Value),
    Merge(String, Value),
    SetIfNull(String, Value),
    Remove(String),
}

/// An ordered list of property writes, some of them guarded by a
/// [`SourceRule`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPatch {
    rule: SourceRule,
    ops: Vec<PatchOp>,
}

impl Default for PropertyPatch {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyPatch {
    /// A patch whose guarded writes always apply.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rule(SourceRule::authoritative())
    }

    #[must_use]
    pub const fn with_rule(rule: SourceRule) -> Self {
        Self {
            rule,
            ops: Vec::new(),
        }
    }

    #[must_use]
    pub const fn rule(&self) -> &SourceRule {
        &self.rule
    }

    /// Unconditional write.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Set(key.to_string(), value.into()));
        self
    }

    /// Unconditional write when the value is present.
    #[must_use]
    pub fn set_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    /// Write governed by the source-of-truth rule.
    #[must_use]
    pub fn merge(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Merge(key.to_string(), value.into()));
        self
    }

    /// Source-of-truth write when the value is present.
    #[must_use]
    pub fn merge_opt<V: Into<Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.merge(key, v),
            None => self,
        }
    }

    /// Source-of-truth write of every property in `props`.
    #[must_use]
    pub fn merge_props(self, props: Props) -> Self {
        props
            .into_iter()
            .fold(self, |patch, (key, value)| patch.merge(&key, value))
    }

    /// First write wins: only applies while the property is null.
    #[must_use]
    pub fn set_if_null(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::SetIfNull(key.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn remove(mut self, key: &str) -> Self {
        self.ops.push(PatchOp::Remove(key.to_string()));
        self
    }

    /// Record the incoming source as source of truth when the write is
    /// authoritative.
    #[must_use]
    pub fn stamp_source_of_truth(self) -> Self {
        if self.rule.overwrite() {
            let source = self.rule.source().to_string();
            self.set(SOURCE_OF_TRUTH, source)
        } else {
            self
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Keys written unconditionally or by merge, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| match op {
            PatchOp::Set(k, _) | PatchOp::Merge(k, _) | PatchOp::SetIfNull(k, _) | PatchOp::Remove(k) => {
                k.as_str()
            }
        })
    }

    /// Apply the patch to `current`, producing the new property map.
    ///
    /// Guarded writes are evaluated against the properties as they were
    /// before the patch so that stamping `sourceOfTruth` in the same patch
    /// does not change the outcome of earlier merges.
    #[must_use]
    pub fn apply(&self, current: &Props) -> Props {
        let current_sot = current
            .get(SOURCE_OF_TRUTH)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut next = current.clone();
        for op in &self.ops {
            match op {
                PatchOp::Set(key, value) => {
                    next.insert(key.clone(), value.clone());
                }
                PatchOp::Merge(key, value) => {
                    let empty = is_empty_value(current.get(key));
                    if self.rule.permits(empty, current_sot) {
                        next.insert(key.clone(), value.clone());
                    }
                }
                PatchOp::SetIfNull(key, value) => {
                    if next.get(key).is_none_or(Value::is_null) {
                        next.insert(key.clone(), value.clone());
                    }
                }
                PatchOp::Remove(key) => {
                    next.remove(key);
                }
            }
        }
        next
    }
}

/// Null, missing and empty strings count as empty.
#[must_use]
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}
