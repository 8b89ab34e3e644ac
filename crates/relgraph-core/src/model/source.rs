//! Source triple and the source-of-truth merge rule.
//!
//! A multi-source field is overwritten by an incoming write only when the
//! write is authoritative (`openline` or an explicit overwrite), the field is
//! still empty, or the node's current `sourceOfTruth` is the incoming source.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graph::props::is_empty_value;

/// The authoritative source.
pub const OPENLINE: &str = "openline";

/// Default application source when a request does not name one.
pub const DEFAULT_APP_SOURCE: &str = "relgraph";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_of_truth: String,
    #[serde(default)]
    pub app_source: String,
}

impl Source {
    #[must_use]
    pub fn new(source: &str, app_source: &str) -> Self {
        let mut out = Self {
            source: source.to_string(),
            source_of_truth: source.to_string(),
            app_source: app_source.to_string(),
        };
        out.normalize();
        out
    }

    /// Empty sources default to `openline`; empty app sources to the
    /// platform default.
    pub fn normalize(&mut self) {
        if self.source.is_empty() {
            self.source = OPENLINE.to_string();
        }
        if self.source_of_truth.is_empty() {
            self.source_of_truth.clone_from(&self.source);
        }
        if self.app_source.is_empty() {
            self.app_source = DEFAULT_APP_SOURCE.to_string();
        }
    }
}

/// Explicit overwrite decision fed into every conditional field merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRule {
    overwrite: bool,
    source: String,
}

impl SourceRule {
    /// `overwrite` is true when the source is authoritative or the caller
    /// forces it.
    #[must_use]
    pub fn for_source(source: &str, force_overwrite: bool) -> Self {
        let source = if source.is_empty() { OPENLINE } else { source };
        Self {
            overwrite: force_overwrite || source == OPENLINE,
            source: source.to_string(),
        }
    }

    /// Rule for writes that always win (technical and derived fields).
    #[must_use]
    pub fn authoritative() -> Self {
        Self::for_source(OPENLINE, true)
    }

    #[must_use]
    pub const fn overwrite(&self) -> bool {
        self.overwrite
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether a field may take the incoming value.
    #[must_use]
    pub fn permits(&self, field_is_empty: bool, current_source_of_truth: &str) -> bool {
        self.overwrite || field_is_empty || current_source_of_truth == self.source
    }

    /// Merge an optional incoming string into a folded field.
    pub fn merge_str(&self, field: &mut String, incoming: Option<&String>, current_sot: &str) {
        if let Some(value) = incoming {
            if self.permits(field.is_empty(), current_sot) {
                field.clone_from(value);
            }
        }
    }

    /// Merge an optional incoming value into an optional folded field.
    pub fn merge_opt<T: Clone>(&self, field: &mut Option<T>, incoming: Option<&T>, current_sot: &str) {
        if let Some(value) = incoming {
            if self.permits(field.is_none(), current_sot) {
                *field = Some(value.clone());
            }
        }
    }
}

impl SourceRule {
    /// Merge every present field of `incoming` into `current`, one field at
    /// a time, under this rule.
    pub fn merge_fields<T>(&self, current: &T, incoming: &T, current_sot: &str) -> serde_json::Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut merged = match serde_json::to_value(current)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(fields) = serde_json::to_value(incoming)? {
            for (key, value) in fields {
                if value.is_null() {
                    continue;
                }
                if self.permits(is_empty_value(merged.get(&key)), current_sot) {
                    merged.insert(key, value);
                }
            }
        }
        serde_json::from_value(Value::Object(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openline_always_overwrites() {
        let rule = SourceRule::for_source(OPENLINE, false);
        assert!(rule.overwrite());
        assert!(rule.permits(false, "hubspot"));
    }

    #[test]
    fn empty_source_is_openline() {
        let rule = SourceRule::for_source("", false);
        assert!(rule.overwrite());
        assert_eq!(rule.source(), OPENLINE);
    }

    #[test]
    fn foreign_source_only_fills_empty_or_owned_fields() {
        let rule = SourceRule::for_source("hubspot", false);
        assert!(!rule.permits(false, OPENLINE));
        assert!(rule.permits(true, OPENLINE));
        assert!(rule.permits(false, "hubspot"));
    }

    #[test]
    fn forced_overwrite_wins_for_foreign_source() {
        let rule = SourceRule::for_source("hubspot", true);
        assert!(rule.permits(false, OPENLINE));
    }

    #[test]
    fn merge_str_respects_rule() {
        let rule = SourceRule::for_source("hubspot", false);
        let mut name = "Acme".to_string();
        rule.merge_str(&mut name, Some(&"Acme Inc".to_string()), OPENLINE);
        assert_eq!(name, "Acme");

        let mut empty = String::new();
        rule.merge_str(&mut empty, Some(&"filled".to_string()), OPENLINE);
        assert_eq!(empty, "filled");
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct Fields {
        name: Option<String>,
        description: Option<String>,
        employees: Option<i64>,
    }

    #[test]
    fn merge_fields_applies_rule_per_field() {
        let current = Fields {
            name: Some("Acme".into()),
            description: None,
            employees: Some(10),
        };
        let incoming = Fields {
            name: Some("Acme Inc".into()),
            description: Some("Rockets".into()),
            employees: None,
        };
        let rule = SourceRule::for_source("hubspot", false);
        let merged = rule.merge_fields(&current, &incoming, OPENLINE).expect("merge");
        assert_eq!(merged.name.as_deref(), Some("Acme"));
        assert_eq!(merged.description.as_deref(), Some("Rockets"));
        assert_eq!(merged.employees, Some(10));

        let merged = SourceRule::for_source(OPENLINE, false)
            .merge_fields(&current, &incoming, "hubspot")
            .expect("merge");
        assert_eq!(merged.name.as_deref(), Some("Acme Inc"));
    }

    #[test]
    fn source_normalizes_defaults() {
        let source = Source::new("", "");
        assert_eq!(source.source, OPENLINE);
        assert_eq!(source.source_of_truth, OPENLINE);
        assert_eq!(source.app_source, DEFAULT_APP_SOURCE);
    }
}
