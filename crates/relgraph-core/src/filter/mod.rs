//! Typed filter AST and its compilation into bound SQL fragments.
//!
//! The wire shape is `{"And": [{"Filter": {"Property": ..., "Operation":
//! ..., "Value": ...}}]}`. Only properties present in a fixed vocabulary
//! are compiled; everything else is dropped.

pub mod organization;

pub use organization::{
    Bucket, CompiledFilter, SearchParam, compile_organization_filter,
    organization_search_params_map,
};

use serde::{Deserialize, Serialize};

/// Logical tree of field predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    #[serde(rename = "Filter")]
    Item(FilterItem),
}

impl Filter {
    #[must_use]
    pub fn item(property: &str, operation: Operation, value: FilterValue) -> Self {
        Self::Item(FilterItem {
            property: property.to_string(),
            operation,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterItem {
    pub property: String,
    pub operation: Operation,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Eq,
    In,
    Between,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

impl Operation {
    /// SQL comparison operator for the scalar comparisons.
    #[must_use]
    pub const fn comparison(self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Lt => Some("<"),
            Self::Lte => Some("<="),
            Self::Gt => Some(">"),
            Self::Gte => Some(">="),
            Self::In | Self::Between | Self::Contains => None,
        }
    }
}

/// A predicate operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Str(String),
    ArrayInt(Vec<i64>),
    ArrayStr(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_grammar_decodes() {
        let raw = r#"{"And":[
            {"Filter":{"Property":"EMPLOYEE_COUNT","Operation":"BETWEEN","Value":[10,100]}},
            {"Filter":{"Property":"TAGS","Operation":"IN","Value":["t1","t2"]}},
            {"Not":{"Filter":{"Property":"IS_CUSTOMER","Operation":"EQ","Value":true}}}
        ]}"#;
        let filter: Filter = serde_json::from_str(raw).expect("decode");
        let Filter::And(children) = filter else {
            panic!("expected And");
        };
        assert_eq!(
            children[0],
            Filter::item("EMPLOYEE_COUNT", Operation::Between, FilterValue::ArrayInt(vec![10, 100]))
        );
        assert_eq!(
            children[1],
            Filter::item(
                "TAGS",
                Operation::In,
                FilterValue::ArrayStr(vec!["t1".into(), "t2".into()])
            )
        );
        assert!(matches!(children[2], Filter::Not(_)));
    }
}
