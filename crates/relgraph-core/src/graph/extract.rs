//! Typed extraction from result records.
//!
//! Zero records is never an error here: single-record variants return
//! `Ok(None)` and list variants an empty vector. Callers that need a hard
//! miss convert once with [`crate::error::OptionExt::or_not_found`].

use rusqlite::types::FromSql;

use super::props::Node;
use super::tx::Record;
use crate::error::{Error, Result};

fn at_most_one(records: &[Record]) -> Result<Option<&Record>> {
    match records {
        [] => Ok(None),
        [record] => Ok(Some(record)),
        _ => Err(Error::Internal(format!(
            "expected at most one record, got {}",
            records.len()
        ))),
    }
}

pub fn single_record_first_value_as_node(records: &[Record]) -> Result<Option<Node>> {
    at_most_one(records)?.map(|record| record.node(0)).transpose()
}

pub fn all_records_first_value_as_node_list(records: &[Record]) -> Result<Vec<Node>> {
    records.iter().map(|record| record.node(0)).collect()
}

pub fn first_record_first_value_as_node_or_none(records: &[Record]) -> Result<Option<Node>> {
    records.first().map(|record| record.node(0)).transpose()
}

pub fn all_records_as_string_list(records: &[Record]) -> Result<Vec<String>> {
    records.iter().map(|record| record.get(0)).collect()
}

/// First column of the only record as `T`; a SQL `NULL` reads as `None`.
pub fn single_record_first_value_as<T: FromSql>(records: &[Record]) -> Result<Option<T>> {
    match at_most_one(records)? {
        None => Ok(None),
        Some(record) => record.get::<Option<T>>(0),
    }
}

/// A node paired with the id of the entity it was reached from.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAndId {
    pub node: Node,
    pub linked_id: String,
}

/// Records shaped `(node_json, linked_id)`.
pub fn all_records_as_node_and_id(records: &[Record]) -> Result<Vec<NodeAndId>> {
    records
        .iter()
        .map(|record| {
            Ok(NodeAndId {
                node: record.node(0)?,
                linked_id: record.get(1)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value;

    fn node_record(id: &str) -> Record {
        Record(vec![
            Value::Text(format!(
                r#"{{"nodeId":1,"labels":["Tag_t","Tag"],"props":{{"id":"{id}"}}}}"#
            )),
            Value::Text("org-1".to_string()),
        ])
    }

    #[test]
    fn zero_records_is_not_an_error() {
        assert!(single_record_first_value_as_node(&[]).expect("ok").is_none());
        assert!(first_record_first_value_as_node_or_none(&[]).expect("ok").is_none());
        assert!(all_records_first_value_as_node_list(&[]).expect("ok").is_empty());
        assert!(single_record_first_value_as::<i64>(&[]).expect("ok").is_none());
    }

    #[test]
    fn more_than_one_record_fails_single_variants() {
        let records = vec![node_record("a"), node_record("b")];
        assert!(single_record_first_value_as_node(&records).is_err());
        assert_eq!(
            first_record_first_value_as_node_or_none(&records)
                .expect("ok")
                .expect("node")
                .id(),
            "a"
        );
    }

    #[test]
    fn node_and_id_pairs_decode() {
        let pairs = all_records_as_node_and_id(&[node_record("t1")]).expect("decode");
        assert_eq!(pairs[0].node.id(), "t1");
        assert_eq!(pairs[0].node.labels, vec!["Tag", "Tag_t"]);
        assert_eq!(pairs[0].linked_id, "org-1");
    }

    #[test]
    fn typed_values_and_nulls() {
        let count = Record(vec![Value::Integer(7)]);
        assert_eq!(single_record_first_value_as::<i64>(&[count]).expect("ok"), Some(7));
        let null = Record(vec![Value::Null]);
        assert_eq!(single_record_first_value_as::<i64>(&[null]).expect("ok"), None);
        let names = [Record(vec![Value::Text("a".into())]), Record(vec![Value::Text("b".into())])];
        assert_eq!(all_records_as_string_list(&names).expect("ok"), vec!["a", "b"]);
    }
}
