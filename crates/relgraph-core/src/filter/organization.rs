//! Organization search compiler.
//!
//! Predicates are partitioned by the sub-pattern they touch: the
//! organization itself (`o`), its tags (`t`), its locations (`l`) and its
//! social profiles (`s`). Hop predicates become correlated `EXISTS`
//! sub-queries fenced by the tenant label of the hop's node type, so `NOT`
//! negates membership over all of an organization's tags, locations or
//! profiles rather than a single joined row. Property names are taken from the fixed vocabulary below and values are
//! always bound, so no caller text reaches the SQL string.

use rusqlite::types::Value;
use tracing::debug;

use super::{Filter, FilterItem, FilterValue, Operation};
use crate::graph::labels::{LOCATION, SOCIAL, TAG, rel, tenant_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Entity,
    Tag,
    Location,
    Social,
}

impl Bucket {
    const ALL: [Self; 4] = [Self::Entity, Self::Tag, Self::Location, Self::Social];

    #[must_use]
    pub const fn alias(self) -> &'static str {
        match self {
            Self::Entity => "o",
            Self::Tag => "t",
            Self::Location => "l",
            Self::Social => "s",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Entity => 0,
            Self::Tag => 1,
            Self::Location => 2,
            Self::Social => 3,
        }
    }

    const fn hop(self) -> Option<&'static str> {
        match self {
            Self::Entity => None,
            Self::Tag => Some(rel::TAGGED),
            Self::Location => Some(rel::ASSOCIATED_WITH),
            Self::Social => Some(rel::HAS),
        }
    }

    const fn node_label(self) -> Option<&'static str> {
        match self {
            Self::Entity => None,
            Self::Tag => Some(TAG),
            Self::Location => Some(LOCATION),
            Self::Social => Some(SOCIAL),
        }
    }
}

/// Where a published search property lives in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParam {
    pub bucket: Bucket,
    pub property: &'static str,
}

const fn param(bucket: Bucket, property: &'static str) -> SearchParam {
    SearchParam { bucket, property }
}

const SEARCH_PARAMS: &[(&str, SearchParam)] = &[
    ("NAME", param(Bucket::Entity, "name")),
    ("WEBSITE", param(Bucket::Entity, "website")),
    ("INDUSTRY", param(Bucket::Entity, "industry")),
    ("MARKET", param(Bucket::Entity, "market")),
    ("EMPLOYEE_COUNT", param(Bucket::Entity, "employees")),
    ("YEAR_FOUNDED", param(Bucket::Entity, "yearFounded")),
    ("STAGE", param(Bucket::Entity, "stage")),
    ("RELATIONSHIP", param(Bucket::Entity, "relationship")),
    ("IS_CUSTOMER", param(Bucket::Entity, "isCustomer")),
    ("IS_PUBLIC", param(Bucket::Entity, "isPublic")),
    ("ICP_FIT", param(Bucket::Entity, "icpFit")),
    ("LEAD_SOURCE", param(Bucket::Entity, "leadSource")),
    ("CUSTOMER_OS_ID", param(Bucket::Entity, "customerOsId")),
    ("LAST_FUNDING_ROUND", param(Bucket::Entity, "lastFundingRound")),
    ("ONBOARDING_STATUS", param(Bucket::Entity, "onboardingStatus")),
    ("RENEWAL_LIKELIHOOD", param(Bucket::Entity, "derivedRenewalLikelihood")),
    ("RENEWAL_DATE", param(Bucket::Entity, "derivedNextRenewalAt")),
    ("FORECAST_ARR", param(Bucket::Entity, "renewalForecastArr")),
    ("LAST_TOUCHPOINT_TYPE", param(Bucket::Entity, "lastTouchpointType")),
    ("LAST_TOUCHPOINT_AT", param(Bucket::Entity, "lastTouchpointAt")),
    ("CREATED_AT", param(Bucket::Entity, "createdAt")),
    ("TAGS", param(Bucket::Tag, "id")),
    ("COUNTRY", param(Bucket::Location, "country")),
    ("REGION", param(Bucket::Location, "region")),
    ("CITY", param(Bucket::Location, "locality")),
    ("LINKEDIN_URL", param(Bucket::Social, "url")),
    ("LINKEDIN_FOLLOWER_COUNT", param(Bucket::Social, "followersCount")),
];

/// The published search vocabulary.
#[must_use]
pub const fn organization_search_params_map() -> &'static [(&'static str, SearchParam)] {
    SEARCH_PARAMS
}

fn lookup(property: &str) -> Option<SearchParam> {
    SEARCH_PARAMS
        .iter()
        .find(|(name, _)| *name == property)
        .map(|(_, param)| *param)
}

/// Predicate and bound parameters for an organization search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub predicate: Option<String>,
    pub params: Vec<(String, Value)>,
}

impl CompiledFilter {
    /// Parameters in the shape [`crate::graph::GraphTx::query`] takes.
    #[must_use]
    pub fn param_refs(&self) -> Vec<(&str, &dyn rusqlite::ToSql)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect()
    }
}

#[derive(Default)]
struct Compiler<'a> {
    tenant: &'a str,
    counters: [usize; 4],
    used: [bool; 4],
    params: Vec<(String, Value)>,
}

impl Compiler<'_> {
    fn bind(&mut self, bucket: Bucket, value: Value) -> String {
        let counter = &mut self.counters[bucket.index()];
        let name = format!(":{}_param_{counter}", bucket.alias());
        *counter += 1;
        self.params.push((name.clone(), value));
        name
    }

    fn compile(&mut self, filter: &Filter) -> Option<String> {
        match filter {
            Filter::And(children) => self.combine(children, " AND "),
            Filter::Or(children) => self.combine(children, " OR "),
            Filter::Not(inner) => self.compile(inner).map(|p| format!("NOT ({p})")),
            Filter::Item(item) => self.item(item),
        }
    }

    fn combine(&mut self, children: &[Filter], joiner: &str) -> Option<String> {
        let parts: Vec<String> = children.iter().filter_map(|c| self.compile(c)).collect();
        match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            _ => Some(format!("({})", parts.join(joiner))),
        }
    }

    fn item(&mut self, item: &FilterItem) -> Option<String> {
        let Some(param) = lookup(&item.property) else {
            debug!(property = %item.property, "unknown search property dropped");
            return None;
        };
        let expr = format!(
            "json_extract({}.props, '$.{}')",
            param.bucket.alias(),
            param.property
        );
        let predicate = self.predicate(param.bucket, &expr, item.operation, &item.value);
        match predicate {
            Some(predicate) => {
                self.used[param.bucket.index()] = true;
                Some(Self::scoped(param.bucket, predicate))
            }
            None => {
                debug!(property = %item.property, operation = ?item.operation, "malformed filter value dropped");
                None
            }
        }
    }

    fn predicate(
        &mut self,
        bucket: Bucket,
        expr: &str,
        operation: Operation,
        value: &FilterValue,
    ) -> Option<String> {
        match (operation, value) {
            (Operation::In, FilterValue::ArrayStr(values)) => {
                let json = serde_json::to_string(values).ok()?;
                let name = self.bind(bucket, Value::Text(json));
                Some(format!("{expr} IN (SELECT value FROM json_each({name}))"))
            }
            (Operation::In, FilterValue::ArrayInt(values)) => {
                let json = serde_json::to_string(values).ok()?;
                let name = self.bind(bucket, Value::Text(json));
                Some(format!("{expr} IN (SELECT value FROM json_each({name}))"))
            }
            (Operation::In, scalar) => self.predicate(bucket, expr, Operation::Eq, scalar),
            (Operation::Between, FilterValue::ArrayInt(bounds)) => match bounds.as_slice() {
                [low, high] => {
                    let low = self.bind(bucket, Value::Integer(*low));
                    let high = self.bind(bucket, Value::Integer(*high));
                    Some(format!("({expr} >= {low} AND {expr} <= {high})"))
                }
                _ => None,
            },
            (Operation::Contains, FilterValue::Str(needle)) => {
                let name = self.bind(bucket, Value::Text(needle.clone()));
                Some(format!("instr(lower({expr}), lower({name})) > 0"))
            }
            (op, scalar) => {
                let comparison = op.comparison()?;
                let bound = match scalar {
                    FilterValue::Str(s) => Value::Text(s.clone()),
                    FilterValue::Int(i) => Value::Integer(*i),
                    FilterValue::Bool(b) => Value::Integer(i64::from(*b)),
                    FilterValue::ArrayInt(_) | FilterValue::ArrayStr(_) => return None,
                };
                let name = self.bind(bucket, bound);
                Some(format!("{expr} {comparison} {name}"))
            }
        }
    }

    /// Hop predicates hold when any node behind the hop matches.
    fn scoped(bucket: Bucket, predicate: String) -> String {
        if bucket.hop().is_none() {
            return predicate;
        }
        let a = bucket.alias();
        format!(
            "EXISTS (SELECT 1 FROM edges {a}_e \
             JOIN nodes {a} ON {a}.node_id = {a}_e.dst \
             JOIN node_labels {a}_nl ON {a}_nl.node_id = {a}.node_id AND {a}_nl.label = :{a}_label \
             WHERE {a}_e.src = o.node_id AND {a}_e.rel_type = :{a}_rel AND {predicate})"
        )
    }

    fn bind_hops(&mut self) {
        for bucket in Bucket::ALL {
            if !self.used[bucket.index()] {
                continue;
            }
            let (Some(rel_type), Some(label)) = (bucket.hop(), bucket.node_label()) else {
                continue;
            };
            let alias = bucket.alias();
            self.params
                .push((format!(":{alias}_rel"), Value::Text(rel_type.to_string())));
            self.params
                .push((format!(":{alias}_label"), Value::Text(tenant_label(label, self.tenant))));
        }
    }
}

/// Compile `filter` against a `tenant` organization aliased `o`.
#[must_use]
pub fn compile_organization_filter(filter: &Filter, tenant: &str) -> CompiledFilter {
    let mut compiler = Compiler {
        tenant,
        ..Compiler::default()
    };
    let predicate = compiler.compile(filter);
    compiler.bind_hops();
    CompiledFilter {
        predicate,
        params: compiler.params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn between_and_tags() -> Filter {
        Filter::And(vec![
            Filter::item("EMPLOYEE_COUNT", Operation::Between, FilterValue::ArrayInt(vec![10, 100])),
            Filter::item(
                "TAGS",
                Operation::In,
                FilterValue::ArrayStr(vec!["t1".into(), "t2".into()]),
            ),
        ])
    }

    #[test]
    fn between_and_tag_membership() {
        let compiled = compile_organization_filter(&between_and_tags(), "ziggy");
        let predicate = compiled.predicate.expect("predicate");
        assert_eq!(
            predicate,
            "((json_extract(o.props, '$.employees') >= :o_param_0 AND \
             json_extract(o.props, '$.employees') <= :o_param_1) AND \
             EXISTS (SELECT 1 FROM edges t_e \
             JOIN nodes t ON t.node_id = t_e.dst \
             JOIN node_labels t_nl ON t_nl.node_id = t.node_id AND t_nl.label = :t_label \
             WHERE t_e.src = o.node_id AND t_e.rel_type = :t_rel AND \
             json_extract(t.props, '$.id') IN (SELECT value FROM json_each(:t_param_0))))"
        );
        assert!(!predicate.contains("nodes l"));
        assert!(!predicate.contains("nodes s"));
        assert_eq!(
            compiled.params,
            vec![
                (":o_param_0".to_string(), Value::Integer(10)),
                (":o_param_1".to_string(), Value::Integer(100)),
                (":t_param_0".to_string(), Value::Text(r#"["t1","t2"]"#.to_string())),
                (":t_rel".to_string(), Value::Text("TAGGED".to_string())),
                (":t_label".to_string(), Value::Text("Tag_ziggy".to_string())),
            ]
        );
    }

    #[test]
    fn unknown_property_is_dropped() {
        let filter = Filter::And(vec![
            Filter::item("NAME); DROP TABLE nodes; --", Operation::Eq, FilterValue::Str("x".into())),
            Filter::item("NAME", Operation::Contains, FilterValue::Str("acme".into())),
        ]);
        let compiled = compile_organization_filter(&filter, "ziggy");
        assert_eq!(
            compiled.predicate.as_deref(),
            Some("instr(lower(json_extract(o.props, '$.name')), lower(:o_param_0)) > 0")
        );
        assert_eq!(compiled.params.len(), 1);
    }

    #[test]
    fn malformed_values_are_dropped() {
        let filter = Filter::Or(vec![
            Filter::item("EMPLOYEE_COUNT", Operation::Between, FilterValue::ArrayInt(vec![1])),
            Filter::item("NAME", Operation::Contains, FilterValue::Int(3)),
            Filter::item("NAME", Operation::Lt, FilterValue::ArrayStr(vec![])),
        ]);
        let compiled = compile_organization_filter(&filter, "ziggy");
        assert!(compiled.predicate.is_none());
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn not_and_or_compose() {
        let filter = Filter::Or(vec![
            Filter::Not(Box::new(Filter::item("IS_CUSTOMER", Operation::Eq, FilterValue::Bool(true)))),
            Filter::item("COUNTRY", Operation::In, FilterValue::Str("DE".into())),
        ]);
        let compiled = compile_organization_filter(&filter, "ziggy");
        let predicate = compiled.predicate.expect("predicate");
        assert!(predicate.starts_with(
            "(NOT (json_extract(o.props, '$.isCustomer') = :o_param_0) OR EXISTS (SELECT 1 FROM edges l_e"
        ));
        assert!(predicate.ends_with("json_extract(l.props, '$.country') = :l_param_0))"));
        assert!(compiled.params.contains(&(
            ":l_label".to_string(),
            Value::Text("Location_ziggy".to_string())
        )));
    }

    #[test]
    fn negated_hop_wraps_the_whole_membership() {
        let filter = Filter::Not(Box::new(Filter::item(
            "LINKEDIN_URL",
            Operation::Contains,
            FilterValue::Str("linkedin".into()),
        )));
        let compiled = compile_organization_filter(&filter, "ziggy");
        let predicate = compiled.predicate.expect("predicate");
        assert!(predicate.starts_with("NOT (EXISTS (SELECT 1 FROM edges s_e"));
        assert!(compiled.params.contains(&(
            ":s_label".to_string(),
            Value::Text("Social_ziggy".to_string())
        )));
    }

    #[test]
    fn vocabulary_names_are_unique() {
        let map = organization_search_params_map();
        for (i, (name, _)) in map.iter().enumerate() {
            assert!(map[i + 1..].iter().all(|(other, _)| other != name), "duplicate {name}");
        }
    }

    proptest! {
        #[test]
        fn caller_text_never_reaches_sql(
            property in "[A-Z_]{1,12}[;'\"][a-z]{1,8}",
            value in "[;'\"][a-zA-Z0-9 %]{1,20}",
        ) {
            let filter = Filter::And(vec![
                Filter::item(&property, Operation::Eq, FilterValue::Str(value.clone())),
                Filter::item("NAME", Operation::Contains, FilterValue::Str(value.clone())),
            ]);
            let compiled = compile_organization_filter(&filter, "ziggy");
            let predicate = compiled.predicate.clone().unwrap_or_default();
            prop_assert!(!predicate.contains(&property));
            prop_assert!(!predicate.contains(&value));
            prop_assert_eq!(compiled.params.len(), 1);
            prop_assert_eq!(&compiled.params[0].1, &Value::Text(value));
        }
    }
}
