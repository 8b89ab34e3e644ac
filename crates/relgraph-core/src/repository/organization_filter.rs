use tracing::instrument;

use crate::context::Ctx;
use crate::error::Result;
use crate::filter::{Filter, compile_organization_filter};
use crate::graph::labels::{ORGANIZATION, tenant_label};
use crate::graph::{GraphDriver, GraphTx, extract};

/// Sortable organization columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationSort {
    Name { descending: bool },
    CreatedAt { descending: bool },
    Employees { descending: bool },
    ForecastArr { descending: bool },
    RenewalDate { descending: bool },
}

impl OrganizationSort {
    const fn sql_clause(self) -> &'static str {
        match self {
            Self::Name { descending: false } => "ORDER BY lower(json_extract(o.props, '$.name')) ASC, o.entity_id ASC",
            Self::Name { descending: true } => "ORDER BY lower(json_extract(o.props, '$.name')) DESC, o.entity_id ASC",
            Self::CreatedAt { descending: false } => "ORDER BY json_extract(o.props, '$.createdAt') ASC, o.entity_id ASC",
            Self::CreatedAt { descending: true } => "ORDER BY json_extract(o.props, '$.createdAt') DESC, o.entity_id ASC",
            Self::Employees { descending: false } => "ORDER BY json_extract(o.props, '$.employees') ASC, o.entity_id ASC",
            Self::Employees { descending: true } => "ORDER BY json_extract(o.props, '$.employees') DESC, o.entity_id ASC",
            Self::ForecastArr { descending: false } => "ORDER BY json_extract(o.props, '$.renewalForecastArr') ASC, o.entity_id ASC",
            Self::ForecastArr { descending: true } => "ORDER BY json_extract(o.props, '$.renewalForecastArr') DESC, o.entity_id ASC",
            Self::RenewalDate { descending: false } => "ORDER BY json_extract(o.props, '$.derivedNextRenewalAt') ASC, o.entity_id ASC",
            Self::RenewalDate { descending: true } => "ORDER BY json_extract(o.props, '$.derivedNextRenewalAt') DESC, o.entity_id ASC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrganizationWithFiltersReadRepository {
    driver: GraphDriver,
}

impl OrganizationWithFiltersReadRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Ids of visible organizations matching `filter`, one page at a time,
    /// together with the total number of matches.
    #[instrument(level = "debug", skip(self, ctx, tx, filter))]
    pub fn get_filtered_organization_ids(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        filter: Option<&Filter>,
        sort: Option<OrganizationSort>,
        skip: u32,
        limit: u32,
    ) -> Result<(Vec<String>, i64)> {
        let compiled = filter
            .map(|filter| compile_organization_filter(filter, tenant))
            .unwrap_or_default();
        let predicate = compiled
            .predicate
            .as_deref()
            .map_or_else(String::new, |p| format!(" AND {p}"));
        let base = format!(
            "FROM nodes o
             JOIN node_labels ol ON ol.node_id = o.node_id AND ol.label = :org_label
             WHERE COALESCE(json_extract(o.props, '$.hide'), 0) = 0{predicate}"
        );
        let order = sort.map_or("ORDER BY o.entity_id ASC", OrganizationSort::sql_clause);
        let page_sql = format!(
            "SELECT o.entity_id FROM (SELECT DISTINCT o.node_id AS node_id {base}) matched
             JOIN nodes o ON o.node_id = matched.node_id
             {order} LIMIT :limit OFFSET :skip"
        );
        let count_sql = format!("SELECT COUNT(DISTINCT o.node_id) {base}");

        let org_label = tenant_label(ORGANIZATION, tenant);
        let limit = i64::from(limit);
        let skip = i64::from(skip);

        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let mut params = compiled.param_refs();
            params.push((":org_label", &org_label));
            let total: i64 =
                extract::single_record_first_value_as(&tx.query(&count_sql, &params)?)?
                    .unwrap_or(0);

            params.push((":limit", &limit));
            params.push((":skip", &skip));
            let ids = extract::all_records_as_string_list(&tx.query(&page_sql, &params)?)?;
            Ok((ids, total))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterValue, Operation};
    use crate::graph::labels::{EMAIL, SOCIAL, TAG, rel, scoped_labels};
    use crate::graph::{PropertyPatch, Props};
    use crate::repository::TenantRepository;
    use serde_json::json;

    fn seed(driver: &GraphDriver, ctx: &Ctx) {
        TenantRepository::new(driver.clone()).create(ctx, None, "ziggy").expect("tenant");
        driver
            .execute_write_in_transaction(ctx, None, |tx| {
                let t1 = tx.create_node(&scoped_labels(TAG, "ziggy"), &props(json!({"id": "t1"})))?;
                let orgs = [
                    ("o1", "Acme", 50, Some(t1), false),
                    ("o2", "Bolt", 5, Some(t1), false),
                    ("o3", "Crane", 70, None, false),
                    ("o4", "Delta", 60, Some(t1), true),
                ];
                for (id, name, employees, tag, hide) in orgs {
                    let node = tx.create_node(
                        &scoped_labels(ORGANIZATION, "ziggy"),
                        &props(json!({"id": id})),
                    )?;
                    tx.patch_node(
                        node,
                        &PropertyPatch::new()
                            .set("name", name)
                            .set("employees", employees)
                            .set("hide", hide),
                    )?;
                    if let Some(tag) = tag {
                        tx.create_edge(node, rel::TAGGED, tag, &Props::new())?;
                    }
                }
                let other = tx.create_node(
                    &scoped_labels(ORGANIZATION, "other"),
                    &props(json!({"id": "x1", "employees": 50})),
                )?;
                tx.create_edge(other, rel::TAGGED, t1, &Props::new())?;
                Ok(())
            })
            .expect("seed");
    }

    fn props(value: serde_json::Value) -> Props {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Props::new(),
        }
    }

    #[test]
    fn filter_by_employee_range_and_tags() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        seed(&driver, &ctx);
        let repo = OrganizationWithFiltersReadRepository::new(driver);

        let filter = Filter::And(vec![
            Filter::item("EMPLOYEE_COUNT", Operation::Between, FilterValue::ArrayInt(vec![10, 100])),
            Filter::item("TAGS", Operation::In, FilterValue::ArrayStr(vec!["t1".into(), "t2".into()])),
        ]);
        let (ids, total) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", Some(&filter), None, 0, 10)
            .expect("search");
        assert_eq!(ids, vec!["o1"]);
        assert_eq!(total, 1);
    }

    #[test]
    fn unfiltered_search_pages_and_sorts() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        seed(&driver, &ctx);
        let repo = OrganizationWithFiltersReadRepository::new(driver);

        let sort = Some(OrganizationSort::Employees { descending: true });
        let (ids, total) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", None, sort, 0, 2)
            .expect("search");
        assert_eq!(total, 3);
        assert_eq!(ids, vec!["o3", "o1"]);

        let (ids, _) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", None, sort, 2, 2)
            .expect("search");
        assert_eq!(ids, vec!["o2"]);
    }

    #[test]
    fn unknown_properties_do_not_filter() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        seed(&driver, &ctx);
        let repo = OrganizationWithFiltersReadRepository::new(driver);
        let filter = Filter::item("OWNER'; --", Operation::Eq, FilterValue::Str("x".into()));
        let (_, total) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", Some(&filter), None, 0, 10)
            .expect("search");
        assert_eq!(total, 3);
    }

    fn seed_memberships(driver: &GraphDriver, ctx: &Ctx) {
        TenantRepository::new(driver.clone()).create(ctx, None, "ziggy").expect("tenant");
        driver
            .execute_write_in_transaction(ctx, None, |tx| {
                let t1 = tx.create_node(&scoped_labels(TAG, "ziggy"), &props(json!({"id": "t1"})))?;
                let t2 = tx.create_node(&scoped_labels(TAG, "ziggy"), &props(json!({"id": "t2"})))?;
                let orgs = [("o1", vec![t1, t2]), ("o2", vec![t2]), ("o3", vec![])];
                let mut nodes = Vec::new();
                for (id, tags) in orgs {
                    let node = tx.create_node(
                        &scoped_labels(ORGANIZATION, "ziggy"),
                        &props(json!({"id": id})),
                    )?;
                    for tag in tags {
                        tx.create_edge(node, rel::TAGGED, tag, &Props::new())?;
                    }
                    nodes.push(node);
                }
                let email = tx.create_node(
                    &scoped_labels(EMAIL, "ziggy"),
                    &props(json!({"id": "e1", "url": "linkedin.com/in/ada"})),
                )?;
                tx.create_edge(nodes[0], rel::HAS, email, &Props::new())?;
                let social = tx.create_node(
                    &scoped_labels(SOCIAL, "ziggy"),
                    &props(json!({"id": "s1", "url": "linkedin.com/company/bolt"})),
                )?;
                tx.create_edge(nodes[1], rel::HAS, social, &Props::new())?;
                Ok(())
            })
            .expect("seed");
    }

    #[test]
    fn negated_tag_excludes_every_organization_carrying_it() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        seed_memberships(&driver, &ctx);
        let repo = OrganizationWithFiltersReadRepository::new(driver);

        let filter = Filter::Not(Box::new(Filter::item(
            "TAGS",
            Operation::In,
            FilterValue::ArrayStr(vec!["t1".into()]),
        )));
        let (ids, total) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", Some(&filter), None, 0, 10)
            .expect("search");
        assert_eq!(ids, vec!["o2", "o3"]);
        assert_eq!(total, 2);
    }

    #[test]
    fn both_tags_required_across_separate_memberships() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        seed_memberships(&driver, &ctx);
        let repo = OrganizationWithFiltersReadRepository::new(driver);

        let filter = Filter::And(vec![
            Filter::item("TAGS", Operation::In, FilterValue::ArrayStr(vec!["t1".into()])),
            Filter::item("TAGS", Operation::In, FilterValue::ArrayStr(vec!["t2".into()])),
        ]);
        let (ids, _) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", Some(&filter), None, 0, 10)
            .expect("search");
        assert_eq!(ids, vec!["o1"]);
    }

    #[test]
    fn social_predicates_ignore_other_owned_nodes() {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        seed_memberships(&driver, &ctx);
        let repo = OrganizationWithFiltersReadRepository::new(driver);

        let filter = Filter::item(
            "LINKEDIN_URL",
            Operation::Contains,
            FilterValue::Str("linkedin".into()),
        );
        let (ids, total) = repo
            .get_filtered_organization_ids(&ctx, None, "ziggy", Some(&filter), None, 0, 10)
            .expect("search");
        assert_eq!(ids, vec!["o2"]);
        assert_eq!(total, 1);
    }
}
