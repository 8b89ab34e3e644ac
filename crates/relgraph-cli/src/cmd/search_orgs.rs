use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use relgraph_core::Ctx;
use relgraph_core::filter::Filter;
use relgraph_core::repository::OrganizationSort;
use serde_json::json;

use crate::app::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    Name,
    CreatedAt,
    Employees,
    ForecastArr,
    RenewalDate,
}

impl SortKey {
    const fn with_direction(self, descending: bool) -> OrganizationSort {
        match self {
            Self::Name => OrganizationSort::Name { descending },
            Self::CreatedAt => OrganizationSort::CreatedAt { descending },
            Self::Employees => OrganizationSort::Employees { descending },
            Self::ForecastArr => OrganizationSort::ForecastArr { descending },
            Self::RenewalDate => OrganizationSort::RenewalDate { descending },
        }
    }
}

#[derive(Args, Debug)]
pub struct SearchOrgsArgs {
    pub tenant: String,

    /// Filter tree as JSON, e.g. {"Filter":{"Property":"NAME","Operation":"CONTAINS","Value":"acme"}}.
    #[arg(long)]
    pub filter: Option<String>,

    #[arg(long, value_enum)]
    pub sort: Option<SortKey>,

    /// Sort descending.
    #[arg(long)]
    pub desc: bool,

    #[arg(long, default_value_t = 0)]
    pub skip: u32,

    #[arg(long, default_value_t = 25)]
    pub limit: u32,
}

pub fn run(app: &App, ctx: &Ctx, args: &SearchOrgsArgs, json: bool) -> Result<()> {
    let filter: Option<Filter> = args
        .filter
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("Failed to parse --filter")?;
    let sort = args.sort.map(|key| key.with_direction(args.desc));
    let (ids, total) = app.repositories().organization_filters.get_filtered_organization_ids(
        ctx,
        None,
        &args.tenant,
        filter.as_ref(),
        sort,
        args.skip,
        args.limit,
    )?;

    let value = json!({ "ids": ids, "total": total });
    super::emit(json, &value, || {
        let mut lines = ids.clone();
        lines.push(format!("({} of {total})", ids.len()));
        lines.join("\n")
    })
}
