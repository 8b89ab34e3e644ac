use tracing::{debug, instrument};

use super::{Change, Deps, HandleOutcome, follow_up_meta, swallow};
use crate::aggregate::Event;
use crate::aggregate::opportunity::OpportunityEvent;
use crate::context::Ctx;
use crate::error::Result;
use crate::repository::{RenewalCreateFields, RenewalUpdateFields};

const ENTITY: &str = "opportunity";

#[derive(Debug, Clone)]
pub struct OpportunityProjector {
    deps: Deps,
}

impl OpportunityProjector {
    pub(crate) const fn new(deps: Deps) -> Self {
        Self { deps }
    }

    #[instrument(level = "debug", skip_all, fields(tenant = %event.tenant(), opportunity_id = %event.object_id()))]
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<HandleOutcome> {
        let payload: OpportunityEvent = event.payload()?;
        let tenant = event.tenant();
        let opportunity_id = event.object_id();
        let opportunities = &self.deps.repos.opportunities;
        let at = event.timestamp;

        let (applied, change) = match &payload {
            OpportunityEvent::CreateRenewal(created) => {
                let data = RenewalCreateFields {
                    contract_id: created.contract_id.clone(),
                    fields: created.fields.clone(),
                    source: created.source.clone(),
                    created_at: Some(created.created_at.unwrap_or(at)),
                    aggregate_version: event.version,
                };
                (
                    opportunities.create_renewal(ctx, None, tenant, opportunity_id, &data)?,
                    Change::Create,
                )
            }
            OpportunityEvent::UpdateRenewal(updated) => {
                let data = RenewalUpdateFields {
                    fields: updated.fields.clone(),
                    source: updated.source.clone(),
                    overwrite: updated.overwrite,
                    updated_at: Some(at),
                    aggregate_version: event.version,
                };
                (
                    opportunities.update_renewal(ctx, None, tenant, opportunity_id, &data)?,
                    Change::Update,
                )
            }
            OpportunityEvent::CloseRenewal(closed) => (
                opportunities.close_renewal(
                    ctx,
                    None,
                    tenant,
                    opportunity_id,
                    closed.won,
                    closed.closed_at.unwrap_or(at),
                    event.version,
                )?,
                Change::Update,
            ),
        };

        if !applied {
            debug!(event_type = %event.event_type, "opportunity event skipped");
            return Ok(HandleOutcome::Skipped);
        }
        self.deps.notify(event, ENTITY, change);
        self.refresh_derived(ctx, event, matches!(payload, OpportunityEvent::CloseRenewal(_)))?;
        Ok(HandleOutcome::Applied)
    }

    /// Ask the owning contract and organization to recompute what depends
    /// on this renewal.
    fn refresh_derived(&self, ctx: &Ctx, event: &Event, closed: bool) -> Result<()> {
        let repos = &self.deps.repos;
        let tenant = event.tenant();
        let Some(contract) =
            repos
                .opportunities
                .get_contract_for_opportunity(ctx, None, tenant, event.object_id())?
        else {
            return Ok(());
        };
        let contract_id = contract.id();
        let meta = follow_up_meta(event);
        let commands = &self.deps.commands;
        if closed {
            swallow(
                commands.refresh_contract_ltv(ctx, &meta, contract_id),
                "refresh_contract_ltv",
                contract_id,
            );
        } else {
            swallow(
                commands.refresh_contract_status(ctx, &meta, contract_id),
                "refresh_contract_status",
                contract_id,
            );
        }

        let Some(organization) =
            repos
                .organization_reads
                .get_for_contract(ctx, None, tenant, contract_id)?
        else {
            return Ok(());
        };
        let organization_id = organization.id();
        swallow(
            commands.refresh_arr(ctx, &meta, organization_id),
            "refresh_arr",
            organization_id,
        );
        swallow(
            commands.refresh_renewal_summary(ctx, &meta, organization_id),
            "refresh_renewal_summary",
            organization_id,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::contract::{Contract, ContractCreated, ContractEvent};
    use crate::aggregate::opportunity::{Opportunity, RenewalClosed, RenewalCreated};
    use crate::aggregate::organization::{Organization, OrganizationCreated, OrganizationEvent};
    use crate::graph::labels::rel;
    use crate::model::opportunity::RenewalFields;
    use crate::projection::test_support::{Harness, event};

    fn setup() -> Harness {
        let harness = Harness::new();
        harness.record(&event::<Organization>(
            "o1",
            1,
            &OrganizationEvent::Create(OrganizationCreated::default()),
        ));
        harness.record(&event::<Contract>(
            "k1",
            1,
            &ContractEvent::Create(ContractCreated {
                organization_id: "o1".into(),
                ..ContractCreated::default()
            }),
        ));
        harness
    }

    fn renewal(id: &str, amount: f64) -> Event {
        event::<Opportunity>(
            id,
            1,
            &OpportunityEvent::CreateRenewal(RenewalCreated {
                contract_id: "k1".into(),
                fields: RenewalFields {
                    amount: Some(amount),
                    ..RenewalFields::default()
                },
                ..RenewalCreated::default()
            }),
        )
    }

    #[test]
    fn second_active_renewal_is_refused() {
        let harness = setup();
        let ctx = Ctx::background();
        assert_eq!(
            harness.handler.handle(&ctx, &renewal("r1", 100.0)).expect("r1"),
            HandleOutcome::Applied
        );
        assert_eq!(
            harness.handler.handle(&ctx, &renewal("r2", 200.0)).expect("r2"),
            HandleOutcome::Skipped
        );
        let active = harness
            .driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_edges(rel::ACTIVE_RENEWAL))
            .expect("count");
        assert_eq!(active, 1);
    }

    #[test]
    fn create_requests_status_and_arr_refresh() {
        let harness = setup();
        let ctx = Ctx::background();
        harness.handler.handle(&ctx, &renewal("r1", 100.0)).expect("r1");
        assert!(
            harness
                .event_types("contract-ziggy-k1")
                .contains(&"V1_CONTRACT_REFRESH_STATUS".to_string())
        );
        assert!(
            harness
                .event_types("organization-ziggy-o1")
                .contains(&"V1_ORGANIZATION_REFRESH_ARR".to_string())
        );
    }

    #[test]
    fn close_requests_ltv_refresh_and_frees_the_contract() {
        let harness = setup();
        let ctx = Ctx::background();
        harness.handler.handle(&ctx, &renewal("r1", 100.0)).expect("r1");
        let close = event::<Opportunity>(
            "r1",
            2,
            &OpportunityEvent::CloseRenewal(RenewalClosed {
                won: true,
                closed_at: None,
            }),
        );
        assert_eq!(
            harness.handler.handle(&ctx, &close).expect("close"),
            HandleOutcome::Applied
        );
        assert!(
            harness
                .event_types("contract-ziggy-k1")
                .contains(&"V1_CONTRACT_REFRESH_LTV".to_string())
        );
        assert_eq!(
            harness.handler.handle(&ctx, &renewal("r2", 200.0)).expect("r2"),
            HandleOutcome::Applied
        );
        let won = harness
            .repos
            .opportunities
            .closed_won_amount_for_contract(&ctx, None, "ziggy", "k1")
            .expect("ltv");
        assert!((won - 100.0).abs() < f64::EPSILON);
    }
}
