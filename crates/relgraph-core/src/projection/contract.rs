use chrono::{DateTime, Months, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{Change, Deps, HandleOutcome, follow_up_meta, swallow};
use crate::aggregate::Event;
use crate::aggregate::contract::ContractEvent;
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::Node;
use crate::model::contract::{BillingCycle, ContractStatus, ContractTerms, derive_contract_status};
use crate::model::now;
use crate::model::opportunity::RenewalFields;
use crate::model::organization::OnboardingStatus;
use crate::repository::{ActionRecord, ContractCreateFields, ContractUpdateFields, LinkedEntity};

const ENTITY: &str = "contract";

/// Action type recorded on every contract status transition.
pub const CONTRACT_STATUS_UPDATED: &str = "CONTRACT_STATUS_UPDATED";

#[derive(Debug, Clone)]
pub struct ContractProjector {
    deps: Deps,
}

impl ContractProjector {
    pub(crate) const fn new(deps: Deps) -> Self {
        Self { deps }
    }

    #[instrument(level = "debug", skip_all, fields(tenant = %event.tenant(), contract_id = %event.object_id()))]
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<HandleOutcome> {
        let payload: ContractEvent = event.payload()?;
        let tenant = event.tenant();
        let contract_id = event.object_id();
        let repos = &self.deps.repos;
        let at = event.timestamp;

        match &payload {
            ContractEvent::Create(created) => {
                let data = ContractCreateFields {
                    organization_id: created.organization_id.clone(),
                    created_by_user_id: created.created_by_user_id.clone(),
                    fields: created.fields.clone(),
                    source: created.source.clone(),
                    created_at: Some(created.created_at.unwrap_or(at)),
                    updated_at: Some(at),
                    aggregate_version: event.version,
                };
                let applied = self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
                    let applied = repos.contracts.create_for_organization(
                        ctx,
                        Some(tx),
                        tenant,
                        contract_id,
                        &data,
                    )?;
                    self.deps.link_external_system(
                        ctx,
                        tx,
                        event,
                        LinkedEntity::Contract,
                        created.external_system.as_ref(),
                    )?;
                    Ok(applied)
                })?;
                if !applied {
                    return Ok(skipped(event));
                }
                self.deps.notify(event, ENTITY, Change::Create);
                self.after_change(ctx, event)?;
            }
            ContractEvent::Update(updated) => {
                let data = ContractUpdateFields {
                    fields: updated.fields.clone(),
                    source: updated.source.clone(),
                    overwrite: updated.overwrite,
                    updated_at: Some(at),
                    aggregate_version: event.version,
                };
                let applied = self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
                    let applied =
                        repos.contracts.update_contract(ctx, Some(tx), tenant, contract_id, &data)?;
                    self.deps.link_external_system(
                        ctx,
                        tx,
                        event,
                        LinkedEntity::Contract,
                        updated.external_system.as_ref(),
                    )?;
                    Ok(applied)
                })?;
                if !applied {
                    return Ok(skipped(event));
                }
                self.deps.notify(event, ENTITY, Change::Update);
                self.after_change(ctx, event)?;
            }
            ContractEvent::RolloutRenewalRequested(_) => {
                repos
                    .contracts
                    .mark_rollout_renewal_requested(ctx, None, tenant, contract_id, at)?;
                self.rollout_renewal(ctx, event)?;
                self.deps.notify(event, ENTITY, Change::Update);
            }
            ContractEvent::RefreshStatus(_) => {
                if repos.contract_reads.get_by_id(ctx, None, tenant, contract_id)?.is_none() {
                    return Ok(skipped(event));
                }
                self.after_change(ctx, event)?;
                self.deps.notify(event, ENTITY, Change::Update);
            }
            ContractEvent::RefreshLtv(_) => {
                let ltv =
                    repos
                        .opportunities
                        .closed_won_amount_for_contract(ctx, None, tenant, contract_id)?;
                repos.contracts.set_ltv(ctx, None, tenant, contract_id, ltv)?;
                debug!(ltv, "contract LTV recomputed");
                self.deps.notify(event, ENTITY, Change::Update);
            }
            ContractEvent::SoftDelete(_) => {
                let organization = repos
                    .organization_reads
                    .get_for_contract(ctx, None, tenant, contract_id)?;
                if !repos.contracts.soft_delete(ctx, None, tenant, contract_id, at)? {
                    return Ok(skipped(event));
                }
                self.deps.notify(event, ENTITY, Change::Delete);
                if let Some(organization) = organization {
                    self.refresh_organization(ctx, event, organization.id());
                }
            }
        }
        Ok(HandleOutcome::Applied)
    }

    /// Reconcile the derived status, then refresh the organization.
    fn after_change(&self, ctx: &Ctx, event: &Event) -> Result<()> {
        let organization = self.deps.repos.organization_reads.get_for_contract(
            ctx,
            None,
            event.tenant(),
            event.object_id(),
        )?;
        let organization_id = organization.as_ref().map(Node::id).unwrap_or_default();
        self.reconcile_status(ctx, event, organization_id)?;
        if !organization_id.is_empty() {
            self.refresh_organization(ctx, event, organization_id);
        }
        Ok(())
    }

    fn refresh_organization(&self, ctx: &Ctx, event: &Event, organization_id: &str) {
        let meta = follow_up_meta(event);
        let commands = &self.deps.commands;
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
    }

    /// Write the status derived from the current graph when it changed.
    fn reconcile_status(&self, ctx: &Ctx, event: &Event, organization_id: &str) -> Result<()> {
        let repos = &self.deps.repos;
        let tenant = event.tenant();
        let contract_id = event.object_id();
        let Some(contract) = repos.contract_reads.get_by_id(ctx, None, tenant, contract_id)? else {
            return Ok(());
        };
        let renewal_at = repos
            .opportunities
            .get_active_renewal_for_contract(ctx, None, tenant, contract_id)?
            .and_then(|renewal| renewal.time("renewedAt"));
        let previous = contract
            .str("status")
            .and_then(|status| status.parse::<ContractStatus>().ok());
        let status = derive_contract_status(&terms_of(&contract), renewal_at, now());

        if previous != Some(status) {
            info!(
                contract_id,
                from = previous.map_or("", ContractStatus::as_str),
                to = status.as_str(),
                "contract status changed"
            );
            let action = status_action(event, previous, status, organization_id)?;
            self.deps.driver.execute_write_in_transaction(ctx, None, |tx| {
                repos
                    .contracts
                    .update_status(ctx, Some(tx), tenant, contract_id, status, event.timestamp)?;
                repos.actions.create(ctx, Some(tx), tenant, &action)?;
                if status == ContractStatus::Ended {
                    repos
                        .contracts
                        .suspend_active_renewal_opportunity(ctx, Some(tx), tenant, contract_id)?;
                } else if previous == Some(ContractStatus::Ended) {
                    repos
                        .contracts
                        .activate_suspended_renewal_opportunity(ctx, Some(tx), tenant, contract_id)?;
                }
                Ok(())
            })?;
        }

        let already_triggered = contract
            .bool("triggeredOnboardingStatusChange")
            .unwrap_or(false);
        if status == ContractStatus::Live && !already_triggered && !organization_id.is_empty() {
            self.trigger_onboarding(ctx, event, organization_id)?;
        }

        if !organization_id.is_empty() {
            swallow(
                self.deps.commands.refresh_last_touchpoint(
                    ctx,
                    &follow_up_meta(event),
                    organization_id,
                ),
                "refresh_last_touchpoint",
                organization_id,
            );
        }
        Ok(())
    }

    /// First transition to LIVE moves a not-applicable onboarding to
    /// NOT_STARTED, once per contract.
    fn trigger_onboarding(&self, ctx: &Ctx, event: &Event, organization_id: &str) -> Result<()> {
        let repos = &self.deps.repos;
        let tenant = event.tenant();
        let contract_id = event.object_id();
        repos
            .contracts
            .set_triggered_onboarding_status_change(ctx, None, tenant, contract_id)?;
        let onboarding = repos
            .organization_reads
            .get_by_id(ctx, None, tenant, organization_id)?
            .and_then(|organization| {
                organization
                    .str("onboardingStatus")
                    .and_then(|status| status.parse::<OnboardingStatus>().ok())
            });
        if onboarding == Some(OnboardingStatus::NotApplicable) {
            swallow(
                self.deps.commands.update_onboarding_status(
                    ctx,
                    &follow_up_meta(event),
                    organization_id,
                    OnboardingStatus::NotStarted,
                    "",
                    Some(contract_id),
                ),
                "update_onboarding_status",
                organization_id,
            );
        }
        Ok(())
    }

    /// Close an expired active renewal as won and open the next one.
    fn rollout_renewal(&self, ctx: &Ctx, event: &Event) -> Result<()> {
        let repos = &self.deps.repos;
        let tenant = event.tenant();
        let contract_id = event.object_id();
        let Some(contract) = repos.contract_reads.get_by_id(ctx, None, tenant, contract_id)? else {
            return Ok(());
        };
        let Some(renewal) = repos
            .opportunities
            .get_active_renewal_for_contract(ctx, None, tenant, contract_id)?
        else {
            debug!("no active renewal to roll out");
            return Ok(());
        };
        let Some(renewed_at) = renewal.time("renewedAt").filter(|at| *at <= now()) else {
            debug!("active renewal not yet due");
            return Ok(());
        };
        let Some(next_renewal_at) = next_renewal_date(&contract, renewed_at) else {
            debug!("contract does not renew");
            return Ok(());
        };

        let meta = follow_up_meta(event);
        let commands = &self.deps.commands;
        if let Err(err) = commands.close_renewal_opportunity(ctx, &meta, renewal.id(), true) {
            warn!(error = %err, renewal = renewal.id(), "closing due renewal failed");
            return Ok(());
        }
        let fields = RenewalFields {
            name: renewal.str("name").map(str::to_string),
            amount: renewal.f64("amount"),
            max_amount: renewal.f64("maxAmount"),
            renewed_at: Some(next_renewal_at),
            renewal_likelihood: renewal
                .str("renewalLikelihood")
                .and_then(|likelihood| likelihood.parse().ok()),
            currency: renewal.str("currency").map(str::to_string),
            ..RenewalFields::default()
        };
        match commands.create_renewal_opportunity(ctx, &meta, contract_id, &fields) {
            Ok(next_id) => info!(
                closed = renewal.id(),
                opened = %next_id,
                renewed_at = %next_renewal_at,
                "renewal opportunity rolled out"
            ),
            Err(err) => warn!(error = %err, closed = renewal.id(), "opening next renewal failed"),
        }
        Ok(())
    }
}

fn skipped(event: &Event) -> HandleOutcome {
    debug!(event_type = %event.event_type, "contract event skipped");
    HandleOutcome::Skipped
}

fn terms_of(contract: &Node) -> ContractTerms {
    ContractTerms {
        service_started_at: contract.time("serviceStartedAt"),
        ended_at: contract.time("endedAt"),
        auto_renew: contract.bool("autoRenew").unwrap_or(false),
        approved: contract.bool("approved").unwrap_or(false),
    }
}

/// One billing cycle after `from`, falling back to the contract length.
fn next_renewal_date(contract: &Node, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let by_cycle = contract
        .str("billingCycle")
        .and_then(|cycle| cycle.parse::<BillingCycle>().ok())
        .and_then(|cycle| cycle.next_after(from));
    by_cycle.or_else(|| {
        contract
            .i64("lengthInMonths")
            .filter(|months| *months > 0)
            .and_then(|months| u32::try_from(months).ok())
            .and_then(|months| from.checked_add_months(Months::new(months)))
    })
}

fn status_action(
    event: &Event,
    previous: Option<ContractStatus>,
    status: ContractStatus,
    organization_id: &str,
) -> Result<ActionRecord> {
    let contract_id = event.object_id();
    let mut targets = vec![(LinkedEntity::Contract, contract_id.to_string())];
    if !organization_id.is_empty() {
        targets.push((LinkedEntity::Organization, organization_id.to_string()));
    }
    let metadata = json!({
        "status": status.as_str(),
        "previousStatus": previous.map(ContractStatus::as_str),
        "contractId": contract_id,
    });
    Ok(ActionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        action_type: CONTRACT_STATUS_UPDATED.to_string(),
        content: format!("Contract status changed to {status}"),
        metadata: serde_json::to_string(&metadata)?,
        app_source: event.metadata.app.clone(),
        created_at: event.timestamp,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SubsecRound};

    use super::*;
    use crate::aggregate::contract::{Contract, ContractCreated, ContractUpdated};
    use crate::aggregate::opportunity::{Opportunity, OpportunityEvent, RenewalCreated};
    use crate::aggregate::organization::{Organization, OrganizationCreated, OrganizationEvent};
    use crate::aggregate::{Aggregate, EventMetadata};
    use crate::aggregate::payload::Marker;
    use crate::eventstore::EventStore;
    use crate::graph::labels::{ACTION, rel};
    use crate::model::contract::ContractFields;
    use crate::model::source::Source;
    use crate::projection::test_support::{Harness, event};

    fn organization(harness: &Harness, id: &str) {
        harness.record(&event::<Organization>(
            id,
            1,
            &OrganizationEvent::Create(OrganizationCreated {
                source: Source::new("hubspot", "sync"),
                ..OrganizationCreated::default()
            }),
        ));
    }

    fn contract(harness: &Harness, id: &str, fields: ContractFields) -> HandleOutcome {
        harness.record(&event::<Contract>(
            id,
            1,
            &ContractEvent::Create(ContractCreated {
                organization_id: "o1".into(),
                fields,
                source: Source::new("hubspot", "sync"),
                ..ContractCreated::default()
            }),
        ))
    }

    fn started(days_ago: i64) -> ContractFields {
        ContractFields {
            service_started_at: Some(now() - Duration::days(days_ago)),
            billing_cycle: Some(BillingCycle::Monthly),
            ..ContractFields::default()
        }
    }

    fn status(harness: &Harness, id: &str) -> Option<String> {
        harness
            .repos
            .contract_reads
            .get_by_id(&Ctx::background(), None, "ziggy", id)
            .expect("read")
            .and_then(|contract| contract.str("status").map(str::to_string))
    }

    #[test]
    fn contract_without_organization_is_skipped() {
        let harness = Harness::new();
        assert_eq!(contract(&harness, "k1", started(1)), HandleOutcome::Skipped);
        assert!(harness.sink.take().is_empty());
    }

    #[test]
    fn first_live_status_records_action_and_triggers_onboarding() {
        let harness = Harness::new();
        organization(&harness, "o1");
        assert_eq!(contract(&harness, "k1", started(10)), HandleOutcome::Applied);
        assert_eq!(status(&harness, "k1").as_deref(), Some("LIVE"));

        let ctx = Ctx::background();
        let (actions, action_edges) = harness
            .driver
            .execute_read_in_transaction(&ctx, None, |tx| {
                Ok((tx.count_label(ACTION)?, tx.count_edges(rel::ACTION_ON)?))
            })
            .expect("count");
        assert_eq!((actions, action_edges), (1, 2));

        let org_events = harness.event_types("organization-ziggy-o1");
        assert!(org_events.contains(&"V1_ORGANIZATION_UPDATE_ONBOARDING_STATUS".to_string()));
        assert!(org_events.contains(&"V1_ORGANIZATION_REFRESH_ARR".to_string()));
        assert!(org_events.contains(&"V1_ORGANIZATION_REFRESH_RENEWAL_SUMMARY".to_string()));

        let flagged = harness
            .repos
            .contract_reads
            .get_by_id(&ctx, None, "ziggy", "k1")
            .expect("read")
            .and_then(|contract| contract.bool("triggeredOnboardingStatusChange"));
        assert_eq!(flagged, Some(true));
    }

    #[test]
    fn unchanged_status_writes_no_new_action() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        organization(&harness, "o1");
        contract(&harness, "k1", started(10));
        harness
            .handler
            .handle(
                &ctx,
                &event::<Contract>(
                    "k1",
                    2,
                    &ContractEvent::Update(ContractUpdated {
                        fields: ContractFields {
                            name: Some("Support".into()),
                            ..ContractFields::default()
                        },
                        source: "hubspot".into(),
                        ..ContractUpdated::default()
                    }),
                ),
            )
            .expect("update");
        let actions = harness
            .driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_label(ACTION))
            .expect("count");
        assert_eq!(actions, 1);
    }

    #[test]
    fn ending_a_contract_suspends_its_renewal() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        organization(&harness, "o1");
        contract(&harness, "k1", started(30));
        harness
            .handler
            .handle(
                &ctx,
                &event::<Opportunity>(
                    "r1",
                    1,
                    &OpportunityEvent::CreateRenewal(RenewalCreated {
                        contract_id: "k1".into(),
                        fields: RenewalFields {
                            amount: Some(100.0),
                            renewed_at: Some(now() + Duration::days(30)),
                            ..RenewalFields::default()
                        },
                        ..RenewalCreated::default()
                    }),
                ),
            )
            .expect("renewal");

        harness
            .handler
            .handle(
                &ctx,
                &event::<Contract>(
                    "k1",
                    2,
                    &ContractEvent::Update(ContractUpdated {
                        fields: ContractFields {
                            ended_at: Some(now() - Duration::days(1)),
                            ..ContractFields::default()
                        },
                        source: "hubspot".into(),
                        ..ContractUpdated::default()
                    }),
                ),
            )
            .expect("end");
        assert_eq!(status(&harness, "k1").as_deref(), Some("ENDED"));
        let (active, suspended) = harness
            .driver
            .execute_read_in_transaction(&ctx, None, |tx| {
                Ok((
                    tx.count_edges(rel::ACTIVE_RENEWAL)?,
                    tx.count_edges(rel::SUSPENDED_RENEWAL)?,
                ))
            })
            .expect("count");
        assert_eq!((active, suspended), (0, 1));
    }

    #[test]
    fn rollout_closes_due_renewal_and_opens_the_next() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        organization(&harness, "o1");
        contract(&harness, "k1", started(40));
        let due = (now() - Duration::days(1)).trunc_subsecs(0);
        harness
            .handler
            .handle(
                &ctx,
                &event::<Opportunity>(
                    "r1",
                    1,
                    &OpportunityEvent::CreateRenewal(RenewalCreated {
                        contract_id: "k1".into(),
                        fields: RenewalFields {
                            amount: Some(250.0),
                            renewed_at: Some(due),
                            ..RenewalFields::default()
                        },
                        ..RenewalCreated::default()
                    }),
                ),
            )
            .expect("renewal");

        harness
            .handler
            .handle(
                &ctx,
                &event::<Contract>("k1", 2, &ContractEvent::RolloutRenewalRequested(Marker {})),
            )
            .expect("rollout");

        assert!(
            harness
                .event_types("opportunity-ziggy-r1")
                .contains(&"V1_OPPORTUNITY_CLOSE_RENEWAL".to_string())
        );
        let created: Vec<_> = harness
            .events
            .read_all(&ctx, 0, 1000)
            .expect("read all")
            .into_iter()
            .filter(|recorded| recorded.event.event_type == "V1_OPPORTUNITY_CREATE_RENEWAL")
            .collect();
        assert_eq!(created.len(), 1);
        let payload: OpportunityEvent = created[0].event.payload().expect("payload");
        let OpportunityEvent::CreateRenewal(renewal) = payload else {
            panic!("unexpected payload");
        };
        assert_eq!(renewal.contract_id, "k1");
        assert_eq!(renewal.fields.amount, Some(250.0));
        assert_eq!(
            renewal.fields.renewed_at,
            BillingCycle::Monthly.next_after(due)
        );
    }

    #[test]
    fn next_renewal_falls_back_to_contract_length() {
        let node = |props: serde_json::Value| Node {
            node_id: 1,
            labels: vec!["Contract".into()],
            props: props.as_object().cloned().unwrap_or_default(),
        };
        let from = now();
        assert_eq!(
            next_renewal_date(&node(json!({"lengthInMonths": 12})), from),
            from.checked_add_months(Months::new(12))
        );
        assert_eq!(
            next_renewal_date(&node(json!({"billingCycle": "QUARTERLY", "lengthInMonths": 12})), from),
            from.checked_add_months(Months::new(3))
        );
        assert!(next_renewal_date(&node(json!({})), from).is_none());
    }

    #[test]
    fn failed_rollout_request_keeps_the_mark_and_the_event() {
        let harness = Harness::new();
        let ctx = Ctx::background();
        organization(&harness, "o1");
        contract(&harness, "k1", started(40));
        let due = (now() - Duration::days(1)).trunc_subsecs(0);
        harness
            .handler
            .handle(
                &ctx,
                &event::<Opportunity>(
                    "r1",
                    1,
                    &OpportunityEvent::CreateRenewal(RenewalCreated {
                        contract_id: "k1".into(),
                        fields: RenewalFields {
                            renewed_at: Some(due),
                            ..RenewalFields::default()
                        },
                        ..RenewalCreated::default()
                    }),
                ),
            )
            .expect("renewal");
        harness
            .events
            .append(
                &ctx,
                "opportunity-ziggy-r1",
                0,
                &[Event {
                    aggregate_id: "opportunity-ziggy-r1".into(),
                    aggregate_type: Opportunity::TYPE.into(),
                    event_type: "V1_OPPORTUNITY_RETIRED".into(),
                    version: 1,
                    timestamp: now(),
                    data: json!({}),
                    metadata: EventMetadata::default(),
                }],
            )
            .expect("unreadable stream");

        assert_eq!(
            harness
                .handler
                .handle(
                    &ctx,
                    &event::<Contract>("k1", 2, &ContractEvent::RolloutRenewalRequested(Marker {})),
                )
                .expect("rollout"),
            HandleOutcome::Applied
        );
        let marked = harness
            .repos
            .contract_reads
            .get_by_id(&ctx, None, "ziggy", "k1")
            .expect("read")
            .and_then(|contract| contract.time("techRolloutRenewalRequestedAt"));
        assert!(marked.is_some());
        let opened = harness
            .events
            .read_all(&ctx, 0, 1000)
            .expect("read all")
            .into_iter()
            .filter(|recorded| recorded.event.event_type == "V1_OPPORTUNITY_CREATE_RENEWAL")
            .count();
        assert_eq!(opened, 0);
    }
}
