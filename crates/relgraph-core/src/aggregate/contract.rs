//! Contract aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::Marker;
use super::{Aggregate, DomainEvent, EventMetadata, update_hash};
use crate::error::Result;
use crate::model::contract::ContractFields;
use crate::model::satellite::{ExternalSystem, upsert_external_system};
use crate::model::source::{Source, SourceRule};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractCreated {
    pub organization_id: String,
    pub created_by_user_id: String,
    pub fields: ContractFields,
    pub source: Source,
    pub external_system: Option<ExternalSystem>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractUpdated {
    pub fields: ContractFields,
    pub source: String,
    pub overwrite: bool,
    pub external_system: Option<ExternalSystem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum ContractEvent {
    #[serde(rename = "V1_CONTRACT_CREATE")]
    Create(ContractCreated),
    #[serde(rename = "V1_CONTRACT_UPDATE")]
    Update(ContractUpdated),
    #[serde(rename = "V1_CONTRACT_ROLLOUT_RENEWAL_OPPORTUNITY")]
    RolloutRenewalRequested(Marker),
    #[serde(rename = "V1_CONTRACT_REFRESH_STATUS")]
    RefreshStatus(Marker),
    #[serde(rename = "V1_CONTRACT_REFRESH_LTV")]
    RefreshLtv(Marker),
    #[serde(rename = "V1_CONTRACT_DELETE")]
    SoftDelete(Marker),
}

impl DomainEvent for ContractEvent {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contract {
    pub organization_id: String,
    pub created_by_user_id: String,
    pub fields: ContractFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub rollout_requested_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub external_systems: Vec<ExternalSystem>,
    pub last_update_hash: Option<String>,
}

impl Contract {
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn is_repeated_update(&self, fields: &ContractFields, source: &str) -> Result<bool> {
        Ok(self.last_update_hash.as_deref() == Some(update_hash(fields, source)?.as_str()))
    }

    fn link_external_system(&mut self, system: Option<&ExternalSystem>) {
        if let Some(system) = system.filter(|system| system.is_available()) {
            upsert_external_system(&mut self.external_systems, system.clone());
        }
    }
}

impl Aggregate for Contract {
    type Event = ContractEvent;
    const TYPE: &'static str = "contract";

    fn when(&mut self, event: &ContractEvent, _: &EventMetadata, at: DateTime<Utc>) -> Result<()> {
        match event {
            ContractEvent::Create(created) => {
                let mut source = created.source.clone();
                source.normalize();
                self.source = source;
                self.organization_id.clone_from(&created.organization_id);
                self.created_by_user_id.clone_from(&created.created_by_user_id);
                self.fields = created.fields.clone();
                self.created_at = Some(created.created_at.unwrap_or(at));
                self.link_external_system(created.external_system.as_ref());
            }
            ContractEvent::Update(updated) => {
                let rule = SourceRule::for_source(&updated.source, updated.overwrite);
                self.fields =
                    rule.merge_fields(&self.fields, &updated.fields, &self.source.source_of_truth)?;
                if rule.overwrite() {
                    self.source.source_of_truth = rule.source().to_string();
                }
                self.last_update_hash = Some(update_hash(&updated.fields, &updated.source)?);
                self.link_external_system(updated.external_system.as_ref());
            }
            ContractEvent::RolloutRenewalRequested(_) => self.rollout_requested_at = Some(at),
            ContractEvent::RefreshStatus(_) | ContractEvent::RefreshLtv(_) => return Ok(()),
            ContractEvent::SoftDelete(_) => self.deleted = true,
        }
        self.updated_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateRoot;
    use crate::model::contract::BillingCycle;
    use crate::model::now;

    fn apply(root: &mut AggregateRoot<Contract>, event: ContractEvent) {
        root.apply(&event, EventMetadata::default(), now()).expect("apply");
    }

    #[test]
    fn create_update_and_delete_fold() {
        let mut root = AggregateRoot::<Contract>::new("ziggy", "k1");
        apply(
            &mut root,
            ContractEvent::Create(ContractCreated {
                organization_id: "o1".into(),
                fields: ContractFields {
                    name: Some("Support".into()),
                    billing_cycle: Some(BillingCycle::Monthly),
                    ..ContractFields::default()
                },
                source: Source::new("hubspot", "sync"),
                ..ContractCreated::default()
            }),
        );
        apply(
            &mut root,
            ContractEvent::Update(ContractUpdated {
                fields: ContractFields {
                    name: Some("Premium support".into()),
                    auto_renew: Some(true),
                    ..ContractFields::default()
                },
                source: "salesforce".into(),
                ..ContractUpdated::default()
            }),
        );
        let state = root.state();
        assert_eq!(state.organization_id, "o1");
        assert_eq!(state.fields.name.as_deref(), Some("Support"));
        assert_eq!(state.fields.auto_renew, Some(true));
        assert_eq!(state.fields.billing_cycle, Some(BillingCycle::Monthly));

        apply(&mut root, ContractEvent::RolloutRenewalRequested(Marker {}));
        apply(&mut root, ContractEvent::SoftDelete(Marker {}));
        assert!(root.state().rollout_requested_at.is_some());
        assert!(root.state().deleted);
        assert_eq!(root.version(), 4);
    }
}
