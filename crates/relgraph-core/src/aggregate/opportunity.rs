//! Renewal opportunity aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Aggregate, DomainEvent, EventMetadata};
use crate::error::Result;
use crate::model::opportunity::{InternalStage, RenewalFields};
use crate::model::source::{Source, SourceRule};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenewalCreated {
    pub contract_id: String,
    pub fields: RenewalFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenewalUpdated {
    pub fields: RenewalFields,
    pub source: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenewalClosed {
    pub won: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum OpportunityEvent {
    #[serde(rename = "V1_OPPORTUNITY_CREATE_RENEWAL")]
    CreateRenewal(RenewalCreated),
    #[serde(rename = "V1_OPPORTUNITY_UPDATE_RENEWAL")]
    UpdateRenewal(RenewalUpdated),
    #[serde(rename = "V1_OPPORTUNITY_CLOSE_RENEWAL")]
    CloseRenewal(RenewalClosed),
}

impl DomainEvent for OpportunityEvent {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Opportunity {
    pub contract_id: String,
    pub fields: RenewalFields,
    pub source: Source,
    pub internal_stage: Option<InternalStage>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(
            self.internal_stage,
            Some(InternalStage::ClosedWon | InternalStage::ClosedLost)
        )
    }
}

impl Aggregate for Opportunity {
    type Event = OpportunityEvent;
    const TYPE: &'static str = "opportunity";

    fn when(&mut self, event: &OpportunityEvent, _: &EventMetadata, at: DateTime<Utc>) -> Result<()> {
        match event {
            OpportunityEvent::CreateRenewal(created) => {
                let mut source = created.source.clone();
                source.normalize();
                self.source = source;
                self.contract_id.clone_from(&created.contract_id);
                self.fields = created.fields.clone();
                self.internal_stage = Some(InternalStage::Open);
                self.created_at = Some(created.created_at.unwrap_or(at));
            }
            OpportunityEvent::UpdateRenewal(updated) => {
                let rule = SourceRule::for_source(&updated.source, updated.overwrite);
                self.fields =
                    rule.merge_fields(&self.fields, &updated.fields, &self.source.source_of_truth)?;
                if rule.overwrite() {
                    self.source.source_of_truth = rule.source().to_string();
                }
            }
            OpportunityEvent::CloseRenewal(closed) => {
                self.internal_stage = Some(if closed.won {
                    InternalStage::ClosedWon
                } else {
                    InternalStage::ClosedLost
                });
                self.closed_at = Some(closed.closed_at.unwrap_or(at));
            }
        }
        self.updated_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateRoot;
    use crate::model::now;
    use crate::model::opportunity::RenewalLikelihood;

    #[test]
    fn renewal_lifecycle() {
        let mut root = AggregateRoot::<Opportunity>::new("ziggy", "op1");
        let meta = EventMetadata::default;
        root.apply(
            &OpportunityEvent::CreateRenewal(RenewalCreated {
                contract_id: "k1".into(),
                fields: RenewalFields {
                    amount: Some(1200.0),
                    renewal_likelihood: Some(RenewalLikelihood::High),
                    ..RenewalFields::default()
                },
                ..RenewalCreated::default()
            }),
            meta(),
            now(),
        )
        .expect("create");
        assert_eq!(root.state().internal_stage, Some(InternalStage::Open));
        assert!(!root.state().is_closed());

        root.apply(
            &OpportunityEvent::UpdateRenewal(RenewalUpdated {
                fields: RenewalFields {
                    renewal_likelihood: Some(RenewalLikelihood::Low),
                    ..RenewalFields::default()
                },
                source: "openline".into(),
                overwrite: false,
            }),
            meta(),
            now(),
        )
        .expect("update");
        assert_eq!(
            root.state().fields.renewal_likelihood,
            Some(RenewalLikelihood::Low)
        );

        root.apply(
            &OpportunityEvent::CloseRenewal(RenewalClosed {
                won: true,
                closed_at: None,
            }),
            meta(),
            now(),
        )
        .expect("close");
        assert!(root.state().is_closed());
        assert_eq!(root.state().internal_stage, Some(InternalStage::ClosedWon));
    }
}
