//! Organization aggregate.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::{EmailLinked, Marker, SocialAdded};
use super::{Aggregate, DomainEvent, EventMetadata, update_hash};
use crate::error::Result;
use crate::model::organization::{OnboardingStatus, OrganizationFields};
use crate::model::satellite::{ExternalSystem, SocialFields, upsert_external_system};
use crate::model::source::{Source, SourceRule};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationCreated {
    pub fields: OrganizationFields,
    pub source: Source,
    pub external_system: Option<ExternalSystem>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationUpdated {
    pub fields: OrganizationFields,
    pub source: String,
    pub overwrite: bool,
    pub external_system: Option<ExternalSystem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainLinked {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingStatusUpdated {
    pub status: OnboardingStatus,
    #[serde(default)]
    pub comments: String,
    /// Contract whose first LIVE transition requested the change.
    #[serde(default)]
    pub caused_by_contract_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum OrganizationEvent {
    #[serde(rename = "V1_ORGANIZATION_CREATE")]
    Create(OrganizationCreated),
    #[serde(rename = "V1_ORGANIZATION_UPDATE")]
    Update(OrganizationUpdated),
    #[serde(rename = "V1_ORGANIZATION_LINK_DOMAIN")]
    LinkDomain(DomainLinked),
    #[serde(rename = "V1_ORGANIZATION_ADD_SOCIAL")]
    AddSocial(SocialAdded),
    #[serde(rename = "V1_ORGANIZATION_LINK_EMAIL")]
    LinkEmail(EmailLinked),
    #[serde(rename = "V1_ORGANIZATION_LINK_EXTERNAL_SYSTEM")]
    LinkExternalSystem(ExternalSystem),
    #[serde(rename = "V1_ORGANIZATION_HIDE")]
    Hide(Marker),
    #[serde(rename = "V1_ORGANIZATION_SHOW")]
    Show(Marker),
    #[serde(rename = "V1_ORGANIZATION_ARCHIVE")]
    Archive(Marker),
    #[serde(rename = "V1_ORGANIZATION_UPDATE_ONBOARDING_STATUS")]
    UpdateOnboardingStatus(OnboardingStatusUpdated),
    #[serde(rename = "V1_ORGANIZATION_REFRESH_ARR")]
    RefreshArr(Marker),
    #[serde(rename = "V1_ORGANIZATION_REFRESH_RENEWAL_SUMMARY")]
    RefreshRenewalSummary(Marker),
    #[serde(rename = "V1_ORGANIZATION_REFRESH_LAST_TOUCHPOINT")]
    RefreshLastTouchpoint(Marker),
}

impl DomainEvent for OrganizationEvent {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Organization {
    pub fields: OrganizationFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub hide: bool,
    pub archived: bool,
    pub domains: BTreeSet<String>,
    pub socials: BTreeMap<String, SocialFields>,
    /// Email id to primary flag.
    pub emails: BTreeMap<String, bool>,
    pub external_systems: Vec<ExternalSystem>,
    pub onboarding_status: Option<OnboardingStatus>,
    pub onboarding_comments: String,
    pub last_update_hash: Option<String>,
}

impl Organization {
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    #[must_use]
    pub fn has_domain(&self, domain: &str) -> bool {
        self.domains.contains(&domain.trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn has_social(&self, social_id: &str, url: &str) -> bool {
        self.socials.get(social_id).is_some_and(|social| social.url == url)
    }

    #[must_use]
    pub fn has_email(&self, email_id: &str, primary: bool) -> bool {
        self.emails.get(email_id) == Some(&primary)
    }

    #[must_use]
    pub fn has_external_system(&self, system: &ExternalSystem) -> bool {
        self.external_systems.iter().any(|existing| existing == system)
    }

    /// Whether the status and comments are already recorded.
    #[must_use]
    pub fn has_onboarding_status(&self, status: OnboardingStatus, comments: &str) -> bool {
        self.onboarding_status == Some(status) && self.onboarding_comments == comments
    }

    pub fn is_repeated_update(&self, fields: &OrganizationFields, source: &str) -> Result<bool> {
        Ok(self.last_update_hash.as_deref() == Some(update_hash(fields, source)?.as_str()))
    }

    fn link_external_system(&mut self, system: Option<&ExternalSystem>) {
        if let Some(system) = system.filter(|system| system.is_available()) {
            upsert_external_system(&mut self.external_systems, system.clone());
        }
    }
}

impl Aggregate for Organization {
    type Event = OrganizationEvent;
    const TYPE: &'static str = "organization";

    fn when(&mut self, event: &OrganizationEvent, _: &EventMetadata, at: DateTime<Utc>) -> Result<()> {
        match event {
            OrganizationEvent::Create(created) => {
                let mut source = created.source.clone();
                source.normalize();
                self.source = source;
                self.fields = created.fields.clone();
                self.hide = created.fields.hide.unwrap_or(false);
                self.created_at = Some(created.created_at.unwrap_or(at));
                self.onboarding_status = Some(OnboardingStatus::NotApplicable);
                self.link_external_system(created.external_system.as_ref());
            }
            OrganizationEvent::Update(updated) => {
                let rule = SourceRule::for_source(&updated.source, updated.overwrite);
                self.fields =
                    rule.merge_fields(&self.fields, &updated.fields, &self.source.source_of_truth)?;
                if let Some(hide) = updated.fields.hide {
                    self.hide = hide;
                }
                if rule.overwrite() {
                    self.source.source_of_truth = rule.source().to_string();
                }
                self.last_update_hash = Some(update_hash(&updated.fields, &updated.source)?);
                self.link_external_system(updated.external_system.as_ref());
            }
            OrganizationEvent::LinkDomain(linked) => {
                self.domains.insert(linked.domain.trim().to_ascii_lowercase());
            }
            OrganizationEvent::AddSocial(added) => {
                self.socials
                    .insert(added.social_id.clone(), added.social.clone());
            }
            OrganizationEvent::LinkEmail(link) => {
                if link.primary {
                    for primary in self.emails.values_mut() {
                        *primary = false;
                    }
                }
                self.emails.insert(link.email_id.clone(), link.primary);
            }
            OrganizationEvent::LinkExternalSystem(system) => {
                self.link_external_system(Some(system));
            }
            OrganizationEvent::Hide(_) => self.hide = true,
            OrganizationEvent::Show(_) => self.hide = false,
            OrganizationEvent::Archive(_) => self.archived = true,
            OrganizationEvent::UpdateOnboardingStatus(update) => {
                self.onboarding_status = Some(update.status);
                self.onboarding_comments.clone_from(&update.comments);
            }
            OrganizationEvent::RefreshArr(_)
            | OrganizationEvent::RefreshRenewalSummary(_)
            | OrganizationEvent::RefreshLastTouchpoint(_) => return Ok(()),
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
    use crate::model::source::OPENLINE;

    fn apply(root: &mut AggregateRoot<Organization>, event: OrganizationEvent) {
        root.apply(&event, EventMetadata::default(), now()).expect("apply");
    }

    fn created() -> AggregateRoot<Organization> {
        let mut root = AggregateRoot::<Organization>::new("ziggy", "o1");
        apply(
            &mut root,
            OrganizationEvent::Create(OrganizationCreated {
                fields: OrganizationFields {
                    name: Some("Acme".into()),
                    ..OrganizationFields::default()
                },
                source: Source::new("hubspot", "sync"),
                ..OrganizationCreated::default()
            }),
        );
        root
    }

    #[test]
    fn create_starts_not_applicable() {
        let root = created();
        assert!(root.state().is_created());
        assert_eq!(
            root.state().onboarding_status,
            Some(OnboardingStatus::NotApplicable)
        );
        assert_eq!(root.state().source.source_of_truth, "hubspot");
    }

    #[test]
    fn owning_source_keeps_updating_its_fields() {
        let mut root = created();
        apply(
            &mut root,
            OrganizationEvent::Update(OrganizationUpdated {
                fields: OrganizationFields {
                    name: Some("Acme Corp".into()),
                    ..OrganizationFields::default()
                },
                source: "hubspot".into(),
                ..OrganizationUpdated::default()
            }),
        );
        assert_eq!(root.state().fields.name.as_deref(), Some("Acme Corp"));

        apply(
            &mut root,
            OrganizationEvent::Update(OrganizationUpdated {
                fields: OrganizationFields {
                    name: Some("ACME".into()),
                    ..OrganizationFields::default()
                },
                source: OPENLINE.into(),
                ..OrganizationUpdated::default()
            }),
        );
        assert_eq!(root.state().fields.name.as_deref(), Some("ACME"));
        assert_eq!(root.state().source.source_of_truth, OPENLINE);
    }

    #[test]
    fn refresh_requests_do_not_touch_state() {
        let mut root = created();
        let before = root.state().clone();
        apply(&mut root, OrganizationEvent::RefreshArr(Marker {}));
        assert_eq!(root.state(), &before);
        assert_eq!(root.version(), 2);
    }

    #[test]
    fn domains_are_case_insensitive() {
        let mut root = created();
        apply(
            &mut root,
            OrganizationEvent::LinkDomain(DomainLinked {
                domain: "Acme.COM".into(),
            }),
        );
        assert!(root.state().has_domain("acme.com"));
    }

    #[test]
    fn onboarding_and_archive_fold() {
        let mut root = created();
        apply(
            &mut root,
            OrganizationEvent::UpdateOnboardingStatus(OnboardingStatusUpdated {
                status: OnboardingStatus::NotStarted,
                comments: "first live contract".into(),
                caused_by_contract_id: Some("k1".into()),
            }),
        );
        apply(&mut root, OrganizationEvent::Archive(Marker {}));
        assert!(
            root.state()
                .has_onboarding_status(OnboardingStatus::NotStarted, "first live contract")
        );
        assert!(root.state().archived);
    }
}
