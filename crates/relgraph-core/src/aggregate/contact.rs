//! Contact aggregate.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::{EmailLinked, EmailUnlinked, LocationLinked, Marker, SocialAdded, SocialRemoved};
use super::{Aggregate, DomainEvent, EventMetadata, update_hash};
use crate::error::Result;
use crate::model::contact::{ContactFields, JobRoleFields};
use crate::model::satellite::{
    ExternalSystem, LocationFields, PhoneNumberLink, SocialFields, upsert_external_system,
};
use crate::model::source::{Source, SourceRule};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactCreated {
    pub fields: ContactFields,
    pub source: Source,
    pub external_system: Option<ExternalSystem>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactUpdated {
    pub fields: ContactFields,
    pub source: String,
    pub overwrite: bool,
    pub external_system: Option<ExternalSystem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationAdded {
    pub location_id: String,
    pub location: LocationFields,
    pub source: Source,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationLinked {
    pub organization_id: String,
    pub job_role: JobRoleFields,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum ContactEvent {
    #[serde(rename = "V1_CONTACT_CREATE")]
    Create(ContactCreated),
    #[serde(rename = "V1_CONTACT_UPDATE")]
    Update(ContactUpdated),
    #[serde(rename = "V1_CONTACT_PHONE_NUMBER_LINK")]
    PhoneNumberLink(PhoneNumberLink),
    #[serde(rename = "V1_CONTACT_EMAIL_LINK")]
    EmailLink(EmailLinked),
    #[serde(rename = "V1_CONTACT_EMAIL_UNLINK")]
    EmailUnlink(EmailUnlinked),
    #[serde(rename = "V1_CONTACT_LOCATION_LINK")]
    LocationLink(LocationLinked),
    #[serde(rename = "V1_CONTACT_LOCATION_ADD")]
    LocationAdd(LocationAdded),
    #[serde(rename = "V1_CONTACT_ORGANIZATION_LINK")]
    OrganizationLink(OrganizationLinked),
    #[serde(rename = "V1_CONTACT_ADD_SOCIAL")]
    SocialAdd(SocialAdded),
    #[serde(rename = "V1_CONTACT_REMOVE_SOCIAL")]
    SocialRemove(SocialRemoved),
    #[serde(rename = "V1_CONTACT_LINK_EXTERNAL_SYSTEM")]
    ExternalSystemLink(ExternalSystem),
    #[serde(rename = "V1_CONTACT_HIDE")]
    Hide(Marker),
    #[serde(rename = "V1_CONTACT_SHOW")]
    Show(Marker),
}

impl DomainEvent for ContactEvent {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contact {
    pub fields: ContactFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub hide: bool,
    pub phone_numbers: BTreeMap<String, PhoneNumberLink>,
    /// Email id to primary flag.
    pub emails: BTreeMap<String, bool>,
    pub locations: BTreeSet<String>,
    /// Organization id to job role.
    pub job_roles: BTreeMap<String, JobRoleFields>,
    pub socials: BTreeMap<String, SocialFields>,
    pub external_systems: Vec<ExternalSystem>,
    pub last_update_hash: Option<String>,
}

impl Contact {
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    #[must_use]
    pub fn has_phone_number(&self, phone_number_id: &str, primary: bool, label: &str) -> bool {
        self.phone_numbers
            .get(phone_number_id)
            .is_some_and(|link| link.primary == primary && link.label == label)
    }

    #[must_use]
    pub fn has_email(&self, email_id: &str, primary: bool) -> bool {
        self.emails.get(email_id) == Some(&primary)
    }

    #[must_use]
    pub fn has_location(&self, location_id: &str) -> bool {
        self.locations.contains(location_id)
    }

    #[must_use]
    pub fn has_social(&self, social_id: &str, url: &str) -> bool {
        self.socials.get(social_id).is_some_and(|social| social.url == url)
    }

    /// Whether the exact link is already recorded.
    #[must_use]
    pub fn has_external_system(&self, system: &ExternalSystem) -> bool {
        self.external_systems.iter().any(|existing| existing == system)
    }

    /// Whether an update with the same content and source was already
    /// applied last.
    pub fn is_repeated_update(&self, fields: &ContactFields, source: &str) -> Result<bool> {
        Ok(self.last_update_hash.as_deref() == Some(update_hash(fields, source)?.as_str()))
    }

    fn link_external_system(&mut self, system: Option<&ExternalSystem>) {
        if let Some(system) = system.filter(|system| system.is_available()) {
            upsert_external_system(&mut self.external_systems, system.clone());
        }
    }
}

impl Aggregate for Contact {
    type Event = ContactEvent;
    const TYPE: &'static str = "contact";

    fn when(&mut self, event: &ContactEvent, _: &EventMetadata, at: DateTime<Utc>) -> Result<()> {
        match event {
            ContactEvent::Create(created) => {
                let mut source = created.source.clone();
                source.normalize();
                self.source = source;
                self.fields = created.fields.clone();
                self.created_at = Some(created.created_at.unwrap_or(at));
                self.link_external_system(created.external_system.as_ref());
            }
            ContactEvent::Update(updated) => {
                let rule = SourceRule::for_source(&updated.source, updated.overwrite);
                self.fields =
                    rule.merge_fields(&self.fields, &updated.fields, &self.source.source_of_truth)?;
                if rule.overwrite() {
                    self.source.source_of_truth = rule.source().to_string();
                }
                self.last_update_hash = Some(update_hash(&updated.fields, &updated.source)?);
                self.link_external_system(updated.external_system.as_ref());
            }
            ContactEvent::PhoneNumberLink(link) => {
                if link.primary {
                    for other in self.phone_numbers.values_mut() {
                        other.primary = false;
                    }
                }
                self.phone_numbers
                    .insert(link.phone_number_id.clone(), link.clone());
            }
            ContactEvent::EmailLink(link) => {
                if link.primary {
                    for primary in self.emails.values_mut() {
                        *primary = false;
                    }
                }
                self.emails.insert(link.email_id.clone(), link.primary);
            }
            ContactEvent::EmailUnlink(unlink) => {
                self.emails.remove(&unlink.email_id);
            }
            ContactEvent::LocationLink(link) => {
                self.locations.insert(link.location_id.clone());
            }
            ContactEvent::LocationAdd(added) => {
                self.locations.insert(added.location_id.clone());
            }
            ContactEvent::OrganizationLink(link) => {
                self.job_roles
                    .insert(link.organization_id.clone(), link.job_role.clone());
            }
            ContactEvent::SocialAdd(added) => {
                self.socials
                    .insert(added.social_id.clone(), added.social.clone());
            }
            ContactEvent::SocialRemove(removed) => {
                self.socials.remove(&removed.social_id);
            }
            ContactEvent::ExternalSystemLink(system) => {
                self.link_external_system(Some(system));
            }
            ContactEvent::Hide(_) => self.hide = true,
            ContactEvent::Show(_) => self.hide = false,
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

    fn apply(root: &mut AggregateRoot<Contact>, event: ContactEvent) {
        root.apply(&event, EventMetadata::default(), now()).expect("apply");
    }

    fn created(root: &mut AggregateRoot<Contact>) {
        apply(
            root,
            ContactEvent::Create(ContactCreated {
                fields: ContactFields {
                    first_name: Some("Ada".into()),
                    description: Some("Engineer".into()),
                    ..ContactFields::default()
                },
                source: Source::new(OPENLINE, "app"),
                ..ContactCreated::default()
            }),
        );
    }

    #[test]
    fn foreign_update_fills_only_empty_fields() {
        let mut root = AggregateRoot::<Contact>::new("ziggy", "c1");
        created(&mut root);
        apply(
            &mut root,
            ContactEvent::Update(ContactUpdated {
                fields: ContactFields {
                    first_name: Some("Grace".into()),
                    last_name: Some("Lovelace".into()),
                    ..ContactFields::default()
                },
                source: "hubspot".into(),
                ..ContactUpdated::default()
            }),
        );
        let state = root.state();
        assert_eq!(state.fields.first_name.as_deref(), Some("Ada"));
        assert_eq!(state.fields.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(state.source.source_of_truth, OPENLINE);
        assert_eq!(root.version(), 2);
    }

    #[test]
    fn repeated_update_is_detected_by_hash() {
        let mut root = AggregateRoot::<Contact>::new("ziggy", "c1");
        created(&mut root);
        let fields = ContactFields {
            timezone: Some("UTC".into()),
            ..ContactFields::default()
        };
        assert!(!root.state().is_repeated_update(&fields, "hubspot").expect("hash"));
        apply(
            &mut root,
            ContactEvent::Update(ContactUpdated {
                fields: fields.clone(),
                source: "hubspot".into(),
                ..ContactUpdated::default()
            }),
        );
        assert!(root.state().is_repeated_update(&fields, "hubspot").expect("hash"));
        assert!(!root.state().is_repeated_update(&fields, OPENLINE).expect("hash"));
    }

    #[test]
    fn single_primary_phone_and_email() {
        let mut root = AggregateRoot::<Contact>::new("ziggy", "c1");
        created(&mut root);
        for id in ["p1", "p2"] {
            apply(
                &mut root,
                ContactEvent::PhoneNumberLink(PhoneNumberLink {
                    phone_number_id: id.into(),
                    primary: true,
                    label: "work".into(),
                }),
            );
        }
        for id in ["e1", "e2"] {
            apply(
                &mut root,
                ContactEvent::EmailLink(EmailLinked {
                    email_id: id.into(),
                    primary: true,
                }),
            );
        }
        let state = root.state();
        assert!(state.has_phone_number("p2", true, "work"));
        assert!(state.has_phone_number("p1", false, "work"));
        assert!(state.has_email("e2", true));
        assert!(state.has_email("e1", false));
    }

    #[test]
    fn external_systems_update_in_place() {
        let mut root = AggregateRoot::<Contact>::new("ziggy", "c1");
        created(&mut root);
        let mut system = ExternalSystem {
            external_system_id: "hubspot".into(),
            external_id: "42".into(),
            ..ExternalSystem::default()
        };
        apply(&mut root, ContactEvent::ExternalSystemLink(system.clone()));
        system.external_url = Some("https://example.test/42".into());
        apply(&mut root, ContactEvent::ExternalSystemLink(system.clone()));
        assert_eq!(root.state().external_systems.len(), 1);
        assert!(root.state().has_external_system(&system));
    }

    #[test]
    fn links_and_visibility_fold() {
        let mut root = AggregateRoot::<Contact>::new("ziggy", "c1");
        created(&mut root);
        apply(
            &mut root,
            ContactEvent::LocationLink(LocationLinked {
                location_id: "l1".into(),
            }),
        );
        apply(
            &mut root,
            ContactEvent::SocialAdd(SocialAdded {
                social_id: "s1".into(),
                social: SocialFields {
                    url: "https://social.test/ada".into(),
                    ..SocialFields::default()
                },
                source: Source::default(),
            }),
        );
        apply(&mut root, ContactEvent::Hide(Marker {}));
        assert!(root.state().has_location("l1"));
        assert!(root.state().has_social("s1", "https://social.test/ada"));
        assert!(root.state().hide);

        apply(
            &mut root,
            ContactEvent::SocialRemove(SocialRemoved {
                social_id: "s1".into(),
            }),
        );
        apply(&mut root, ContactEvent::Show(Marker {}));
        assert!(root.state().socials.is_empty());
        assert!(!root.state().hide);
    }
}
