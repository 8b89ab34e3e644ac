//! Email address aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::Marker;
use super::{Aggregate, DomainEvent, EventMetadata};
use crate::error::Result;
use crate::model::email::EmailValidation;
use crate::model::source::Source;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailUpserted {
    pub raw_email: String,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailValidated {
    pub validation: EmailValidation,
    pub validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data")]
pub enum EmailEvent {
    #[serde(rename = "V1_EMAIL_UPSERT")]
    Upsert(EmailUpserted),
    #[serde(rename = "V1_EMAIL_VALIDATED")]
    Validated(EmailValidated),
    #[serde(rename = "V1_EMAIL_CLEAN_VALIDATION")]
    CleanValidation(Marker),
    #[serde(rename = "V1_EMAIL_DELETE")]
    Delete(Marker),
}

impl DomainEvent for EmailEvent {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Email {
    pub raw_email: String,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub validation: Option<EmailValidation>,
    pub validated_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl Email {
    #[must_use]
    pub const fn is_created(&self) -> bool {
        self.created_at.is_some() && !self.deleted
    }

    /// Whether an upsert of `raw_email` would change nothing.
    #[must_use]
    pub fn has_raw_email(&self, raw_email: &str) -> bool {
        self.is_created() && self.raw_email == raw_email.trim()
    }
}

impl Aggregate for Email {
    type Event = EmailEvent;
    const TYPE: &'static str = "email";

    fn when(&mut self, event: &EmailEvent, _: &EventMetadata, at: DateTime<Utc>) -> Result<()> {
        match event {
            EmailEvent::Upsert(upserted) => {
                if !self.is_created() {
                    let mut source = upserted.source.clone();
                    source.normalize();
                    self.source = source;
                    self.created_at = Some(upserted.created_at.unwrap_or(at));
                    self.deleted = false;
                }
                if self.raw_email != upserted.raw_email.trim() {
                    self.raw_email = upserted.raw_email.trim().to_string();
                    self.validation = None;
                    self.validated_at = None;
                }
            }
            EmailEvent::Validated(validated) => {
                self.validation = Some(validated.validation.clone());
                self.validated_at = Some(validated.validated_at.unwrap_or(at));
            }
            EmailEvent::CleanValidation(_) => {
                self.validation = None;
                self.validated_at = None;
            }
            EmailEvent::Delete(_) => self.deleted = true,
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

    fn apply(root: &mut AggregateRoot<Email>, event: EmailEvent) {
        root.apply(&event, EventMetadata::default(), now()).expect("apply");
    }

    fn upsert(raw: &str) -> EmailEvent {
        EmailEvent::Upsert(EmailUpserted {
            raw_email: raw.into(),
            ..EmailUpserted::default()
        })
    }

    #[test]
    fn changing_address_drops_validation() {
        let mut root = AggregateRoot::<Email>::new("ziggy", "e1");
        apply(&mut root, upsert(" ada@acme.com "));
        assert!(root.state().has_raw_email("ada@acme.com"));
        apply(
            &mut root,
            EmailEvent::Validated(EmailValidated {
                validation: EmailValidation {
                    domain: "acme.com".into(),
                    ..EmailValidation::default()
                },
                validated_at: None,
            }),
        );
        assert!(root.state().validation.is_some());

        apply(&mut root, upsert("ada@acme.com"));
        assert!(root.state().validation.is_some());
        apply(&mut root, upsert("grace@acme.com"));
        assert!(root.state().validation.is_none());
    }

    #[test]
    fn deleted_email_is_not_created() {
        let mut root = AggregateRoot::<Email>::new("ziggy", "e1");
        apply(&mut root, upsert("ada@acme.com"));
        apply(&mut root, EmailEvent::Delete(Marker {}));
        assert!(!root.state().is_created());
        assert!(!root.state().has_raw_email("ada@acme.com"));
    }
}
