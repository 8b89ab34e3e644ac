//! Satellite records linked to customer entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to the same entity in an external system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalSystem {
    pub external_system_id: String,
    pub external_id: String,
    pub external_id_second: Option<String>,
    pub external_url: Option<String>,
    pub external_source: Option<String>,
    pub sync_date: Option<DateTime<Utc>>,
}

impl ExternalSystem {
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.external_system_id.is_empty() && !self.external_id.is_empty()
    }

    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.external_system_id == other.external_system_id && self.external_id == other.external_id
    }
}

/// Insert `incoming` keyed by `(systemId, externalId)`, replacing a match
/// in place.
pub fn upsert_external_system(list: &mut Vec<ExternalSystem>, incoming: ExternalSystem) {
    match list.iter_mut().find(|existing| existing.same_key(&incoming)) {
        Some(existing) => *existing = incoming,
        None => list.push(incoming),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationFields {
    pub name: String,
    pub raw_address: String,
    pub country: String,
    pub region: String,
    pub locality: String,
    pub address1: String,
    pub address2: String,
    pub zip: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialFields {
    pub url: String,
    pub alias: String,
    pub followers_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhoneNumberLink {
    pub phone_number_id: String,
    pub primary: bool,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(id: &str, external: &str, url: &str) -> ExternalSystem {
        ExternalSystem {
            external_system_id: id.into(),
            external_id: external.into(),
            external_url: Some(url.into()),
            ..ExternalSystem::default()
        }
    }

    #[test]
    fn upsert_updates_in_place_by_key() {
        let mut list = vec![system("hubspot", "1", "a"), system("salesforce", "1", "b")];
        upsert_external_system(&mut list, system("hubspot", "1", "c"));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].external_url.as_deref(), Some("c"));

        upsert_external_system(&mut list, system("hubspot", "2", "d"));
        assert_eq!(list.len(), 3);
    }
}
