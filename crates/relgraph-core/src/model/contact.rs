use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sparse contact field set; `Some` marks a field for update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub prefix: Option<String>,
    pub description: Option<String>,
    pub timezone: Option<String>,
    pub profile_photo_url: Option<String>,
    pub username: Option<String>,
}

/// A contact's role at an organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobRoleFields {
    pub job_title: Option<String>,
    pub description: Option<String>,
    pub primary: bool,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
}
