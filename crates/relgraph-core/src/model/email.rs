use serde::{Deserialize, Serialize};

/// Outcome of validating one email address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailValidation {
    pub email: String,
    pub domain: String,
    pub username: String,
    pub deliverable: String,
    pub is_risky: bool,
    pub is_firewalled: bool,
    pub provider: String,
    pub firewall: String,
    pub is_catch_all: bool,
    pub is_mailbox_full: bool,
    pub is_role_account: bool,
    pub is_system_generated: bool,
    pub is_free_account: bool,
    pub smtp_success: bool,
    pub response_code: String,
    pub error_code: String,
    pub description: String,
    pub is_primary_domain: bool,
    pub primary_domain: String,
    pub alternate_email: String,
    pub retry_validation: bool,
}

/// Graph properties making up the validated bundle, cleared together.
pub const VALIDATION_PROPERTIES: &[&str] = &[
    "validatedAt",
    "email",
    "username",
    "deliverable",
    "isRisky",
    "isFirewalled",
    "provider",
    "firewall",
    "isCatchAll",
    "isMailboxFull",
    "isRoleAccount",
    "isSystemGenerated",
    "isFreeAccount",
    "smtpSuccess",
    "responseCode",
    "errorCode",
    "validationDescription",
    "isPrimaryDomain",
    "primaryDomain",
    "alternateEmail",
    "retryValidation",
];

/// Lower-cased domain part of an address, if any.
#[must_use]
pub fn domain_of(raw_email: &str) -> Option<String> {
    raw_email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}
