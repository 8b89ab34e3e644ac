//! Node labels, relationship types and tenant-scoped label helpers.
//!
//! Every tenant-scoped node carries its generic label (`Organization`) and a
//! composite label (`Organization_<tenant>`). Queries always match on the
//! composite label so a traversal can never leave its tenant.

use crate::error::{Error, Result};

pub const TENANT: &str = "Tenant";
pub const WORKSPACE: &str = "Workspace";
pub const ORGANIZATION: &str = "Organization";
pub const ARCHIVED_ORGANIZATION: &str = "ArchivedOrganization";
pub const CONTACT: &str = "Contact";
pub const CONTRACT: &str = "Contract";
pub const DELETED_CONTRACT: &str = "DeletedContract";
pub const OPPORTUNITY: &str = "Opportunity";
pub const RENEWAL_OPPORTUNITY: &str = "RenewalOpportunity";
pub const EMAIL: &str = "Email";
pub const DOMAIN: &str = "Domain";
pub const PHONE_NUMBER: &str = "PhoneNumber";
pub const LOCATION: &str = "Location";
pub const SOCIAL: &str = "Social";
pub const TAG: &str = "Tag";
pub const JOB_ROLE: &str = "JobRole";
pub const USER: &str = "User";
pub const EXTERNAL_SYSTEM: &str = "ExternalSystem";
pub const ACTION: &str = "Action";
pub const TIMELINE_EVENT: &str = "TimelineEvent";
pub const FLOW: &str = "Flow";
pub const FLOW_ACTION: &str = "FlowAction";
pub const FLOW_SENDER: &str = "FlowSender";
pub const FLOW_PARTICIPANT: &str = "FlowParticipant";
pub const FLOW_ACTION_EXECUTION: &str = "FlowActionExecution";
pub const FLOW_EXECUTION_SETTINGS: &str = "FlowExecutionSettings";

/// Relationship types.
pub mod rel {
    pub const BELONGS_TO_TENANT: &str = "BELONGS_TO_TENANT";
    pub const ORGANIZATION_BELONGS_TO_TENANT: &str = "ORGANIZATION_BELONGS_TO_TENANT";
    pub const CONTRACT_BELONGS_TO_TENANT: &str = "CONTRACT_BELONGS_TO_TENANT";
    pub const CONTACT_BELONGS_TO_TENANT: &str = "CONTACT_BELONGS_TO_TENANT";
    pub const EMAIL_ADDRESS_BELONGS_TO_TENANT: &str = "EMAIL_ADDRESS_BELONGS_TO_TENANT";
    pub const EXTERNAL_SYSTEM_BELONGS_TO_TENANT: &str = "EXTERNAL_SYSTEM_BELONGS_TO_TENANT";
    pub const USER_BELONGS_TO_TENANT: &str = "USER_BELONGS_TO_TENANT";
    pub const ARCHIVED: &str = "ARCHIVED";
    pub const HAS_WORKSPACE: &str = "HAS_WORKSPACE";
    pub const HAS_CONTRACT: &str = "HAS_CONTRACT";
    pub const HAS_OPPORTUNITY: &str = "HAS_OPPORTUNITY";
    pub const ACTIVE_RENEWAL: &str = "ACTIVE_RENEWAL";
    pub const SUSPENDED_RENEWAL: &str = "SUSPENDED_RENEWAL";
    pub const HAS: &str = "HAS";
    pub const HAS_DOMAIN: &str = "HAS_DOMAIN";
    pub const ASSOCIATED_WITH: &str = "ASSOCIATED_WITH";
    pub const TAGGED: &str = "TAGGED";
    pub const WORKS_AS: &str = "WORKS_AS";
    pub const ROLE_IN: &str = "ROLE_IN";
    pub const IS_LINKED_WITH: &str = "IS_LINKED_WITH";
    pub const CREATED_BY: &str = "CREATED_BY";
    pub const ACTION_ON: &str = "ACTION_ON";
    pub const HAS_EXECUTION: &str = "HAS_EXECUTION";
}

/// Composite `<label>_<tenant>` label.
#[must_use]
pub fn tenant_label(label: &str, tenant: &str) -> String {
    format!("{label}_{tenant}")
}

/// Both labels a tenant-scoped node carries.
#[must_use]
pub fn scoped_labels(label: &str, tenant: &str) -> [String; 2] {
    [label.to_string(), tenant_label(label, tenant)]
}

/// Tenant names become part of label names, so only a conservative
/// character set is accepted.
pub fn validate_tenant(tenant: &str) -> Result<()> {
    if tenant.trim().is_empty() {
        return Err(Error::MissingField("tenant"));
    }
    let valid = tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "tenant name `{tenant}` may only contain ASCII letters, digits, '_' and '-'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_label_appends_tenant() {
        assert_eq!(tenant_label(CONTRACT, "ziggy"), "Contract_ziggy");
        assert_eq!(
            scoped_labels(DELETED_CONTRACT, "ziggy"),
            ["DeletedContract".to_string(), "DeletedContract_ziggy".to_string()]
        );
    }

    #[test]
    fn tenant_names_are_restricted() {
        assert!(validate_tenant("ziggy").is_ok());
        assert!(validate_tenant("acme-corp_2").is_ok());
        assert!(validate_tenant("").is_err());
        assert!(validate_tenant("a` MATCH (n) DETACH DELETE n //").is_err());
        assert!(validate_tenant("spaced name").is_err());
    }
}
