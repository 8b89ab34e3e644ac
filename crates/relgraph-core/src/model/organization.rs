use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire_enum;

wire_enum! {
    /// Customer onboarding progress.
    OnboardingStatus, "onboarding status" {
        NotApplicable => "NOT_APPLICABLE",
        NotStarted => "NOT_STARTED",
        OnTrack => "ON_TRACK",
        Late => "LATE",
        Stuck => "STUCK",
        Done => "DONE",
        Successful => "SUCCESSFUL",
    }
}

impl OnboardingStatus {
    /// Display order used by dashboards.
    #[must_use]
    pub const fn order(self) -> i64 {
        match self {
            Self::NotApplicable => 0,
            Self::NotStarted => 1,
            Self::Stuck => 2,
            Self::Late => 3,
            Self::OnTrack => 4,
            Self::Done => 5,
            Self::Successful => 6,
        }
    }
}

/// Sparse organization field set; `Some` marks a field for update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub sub_industry: Option<String>,
    pub industry_group: Option<String>,
    pub target_audience: Option<String>,
    pub value_proposition: Option<String>,
    pub is_public: Option<bool>,
    pub is_customer: Option<bool>,
    pub employees: Option<i64>,
    pub market: Option<String>,
    pub last_funding_round: Option<String>,
    pub last_funding_amount: Option<String>,
    pub referenced_by: Option<String>,
    pub note: Option<String>,
    pub logo_url: Option<String>,
    pub icon_url: Option<String>,
    pub headquarters: Option<String>,
    pub year_founded: Option<i64>,
    pub employee_growth_rate: Option<String>,
    pub slack_channel_id: Option<String>,
    pub customer_os_id: Option<String>,
    pub stage: Option<String>,
    pub relationship: Option<String>,
    pub icp_fit: Option<bool>,
    pub lead_source: Option<String>,
    pub hide: Option<bool>,
    pub enrich_domain: Option<String>,
    pub enrich_source: Option<String>,
}

impl OrganizationFields {
    /// Plain text fields and their graph property names.
    #[must_use]
    pub fn text_fields(&self) -> [(&'static str, Option<&String>); 22] {
        [
            ("name", self.name.as_ref()),
            ("description", self.description.as_ref()),
            ("website", self.website.as_ref()),
            ("industry", self.industry.as_ref()),
            ("subIndustry", self.sub_industry.as_ref()),
            ("industryGroup", self.industry_group.as_ref()),
            ("targetAudience", self.target_audience.as_ref()),
            ("valueProposition", self.value_proposition.as_ref()),
            ("market", self.market.as_ref()),
            ("lastFundingRound", self.last_funding_round.as_ref()),
            ("lastFundingAmount", self.last_funding_amount.as_ref()),
            ("referencedBy", self.referenced_by.as_ref()),
            ("note", self.note.as_ref()),
            ("logoUrl", self.logo_url.as_ref()),
            ("iconUrl", self.icon_url.as_ref()),
            ("headquarters", self.headquarters.as_ref()),
            ("employeeGrowthRate", self.employee_growth_rate.as_ref()),
            ("slackChannelId", self.slack_channel_id.as_ref()),
            ("customerOsId", self.customer_os_id.as_ref()),
            ("relationship", self.relationship.as_ref()),
            ("leadSource", self.lead_source.as_ref()),
            ("stage", self.stage.as_ref()),
        ]
    }
}

/// Aggregated renewal outlook written onto an organization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenewalSummary {
    pub next_renewal_at: Option<DateTime<Utc>>,
    pub lowest_likelihood: Option<String>,
    pub likelihood_order: Option<i64>,
}

/// Most recent touchpoint recorded for an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Touchpoint {
    pub at: DateTime<Utc>,
    pub id: String,
    pub kind: String,
}
