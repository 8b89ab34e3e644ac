use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use super::wire_enum;

wire_enum! {
    /// Contract lifecycle.
    ContractStatus, "contract status" {
        Draft => "DRAFT",
        Live => "LIVE",
        OutOfContract => "OUT_OF_CONTRACT",
        Ended => "ENDED",
    }
}

wire_enum! {
    /// Billing and renewal period of a contract.
    BillingCycle, "billing cycle" {
        None => "NONE",
        Monthly => "MONTHLY",
        Quarterly => "QUARTERLY",
        Annually => "ANNUALLY",
    }
}

impl BillingCycle {
    /// Length of one cycle in months; `None` never renews.
    #[must_use]
    pub const fn months(self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Monthly => Some(1),
            Self::Quarterly => Some(3),
            Self::Annually => Some(12),
        }
    }

    /// Start of the cycle following `from`.
    #[must_use]
    pub fn next_after(self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.months()
            .and_then(|months| from.checked_add_months(Months::new(months)))
    }
}

/// Default contract currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Sparse contract field set; `Some` marks a field for update.
///
/// Serialized names are the graph property names and timestamps serialize
/// as epoch microseconds, so the set converts directly into properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractFields {
    pub name: Option<String>,
    pub contract_url: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub service_started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    pub length_in_months: Option<i64>,
    pub billing_cycle: Option<BillingCycle>,
    pub currency: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub invoicing_start_date: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub next_invoice_date: Option<DateTime<Utc>>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub locality: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub zip: Option<String>,
    pub organization_legal_name: Option<String>,
    pub invoice_email: Option<String>,
    pub invoice_note: Option<String>,
    pub can_pay_with_card: Option<bool>,
    pub can_pay_with_direct_debit: Option<bool>,
    pub can_pay_with_bank_transfer: Option<bool>,
    pub pay_online: Option<bool>,
    pub pay_automatically: Option<bool>,
    pub auto_renew: Option<bool>,
    pub approved: Option<bool>,
    pub check: Option<bool>,
    pub due_days: Option<i64>,
    pub invoicing_enabled: Option<bool>,
}

impl ContractFields {
    /// The subset status derivation looks at.
    #[must_use]
    pub fn terms(&self) -> ContractTerms {
        ContractTerms {
            service_started_at: self.service_started_at,
            ended_at: self.ended_at,
            auto_renew: self.auto_renew.unwrap_or(false),
            approved: self.approved.unwrap_or(false),
        }
    }
}

/// The contract fields status derivation looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractTerms {
    pub service_started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub approved: bool,
}

/// Derive the contract status at `now`.
///
/// - `ENDED` once `endedAt` is in the past;
/// - `DRAFT` while service has not started;
/// - `LIVE` when the contract auto-renews and is approved, or the active
///   renewal date (`None` when absent or undated) lies in the future;
/// - `OUT_OF_CONTRACT` otherwise.
#[must_use]
pub fn derive_contract_status(
    terms: &ContractTerms,
    active_renewal_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ContractStatus {
    if terms.ended_at.is_some_and(|ended| ended < now) {
        return ContractStatus::Ended;
    }
    if terms.service_started_at.is_none_or(|started| started > now) {
        return ContractStatus::Draft;
    }
    if terms.auto_renew && terms.approved {
        return ContractStatus::Live;
    }
    match active_renewal_at {
        Some(renewed_at) if renewed_at <= now => ContractStatus::OutOfContract,
        _ => ContractStatus::Live,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn ended_contract() {
        let terms = ContractTerms {
            service_started_at: Some(now() - Duration::days(30)),
            ended_at: Some(now() - Duration::days(1)),
            ..ContractTerms::default()
        };
        assert_eq!(derive_contract_status(&terms, None, now()), ContractStatus::Ended);
    }

    #[test]
    fn service_not_started_is_draft() {
        let terms = ContractTerms {
            service_started_at: Some(now() + Duration::days(1)),
            ..ContractTerms::default()
        };
        assert_eq!(derive_contract_status(&terms, None, now()), ContractStatus::Draft);
        assert_eq!(
            derive_contract_status(&ContractTerms::default(), None, now()),
            ContractStatus::Draft
        );
    }

    #[test]
    fn approved_auto_renewing_contract_is_live() {
        let terms = ContractTerms {
            service_started_at: Some(now()),
            auto_renew: true,
            approved: true,
            ..ContractTerms::default()
        };
        let renewal = Some(now() + Duration::days(1));
        assert_eq!(derive_contract_status(&terms, renewal, now()), ContractStatus::Live);
    }

    #[test]
    fn past_renewal_without_auto_renew_is_out_of_contract() {
        let terms = ContractTerms {
            service_started_at: Some(now()),
            auto_renew: false,
            approved: true,
            ..ContractTerms::default()
        };
        let renewal = Some(now() - Duration::days(1));
        assert_eq!(
            derive_contract_status(&terms, renewal, now()),
            ContractStatus::OutOfContract
        );
        assert_eq!(derive_contract_status(&terms, None, now()), ContractStatus::Live);
    }

    #[test]
    fn billing_cycle_advances_by_months() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).single().expect("valid date");
        let next = BillingCycle::Monthly.next_after(start).expect("next");
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).single().expect("valid"));
        assert!(BillingCycle::None.next_after(start).is_none());
    }

    #[test]
    fn contract_fields_serialize_as_graph_properties() {
        let fields = ContractFields {
            name: Some("Annual".into()),
            service_started_at: Some(now()),
            billing_cycle: Some(BillingCycle::Annually),
            ..ContractFields::default()
        };
        let value = serde_json::to_value(&fields).expect("encode");
        assert_eq!(value["serviceStartedAt"], serde_json::json!(now().timestamp_micros()));
        assert_eq!(value["billingCycle"], serde_json::json!("ANNUALLY"));
        let back: ContractFields = serde_json::from_value(value).expect("decode");
        assert_eq!(back, fields);
    }

    #[test]
    fn status_round_trips_through_wire_names() {
        assert_eq!(ContractStatus::OutOfContract.as_str(), "OUT_OF_CONTRACT");
        assert_eq!(ContractStatus::from_str("live"), Ok(ContractStatus::Live));
        assert!(ContractStatus::from_str("paused").is_err());
    }
}
