use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire_enum;

wire_enum! {
    /// Internal pipeline stage of an opportunity.
    InternalStage, "internal stage" {
        Open => "OPEN",
        ClosedWon => "CLOSED_WON",
        ClosedLost => "CLOSED_LOST",
        Suspended => "SUSPENDED",
    }
}

wire_enum! {
    InternalType, "internal type" {
        Nbo => "NBO",
        Upsell => "UPSELL",
        CrossSell => "CROSS_SELL",
        Renewal => "RENEWAL",
    }
}

wire_enum! {
    /// Likelihood that a renewal closes.
    RenewalLikelihood, "renewal likelihood" {
        High => "HIGH",
        Medium => "MEDIUM",
        Low => "LOW",
        Zero => "ZERO",
    }
}

impl RenewalLikelihood {
    /// Lower is less likely.
    #[must_use]
    pub const fn rank(self) -> i64 {
        match self {
            Self::Zero => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

/// Sparse renewal opportunity field set; `Some` marks a field for update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenewalFields {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub max_amount: Option<f64>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub renewed_at: Option<DateTime<Utc>>,
    pub renewal_likelihood: Option<RenewalLikelihood>,
    pub renewal_approved: Option<bool>,
    pub renewal_adjusted_rate: Option<i64>,
    pub comments: Option<String>,
    pub currency: Option<String>,
}
