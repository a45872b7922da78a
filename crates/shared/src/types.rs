//! Cross-crate domain types.

use serde::{Deserialize, Serialize};

/// How an organization pays for leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    /// Package paid in full up front.
    PaidInFull,
    /// Contractual lead commitment with an upfront payment.
    CommitmentUpfront,
    /// Perpetual pay-per-lead metered billing.
    PayPerLead,
}

impl BillingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingModel::PaidInFull => "paid_in_full",
            BillingModel::CommitmentUpfront => "commitment_upfront",
            BillingModel::PayPerLead => "pay_per_lead",
        }
    }

    /// Boundary check for values arriving as raw strings.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paid_in_full" => Some(BillingModel::PaidInFull),
            "commitment_upfront" => Some(BillingModel::CommitmentUpfront),
            "pay_per_lead" => Some(BillingModel::PayPerLead),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_model_round_trip() {
        for model in [
            BillingModel::PaidInFull,
            BillingModel::CommitmentUpfront,
            BillingModel::PayPerLead,
        ] {
            assert_eq!(BillingModel::parse(model.as_str()), Some(model));
        }
        assert_eq!(BillingModel::parse("subscription"), None);
    }
}
