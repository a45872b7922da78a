//! Commitment/prepaid credit accounting.
//!
//! The commitment cap is consumed first: it represents a contractual lead
//! count, exhausted once regardless of payment status. Prepaid credits are
//! consumed against whatever quantity remains eligible under the cap, and
//! only the leftover is billable.
//!
//! Both `commitment_remaining` and `prepaid_remaining` are recomputed from
//! history at the start of each delivery rather than decremented in a stored
//! counter, so the result self-heals if historical rows change.

use serde::{Deserialize, Serialize};

/// Why a delivery produced no billable quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CommitmentReached,
    PrepaidCredit,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CommitmentReached => "commitment_reached",
            SkipReason::PrepaidCredit => "prepaid_credit",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of assessing a delivery against the organization's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    /// Portion of the delivery within the commitment cap.
    pub eligible_quantity: i64,
    /// Prepaid credits still unconsumed before this delivery.
    pub prepaid_remaining: i64,
    /// Portion of the delivery that counts against billing.
    pub billable_quantity: i64,
    pub skip_reason: Option<SkipReason>,
}

/// Assess how much of a new delivery is billable.
///
/// `delivered_before` is the sum of quantities across all prior
/// delivered-status lead events for the organization. All quantities are
/// non-negative; negative intermediates clamp to zero.
pub fn assess(
    quantity: i64,
    commitment_total: Option<i64>,
    prepaid_credits: i64,
    delivered_before: i64,
) -> Assessment {
    let commitment_remaining = match commitment_total {
        None => quantity,
        Some(total) => (total - delivered_before).max(0),
    };
    let eligible_quantity = quantity.min(commitment_remaining);
    let prepaid_remaining = (prepaid_credits - delivered_before).max(0);
    let billable_quantity = (eligible_quantity - prepaid_remaining).max(0);

    let skip_reason = if eligible_quantity <= 0 {
        Some(SkipReason::CommitmentReached)
    } else if billable_quantity <= 0 && prepaid_remaining > 0 {
        Some(SkipReason::PrepaidCredit)
    } else {
        None
    };

    Assessment {
        eligible_quantity,
        prepaid_remaining,
        billable_quantity,
        skip_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_no_prepaid_fully_billable() {
        let a = assess(3, None, 0, 100);
        assert_eq!(a.billable_quantity, 3);
        assert_eq!(a.skip_reason, None);
    }

    #[test]
    fn test_commitment_exhausted() {
        // Cap of 10 with 10 already delivered: nothing eligible.
        let a = assess(1, Some(10), 0, 10);
        assert_eq!(a.eligible_quantity, 0);
        assert_eq!(a.billable_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::CommitmentReached));
    }

    #[test]
    fn test_commitment_partially_remaining() {
        // Cap of 10 with 8 delivered: only 2 of 5 are eligible and billable.
        let a = assess(5, Some(10), 0, 8);
        assert_eq!(a.eligible_quantity, 2);
        assert_eq!(a.billable_quantity, 2);
        assert_eq!(a.skip_reason, None);
    }

    #[test]
    fn test_prepaid_consumption_ordering() {
        // Uncapped, 5 prepaid, 3 delivered: 2 credits remain, 2 of 4 billable.
        let a = assess(4, None, 5, 3);
        assert_eq!(a.eligible_quantity, 4);
        assert_eq!(a.prepaid_remaining, 2);
        assert_eq!(a.billable_quantity, 2);
        assert_eq!(a.skip_reason, None);
    }

    #[test]
    fn test_prepaid_fully_covers_delivery() {
        let a = assess(2, None, 10, 0);
        assert_eq!(a.prepaid_remaining, 10);
        assert_eq!(a.billable_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::PrepaidCredit));
    }

    #[test]
    fn test_cap_applies_before_prepaid() {
        // Cap of 10 with 9 delivered: 1 eligible, and 1 remaining prepaid
        // credit absorbs it. The skip reason is prepaid, not commitment.
        let a = assess(5, Some(10), 10, 9);
        assert_eq!(a.eligible_quantity, 1);
        assert_eq!(a.prepaid_remaining, 1);
        assert_eq!(a.billable_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::PrepaidCredit));
    }

    #[test]
    fn test_over_delivered_history_clamps_to_zero() {
        // History larger than the cap must not go negative.
        let a = assess(3, Some(10), 0, 25);
        assert_eq!(a.eligible_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::CommitmentReached));
    }

    #[test]
    fn test_skip_reason_serialization() {
        assert_eq!(SkipReason::CommitmentReached.as_str(), "commitment_reached");
        assert_eq!(SkipReason::PrepaidCredit.as_str(), "prepaid_credit");
    }
}
