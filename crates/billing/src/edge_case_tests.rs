// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Ledger
//!
//! Tests critical boundary conditions in:
//! - Credit accounting (LEDG-A01 to LEDG-A08)
//! - Delivery normalization and dedup keys (LEDG-D01 to LEDG-D06)
//! - Replacement policy windows (LEDG-P01 to LEDG-P07)
//! - Partial-update patch semantics (LEDG-U01 to LEDG-U03)

#[cfg(test)]
mod accounting_edge_tests {
    use crate::accounting::{assess, SkipReason};

    // =========================================================================
    // LEDG-A01: Delivery exactly at the cap - last unit billable, no skip
    // =========================================================================
    #[test]
    fn test_delivery_lands_exactly_on_cap() {
        let a = assess(2, Some(10), 0, 8);
        assert_eq!(a.eligible_quantity, 2, "Both units fit under the cap");
        assert_eq!(a.billable_quantity, 2);
        assert_eq!(a.skip_reason, None);
    }

    // =========================================================================
    // LEDG-A02: Delivery straddling the cap - partial eligibility
    // =========================================================================
    #[test]
    fn test_delivery_straddles_cap() {
        let a = assess(4, Some(10), 0, 8);
        assert_eq!(a.eligible_quantity, 2, "Only the under-cap portion counts");
        assert_eq!(a.billable_quantity, 2);
        assert_eq!(a.skip_reason, None, "Billable > 0 means no skip reason");
    }

    // =========================================================================
    // LEDG-A03: First delivery after the cap - commitment_reached
    // =========================================================================
    #[test]
    fn test_first_delivery_past_cap() {
        let a = assess(1, Some(10), 0, 10);
        assert_eq!(a.billable_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::CommitmentReached));
    }

    // =========================================================================
    // LEDG-A04: Prepaid exactly consumed by history - nothing remains
    // =========================================================================
    #[test]
    fn test_prepaid_exactly_consumed() {
        let a = assess(2, None, 5, 5);
        assert_eq!(a.prepaid_remaining, 0);
        assert_eq!(a.billable_quantity, 2, "All billable once prepaid is gone");
        assert_eq!(a.skip_reason, None);
    }

    // =========================================================================
    // LEDG-A05: Prepaid partially covers - remainder billable, no skip
    // =========================================================================
    #[test]
    fn test_prepaid_partially_covers() {
        let a = assess(4, None, 5, 3);
        assert_eq!(a.eligible_quantity, 4);
        assert_eq!(a.prepaid_remaining, 2);
        assert_eq!(a.billable_quantity, 2);
        assert_eq!(a.skip_reason, None);
    }

    // =========================================================================
    // LEDG-A06: Prepaid fully covers - prepaid_credit skip
    // =========================================================================
    #[test]
    fn test_prepaid_fully_covers() {
        let a = assess(3, None, 10, 2);
        assert_eq!(a.billable_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::PrepaidCredit));
    }

    // =========================================================================
    // LEDG-A07: Cap exhaustion wins over prepaid in the skip reason
    // =========================================================================
    #[test]
    fn test_commitment_reached_reported_before_prepaid() {
        // Cap exhausted AND prepaid remaining: the cap is the reason nothing
        // was eligible in the first place.
        let a = assess(3, Some(10), 50, 10);
        assert_eq!(a.eligible_quantity, 0);
        assert_eq!(a.skip_reason, Some(SkipReason::CommitmentReached));
    }

    // =========================================================================
    // LEDG-A08: Zero-quantity assessment stays clamped
    // =========================================================================
    #[test]
    fn test_zero_quantity() {
        let a = assess(0, None, 0, 0);
        assert_eq!(a.billable_quantity, 0);
        assert_eq!(
            a.skip_reason,
            Some(SkipReason::CommitmentReached),
            "Nothing eligible reports commitment_reached"
        );
    }
}

#[cfg(test)]
mod delivery_normalization_tests {
    use crate::ledger;

    // =========================================================================
    // LEDG-D01: Default source and derived idempotency key
    // =========================================================================
    #[test]
    fn test_default_source_and_key() {
        let (source, key) = ledger::effective_identity(None, None, "abc123");
        assert_eq!(source, "ghl");
        assert_eq!(key, "ghl:abc123");
    }

    // =========================================================================
    // LEDG-D02: Custom source flows into the derived key
    // =========================================================================
    #[test]
    fn test_custom_source_in_derived_key() {
        let (_, key) = ledger::effective_identity(Some("meta_ads"), None, "abc123");
        assert_eq!(key, "meta_ads:abc123");
    }

    // =========================================================================
    // LEDG-D03: Explicit idempotency key is taken verbatim
    // =========================================================================
    #[test]
    fn test_explicit_key_verbatim() {
        let (_, key) = ledger::effective_identity(Some("meta_ads"), Some("evt_1"), "abc123");
        assert_eq!(key, "evt_1");
    }

    // =========================================================================
    // LEDG-D04: Whitespace-only inputs are treated as absent
    // =========================================================================
    #[test]
    fn test_blank_inputs_fall_back() {
        let (source, key) = ledger::effective_identity(Some(" "), Some("\t"), "abc123");
        assert_eq!(source, "ghl");
        assert_eq!(key, "ghl:abc123");
    }

    // =========================================================================
    // LEDG-D05: Quantity floors and clamps to a minimum of 1
    // =========================================================================
    #[test]
    fn test_quantity_normalization() {
        assert_eq!(ledger::normalize_quantity(None), 1);
        assert_eq!(ledger::normalize_quantity(Some(1.0)), 1);
        assert_eq!(ledger::normalize_quantity(Some(3.7)), 3);
        assert_eq!(ledger::normalize_quantity(Some(0.2)), 1);
        assert_eq!(ledger::normalize_quantity(Some(-5.0)), 1);
    }

    // =========================================================================
    // LEDG-D06: Non-finite quantities degrade to the default
    // =========================================================================
    #[test]
    fn test_non_finite_quantity() {
        assert_eq!(ledger::normalize_quantity(Some(f64::INFINITY)), 1);
        assert_eq!(ledger::normalize_quantity(Some(f64::NAN)), 1);
    }
}

#[cfg(test)]
mod policy_window_tests {
    use crate::replacements::{
        evaluate_policy, CreditReason, CONTACT_WINDOW, REPLACEMENT_WINDOW,
    };
    use time::{Duration, OffsetDateTime};

    fn base() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    // =========================================================================
    // LEDG-P01: Submission at 6d23h - inside the week window
    // =========================================================================
    #[test]
    fn test_submission_just_inside_week() {
        let flags = evaluate_policy(
            base(),
            base() + Duration::minutes(5),
            base() + Duration::days(7) - Duration::hours(1),
            Some(CreditReason::WrongNumber),
            "delivered",
        );
        assert!(flags.within_one_week);
        assert!(flags.all());
    }

    // =========================================================================
    // LEDG-P02: Submission at 8 days - outside the week window
    // =========================================================================
    #[test]
    fn test_submission_outside_week() {
        let flags = evaluate_policy(
            base(),
            base() + Duration::minutes(5),
            base() + Duration::days(8),
            Some(CreditReason::WrongNumber),
            "delivered",
        );
        assert!(!flags.within_one_week);
        assert!(!flags.all(), "One failed predicate rejects the request");
    }

    // =========================================================================
    // LEDG-P03: Contact at T+20m on a 10-minute-old delivery - rejected
    // =========================================================================
    #[test]
    fn test_contact_twenty_minutes_after_delivery() {
        let delivered = base();
        let flags = evaluate_policy(
            delivered,
            delivered + Duration::minutes(20),
            delivered + Duration::minutes(20),
            Some(CreditReason::NeverAnswered),
            "delivered",
        );
        assert!(!flags.contacted_within_15m);
        assert!(
            flags.reason_eligible && flags.lead_status_eligible && flags.within_one_week,
            "Only the contact window failed"
        );
        assert!(!flags.all());
    }

    // =========================================================================
    // LEDG-P04: Contact exactly at delivery time - inside the window
    // =========================================================================
    #[test]
    fn test_contact_at_delivery_instant() {
        let delivered = base();
        let flags = evaluate_policy(
            delivered,
            delivered,
            delivered + Duration::hours(1),
            Some(CreditReason::BadContactInfo),
            "delivered",
        );
        assert!(flags.contacted_within_15m);
    }

    // =========================================================================
    // LEDG-P05: Contact one second past the window - rejected
    // =========================================================================
    #[test]
    fn test_contact_one_second_past_window() {
        let delivered = base();
        let flags = evaluate_policy(
            delivered,
            delivered + CONTACT_WINDOW + Duration::seconds(1),
            delivered + Duration::hours(1),
            Some(CreditReason::BadContactInfo),
            "delivered",
        );
        assert!(!flags.contacted_within_15m);
    }

    // =========================================================================
    // LEDG-P06: Already-credited lead cannot be disputed again
    // =========================================================================
    #[test]
    fn test_credited_lead_rejected() {
        let flags = evaluate_policy(
            base(),
            base() + Duration::minutes(5),
            base() + Duration::hours(1),
            Some(CreditReason::DuplicateLead),
            "credited",
        );
        assert!(!flags.lead_status_eligible);
    }

    // =========================================================================
    // LEDG-P07: Window constants match the published policy
    // =========================================================================
    #[test]
    fn test_window_constants() {
        assert_eq!(REPLACEMENT_WINDOW, Duration::days(7));
        assert_eq!(CONTACT_WINDOW, Duration::minutes(15));
    }
}

#[cfg(test)]
mod patch_semantics_tests {
    use crate::organizations::Patch;

    // =========================================================================
    // LEDG-U01: Default is Keep, not Set(default)
    // =========================================================================
    #[test]
    fn test_default_is_keep() {
        let patch: Patch<i32> = Patch::default();
        assert_eq!(patch, Patch::Keep);
        assert!(!patch.is_set());
    }

    // =========================================================================
    // LEDG-U02: Keep leaves the slot untouched, Set overwrites
    // =========================================================================
    #[test]
    fn test_apply_semantics() {
        let mut slot = 7;
        Patch::Keep.apply_to(&mut slot);
        assert_eq!(slot, 7);
        Patch::Set(9).apply_to(&mut slot);
        assert_eq!(slot, 9);
    }

    // =========================================================================
    // LEDG-U03: Set(None) clears a nullable field; Keep does not
    // =========================================================================
    #[test]
    fn test_nullable_field_clearing() {
        let mut slot = Some("price".to_string());
        Patch::<Option<String>>::Keep.apply_to(&mut slot);
        assert_eq!(slot.as_deref(), Some("price"));
        Patch::Set(None).apply_to(&mut slot);
        assert_eq!(slot, None);
    }
}
