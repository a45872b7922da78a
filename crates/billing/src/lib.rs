// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LeadLedger Billing Core
//!
//! The billing ledger for a lead-generation vendor:
//!
//! - **Organization Store**: per-client billing configuration keyed by an
//!   immutable portal key
//! - **Lead Delivery Ledger**: append-only, idempotent record of delivered
//!   leads with two independent dedup keys
//! - **Credit Accounting**: commitment-cap-then-prepaid billable assessment,
//!   recomputed from history on every delivery
//! - **Replacement Requests**: policy-gated dispute state machine
//! - **Billing Event Log**: append-only audit trail of every billing-relevant
//!   state change
//! - **Reporting**: per-organization snapshot read-model
//!
//! The core performs no provider calls and sends no messages; it records
//! provider identifiers opaquely and enqueues notification rows for an
//! external worker to drain.

pub mod accounting;
pub mod error;
pub mod events;
pub mod ledger;
pub mod notifications;
pub mod organizations;
pub mod replacements;
pub mod reporting;

#[cfg(test)]
mod edge_case_tests;

// Accounting
pub use accounting::{assess, Assessment, SkipReason};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEvent, BillingEventKind, BillingEventLog, UsageOutcome};

// Ledger
pub use ledger::{
    DeliveryOutcome, DeliveryRequest, LeadEvent, LeadLedger, LeadStatus, DEFAULT_SOURCE,
};

// Notifications
pub use notifications::{NewNotification, NotificationQueue};

// Organizations
pub use organizations::{
    OnboardingForm, Organization, OrganizationPatch, OrganizationStore, Patch, UpsertOutcome,
};

// Replacements
pub use replacements::{
    evaluate_policy, replacement_amount_cents, CreditReason, PolicyFlags, ReplacementRequest,
    ReplacementService, ReplacementStatus, Resolution, ResolveOutcome, SubmitOutcome,
    SubmitRequest, CONTACT_WINDOW, REPLACEMENT_WINDOW,
};

// Reporting
pub use reporting::{DeliveredTotals, OrganizationSnapshot, ReportingService};

use sqlx::PgPool;

/// Main ledger service that combines all billing functionality
#[derive(Clone)]
pub struct LedgerService {
    pub organizations: OrganizationStore,
    pub ledger: LeadLedger,
    pub replacements: ReplacementService,
    pub events: BillingEventLog,
    pub reporting: ReportingService,
    pub notifications: NotificationQueue,
}

impl LedgerService {
    /// Create a ledger service with notification recipients from the
    /// environment.
    pub fn from_env(pool: PgPool) -> Self {
        Self::new(pool, NotificationQueue::from_env())
    }

    /// Create a ledger service with an explicit notification queue.
    pub fn new(pool: PgPool, notifications: NotificationQueue) -> Self {
        let events = BillingEventLog::new(pool.clone());
        let replacements = ReplacementService::new(pool.clone(), notifications.clone());

        Self {
            organizations: OrganizationStore::new(pool.clone(), notifications.clone()),
            ledger: LeadLedger::new(pool.clone()),
            reporting: ReportingService::new(pool, events.clone(), replacements.clone()),
            replacements,
            events,
            notifications,
        }
    }
}
