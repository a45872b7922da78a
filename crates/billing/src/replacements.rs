//! Lead replacement requests.
//!
//! A replacement request disputes one delivered lead. Submission evaluates
//! four independent policy predicates; only a request passing all four enters
//! manual review (`submitted`). Everything else is `auto_rejected_policy`,
//! which is terminal. Review moves `submitted` to `approved` or `rejected`,
//! both terminal. Statuses only move forward.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEventKind, BillingEventLog, NewBillingEvent};
use crate::ledger::{LeadLedger, LeadStatus};
use crate::notifications::{NewNotification, NotificationQueue};
use crate::organizations::OrganizationStore;

/// Disputes must arrive within one week of delivery.
pub const REPLACEMENT_WINDOW: Duration = Duration::days(7);
/// The first contact attempt must land within 15 minutes of delivery.
pub const CONTACT_WINDOW: Duration = Duration::minutes(15);

/// The closed set of quality-issue codes a customer may dispute under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    WrongNumber,
    NeverAnswered,
    NotInterested,
    DuplicateLead,
    OutOfArea,
    BadContactInfo,
    SpamLead,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::WrongNumber => "wrong_number",
            CreditReason::NeverAnswered => "never_answered",
            CreditReason::NotInterested => "not_interested",
            CreditReason::DuplicateLead => "duplicate_lead",
            CreditReason::OutOfArea => "out_of_area",
            CreditReason::BadContactInfo => "bad_contact_info",
            CreditReason::SpamLead => "spam_lead",
        }
    }

    /// Boundary membership check for reasons arriving as raw strings.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wrong_number" => Some(CreditReason::WrongNumber),
            "never_answered" => Some(CreditReason::NeverAnswered),
            "not_interested" => Some(CreditReason::NotInterested),
            "duplicate_lead" => Some(CreditReason::DuplicateLead),
            "out_of_area" => Some(CreditReason::OutOfArea),
            "bad_contact_info" => Some(CreditReason::BadContactInfo),
            "spam_lead" => Some(CreditReason::SpamLead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementStatus {
    Submitted,
    AutoRejectedPolicy,
    Approved,
    Rejected,
}

impl ReplacementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplacementStatus::Submitted => "submitted",
            ReplacementStatus::AutoRejectedPolicy => "auto_rejected_policy",
            ReplacementStatus::Approved => "approved",
            ReplacementStatus::Rejected => "rejected",
        }
    }
}

/// The four independent policy predicates, evaluated at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyFlags {
    pub within_one_week: bool,
    pub contacted_within_15m: bool,
    pub reason_eligible: bool,
    pub lead_status_eligible: bool,
}

impl PolicyFlags {
    /// A request enters manual review only when all four predicates hold.
    pub fn all(&self) -> bool {
        self.within_one_week
            && self.contacted_within_15m
            && self.reason_eligible
            && self.lead_status_eligible
    }
}

/// Credit amount for an approved replacement: unit price times the lead
/// quantity, absent when the organization has no configured price.
pub fn replacement_amount_cents(unit_price_cents: Option<i32>, quantity: i32) -> Option<i64> {
    unit_price_cents.map(|price| i64::from(price) * i64::from(quantity))
}

/// Evaluate the replacement policy for one lead.
pub fn evaluate_policy(
    delivered_at: OffsetDateTime,
    contact_attempted_at: OffsetDateTime,
    now: OffsetDateTime,
    reason: Option<CreditReason>,
    lead_status: &str,
) -> PolicyFlags {
    PolicyFlags {
        within_one_week: now - delivered_at <= REPLACEMENT_WINDOW,
        contacted_within_15m: contact_attempted_at >= delivered_at
            && contact_attempted_at <= delivered_at + CONTACT_WINDOW,
        reason_eligible: reason.is_some(),
        lead_status_eligible: lead_status == LeadStatus::Delivered.as_str(),
    }
}

/// A persisted replacement request.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReplacementRequest {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub portal_key: String,
    pub lead_event_id: Uuid,
    pub source_external_id: String,
    pub reason: String,
    pub requested_at: OffsetDateTime,
    pub contact_attempted_at: Option<OffsetDateTime>,
    pub status: String,
    pub policy_within_one_week: bool,
    pub policy_contacted_within_15m: bool,
    pub policy_reason_eligible: bool,
    pub policy_lead_status_eligible: bool,
    pub resolved_at: Option<OffsetDateTime>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Inbound dispute submission. The lead may be named directly by id or by
/// the upstream external id; one of the two is required.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub portal_key: String,
    pub lead_event_id: Option<Uuid>,
    pub source_external_id: Option<String>,
    pub reason: String,
    pub contact_attempted_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub request_id: Uuid,
    pub status: ReplacementStatus,
    pub flags: PolicyFlags,
    pub lead_event_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub updated: bool,
    /// The request's status after the call (unchanged on the no-op path).
    pub status: String,
    pub amount_cents: Option<i64>,
}

const REQUEST_COLUMNS: &str = r#"
    id, organization_id, portal_key, lead_event_id, source_external_id,
    reason, requested_at, contact_attempted_at, status,
    policy_within_one_week, policy_contacted_within_15m,
    policy_reason_eligible, policy_lead_status_eligible,
    resolved_at, resolved_by, resolution_notes, created_at
"#;

/// The replacement request state machine.
#[derive(Clone)]
pub struct ReplacementService {
    pool: PgPool,
    notifications: NotificationQueue,
}

impl ReplacementService {
    pub fn new(pool: PgPool, notifications: NotificationQueue) -> Self {
        Self {
            pool,
            notifications,
        }
    }

    /// Submit a dispute over a delivered lead.
    ///
    /// Every submission, accepted or auto-rejected, appends one
    /// `lead_replacement_request` billing event carrying the four policy
    /// flags. Only an accepted submission enqueues the customer notification.
    pub async fn submit_request(&self, req: SubmitRequest) -> BillingResult<SubmitOutcome> {
        let mut tx = self.pool.begin().await?;

        let org = OrganizationStore::fetch_by_portal_key(&mut tx, &req.portal_key)
            .await?
            .ok_or_else(|| BillingError::OrgNotFound(req.portal_key.clone()))?;

        let lead = match (req.lead_event_id, req.source_external_id.as_deref()) {
            (Some(lead_event_id), _) => {
                let lead = LeadLedger::find_by_id(&mut tx, lead_event_id)
                    .await?
                    .ok_or_else(|| {
                        BillingError::NotFound(format!("lead event {lead_event_id}"))
                    })?;
                // An id from another portal is indistinguishable from an
                // unknown one to the caller.
                if lead.organization_id != org.id {
                    return Err(BillingError::NotFound(format!(
                        "lead event {lead_event_id}"
                    )));
                }
                lead
            }
            (None, Some(source_external_id)) => {
                LeadLedger::find_by_source_external_id(&mut tx, org.id, source_external_id)
                    .await?
                    .ok_or_else(|| {
                        BillingError::NotFound(format!("lead {source_external_id}"))
                    })?
            }
            (None, None) => {
                return Err(BillingError::InvalidArgument(
                    "either lead_event_id or source_external_id is required".to_string(),
                ));
            }
        };

        let now = OffsetDateTime::now_utc();
        let contact_attempted_at = req.contact_attempted_at.unwrap_or(now);
        let reason = CreditReason::parse(&req.reason);
        let flags = evaluate_policy(
            lead.delivered_at,
            contact_attempted_at,
            now,
            reason,
            &lead.status,
        );
        let status = if flags.all() {
            ReplacementStatus::Submitted
        } else {
            ReplacementStatus::AutoRejectedPolicy
        };

        let (request_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO replacement_requests (
                organization_id, portal_key, lead_event_id, source_external_id,
                reason, requested_at, contact_attempted_at, status,
                policy_within_one_week, policy_contacted_within_15m,
                policy_reason_eligible, policy_lead_status_eligible
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(org.id)
        .bind(&req.portal_key)
        .bind(lead.id)
        .bind(&lead.source_external_id)
        .bind(&req.reason)
        .bind(now)
        .bind(contact_attempted_at)
        .bind(status.as_str())
        .bind(flags.within_one_week)
        .bind(flags.contacted_within_15m)
        .bind(flags.reason_eligible)
        .bind(flags.lead_status_eligible)
        .fetch_one(&mut *tx)
        .await?;

        BillingEventLog::append(
            &mut tx,
            NewBillingEvent {
                organization_id: Some(org.id),
                portal_key: req.portal_key.clone(),
                kind: BillingEventKind::LeadReplacementRequest,
                status: status.as_str().to_string(),
                reference_id: Some(request_id.to_string()),
                amount_cents: None,
                payload: serde_json::json!({
                    "lead_event_id": lead.id,
                    "source_external_id": lead.source_external_id,
                    "reason": req.reason,
                    "contact_attempted_at": contact_attempted_at.unix_timestamp(),
                    "policy_within_one_week": flags.within_one_week,
                    "policy_contacted_within_15m": flags.contacted_within_15m,
                    "policy_reason_eligible": flags.reason_eligible,
                    "policy_lead_status_eligible": flags.lead_status_eligible,
                    "accepted": flags.all(),
                }),
            },
        )
        .await?;

        if status == ReplacementStatus::Submitted {
            self.notifications
                .enqueue(
                    &mut tx,
                    NewNotification {
                        organization_id: Some(org.id),
                        portal_key: Some(req.portal_key.clone()),
                        kind: "replacement_submitted",
                        subject: format!("Replacement request received for lead {}", lead.source_external_id),
                        body: format!(
                            "Your replacement request for lead {} ({}) was received and is under review.",
                            lead.source_external_id, req.reason
                        ),
                        payload: serde_json::json!({
                            "request_id": request_id,
                            "lead_event_id": lead.id,
                            "reason": req.reason,
                        }),
                        recipients: org.notify_emails.clone(),
                    },
                )
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            portal_key = %req.portal_key,
            request_id = %request_id,
            lead_event_id = %lead.id,
            status = %status.as_str(),
            reason = %req.reason,
            "Replacement request submitted"
        );

        Ok(SubmitOutcome {
            request_id,
            status,
            flags,
            lead_event_id: lead.id,
        })
    }

    /// Resolve a request under manual review.
    ///
    /// Only legal when the current status is `submitted`; any other status is
    /// an idempotent no-op reporting `updated: false`; duplicate resolution
    /// calls are an expected retry case, not an error. The status-guarded
    /// UPDATE is the serialization point: of two concurrent resolutions only
    /// the first observes `submitted`.
    pub async fn resolve_request(
        &self,
        request_id: Uuid,
        resolution: Resolution,
        resolved_by: Option<&str>,
        notes: Option<&str>,
    ) -> BillingResult<ResolveOutcome> {
        let mut tx = self.pool.begin().await?;

        let new_status = match resolution {
            Resolution::Approve => ReplacementStatus::Approved,
            Resolution::Reject => ReplacementStatus::Rejected,
        };

        let updated = sqlx::query_as::<_, ReplacementRequest>(&format!(
            r#"
            UPDATE replacement_requests
            SET status = $2,
                resolved_at = NOW(),
                resolved_by = $3,
                resolution_notes = $4
            WHERE id = $1 AND status = 'submitted'
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request_id)
        .bind(new_status.as_str())
        .bind(resolved_by)
        .bind(notes)
        .fetch_optional(&mut *tx)
        .await?;

        let request = match updated {
            Some(request) => request,
            None => {
                // Not in `submitted`: either unknown, or already resolved.
                let current: Option<(String,)> =
                    sqlx::query_as("SELECT status FROM replacement_requests WHERE id = $1")
                        .bind(request_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                let (status,) = current.ok_or_else(|| {
                    BillingError::NotFound(format!("replacement request {request_id}"))
                })?;
                tx.commit().await?;
                tracing::info!(
                    request_id = %request_id,
                    status = %status,
                    "Resolution skipped, request not in submitted status"
                );
                return Ok(ResolveOutcome {
                    updated: false,
                    status,
                    amount_cents: None,
                });
            }
        };

        let org = OrganizationStore::fetch_by_portal_key(&mut tx, &request.portal_key)
            .await?
            .ok_or_else(|| BillingError::OrgNotFound(request.portal_key.clone()))?;

        let amount_cents = match resolution {
            Resolution::Approve => {
                let credited: Option<(i32,)> = sqlx::query_as(
                    r#"
                    UPDATE lead_events
                    SET status = 'credited',
                        credited_at = NOW(),
                        credited_reason = $2
                    WHERE id = $1
                    RETURNING quantity
                    "#,
                )
                .bind(request.lead_event_id)
                .bind(&request.reason)
                .fetch_optional(&mut *tx)
                .await?;
                let (quantity,) = credited.ok_or_else(|| {
                    BillingError::NotFound(format!("lead event {}", request.lead_event_id))
                })?;

                replacement_amount_cents(org.lead_unit_price_cents, quantity)
            }
            Resolution::Reject => None,
        };

        BillingEventLog::append(
            &mut tx,
            NewBillingEvent {
                organization_id: Some(org.id),
                portal_key: request.portal_key.clone(),
                kind: BillingEventKind::LeadReplacementResolved,
                status: new_status.as_str().to_string(),
                reference_id: Some(request_id.to_string()),
                amount_cents,
                payload: serde_json::json!({
                    "request_id": request_id,
                    "lead_event_id": request.lead_event_id,
                    "reason": request.reason,
                    "resolution": new_status.as_str(),
                    "resolved_by": resolved_by,
                    "notes": notes,
                }),
            },
        )
        .await?;

        let decision = match resolution {
            Resolution::Approve => "approved",
            Resolution::Reject => "rejected",
        };
        self.notifications
            .enqueue(
                &mut tx,
                NewNotification {
                    organization_id: Some(org.id),
                    portal_key: Some(request.portal_key.clone()),
                    kind: "replacement_resolved",
                    subject: format!(
                        "Replacement request {} for lead {}",
                        decision, request.source_external_id
                    ),
                    body: format!(
                        "Your replacement request for lead {} was {}.",
                        request.source_external_id, decision
                    ),
                    payload: serde_json::json!({
                        "request_id": request_id,
                        "lead_event_id": request.lead_event_id,
                        "resolution": decision,
                        "amount_cents": amount_cents,
                    }),
                    recipients: org.notify_emails.clone(),
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            lead_event_id = %request.lead_event_id,
            resolution = %decision,
            amount_cents = ?amount_cents,
            "Replacement request resolved"
        );

        Ok(ResolveOutcome {
            updated: true,
            status: new_status.as_str().to_string(),
            amount_cents,
        })
    }

    /// Most recent requests for an organization, newest first.
    pub async fn recent_for_org(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<ReplacementRequest>> {
        let requests = sqlx::query_as::<_, ReplacementRequest>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM replacement_requests
            WHERE organization_id = $1
            ORDER BY requested_at DESC
            LIMIT $2
            "#
        ))
        .bind(organization_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(offset_minutes: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::minutes(offset_minutes)
    }

    #[test]
    fn test_policy_all_pass() {
        let delivered = ts(0);
        let flags = evaluate_policy(
            delivered,
            ts(10),
            ts(60),
            Some(CreditReason::NeverAnswered),
            "delivered",
        );
        assert!(flags.all());
    }

    #[test]
    fn test_contact_outside_window_rejects_regardless_of_reason() {
        // Contact attempt 20 minutes after delivery: outside the 15-minute
        // window, so the request auto-rejects even with a valid reason and a
        // delivered lead.
        let delivered = ts(0);
        let flags = evaluate_policy(
            delivered,
            ts(20),
            ts(20),
            Some(CreditReason::NeverAnswered),
            "delivered",
        );
        assert!(!flags.contacted_within_15m);
        assert!(flags.within_one_week);
        assert!(flags.reason_eligible);
        assert!(flags.lead_status_eligible);
        assert!(!flags.all());
    }

    #[test]
    fn test_contact_before_delivery_is_ineligible() {
        let flags = evaluate_policy(ts(10), ts(5), ts(20), Some(CreditReason::SpamLead), "delivered");
        assert!(!flags.contacted_within_15m);
    }

    #[test]
    fn test_contact_exactly_at_window_edge() {
        let delivered = ts(0);
        let flags = evaluate_policy(
            delivered,
            delivered + CONTACT_WINDOW,
            ts(60),
            Some(CreditReason::WrongNumber),
            "delivered",
        );
        assert!(flags.contacted_within_15m, "15:00 exactly is inside");
    }

    #[test]
    fn test_week_window_edges() {
        let delivered = ts(0);
        let at_edge = evaluate_policy(
            delivered,
            ts(5),
            delivered + REPLACEMENT_WINDOW,
            Some(CreditReason::OutOfArea),
            "delivered",
        );
        assert!(at_edge.within_one_week, "7 days exactly is inside");

        let past_edge = evaluate_policy(
            delivered,
            ts(5),
            delivered + REPLACEMENT_WINDOW + Duration::seconds(1),
            Some(CreditReason::OutOfArea),
            "delivered",
        );
        assert!(!past_edge.within_one_week);
    }

    #[test]
    fn test_credited_lead_is_ineligible() {
        let flags = evaluate_policy(
            ts(0),
            ts(5),
            ts(30),
            Some(CreditReason::DuplicateLead),
            "credited",
        );
        assert!(!flags.lead_status_eligible);
        assert!(!flags.all());
    }

    #[test]
    fn test_unknown_reason_is_ineligible() {
        let flags = evaluate_policy(ts(0), ts(5), ts(30), CreditReason::parse("vibes"), "delivered");
        assert!(!flags.reason_eligible);
    }

    #[test]
    fn test_credit_reason_membership() {
        for code in [
            "wrong_number",
            "never_answered",
            "not_interested",
            "duplicate_lead",
            "out_of_area",
            "bad_contact_info",
            "spam_lead",
        ] {
            let parsed = CreditReason::parse(code);
            assert!(parsed.is_some(), "{code} should be an eligible reason");
            assert_eq!(parsed.map(|r| r.as_str()), Some(code));
        }
        assert!(CreditReason::parse("changed_mind").is_none());
    }

    #[test]
    fn test_replacement_amount() {
        assert_eq!(replacement_amount_cents(Some(4000), 2), Some(8000));
        assert_eq!(replacement_amount_cents(Some(4000), 1), Some(4000));
        assert_eq!(replacement_amount_cents(None, 3), None, "unknown price");
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ReplacementStatus::Submitted.as_str(), "submitted");
        assert_eq!(
            ReplacementStatus::AutoRejectedPolicy.as_str(),
            "auto_rejected_policy"
        );
        assert_eq!(ReplacementStatus::Approved.as_str(), "approved");
        assert_eq!(ReplacementStatus::Rejected.as_str(), "rejected");
    }
}
