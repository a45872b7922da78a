//! Append-only billing event log.
//!
//! Every billing-relevant state change after the initial delivery insert is
//! mirrored by exactly one event row (the lead event row itself is the record
//! of delivery). Rows are write-once: no UPDATE or DELETE against
//! `billing_events` exists anywhere in this codebase. Each payload is an
//! opaque snapshot of the decision inputs at write time, so the trail stays
//! interpretable even if upstream schemas evolve.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Kinds of billing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventKind {
    LeadReplacementRequest,
    LeadReplacementResolved,
    UsageRecorded,
    Invoice,
}

impl BillingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventKind::LeadReplacementRequest => "lead_replacement_request",
            BillingEventKind::LeadReplacementResolved => "lead_replacement_resolved",
            BillingEventKind::UsageRecorded => "usage_recorded",
            BillingEventKind::Invoice => "invoice",
        }
    }
}

impl std::fmt::Display for BillingEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted billing event.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub portal_key: String,
    pub kind: String,
    pub status: String,
    pub reference_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub payload: serde_json::Value,
    pub created_at: OffsetDateTime,
}

/// Event to append.
#[derive(Debug, Clone)]
pub struct NewBillingEvent {
    pub organization_id: Option<Uuid>,
    pub portal_key: String,
    pub kind: BillingEventKind,
    pub status: String,
    pub reference_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub payload: serde_json::Value,
}

/// Outcome of a usage-record persist.
#[derive(Debug, Clone, Serialize)]
pub struct UsageOutcome {
    pub already_recorded: bool,
    pub billing_event_id: Option<Uuid>,
}

/// Service for the audit trail of record.
#[derive(Clone)]
pub struct BillingEventLog {
    pool: PgPool,
}

impl BillingEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event under the caller's transaction.
    pub(crate) async fn append(
        conn: &mut PgConnection,
        event: NewBillingEvent,
    ) -> BillingResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_events (
                organization_id, portal_key, kind, status,
                reference_id, amount_cents, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(event.organization_id)
        .bind(&event.portal_key)
        .bind(event.kind.as_str())
        .bind(&event.status)
        .bind(&event.reference_id)
        .bind(event.amount_cents)
        .bind(&event.payload)
        .fetch_one(conn)
        .await?;

        Ok(id)
    }

    /// Persist the result of a provider usage-record call.
    ///
    /// Idempotent: once a lead event carries `stripe_usage_recorded`, a
    /// second call leaves the stored usage-record id untouched and appends
    /// nothing. The external worker retries freely on this contract.
    pub async fn record_usage(
        &self,
        lead_event_id: Uuid,
        usage_record_id: &str,
        subscription_item_id: Option<&str>,
    ) -> BillingResult<UsageOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(Option<Uuid>, String, i32)> = sqlx::query_as(
            r#"
            UPDATE lead_events
            SET stripe_usage_recorded = TRUE,
                stripe_usage_record_id = $2
            WHERE id = $1 AND stripe_usage_recorded = FALSE
            RETURNING organization_id, portal_key, billable_quantity
            "#,
        )
        .bind(lead_event_id)
        .bind(usage_record_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (organization_id, portal_key, billable_quantity) = match claimed {
            Some(row) => row,
            None => {
                let exists: Option<(bool,)> =
                    sqlx::query_as("SELECT stripe_usage_recorded FROM lead_events WHERE id = $1")
                        .bind(lead_event_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return match exists {
                    None => Err(BillingError::NotFound(format!(
                        "lead event {lead_event_id}"
                    ))),
                    Some(_) => {
                        tx.commit().await?;
                        tracing::info!(
                            lead_event_id = %lead_event_id,
                            "Usage already recorded, skipping"
                        );
                        Ok(UsageOutcome {
                            already_recorded: true,
                            billing_event_id: None,
                        })
                    }
                };
            }
        };

        let event_id = Self::append(
            &mut tx,
            NewBillingEvent {
                organization_id,
                portal_key,
                kind: BillingEventKind::UsageRecorded,
                status: "recorded".to_string(),
                reference_id: Some(lead_event_id.to_string()),
                amount_cents: None,
                payload: serde_json::json!({
                    "lead_event_id": lead_event_id,
                    "usage_record_id": usage_record_id,
                    "subscription_item_id": subscription_item_id,
                    "billable_quantity": billable_quantity,
                }),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            lead_event_id = %lead_event_id,
            usage_record_id = %usage_record_id,
            "Recorded provider usage"
        );

        Ok(UsageOutcome {
            already_recorded: false,
            billing_event_id: Some(event_id),
        })
    }

    /// Append an invoice event. Always appends; organization resolution is
    /// best-effort so provider webhooks for unknown portals still land in
    /// the trail.
    pub async fn record_invoice(
        &self,
        portal_key: &str,
        invoice_id: &str,
        status: &str,
        amount_cents: Option<i64>,
        invoice_url: Option<&str>,
    ) -> BillingResult<Uuid> {
        let mut tx = self.pool.begin().await?;

        let organization_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM organizations WHERE portal_key = $1")
                .bind(portal_key)
                .fetch_optional(&mut *tx)
                .await?;

        let event_id = Self::append(
            &mut tx,
            NewBillingEvent {
                organization_id,
                portal_key: portal_key.to_string(),
                kind: BillingEventKind::Invoice,
                status: status.to_string(),
                reference_id: Some(invoice_id.to_string()),
                amount_cents,
                payload: serde_json::json!({
                    "invoice_id": invoice_id,
                    "invoice_url": invoice_url,
                }),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            portal_key = %portal_key,
            invoice_id = %invoice_id,
            status = %status,
            "Recorded invoice event"
        );

        Ok(event_id)
    }

    /// Most recent events for an organization, newest first.
    pub async fn recent_for_org(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events = sqlx::query_as::<_, BillingEvent>(
            r#"
            SELECT id, organization_id, portal_key, kind, status,
                   reference_id, amount_cents, payload, created_at
            FROM billing_events
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(organization_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_strings() {
        assert_eq!(
            BillingEventKind::LeadReplacementRequest.as_str(),
            "lead_replacement_request"
        );
        assert_eq!(
            BillingEventKind::LeadReplacementResolved.as_str(),
            "lead_replacement_resolved"
        );
        assert_eq!(BillingEventKind::UsageRecorded.as_str(), "usage_recorded");
        assert_eq!(BillingEventKind::Invoice.as_str(), "invoice");
    }
}
