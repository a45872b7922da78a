//! Append-only ledger of delivered leads.
//!
//! The at-most-once contract: for a fixed `(portal_key, idempotency_key)` or
//! `(portal_key, source_external_id)` pair, at most one lead event is ever
//! created. Upstream systems retry webhooks freely and supply either key
//! inconsistently, so both keys are checked (idempotency key first) and both
//! carry unique indexes; a concurrent insert that loses the race downgrades
//! to the duplicate path instead of failing.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounting;
use crate::error::{BillingError, BillingResult};
use crate::organizations::{Organization, OrganizationStore};

/// Source recorded when the caller does not name one.
pub const DEFAULT_SOURCE: &str = "ghl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Delivered,
    Credited,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Delivered => "delivered",
            LeadStatus::Credited => "credited",
        }
    }
}

/// One delivered lead (or batch, via `quantity`).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LeadEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub portal_key: String,
    pub source: String,
    pub source_external_id: String,
    pub idempotency_key: String,
    pub delivered_at: OffsetDateTime,
    pub quantity: i32,
    pub status: String,
    pub billable_quantity: i32,
    pub billing_skipped_reason: Option<String>,
    pub credited_at: Option<OffsetDateTime>,
    pub credited_reason: Option<String>,
    pub stripe_usage_recorded: bool,
    pub stripe_usage_record_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Inbound delivery call.
#[derive(Debug, Clone, Default)]
pub struct DeliveryRequest {
    pub portal_key: String,
    pub source_external_id: String,
    pub source: Option<String>,
    pub idempotency_key: Option<String>,
    pub quantity: Option<f64>,
    pub delivered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub duplicate: bool,
    pub lead_event_id: Uuid,
    pub billable_quantity: i32,
    pub billing_skipped_reason: Option<String>,
    pub stripe_subscription_item_id: Option<String>,
}

const LEAD_COLUMNS: &str = r#"
    id, organization_id, portal_key, source, source_external_id,
    idempotency_key, delivered_at, quantity, status, billable_quantity,
    billing_skipped_reason, credited_at, credited_reason,
    stripe_usage_recorded, stripe_usage_record_id, created_at
"#;

/// Derive the effective source and idempotency key for a delivery.
pub(crate) fn effective_identity(
    source: Option<&str>,
    idempotency_key: Option<&str>,
    source_external_id: &str,
) -> (String, String) {
    let source = match source {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => DEFAULT_SOURCE.to_string(),
    };
    let idempotency_key = match idempotency_key {
        Some(k) if !k.trim().is_empty() => k.to_string(),
        _ => format!("{source}:{source_external_id}"),
    };
    (source, idempotency_key)
}

/// Normalize a caller-supplied quantity to a positive integer.
pub(crate) fn normalize_quantity(quantity: Option<f64>) -> i64 {
    match quantity {
        Some(q) if q.is_finite() => (q.floor() as i64).max(1),
        _ => 1,
    }
}

/// Service recording lead deliveries.
#[derive(Clone)]
pub struct LeadLedger {
    pool: PgPool,
}

impl LeadLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a delivered lead, idempotently.
    ///
    /// The dedup reads, the billing assessment against prior history, and the
    /// insert run in one transaction; this is the system's mandatory
    /// serialization point.
    pub async fn record_delivery(&self, req: DeliveryRequest) -> BillingResult<DeliveryOutcome> {
        if req.source_external_id.trim().is_empty() {
            return Err(BillingError::InvalidArgument(
                "source_external_id is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let org = OrganizationStore::fetch_by_portal_key(&mut tx, &req.portal_key)
            .await?
            .ok_or_else(|| BillingError::OrgNotFound(req.portal_key.clone()))?;

        let (source, idempotency_key) = effective_identity(
            req.source.as_deref(),
            req.idempotency_key.as_deref(),
            &req.source_external_id,
        );

        // Dedup check #1: idempotency key wins and short-circuits.
        if let Some(existing) =
            Self::find_by_idempotency_key(&mut tx, org.id, &idempotency_key).await?
        {
            tx.commit().await?;
            return Ok(Self::duplicate_outcome(&org, &existing));
        }

        // Dedup check #2: upstream external id.
        if let Some(existing) =
            Self::find_by_source_external_id(&mut tx, org.id, &req.source_external_id).await?
        {
            tx.commit().await?;
            return Ok(Self::duplicate_outcome(&org, &existing));
        }

        let quantity = normalize_quantity(req.quantity);
        let delivered_before: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM lead_events
            WHERE organization_id = $1 AND status = 'delivered'
            "#,
        )
        .bind(org.id)
        .fetch_one(&mut *tx)
        .await?;

        let assessment = accounting::assess(
            quantity,
            org.lead_commitment_total.map(i64::from),
            i64::from(org.prepaid_lead_credits),
            delivered_before,
        );
        let delivered_at = req.delivered_at.unwrap_or_else(OffsetDateTime::now_utc);

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO lead_events (
                organization_id, portal_key, source, source_external_id,
                idempotency_key, delivered_at, quantity, status,
                billable_quantity, billing_skipped_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'delivered', $8, $9)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(org.id)
        .bind(&req.portal_key)
        .bind(&source)
        .bind(&req.source_external_id)
        .bind(&idempotency_key)
        .bind(delivered_at)
        .bind(quantity as i32)
        .bind(assessment.billable_quantity as i32)
        .bind(assessment.skip_reason.map(|r| r.as_str()))
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match inserted {
            Some((lead_event_id,)) => {
                tracing::info!(
                    portal_key = %req.portal_key,
                    lead_event_id = %lead_event_id,
                    quantity = quantity,
                    billable_quantity = assessment.billable_quantity,
                    skip_reason = ?assessment.skip_reason,
                    "Recorded lead delivery"
                );
                DeliveryOutcome {
                    duplicate: false,
                    lead_event_id,
                    billable_quantity: assessment.billable_quantity as i32,
                    billing_skipped_reason: assessment.skip_reason.map(|r| r.as_str().to_string()),
                    stripe_subscription_item_id: org.stripe_subscription_item_id.clone(),
                }
            }
            None => {
                // Lost a race with a concurrent delivery carrying the same
                // key; surface the winner's row as a duplicate.
                let existing =
                    Self::find_by_idempotency_key(&mut tx, org.id, &idempotency_key).await?;
                let existing = match existing {
                    Some(row) => row,
                    None => Self::find_by_source_external_id(
                        &mut tx,
                        org.id,
                        &req.source_external_id,
                    )
                    .await?
                    .ok_or_else(|| {
                        BillingError::Database(
                            "lead insert conflicted but no existing row found".to_string(),
                        )
                    })?,
                };
                tracing::info!(
                    portal_key = %req.portal_key,
                    lead_event_id = %existing.id,
                    "Duplicate lead delivery suppressed"
                );
                Self::duplicate_outcome(&org, &existing)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    fn duplicate_outcome(org: &Organization, existing: &LeadEvent) -> DeliveryOutcome {
        DeliveryOutcome {
            duplicate: true,
            lead_event_id: existing.id,
            billable_quantity: existing.billable_quantity,
            billing_skipped_reason: existing.billing_skipped_reason.clone(),
            stripe_subscription_item_id: org.stripe_subscription_item_id.clone(),
        }
    }

    pub(crate) async fn find_by_idempotency_key(
        conn: &mut PgConnection,
        organization_id: Uuid,
        idempotency_key: &str,
    ) -> BillingResult<Option<LeadEvent>> {
        let row = sqlx::query_as::<_, LeadEvent>(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead_events \
             WHERE organization_id = $1 AND idempotency_key = $2"
        ))
        .bind(organization_id)
        .bind(idempotency_key)
        .fetch_optional(conn)
        .await?;

        Ok(row)
    }

    pub(crate) async fn find_by_source_external_id(
        conn: &mut PgConnection,
        organization_id: Uuid,
        source_external_id: &str,
    ) -> BillingResult<Option<LeadEvent>> {
        let row = sqlx::query_as::<_, LeadEvent>(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead_events \
             WHERE organization_id = $1 AND source_external_id = $2"
        ))
        .bind(organization_id)
        .bind(source_external_id)
        .fetch_optional(conn)
        .await?;

        Ok(row)
    }

    pub(crate) async fn find_by_id(
        conn: &mut PgConnection,
        lead_event_id: Uuid,
    ) -> BillingResult<Option<LeadEvent>> {
        let row = sqlx::query_as::<_, LeadEvent>(&format!(
            "SELECT {LEAD_COLUMNS} FROM lead_events WHERE id = $1"
        ))
        .bind(lead_event_id)
        .fetch_optional(conn)
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_identity_defaults() {
        let (source, key) = effective_identity(None, None, "ext-42");
        assert_eq!(source, "ghl");
        assert_eq!(key, "ghl:ext-42");
    }

    #[test]
    fn test_effective_identity_explicit_key_wins() {
        let (source, key) = effective_identity(Some("meta"), Some("evt_abc"), "ext-42");
        assert_eq!(source, "meta");
        assert_eq!(key, "evt_abc");
    }

    #[test]
    fn test_effective_identity_blank_values_fall_back() {
        let (source, key) = effective_identity(Some("  "), Some(""), "ext-42");
        assert_eq!(source, "ghl");
        assert_eq!(key, "ghl:ext-42");
    }

    #[test]
    fn test_normalize_quantity() {
        assert_eq!(normalize_quantity(None), 1);
        assert_eq!(normalize_quantity(Some(2.9)), 2, "floored, not rounded");
        assert_eq!(normalize_quantity(Some(0.0)), 1);
        assert_eq!(normalize_quantity(Some(-3.0)), 1);
        assert_eq!(normalize_quantity(Some(f64::NAN)), 1);
    }
}
