//! Per-organization reporting snapshot.

use serde::Serialize;
use sqlx::PgPool;

use crate::error::BillingResult;
use crate::events::{BillingEvent, BillingEventLog};
use crate::organizations::{Organization, OrganizationStore};
use crate::replacements::{ReplacementRequest, ReplacementService};

const REPLACEMENT_LIMIT: i64 = 50;
const EVENT_LIMIT: i64 = 25;

/// Derived counts over delivered lead events.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeliveredTotals {
    /// Sum of quantities across delivered-status lead events.
    pub total: i64,
    /// Portion of `total` already reported to the payment provider.
    pub usage_recorded: i64,
    pub unbilled: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationSnapshot {
    pub organization: Organization,
    pub delivered: DeliveredTotals,
    pub replacement_requests: Vec<ReplacementRequest>,
    pub billing_events: Vec<BillingEvent>,
}

/// Read-only aggregation over the ledger, requests and event log.
#[derive(Clone)]
pub struct ReportingService {
    pool: PgPool,
    events: BillingEventLog,
    replacements: ReplacementService,
}

impl ReportingService {
    pub fn new(pool: PgPool, events: BillingEventLog, replacements: ReplacementService) -> Self {
        Self {
            pool,
            events,
            replacements,
        }
    }

    /// Snapshot for one organization. Unknown portal keys return `None`
    /// rather than failing; this is a read with no side effects.
    pub async fn get_snapshot(
        &self,
        portal_key: &str,
    ) -> BillingResult<Option<OrganizationSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        let Some(organization) =
            OrganizationStore::fetch_by_portal_key(&mut conn, portal_key).await?
        else {
            return Ok(None);
        };
        drop(conn);

        let (total, usage_recorded): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT,
                   COALESCE(SUM(quantity) FILTER (WHERE stripe_usage_recorded), 0)::BIGINT
            FROM lead_events
            WHERE organization_id = $1 AND status = 'delivered'
            "#,
        )
        .bind(organization.id)
        .fetch_one(&self.pool)
        .await?;

        let replacement_requests = self
            .replacements
            .recent_for_org(organization.id, REPLACEMENT_LIMIT)
            .await?;
        let billing_events = self
            .events
            .recent_for_org(organization.id, EVENT_LIMIT)
            .await?;

        Ok(Some(OrganizationSnapshot {
            delivered: DeliveredTotals {
                total,
                usage_recorded,
                unbilled: total - usage_recorded,
            },
            organization,
            replacement_requests,
            billing_events,
        }))
    }
}
