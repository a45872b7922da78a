//! Metered usage reporting to Stripe.
//!
//! Finds delivered lead events with billable quantity that have not been
//! reported yet, creates a usage record against the organization's
//! subscription item, and persists the result through the core's idempotent
//! `record_usage`. A crash between the Stripe call and the persist is healed
//! on the next cycle: the persist observes `already_recorded` and the row is
//! left as-is.

use leadledger_billing::LedgerService;
use sqlx::PgPool;
use stripe::{CreateUsageRecord, SubscriptionItemId, UsageRecord, UsageRecordAction};
use uuid::Uuid;

const BATCH_LIMIT: i64 = 100;

#[derive(Debug, sqlx::FromRow)]
struct PendingUsageRow {
    lead_event_id: Uuid,
    portal_key: String,
    billable_quantity: i32,
    subscription_item_id: String,
}

/// Report one batch of unrecorded billable deliveries.
pub async fn report_unrecorded_usage(pool: &PgPool, ledger: &LedgerService, client: &stripe::Client) {
    let rows: Vec<PendingUsageRow> = match sqlx::query_as(
        r#"
        SELECT le.id AS lead_event_id,
               le.portal_key,
               le.billable_quantity,
               o.stripe_subscription_item_id AS subscription_item_id
        FROM lead_events le
        JOIN organizations o ON o.id = le.organization_id
        WHERE le.status = 'delivered'
          AND le.billable_quantity > 0
          AND le.stripe_usage_recorded = FALSE
          AND o.stripe_subscription_item_id IS NOT NULL
        ORDER BY le.delivered_at
        LIMIT $1
        "#,
    )
    .bind(BATCH_LIMIT)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query unrecorded usage");
            return;
        }
    };

    if rows.is_empty() {
        return;
    }

    let total = rows.len();
    let mut reported = 0;
    let mut errors = 0;

    for row in rows {
        let item_id: SubscriptionItemId = match row.subscription_item_id.parse() {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    portal_key = %row.portal_key,
                    subscription_item_id = %row.subscription_item_id,
                    error = %e,
                    "Invalid subscription item id"
                );
                errors += 1;
                continue;
            }
        };

        let params = CreateUsageRecord {
            quantity: row.billable_quantity as u64,
            action: Some(UsageRecordAction::Increment),
            timestamp: None,
        };

        match UsageRecord::create(client, &item_id, params).await {
            Ok(record) => {
                match ledger
                    .events
                    .record_usage(
                        row.lead_event_id,
                        record.id.as_str(),
                        Some(row.subscription_item_id.as_str()),
                    )
                    .await
                {
                    Ok(outcome) if outcome.already_recorded => {
                        // A concurrent cycle beat us to the persist.
                        tracing::warn!(
                            lead_event_id = %row.lead_event_id,
                            "Usage was recorded concurrently"
                        );
                    }
                    Ok(_) => reported += 1,
                    Err(e) => {
                        tracing::error!(
                            lead_event_id = %row.lead_event_id,
                            error = %e,
                            "Stripe usage created but persist failed; row may be re-reported"
                        );
                        errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    lead_event_id = %row.lead_event_id,
                    portal_key = %row.portal_key,
                    error = %e,
                    "Failed to create Stripe usage record"
                );
                errors += 1;
            }
        }
    }

    tracing::info!(
        total = total,
        reported = reported,
        errors = errors,
        "Usage report cycle complete"
    );
}
