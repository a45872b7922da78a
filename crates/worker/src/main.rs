//! LeadLedger Background Worker
//!
//! Handles scheduled jobs including:
//! - Metered usage reporting to Stripe (every 15 minutes)
//! - Notification queue processing (every minute)
//! - Notification queue cleanup (daily at 3:00 AM UTC)

mod notification_processor;
mod usage_reporter;

use std::sync::Arc;
use std::time::Duration;

use leadledger_billing::LedgerService;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

const NOTIFICATION_RETENTION_DAYS: i32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting LeadLedger Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = leadledger_shared::create_pool(&database_url).await?;

    let ledger = Arc::new(LedgerService::from_env(pool.clone()));

    // Stripe is optional: without a key the worker still drains notifications.
    let stripe_client = match std::env::var("STRIPE_SECRET_KEY") {
        Ok(key) if !key.trim().is_empty() => Some(stripe::Client::new(key)),
        _ => {
            warn!("STRIPE_SECRET_KEY not set - usage reporting disabled");
            None
        }
    };

    let resend_api_key = std::env::var("RESEND_API_KEY").unwrap_or_default();
    let from_address = std::env::var("LEDGER_EMAIL_FROM")
        .unwrap_or_else(|_| "LeadLedger <billing@leadledger.local>".to_string());
    if resend_api_key.is_empty() {
        warn!("RESEND_API_KEY not set - notification delivery disabled");
    }

    let scheduler = JobScheduler::new().await?;

    // Job 1: Report billable usage to Stripe (every 15 minutes)
    if let Some(client) = stripe_client {
        let usage_pool = pool.clone();
        let usage_ledger = ledger.clone();
        scheduler
            .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
                let pool = usage_pool.clone();
                let ledger = usage_ledger.clone();
                let client = client.clone();
                Box::pin(async move {
                    info!("Running metered usage report to Stripe");
                    usage_reporter::report_unrecorded_usage(&pool, &ledger, &client).await;
                })
            })?)
            .await?;
        info!("Scheduled: Metered usage report (every 15 minutes)");
    }

    // Job 2: Process notification queue (every minute)
    let notify_pool = pool.clone();
    let notify_api_key = resend_api_key.clone();
    let notify_from = from_address.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let pool = notify_pool.clone();
            let api_key = notify_api_key.clone();
            let from = notify_from.clone();
            Box::pin(async move {
                let http_client = reqwest::Client::new();
                notification_processor::process_notification_queue(
                    &pool,
                    &http_client,
                    &api_key,
                    &from,
                )
                .await;
            })
        })?)
        .await?;
    info!("Scheduled: Notification queue processing (every minute)");

    // Job 3: Cleanup old sent notifications (daily at 3:00 AM UTC)
    let cleanup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let pool = cleanup_pool.clone();
            Box::pin(async move {
                info!("Running notification queue cleanup");
                notification_processor::prune_sent_notifications(
                    &pool,
                    NOTIFICATION_RETENTION_DAYS,
                )
                .await;
            })
        })?)
        .await?;
    info!("Scheduled: Notification queue cleanup (daily at 3:00 AM)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    // Keep the main task running; the scheduler runs jobs in background tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
