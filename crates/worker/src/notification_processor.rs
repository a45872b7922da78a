//! Notification queue processing.
//!
//! Drains pending rows enqueued by the billing core and delivers them over
//! the configured email API. Rows are claimed with SKIP LOCKED so multiple
//! workers can drain concurrently; a row that keeps failing is parked as
//! `failed` after `MAX_ATTEMPTS`.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

const BATCH_LIMIT: i64 = 25;
const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, sqlx::FromRow)]
struct PendingNotification {
    id: Uuid,
    recipient: String,
    subject: String,
    body: String,
    attempts: i32,
}

/// Deliver one batch of pending notifications.
pub async fn process_notification_queue(
    pool: &PgPool,
    http_client: &reqwest::Client,
    api_key: &str,
    from_address: &str,
) {
    if api_key.is_empty() {
        tracing::debug!("Email API key not configured, skipping notification queue");
        return;
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(error = %e, "Failed to begin notification transaction");
            return;
        }
    };

    let pending: Vec<PendingNotification> = match sqlx::query_as(
        r#"
        SELECT id, recipient, subject, body, attempts
        FROM notification_queue
        WHERE status = 'pending'
        ORDER BY created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(BATCH_LIMIT)
    .fetch_all(&mut *tx)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to fetch pending notifications");
            return;
        }
    };

    if pending.is_empty() {
        return;
    }

    let total = pending.len();
    let mut sent = 0;
    let mut failed = 0;

    for notification in pending {
        let delivery = http_client
            .post("https://api.resend.com/emails")
            .bearer_auth(api_key)
            .json(&json!({
                "from": from_address,
                "to": [notification.recipient],
                "subject": notification.subject,
                "text": notification.body,
            }))
            .send()
            .await
            .and_then(|response| response.error_for_status());

        let result = match delivery {
            Ok(_) => {
                sent += 1;
                sqlx::query(
                    r#"
                    UPDATE notification_queue
                    SET status = 'sent', sent_at = NOW(), attempts = attempts + 1
                    WHERE id = $1
                    "#,
                )
                .bind(notification.id)
                .execute(&mut *tx)
                .await
            }
            Err(e) => {
                failed += 1;
                let exhausted = notification.attempts + 1 >= MAX_ATTEMPTS;
                let status = if exhausted { "failed" } else { "pending" };
                tracing::warn!(
                    notification_id = %notification.id,
                    attempts = notification.attempts + 1,
                    exhausted = exhausted,
                    error = %e,
                    "Notification delivery failed"
                );
                sqlx::query(
                    r#"
                    UPDATE notification_queue
                    SET status = $2, attempts = attempts + 1, last_error = $3
                    WHERE id = $1
                    "#,
                )
                .bind(notification.id)
                .bind(status)
                .bind(e.to_string())
                .execute(&mut *tx)
                .await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to update notification status"
            );
        }
    }

    if let Err(e) = tx.commit().await {
        tracing::error!(error = %e, "Failed to commit notification batch");
        return;
    }

    tracing::info!(
        total = total,
        sent = sent,
        failed = failed,
        "Notification queue cycle complete"
    );
}

/// Delete sent notifications older than the retention window.
pub async fn prune_sent_notifications(pool: &PgPool, keep_days: i32) {
    let result = sqlx::query(
        r#"
        DELETE FROM notification_queue
        WHERE status = 'sent'
          AND sent_at < NOW() - ($1 || ' days')::INTERVAL
        "#,
    )
    .bind(keep_days)
    .execute(pool)
    .await;

    match result {
        Ok(r) => tracing::info!(deleted = r.rows_affected(), "Pruned sent notifications"),
        Err(e) => tracing::error!(error = %e, "Notification prune failed"),
    }
}
