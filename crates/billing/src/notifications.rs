//! Notification enqueue.
//!
//! The core's entire contract with the dispatch mechanism is inserting
//! pending rows, one per recipient address. Sending, retrying and failure
//! handling belong to the worker that drains the queue; nothing here knows
//! how or when that happens.

use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::BillingResult;

/// Notification to enqueue. `recipients` are the organization-specific
/// addresses; the queue adds its configured fallback inbox.
#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub organization_id: Option<Uuid>,
    pub portal_key: Option<String>,
    pub kind: &'a str,
    pub subject: String,
    pub body: String,
    pub payload: Value,
    pub recipients: Vec<String>,
}

/// Split a comma-separated address list, dropping blanks.
fn parse_recipient_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct NotificationQueue {
    /// Operations inbox(es) appended to every notification.
    fallback_recipients: Vec<String>,
}

impl NotificationQueue {
    pub fn new(fallback_recipients: Vec<String>) -> Self {
        Self {
            fallback_recipients,
        }
    }

    /// Read the fallback inbox list from `LEDGER_NOTIFY_EMAILS`
    /// (comma-separated). Missing or empty is allowed; notifications without
    /// any recipient are dropped with a log line.
    pub fn from_env() -> Self {
        Self::new(parse_recipient_list(
            &std::env::var("LEDGER_NOTIFY_EMAILS").unwrap_or_default(),
        ))
    }

    /// Insert one pending row per recipient under the caller's transaction.
    /// Returns the number of rows enqueued.
    pub async fn enqueue(
        &self,
        conn: &mut PgConnection,
        notification: NewNotification<'_>,
    ) -> BillingResult<usize> {
        let mut recipients = notification.recipients;
        recipients.extend(self.fallback_recipients.iter().cloned());
        recipients.sort();
        recipients.dedup();

        if recipients.is_empty() {
            tracing::debug!(
                kind = %notification.kind,
                portal_key = ?notification.portal_key,
                "No recipients configured, dropping notification"
            );
            return Ok(0);
        }

        for recipient in &recipients {
            sqlx::query(
                r#"
                INSERT INTO notification_queue (
                    organization_id, portal_key, kind, channel,
                    recipient, status, subject, body, payload
                )
                VALUES ($1, $2, $3, 'email', $4, 'pending', $5, $6, $7)
                "#,
            )
            .bind(notification.organization_id)
            .bind(&notification.portal_key)
            .bind(notification.kind)
            .bind(recipient)
            .bind(&notification.subject)
            .bind(&notification.body)
            .bind(&notification.payload)
            .execute(&mut *conn)
            .await?;
        }

        tracing::debug!(
            kind = %notification.kind,
            recipients = recipients.len(),
            "Enqueued notification"
        );

        Ok(recipients.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipient_list() {
        assert_eq!(
            parse_recipient_list("ops@vendor.test, billing@vendor.test"),
            vec!["ops@vendor.test", "billing@vendor.test"]
        );
        assert!(parse_recipient_list("").is_empty());
        assert!(parse_recipient_list(" , ,").is_empty());
    }
}
