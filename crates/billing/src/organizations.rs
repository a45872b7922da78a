//! Organization billing profiles.
//!
//! Organizations are identified by an immutable `portal_key` and are never
//! physically deleted. Updates are expressed as an explicit field-update set
//! (`Patch<T>`): omitted fields keep their stored value, so a partial PATCH
//! can never clobber configuration it did not mention.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use leadledger_shared::BillingModel;

use crate::error::{BillingError, BillingResult};
use crate::notifications::{NewNotification, NotificationQueue};

/// One field of an update: leave the stored value or overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    pub fn apply_to(self, slot: &mut T) {
        if let Patch::Set(value) = self {
            *slot = value;
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets, `None` keeps. Boundary DTOs map optional JSON fields
    /// through this, which means "explicitly set to null" is not expressible
    /// over the wire; no core operation needs it.
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(value) => Patch::Set(value),
            None => Patch::Keep,
        }
    }
}

/// A client organization's billing configuration.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub portal_key: String,
    pub name: Option<String>,
    pub billing_model: String,
    /// Cap on billable leads; None means uncapped.
    pub lead_commitment_total: Option<i32>,
    pub prepaid_lead_credits: i32,
    pub lead_unit_price_cents: Option<i32>,
    pub lead_charge_threshold: Option<i32>,
    pub desired_lead_volume_daily: Option<i32>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_subscription_item_id: Option<String>,
    pub onboarding_status: Option<String>,
    pub is_active: bool,
    pub notify_emails: Vec<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Field-update set for an organization upsert.
#[derive(Debug, Clone, Default)]
pub struct OrganizationPatch {
    pub name: Patch<Option<String>>,
    pub billing_model: Patch<BillingModel>,
    pub lead_commitment_total: Patch<Option<i32>>,
    pub prepaid_lead_credits: Patch<i32>,
    pub lead_unit_price_cents: Patch<Option<i32>>,
    pub lead_charge_threshold: Patch<Option<i32>>,
    pub desired_lead_volume_daily: Patch<Option<i32>>,
    pub stripe_customer_id: Patch<Option<String>>,
    pub stripe_subscription_id: Patch<Option<String>>,
    pub stripe_subscription_item_id: Patch<Option<String>>,
    pub onboarding_status: Patch<Option<String>>,
    pub is_active: Patch<bool>,
    pub notify_emails: Patch<Vec<String>>,
}

impl OrganizationPatch {
    fn apply_to(self, org: &mut Organization) {
        self.name.apply_to(&mut org.name);
        if let Patch::Set(model) = self.billing_model {
            org.billing_model = model.as_str().to_string();
        }
        self.lead_commitment_total
            .apply_to(&mut org.lead_commitment_total);
        self.prepaid_lead_credits
            .apply_to(&mut org.prepaid_lead_credits);
        self.lead_unit_price_cents
            .apply_to(&mut org.lead_unit_price_cents);
        self.lead_charge_threshold
            .apply_to(&mut org.lead_charge_threshold);
        self.desired_lead_volume_daily
            .apply_to(&mut org.desired_lead_volume_daily);
        self.stripe_customer_id
            .apply_to(&mut org.stripe_customer_id);
        self.stripe_subscription_id
            .apply_to(&mut org.stripe_subscription_id);
        self.stripe_subscription_item_id
            .apply_to(&mut org.stripe_subscription_item_id);
        self.onboarding_status.apply_to(&mut org.onboarding_status);
        self.is_active.apply_to(&mut org.is_active);
        self.notify_emails.apply_to(&mut org.notify_emails);
    }
}

/// Raw onboarding answers as submitted by the client.
#[derive(Debug, Clone)]
pub struct OnboardingForm {
    pub portal_key: String,
    pub company_name: Option<String>,
    pub billing_model: Option<BillingModel>,
    pub lead_commitment_total: Option<i32>,
    pub prepaid_lead_credits: Option<i32>,
    /// Submitted as free-form numbers; floored to integers before storage.
    pub desired_lead_volume_daily: Option<f64>,
    pub lead_charge_threshold: Option<f64>,
    pub lead_unit_price_cents: Option<f64>,
    pub notify_emails: Option<Vec<String>>,
    pub answers: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UpsertOutcome {
    pub created: bool,
    pub organization_id: Uuid,
}

const ORG_COLUMNS: &str = r#"
    id, portal_key, name, billing_model, lead_commitment_total,
    prepaid_lead_credits, lead_unit_price_cents, lead_charge_threshold,
    desired_lead_volume_daily, stripe_customer_id, stripe_subscription_id,
    stripe_subscription_item_id, onboarding_status, is_active, notify_emails,
    created_at, updated_at
"#;

/// Store for organization billing profiles.
#[derive(Clone)]
pub struct OrganizationStore {
    pool: PgPool,
    notifications: NotificationQueue,
}

impl OrganizationStore {
    pub fn new(pool: PgPool, notifications: NotificationQueue) -> Self {
        Self {
            pool,
            notifications,
        }
    }

    /// Single lookup by unique key. `None` means unknown portal; callers
    /// that require the organization must fail loudly, never default.
    pub async fn get_by_portal_key(&self, portal_key: &str) -> BillingResult<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE portal_key = $1"
        ))
        .bind(portal_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    /// Fetch within a caller's transaction. Used by the ledger and the
    /// replacement engine so they read billing parameters under the same
    /// transaction that writes against them.
    pub(crate) async fn fetch_by_portal_key(
        conn: &mut PgConnection,
        portal_key: &str,
    ) -> BillingResult<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE portal_key = $1"
        ))
        .bind(portal_key)
        .fetch_optional(conn)
        .await?;

        Ok(org)
    }

    /// Patch the organization if it exists, insert it otherwise.
    pub async fn upsert_by_portal_key(
        &self,
        portal_key: &str,
        patch: OrganizationPatch,
    ) -> BillingResult<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::upsert_in_tx(&mut tx, portal_key, patch).await?;
        tx.commit().await?;

        tracing::info!(
            portal_key = %portal_key,
            organization_id = %outcome.organization_id,
            created = outcome.created,
            "Upserted organization"
        );

        Ok(outcome)
    }

    /// Onboarding submission: same upsert, but forces the onboarding status
    /// and activity flag, floors the numeric answers, and always captures an
    /// immutable submission record, even when the organization already
    /// existed.
    pub async fn submit_onboarding(&self, form: OnboardingForm) -> BillingResult<UpsertOutcome> {
        let patch = OrganizationPatch {
            name: form.company_name.clone().map(Some).into(),
            billing_model: form.billing_model.into(),
            lead_commitment_total: form.lead_commitment_total.map(Some).into(),
            prepaid_lead_credits: form.prepaid_lead_credits.into(),
            desired_lead_volume_daily: form
                .desired_lead_volume_daily
                .map(|v| Some(v.floor() as i32))
                .into(),
            lead_charge_threshold: form
                .lead_charge_threshold
                .map(|v| Some(v.floor() as i32))
                .into(),
            lead_unit_price_cents: form
                .lead_unit_price_cents
                .map(|v| Some(v.floor() as i32))
                .into(),
            notify_emails: form.notify_emails.clone().into(),
            onboarding_status: Patch::Set(Some("submitted".to_string())),
            is_active: Patch::Set(true),
            ..Default::default()
        };

        let mut tx = self.pool.begin().await?;
        let outcome = Self::upsert_in_tx(&mut tx, &form.portal_key, patch).await?;

        sqlx::query(
            r#"
            INSERT INTO onboarding_submissions (organization_id, portal_key, answers)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(outcome.organization_id)
        .bind(&form.portal_key)
        .bind(&form.answers)
        .execute(&mut *tx)
        .await?;

        let company = form.company_name.as_deref().unwrap_or(&form.portal_key);
        self.notifications
            .enqueue(
                &mut tx,
                NewNotification {
                    organization_id: Some(outcome.organization_id),
                    portal_key: Some(form.portal_key.clone()),
                    kind: "onboarding_submitted",
                    subject: format!("Onboarding submitted: {company}"),
                    body: format!(
                        "Organization {} ({}) submitted its onboarding form.",
                        company, form.portal_key
                    ),
                    payload: form.answers.clone(),
                    recipients: Vec::new(),
                },
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            portal_key = %form.portal_key,
            organization_id = %outcome.organization_id,
            created = outcome.created,
            "Onboarding submission recorded"
        );

        Ok(outcome)
    }

    /// Insert-or-patch under the caller's transaction. The bare INSERT with
    /// ON CONFLICT DO NOTHING claims creation; whichever way that goes, the
    /// row is then locked and patched, so a concurrent upsert of the same
    /// portal key serializes on the row lock.
    pub(crate) async fn upsert_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        portal_key: &str,
        patch: OrganizationPatch,
    ) -> BillingResult<UpsertOutcome> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO organizations (portal_key)
            VALUES ($1)
            ON CONFLICT (portal_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(portal_key)
        .fetch_optional(&mut **tx)
        .await?;
        let created = inserted.is_some();

        let mut org = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE portal_key = $1 FOR UPDATE"
        ))
        .bind(portal_key)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| {
            BillingError::Database(format!("organization {portal_key} vanished mid-upsert"))
        })?;

        patch.apply_to(&mut org);

        sqlx::query(
            r#"
            UPDATE organizations
            SET name = $2,
                billing_model = $3,
                lead_commitment_total = $4,
                prepaid_lead_credits = $5,
                lead_unit_price_cents = $6,
                lead_charge_threshold = $7,
                desired_lead_volume_daily = $8,
                stripe_customer_id = $9,
                stripe_subscription_id = $10,
                stripe_subscription_item_id = $11,
                onboarding_status = $12,
                is_active = $13,
                notify_emails = $14,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.billing_model)
        .bind(org.lead_commitment_total)
        .bind(org.prepaid_lead_credits)
        .bind(org.lead_unit_price_cents)
        .bind(org.lead_charge_threshold)
        .bind(org.desired_lead_volume_daily)
        .bind(&org.stripe_customer_id)
        .bind(&org.stripe_subscription_id)
        .bind(&org.stripe_subscription_item_id)
        .bind(&org.onboarding_status)
        .bind(org.is_active)
        .bind(&org.notify_emails)
        .execute(&mut **tx)
        .await?;

        Ok(UpsertOutcome {
            created,
            organization_id: org.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_org() -> Organization {
        Organization {
            id: Uuid::new_v4(),
            portal_key: "acme".to_string(),
            name: Some("Acme".to_string()),
            billing_model: "pay_per_lead".to_string(),
            lead_commitment_total: Some(100),
            prepaid_lead_credits: 5,
            lead_unit_price_cents: Some(4000),
            lead_charge_threshold: None,
            desired_lead_volume_daily: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            stripe_subscription_item_id: None,
            onboarding_status: None,
            is_active: true,
            notify_emails: vec!["ops@acme.test".to_string()],
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_patch_defaults_keep_everything() {
        let mut org = sample_org();
        let before = org.clone();
        OrganizationPatch::default().apply_to(&mut org);
        assert_eq!(org.name, before.name);
        assert_eq!(org.lead_commitment_total, before.lead_commitment_total);
        assert_eq!(org.prepaid_lead_credits, before.prepaid_lead_credits);
        assert_eq!(org.is_active, before.is_active);
    }

    #[test]
    fn test_patch_sets_only_supplied_fields() {
        let mut org = sample_org();
        let patch = OrganizationPatch {
            prepaid_lead_credits: Patch::Set(20),
            lead_commitment_total: Patch::Set(None),
            ..Default::default()
        };
        patch.apply_to(&mut org);
        assert_eq!(org.prepaid_lead_credits, 20);
        assert_eq!(org.lead_commitment_total, None, "explicit Set(None) clears");
        assert_eq!(org.name.as_deref(), Some("Acme"), "omitted field kept");
    }

    #[test]
    fn test_patch_from_option() {
        assert_eq!(Patch::from(Some(3)), Patch::Set(3));
        assert_eq!(Patch::<i32>::from(None), Patch::Keep);
        assert!(!Patch::<i32>::Keep.is_set());
    }
}
