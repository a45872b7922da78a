//! Route handlers.
//!
//! Each route delegates 1:1 to a core operation. Requests and responses are
//! plain structured records; timestamps cross the wire as epoch milliseconds.

use axum::{
    extract::{Path, State},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use leadledger_billing::{
    BillingError, DeliveryOutcome, DeliveryRequest, OnboardingForm, OrganizationPatch,
    OrganizationSnapshot, Resolution, ResolveOutcome, SubmitOutcome, SubmitRequest, UpsertOutcome,
    UsageOutcome,
};
use leadledger_shared::BillingModel;

use crate::auth::require_shared_secret;
use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/leads", post(deliver_lead))
        .route("/v1/replacements", post(submit_replacement))
        .route("/v1/replacements/{id}/resolve", post(resolve_replacement))
        .route("/v1/usage", post(record_usage))
        .route("/v1/invoices", post(record_invoice))
        .route("/v1/onboarding", post(submit_onboarding))
        .route("/v1/organizations/{portal_key}", put(upsert_organization))
        .route(
            "/v1/organizations/{portal_key}/snapshot",
            get(get_snapshot),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_shared_secret,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn from_epoch_ms(ms: i64) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|_| {
        ApiError(BillingError::InvalidArgument(format!(
            "invalid epoch-ms timestamp: {ms}"
        )))
    })
}

#[derive(Debug, Deserialize)]
struct DeliverLeadBody {
    portal_key: String,
    source_external_id: String,
    source: Option<String>,
    idempotency_key: Option<String>,
    quantity: Option<f64>,
    /// Epoch milliseconds; defaults to now.
    delivered_at: Option<i64>,
}

async fn deliver_lead(
    State(state): State<AppState>,
    Json(body): Json<DeliverLeadBody>,
) -> Result<Json<DeliveryOutcome>, ApiError> {
    let delivered_at = body.delivered_at.map(from_epoch_ms).transpose()?;
    let outcome = state
        .ledger
        .ledger
        .record_delivery(DeliveryRequest {
            portal_key: body.portal_key,
            source_external_id: body.source_external_id,
            source: body.source,
            idempotency_key: body.idempotency_key,
            quantity: body.quantity,
            delivered_at,
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct SubmitReplacementBody {
    portal_key: String,
    lead_event_id: Option<Uuid>,
    source_external_id: Option<String>,
    reason: String,
    /// Epoch milliseconds; defaults to the submission time.
    contact_attempted_at: Option<i64>,
}

async fn submit_replacement(
    State(state): State<AppState>,
    Json(body): Json<SubmitReplacementBody>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let contact_attempted_at = body.contact_attempted_at.map(from_epoch_ms).transpose()?;
    let outcome = state
        .ledger
        .replacements
        .submit_request(SubmitRequest {
            portal_key: body.portal_key,
            lead_event_id: body.lead_event_id,
            source_external_id: body.source_external_id,
            reason: body.reason,
            contact_attempted_at,
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ResolveReplacementBody {
    decision: Resolution,
    resolved_by: Option<String>,
    notes: Option<String>,
}

async fn resolve_replacement(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ResolveReplacementBody>,
) -> Result<Json<ResolveOutcome>, ApiError> {
    let outcome = state
        .ledger
        .replacements
        .resolve_request(
            request_id,
            body.decision,
            body.resolved_by.as_deref(),
            body.notes.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct RecordUsageBody {
    lead_event_id: Uuid,
    usage_record_id: String,
    subscription_item_id: Option<String>,
}

async fn record_usage(
    State(state): State<AppState>,
    Json(body): Json<RecordUsageBody>,
) -> Result<Json<UsageOutcome>, ApiError> {
    let outcome = state
        .ledger
        .events
        .record_usage(
            body.lead_event_id,
            &body.usage_record_id,
            body.subscription_item_id.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct RecordInvoiceBody {
    portal_key: String,
    invoice_id: String,
    status: String,
    amount_cents: Option<i64>,
    invoice_url: Option<String>,
}

async fn record_invoice(
    State(state): State<AppState>,
    Json(body): Json<RecordInvoiceBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let billing_event_id = state
        .ledger
        .events
        .record_invoice(
            &body.portal_key,
            &body.invoice_id,
            &body.status,
            body.amount_cents,
            body.invoice_url.as_deref(),
        )
        .await?;

    Ok(Json(
        serde_json::json!({ "billing_event_id": billing_event_id }),
    ))
}

#[derive(Debug, Deserialize)]
struct OnboardingBody {
    portal_key: String,
    company_name: Option<String>,
    billing_model: Option<BillingModel>,
    lead_commitment_total: Option<i32>,
    prepaid_lead_credits: Option<i32>,
    desired_lead_volume_daily: Option<f64>,
    lead_charge_threshold: Option<f64>,
    lead_unit_price_cents: Option<f64>,
    notify_emails: Option<Vec<String>>,
    /// Raw captured answers, stored verbatim on the submission record.
    answers: Option<serde_json::Value>,
}

async fn submit_onboarding(
    State(state): State<AppState>,
    Json(body): Json<OnboardingBody>,
) -> Result<Json<UpsertOutcome>, ApiError> {
    let outcome = state
        .ledger
        .organizations
        .submit_onboarding(OnboardingForm {
            portal_key: body.portal_key,
            company_name: body.company_name,
            billing_model: body.billing_model,
            lead_commitment_total: body.lead_commitment_total,
            prepaid_lead_credits: body.prepaid_lead_credits,
            desired_lead_volume_daily: body.desired_lead_volume_daily,
            lead_charge_threshold: body.lead_charge_threshold,
            lead_unit_price_cents: body.lead_unit_price_cents,
            notify_emails: body.notify_emails,
            answers: body.answers.unwrap_or_else(|| serde_json::json!({})),
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct UpsertOrganizationBody {
    name: Option<String>,
    billing_model: Option<BillingModel>,
    lead_commitment_total: Option<i32>,
    prepaid_lead_credits: Option<i32>,
    lead_unit_price_cents: Option<i32>,
    lead_charge_threshold: Option<i32>,
    desired_lead_volume_daily: Option<i32>,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    stripe_subscription_item_id: Option<String>,
    is_active: Option<bool>,
    notify_emails: Option<Vec<String>>,
}

async fn upsert_organization(
    State(state): State<AppState>,
    Path(portal_key): Path<String>,
    Json(body): Json<UpsertOrganizationBody>,
) -> Result<Json<UpsertOutcome>, ApiError> {
    let patch = OrganizationPatch {
        name: body.name.map(Some).into(),
        billing_model: body.billing_model.into(),
        lead_commitment_total: body.lead_commitment_total.map(Some).into(),
        prepaid_lead_credits: body.prepaid_lead_credits.into(),
        lead_unit_price_cents: body.lead_unit_price_cents.map(Some).into(),
        lead_charge_threshold: body.lead_charge_threshold.map(Some).into(),
        desired_lead_volume_daily: body.desired_lead_volume_daily.map(Some).into(),
        stripe_customer_id: body.stripe_customer_id.map(Some).into(),
        stripe_subscription_id: body.stripe_subscription_id.map(Some).into(),
        stripe_subscription_item_id: body.stripe_subscription_item_id.map(Some).into(),
        is_active: body.is_active.into(),
        notify_emails: body.notify_emails.into(),
        ..Default::default()
    };

    let outcome = state
        .ledger
        .organizations
        .upsert_by_portal_key(&portal_key, patch)
        .await?;

    Ok(Json(outcome))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(portal_key): Path<String>,
) -> Result<Json<Option<OrganizationSnapshot>>, ApiError> {
    let snapshot = state.ledger.reporting.get_snapshot(&portal_key).await?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epoch_ms_round_trip() {
        let ts = from_epoch_ms(1_700_000_000_000).unwrap();
        assert_eq!(ts.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_resolution_deserializes_snake_case() {
        let body: ResolveReplacementBody =
            serde_json::from_str(r#"{"decision": "approve"}"#).unwrap();
        assert_eq!(body.decision, Resolution::Approve);
        assert!(serde_json::from_str::<ResolveReplacementBody>(r#"{"decision": "escalate"}"#)
            .is_err());
    }
}
