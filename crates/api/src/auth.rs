//! Shared-secret request authentication.
//!
//! Every ledger operation carries the secret in the `x-ledger-secret`
//! header. The comparison is constant-time and happens before any other
//! validation.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use leadledger_billing::BillingError;

use crate::error::ApiError;
use crate::state::AppState;

pub const SECRET_HEADER: &str = "x-ledger-secret";

/// Constant-time equality over the raw header bytes.
pub fn secret_matches(expected: &str, supplied: &[u8]) -> bool {
    expected.as_bytes().ct_eq(supplied).into()
}

/// Middleware rejecting any call whose secret does not match.
pub async fn require_shared_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let supplied = request
        .headers()
        .get(SECRET_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    if !secret_matches(&state.config.shared_secret, supplied) {
        return Err(ApiError(BillingError::Unauthorized));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches_exact() {
        assert!(secret_matches("s3cret", b"s3cret"));
    }

    #[test]
    fn test_secret_rejects_mismatch() {
        assert!(!secret_matches("s3cret", b"s3cres"));
        assert!(!secret_matches("s3cret", b"s3cret "));
        assert!(!secret_matches("s3cret", b""));
    }
}
