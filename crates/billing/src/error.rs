//! Error taxonomy for the billing core.
//!
//! Unauthorized, NotFound and InvalidArgument abort the whole operation with
//! no partial writes (every public operation runs in one transaction). The
//! duplicate-delivery and resolution no-op paths are NOT errors; they are
//! structured successful outcomes carried on the result types.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Shared-secret mismatch. Checked before any other validation.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown portal key.
    #[error("unknown portal key: {0}")]
    OrgNotFound(String),

    /// Unknown lead/request id, or an id belonging to a different organization.
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}
