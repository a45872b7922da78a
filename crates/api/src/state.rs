//! Application state

use std::sync::Arc;

use leadledger_billing::LedgerService;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ledger: Arc<LedgerService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let ledger = Arc::new(LedgerService::from_env(pool));
        tracing::info!("Ledger service initialized");

        Self { config, ledger }
    }
}
