//! Server configuration from the environment.

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Shared secret required on every call.
    pub shared_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            shared_secret: std::env::var("LEDGER_SHARED_SECRET")
                .map_err(|_| anyhow::anyhow!("LEDGER_SHARED_SECRET environment variable required"))
                .and_then(|secret| {
                    if secret.trim().is_empty() {
                        anyhow::bail!("LEDGER_SHARED_SECRET cannot be empty");
                    }
                    Ok(secret)
                })?,
        };

        tracing::info!("Configuration loaded");
        tracing::debug!("Bind address: {}", config.bind_address);

        Ok(config)
    }
}
