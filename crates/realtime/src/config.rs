use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub socket_base_url: String,
    pub store_url: String,
    pub store_auth_token: Option<String>,
    pub auth_token_path: Option<PathBuf>,
    pub offline_db_url: String,
    pub probe_url: Option<String>,
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    pub heartbeat_interval: Duration,
    pub retry: RetryPolicy,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let retry = RetryPolicy::new(
            Duration::from_secs(env_or("RECONNECT_INTERVAL_SECS", 3)?),
            env_or("MAX_RECONNECT_ATTEMPTS", 5)?,
        );

        Ok(Self {
            api_base_url: std::env::var("API_BASE_URL")
                .context("Cannot load API_BASE_URL env variable")?,
            socket_base_url: std::env::var("SOCKET_BASE_URL")
                .context("Cannot load SOCKET_BASE_URL env variable")?,
            store_url: std::env::var("STORE_DATABASE_URL")
                .context("Cannot load STORE_DATABASE_URL env variable")?,
            store_auth_token: std::env::var("STORE_AUTH_TOKEN").ok(),
            auth_token_path: std::env::var("AUTH_TOKEN_PATH").ok().map(PathBuf::from),
            offline_db_url: std::env::var("OFFLINE_DB_URL")
                .unwrap_or_else(|_| "sqlite://judge-sync.db".to_string()),
            probe_url: std::env::var("PROBE_URL").ok(),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 10)?),
            probe_interval: Duration::from_secs(env_or("PROBE_INTERVAL_SECS", 30)?),
            heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_INTERVAL_SECS", 30)?),
            retry,
        })
    }

    /// Liveness probe target; the API root unless overridden.
    pub fn probe_target(&self) -> &str {
        self.probe_url.as_deref().unwrap_or(&self.api_base_url)
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a number", name)),
        Err(_) => Ok(default),
    }
}
