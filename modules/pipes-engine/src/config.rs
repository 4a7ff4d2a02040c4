use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipesError, Result};

/// Pipes runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipesConfig {
    pub database_url: Option<String>,

    // Worker pool
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub lease: Duration,
    pub max_attempts: i32,
    pub retry_base: Duration,

    // Worker
    pub commit_attempts: u32,
}

impl Default for PipesConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            worker_concurrency: 4,
            poll_interval: Duration::from_millis(250),
            batch_size: 16,
            lease: Duration::from_secs(30),
            max_attempts: 10,
            retry_base: Duration::from_millis(500),
            commit_attempts: 8,
        }
    }
}

impl PipesConfig {
    /// Load from the environment (and `.env` if present). Unset variables
    /// keep their defaults; set but unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            database_url: env::var("DATABASE_URL").ok(),
            worker_concurrency: parse_env(
                "PIPES_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            poll_interval: Duration::from_millis(parse_env(
                "PIPES_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            batch_size: parse_env("PIPES_BATCH_SIZE", defaults.batch_size)?,
            lease: Duration::from_secs(parse_env("PIPES_LEASE_SECS", defaults.lease.as_secs())?),
            max_attempts: parse_env("PIPES_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_base: Duration::from_millis(parse_env(
                "PIPES_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )?),
            commit_attempts: parse_env("PIPES_COMMIT_ATTEMPTS", defaults.commit_attempts)?,
        };

        config.validate()?;
        config.log_settings();
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            return Err(PipesError::Config("PIPES_WORKER_CONCURRENCY must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PipesError::Config("PIPES_BATCH_SIZE must be at least 1".into()));
        }
        if self.max_attempts < 1 {
            return Err(PipesError::Config("PIPES_MAX_ATTEMPTS must be at least 1".into()));
        }
        Ok(())
    }

    fn log_settings(&self) {
        tracing::info!("Pipes config loaded:");
        tracing::info!(
            "  DATABASE_URL: {}",
            if self.database_url.is_some() { "<set>" } else { "<not set>" }
        );
        tracing::info!("  PIPES_WORKER_CONCURRENCY: {}", self.worker_concurrency);
        tracing::info!("  PIPES_POLL_INTERVAL_MS: {}", self.poll_interval.as_millis());
        tracing::info!("  PIPES_BATCH_SIZE: {}", self.batch_size);
        tracing::info!("  PIPES_LEASE_SECS: {}", self.lease.as_secs());
        tracing::info!("  PIPES_MAX_ATTEMPTS: {}", self.max_attempts);
        tracing::info!("  PIPES_RETRY_BASE_MS: {}", self.retry_base.as_millis());
        tracing::info!("  PIPES_COMMIT_ATTEMPTS: {}", self.commit_attempts);
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| PipesError::Config(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
