use std::time::Duration;

use anyhow::{Context, Result};
use clusterboard_reconcile::{DEFAULT_POLL_INTERVAL, DEFAULT_RECONCILE_TIMEOUT};

use crate::db::DbConfig;
use crate::source::SourceSpec;

/// Bound on one snapshot command run.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceSpec,
    pub poll_interval: Duration,
    pub reconcile_timeout: Duration,
    pub source_timeout: Duration,
    pub log_level: String,
    pub persist: bool,
    pub run_migrations: bool,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source = std::env::var("CLUSTERBOARD_SOURCE")
            .context("CLUSTERBOARD_SOURCE must be set (file:<path> or cmd:<command>)")?
            .parse::<SourceSpec>()
            .context("invalid CLUSTERBOARD_SOURCE")?;

        let poll_interval = secs_var("CLUSTERBOARD_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?;
        let reconcile_timeout =
            secs_var("CLUSTERBOARD_RECONCILE_TIMEOUT_SECS", DEFAULT_RECONCILE_TIMEOUT)?;
        let source_timeout =
            secs_var("CLUSTERBOARD_SOURCE_TIMEOUT_SECS", DEFAULT_SOURCE_TIMEOUT)?;

        let log_level =
            std::env::var("CLUSTERBOARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let persist = flag_var("CLUSTERBOARD_PERSIST");
        let run_migrations = flag_var("CLUSTERBOARD_RUN_MIGRATIONS");

        let database = DbConfig::from_env();

        Ok(Self {
            source,
            poll_interval,
            reconcile_timeout,
            source_timeout,
            log_level,
            persist,
            run_migrations,
            database,
        })
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    let secs = match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{name} must be a whole number of seconds"))?,
        Err(_) => default.as_secs(),
    };
    if secs == 0 {
        anyhow::bail!("{name} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

fn flag_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
