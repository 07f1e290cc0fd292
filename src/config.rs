//! Configuration for the coordinator host
//!
//! CLI arguments and environment variables are parsed with clap and turned into
//! a [`CoordinatorConfig`]. Tests build the config directly.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::constants::{
    APP_DIR, DB_FILENAME, DEFAULT_BACKEND_URL, HEALTH_CHECK_INTERVAL_SECS, MAX_POLL_FAILURES,
    POLL_DELAY_MAX_MS, POLL_DELAY_QUEUED_MS, POLL_DELAY_RUNNING_MS, REQUEST_TIMEOUT_SECS,
    STALE_JOB_TIMEOUT_SECS,
};

/// KiCad Courier - background coordinator for EasyEDA to KiCad conversions
#[derive(Parser, Debug, Clone)]
#[command(name = "kicad-courier")]
#[command(about = "Coordinates conversion jobs and KiCad library inventory against a conversion backend")]
#[command(version)]
pub struct Args {
    /// SQLite file holding persisted coordinator state
    #[arg(long, env = "KICAD_COURIER_DB")]
    pub db_path: Option<PathBuf>,

    /// Backend base URL used until the operator saves a different one
    #[arg(long, env = "KICAD_COURIER_BACKEND", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Seconds between background health checks
    #[arg(long, env = "KICAD_COURIER_HEALTH_INTERVAL", default_value_t = HEALTH_CHECK_INTERVAL_SECS)]
    pub health_interval_secs: u64,

    /// Per-request timeout for backend calls
    #[arg(long, env = "KICAD_COURIER_REQUEST_TIMEOUT", default_value_t = REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn into_config(self) -> anyhow::Result<CoordinatorConfig> {
        let db_path = match self.db_path {
            Some(p) => p,
            None => default_db_path()?,
        };

        Ok(CoordinatorConfig {
            db_path,
            default_backend_url: self.backend_url,
            health_interval: Duration::from_secs(self.health_interval_secs.max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            ..CoordinatorConfig::default()
        })
    }
}

/// Runtime knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub db_path: PathBuf,
    /// Seeds `Settings::backend_url` when nothing is persisted yet.
    pub default_backend_url: String,
    pub health_interval: Duration,
    pub request_timeout: Duration,
    pub poll_delay_queued: Duration,
    pub poll_delay_running: Duration,
    /// Ceiling for the doubling backoff after failed polls.
    pub poll_delay_max: Duration,
    pub max_poll_failures: u32,
    /// A job whose status and progress stay unchanged this long is abandoned.
    pub stale_job_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DB_FILENAME),
            default_backend_url: DEFAULT_BACKEND_URL.to_string(),
            health_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            poll_delay_queued: Duration::from_millis(POLL_DELAY_QUEUED_MS),
            poll_delay_running: Duration::from_millis(POLL_DELAY_RUNNING_MS),
            poll_delay_max: Duration::from_millis(POLL_DELAY_MAX_MS),
            max_poll_failures: MAX_POLL_FAILURES,
            stale_job_timeout: Duration::from_secs(STALE_JOB_TIMEOUT_SECS),
        }
    }
}

/// Default state database: ~/.kicad-courier/state.db
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.home_dir().join(APP_DIR).join(DB_FILENAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_into_config_keeps_overrides() {
        let args = Args::parse_from([
            "kicad-courier",
            "--db-path",
            "/tmp/courier.db",
            "--backend-url",
            "http://10.0.0.5:9000",
            "--health-interval-secs",
            "0",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/courier.db"));
        assert_eq!(config.default_backend_url, "http://10.0.0.5:9000");
        // Zero would spin the health timer
        assert_eq!(config.health_interval, Duration::from_secs(1));
        assert_eq!(config.poll_delay_queued, Duration::from_millis(2000));
    }
}
