//! Configuration loader
//!
//! Loads engine configuration from environment variables or a JSON file.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//!
//! ## Environment Variables
//! - `SCANSTREAM_BASE_URL`: Base URL of the recognition API (required)
//! - `SCANSTREAM_DEVICE_ID`: Device identifier sent with uploads (required)
//! - `SCANSTREAM_QUEUE_DIR`: Directory for the offline durable queue (required)
//! - `SCANSTREAM_TIMEOUT_SECS`: Per-request timeout in seconds
//! - `SCANSTREAM_MAX_CONCURRENT_STREAMS`: Stream admission capacity
//! - `SCANSTREAM_UPLOAD_MAX_ATTEMPTS`: Upload attempts (initial try + retries)
//! - `SCANSTREAM_STREAM_MAX_RECONNECTS`: Reconnect cap per event stream
//! - `SCANSTREAM_POLL_INTERVAL_SECS`: Maintenance poller interval
//!
//! ## File Locations
//! With no explicit path, the loader probes `./scanstream.json` and then
//! `./config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use scanstream_domain::{Result, ScanConfig, ScanError};

/// Load configuration with automatic fallback strategy.
///
/// # Errors
/// Returns `ScanError::Config` if neither the environment nor a probed
/// config file yields a complete configuration.
pub fn load() -> Result<ScanConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "environment incomplete, trying config file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `SCANSTREAM_*` environment variables.
///
/// # Errors
/// Returns `ScanError::Config` if a required variable is missing or a
/// numeric variable fails to parse.
pub fn load_from_env() -> Result<ScanConfig> {
    let mut config = ScanConfig::default();

    config.api.base_url = env_var("SCANSTREAM_BASE_URL")?;
    config.api.device_id = env_var("SCANSTREAM_DEVICE_ID")?;
    config.queue_dir = PathBuf::from(env_var("SCANSTREAM_QUEUE_DIR")?);

    if let Some(secs) = env_opt_u64("SCANSTREAM_TIMEOUT_SECS")? {
        config.api.timeout = Duration::from_secs(secs);
    }
    if let Some(n) = env_opt_u64("SCANSTREAM_MAX_CONCURRENT_STREAMS")? {
        config.max_concurrent_streams = n as usize;
    }
    if let Some(n) = env_opt_u64("SCANSTREAM_UPLOAD_MAX_ATTEMPTS")? {
        config.upload_max_attempts = n as usize;
    }
    if let Some(n) = env_opt_u64("SCANSTREAM_STREAM_MAX_RECONNECTS")? {
        config.stream_max_reconnects = n as usize;
    }
    if let Some(secs) = env_opt_u64("SCANSTREAM_POLL_INTERVAL_SECS")? {
        config.poll_interval = Duration::from_secs(secs);
    }

    validate(&config)?;
    Ok(config)
}

/// Load configuration from a JSON file, probing default locations when
/// `path` is `None`.
pub fn load_from_file(path: Option<&Path>) -> Result<ScanConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => probe_config_paths()
            .ok_or_else(|| ScanError::Config("no config file found".into()))?,
    };

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| ScanError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: ScanConfig = serde_json::from_str(&raw)
        .map_err(|e| ScanError::Config(format!("invalid config {}: {e}", path.display())))?;

    validate(&config)?;
    tracing::info!(path = %path.display(), "configuration loaded from file");
    Ok(config)
}

fn probe_config_paths() -> Option<PathBuf> {
    ["scanstream.json", "config.json"]
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

fn validate(config: &ScanConfig) -> Result<()> {
    if config.api.base_url.is_empty() {
        return Err(ScanError::Config("base_url must not be empty".into()));
    }
    if config.api.device_id.is_empty() {
        return Err(ScanError::Config("device_id must not be empty".into()));
    }
    if config.max_concurrent_streams == 0 {
        return Err(ScanError::Config("max_concurrent_streams must be at least 1".into()));
    }
    if config.upload_max_attempts == 0 {
        return Err(ScanError::Config("upload_max_attempts must be at least 1".into()));
    }
    Ok(())
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ScanError::Config(format!("missing env var {name}")))
}

fn env_opt_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ScanError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
