//! Configuration structures for the scan engine

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for the recognition service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the recognition API (e.g. `https://api.example.com/v1`).
    pub base_url: String,
    /// Identifier of this device, sent with every upload.
    pub device_id: String,
    /// Per-request timeout.
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.scanstream.dev/v1".to_string(),
            device_id: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Recognition service settings.
    pub api: ApiConfig,
    /// Directory holding the offline durable queue.
    pub queue_dir: PathBuf,
    /// Capacity of the stream admission controller.
    pub max_concurrent_streams: usize,
    /// Total upload attempts (initial try + retries) for 5xx/connect failures.
    pub upload_max_attempts: usize,
    /// Maximum stream reconnect attempts before a terminal stream failure.
    pub stream_max_reconnects: usize,
    /// Interval of the maintenance poller driving the rate-limit countdown
    /// and offline replay.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            queue_dir: PathBuf::from("queue"),
            max_concurrent_streams: 5,
            upload_max_attempts: 3,
            stream_max_reconnects: 3,
            poll_interval: Duration::from_secs(1),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_limits() {
        let config = ScanConfig::default();
        assert_eq!(config.max_concurrent_streams, 5);
        assert_eq!(config.upload_max_attempts, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn round_trips_through_json() {
        let config = ScanConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: ScanConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.api.timeout, config.api.timeout);
        assert_eq!(back.queue_dir, config.queue_dir);
    }
}
