//! Infrastructure-layer error types and conversions into the domain taxonomy.

use std::time::Duration;

use scanstream_domain::ScanError;
use thiserror::Error;

/// Errors raised by the adapters before conversion to [`ScanError`].
#[derive(Error, Debug)]
pub enum InfraError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bad or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<InfraError> for ScanError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Http(inner) => map_reqwest(&inner, Duration::from_secs(30)),
            InfraError::Io(inner) => ScanError::Storage(inner.to_string()),
            InfraError::Serialization(inner) => ScanError::MalformedResponse(inner.to_string()),
            InfraError::Config(msg) => ScanError::Config(msg),
        }
    }
}

/// Map a reqwest error onto the domain taxonomy.
///
/// Timeouts and connect failures are connectivity-class (retryable and a
/// valid trigger for the durable offline queue); body and decode failures
/// mean the server answered but the payload was unusable. `deadline` is the
/// per-request timeout the caller had configured.
pub(crate) fn map_reqwest(err: &reqwest::Error, deadline: Duration) -> ScanError {
    if err.is_timeout() {
        return ScanError::Timeout(deadline);
    }
    if err.is_connect() || err.is_request() {
        return ScanError::Connectivity(err.to_string());
    }
    if err.is_decode() {
        return ScanError::MalformedResponse(err.to_string());
    }
    if let Some(status) = err.status() {
        return ScanError::Server { status: status.as_u16() };
    }
    ScanError::Connectivity(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanstream_domain::ScanErrorCategory;

    #[test]
    fn io_errors_map_to_storage() {
        let err = InfraError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let scan: ScanError = err.into();
        assert!(matches!(scan, ScanError::Storage(_)));
        assert_eq!(scan.category(), ScanErrorCategory::Fatal);
    }

    #[test]
    fn config_errors_keep_their_message() {
        let scan: ScanError = InfraError::Config("missing base url".into()).into();
        assert!(matches!(scan, ScanError::Config(msg) if msg.contains("base url")));
    }
}
