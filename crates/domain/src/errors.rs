//! Error types used throughout the engine

use std::time::Duration;

use thiserror::Error;

/// Main error taxonomy for scan submissions and event streaming.
#[derive(Error, Debug, Clone)]
pub enum ScanError {
    /// No network, or the connection was lost mid-request.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A request did not complete within its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a 5xx status.
    #[error("Server error (status {status})")]
    Server { status: u16 },

    /// The service answered 429; the payload must be deferred, not retried.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// A response body could not be interpreted.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A single event on the stream could not be parsed; the stream continues.
    #[error("Stream parse error: {0}")]
    StreamParse(String),

    /// The event stream connection dropped and reconnects were exhausted.
    #[error("Stream connection error: {0}")]
    StreamConnection(String),

    /// Local durable-queue storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error: bad or missing settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was cooperatively cancelled.
    #[error("Operation cancelled")]
    Canceled,
}

/// Coarse classification used by retry and routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorCategory {
    /// Network/connection errors - retryable
    Connectivity,
    /// Server errors (5xx) - retryable
    Server,
    /// Rate limiting (429) - routed to the gate, never retried in place
    RateLimit,
    /// Per-event parse failures - recoverable, never fatal to a stream
    Recoverable,
    /// Everything else - non-retryable
    Fatal,
}

impl ScanError {
    /// Get the category for this error.
    pub fn category(&self) -> ScanErrorCategory {
        match self {
            Self::Connectivity(_) | Self::Timeout(_) | Self::StreamConnection(_) => {
                ScanErrorCategory::Connectivity
            }
            Self::Server { .. } => ScanErrorCategory::Server,
            Self::RateLimited { .. } => ScanErrorCategory::RateLimit,
            Self::StreamParse(_) => ScanErrorCategory::Recoverable,
            Self::MalformedResponse(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Canceled => ScanErrorCategory::Fatal,
        }
    }

    /// Whether the transport may transparently retry the failed request.
    ///
    /// Rate limiting is deliberately excluded: a 429 must surface to the
    /// orchestrator so the payload is deferred through the rate-limit gate
    /// instead of blocking the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ScanErrorCategory::Connectivity | ScanErrorCategory::Server)
    }
}

/// Result type alias for scan operations
pub type Result<T> = std::result::Result<T, ScanError>;
