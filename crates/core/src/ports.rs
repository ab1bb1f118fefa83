//! Port interfaces for the scan engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanstream_domain::{QueuedScanRecord, RecognizedItem, Result, ScanJob, UploadReceipt};
use uuid::Uuid;

/// One open event stream for a single job.
///
/// `next_line` is the per-job suspension point: implementations own their
/// reconnect-with-backoff behavior and always restart from a fresh line
/// buffer after a reconnect. `Ok(None)` means the server closed the stream.
#[async_trait]
pub trait EventStreamSession: Send {
    /// Read the next raw line, reconnecting as needed up to the configured
    /// cap. Returns `Ok(None)` on a clean end of stream.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Network transport to the recognition service.
#[async_trait]
pub trait ScanTransport: Send + Sync {
    /// Multipart upload of a captured payload. Retries 5xx/connect failures
    /// internally with backoff; rate limiting propagates immediately as
    /// [`scanstream_domain::ScanError::RateLimited`].
    async fn upload(&self, payload: &[u8], correlation_id: Uuid) -> Result<UploadReceipt>;

    /// Open the long-lived event stream for an uploaded job.
    async fn open_stream(
        &self,
        stream_location: &str,
        token: Option<&str>,
        correlation_id: Uuid,
    ) -> Result<Box<dyn EventStreamSession>>;

    /// Best-effort release of server-side resources for a finished job.
    /// 404 counts as success (already cleaned up).
    async fn cleanup(&self, server_job_id: &str) -> Result<()>;
}

/// Durable, file-backed queue for scans captured while offline.
///
/// Single-writer discipline is enforced by the orchestrator; implementations
/// only need whatever their storage backend guarantees.
#[async_trait]
pub trait OfflineScanQueue: Send + Sync {
    /// Persist a payload and its capture timestamp as one logical unit.
    async fn enqueue(&self, payload: &[u8], captured_at: DateTime<Utc>) -> Result<Uuid>;

    /// List every valid record oldest-first, skipping corrupt entries.
    async fn list_all(&self) -> Result<Vec<QueuedScanRecord>>;

    /// Remove a record once its upload+stream span has finished.
    async fn remove(&self, id: Uuid) -> Result<()>;

    /// Number of valid records currently queued.
    async fn count(&self) -> Result<usize>;
}

/// Reports whether the network is currently reachable.
pub trait ConnectivityProbe: Send + Sync {
    /// True when submissions should go over the wire rather than to the
    /// durable queue.
    fn is_online(&self) -> bool;
}

/// Callback surface consumed by the presentation layer.
///
/// Every method has a no-op default so consumers subscribe only to what
/// they render. Callbacks must be cheap; they run on the job task.
pub trait ScanObserver: Send + Sync {
    /// A job's state or progress text changed.
    fn job_updated(&self, _job: &ScanJob) {}

    /// The stream delivered one recognized item.
    fn item_recognized(&self, _job_id: Uuid, _item: &RecognizedItem) {}

    /// A segmentation preview arrived for the job.
    fn preview_ready(&self, _job_id: Uuid, _detected_count: u32) {}

    /// The job reached a terminal state (completed, failed, or canceled).
    fn job_finished(&self, _job: &ScanJob) {}
}

/// Observer that ignores everything; useful as a default and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}
