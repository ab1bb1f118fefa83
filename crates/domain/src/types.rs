//! Core data types for scan jobs and queued work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail")]
pub enum JobState {
    /// Job created, nothing submitted yet.
    Created,
    /// Payload is being prepared for upload.
    Preprocessing,
    /// Multipart upload in flight (includes transparent 5xx retries).
    Uploading,
    /// Deferred behind a server-imposed cooldown window.
    RateLimited,
    /// Persisted to the durable queue while the network is unreachable.
    OfflineQueued,
    /// Event stream open; events are being applied.
    Streaming,
    /// Terminal: the server reported completion.
    Completed,
    /// Terminal: retries exhausted or the server reported a fatal error.
    Failed(String),
    /// Terminal: cancelled locally or by the server.
    Canceled,
}

impl JobState {
    /// Whether this state ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Canceled)
    }
}

/// One item recognized by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedItem {
    /// Server-side identity of the item, when provided.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name of the recognized content.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form metadata the presentation layer renders.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Preview artifact produced by server-side segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedPreview {
    /// Decoded preview image bytes.
    pub image: Vec<u8>,
    /// Number of items the segmentation detected.
    pub detected_count: u32,
}

/// One scan job, tracked end-to-end from capture through streamed results.
///
/// Owned exclusively by the orchestrator; every mutation happens there in
/// response to lifecycle steps or stream events.
#[derive(Debug, Clone)]
pub struct ScanJob {
    /// Client-generated correlation id, distinct from the server job id and
    /// carried on every outbound request for this job.
    pub correlation_id: Uuid,
    /// Raw image payload bytes.
    pub payload: Vec<u8>,
    /// When the image was captured.
    pub captured_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: JobState,
    /// Last human-readable progress message from the stream.
    pub progress_message: Option<String>,
    /// Server-assigned job id, set after a successful upload.
    pub server_job_id: Option<String>,
    /// Server-assigned session token, when the service issues one.
    pub token: Option<String>,
    /// Completed sub-items for multi-item scans.
    pub items_completed: u32,
    /// Total sub-items for multi-item scans, once known.
    pub items_total: Option<u32>,
    /// Items recognized so far.
    pub items: Vec<RecognizedItem>,
    /// Preview artifact, when the server emitted one.
    pub preview: Option<SegmentedPreview>,
}

impl ScanJob {
    /// Create a fresh job around a captured payload.
    pub fn new(payload: Vec<u8>, captured_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            payload,
            captured_at,
            state: JobState::Created,
            progress_message: None,
            server_job_id: None,
            token: None,
            items_completed: 0,
            items_total: None,
            items: Vec::new(),
            preview: None,
        }
    }
}

/// Handle returned by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Server-assigned job id.
    pub job_id: String,
    /// Location of the event stream for this job.
    pub stream_location: String,
    /// Optional per-job auth/session token.
    #[serde(default)]
    pub token: Option<String>,
}

/// Durable record for a scan captured while the network was unreachable.
///
/// Payload blob and metadata form one logical unit on disk: if the metadata
/// record exists, its payload blob must exist as well. Partial pairs are
/// treated as corrupt and skipped during listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedScanRecord {
    /// Generated record id; keys both the blob and the metadata file.
    pub id: Uuid,
    /// Raw payload bytes (held in memory only after listing).
    #[serde(skip)]
    pub payload: Vec<u8>,
    /// Original capture timestamp, preserved for oldest-first replay.
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed("boom".into()).is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(!JobState::Streaming.is_terminal());
        assert!(!JobState::OfflineQueued.is_terminal());
    }

    #[test]
    fn new_job_starts_created_with_fresh_correlation_id() {
        let a = ScanJob::new(vec![1, 2, 3], Utc::now());
        let b = ScanJob::new(vec![1, 2, 3], Utc::now());
        assert_eq!(a.state, JobState::Created);
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.items.is_empty());
    }

    #[test]
    fn upload_receipt_token_defaults_to_none() {
        let receipt: UploadReceipt =
            serde_json::from_str(r#"{"job_id":"j1","stream_location":"/streams/j1"}"#)
                .expect("receipt should parse");
        assert_eq!(receipt.token, None);
    }
}
