//! Event taxonomy and the line-oriented wire-format parser.
//!
//! The recognition service pushes events as text blocks of
//! `event: <type>` / `data: <json>` lines terminated by a blank line.
//! [`FrameDecoder`] assembles raw lines into (type, data) frames and
//! [`parse_event`] maps a frame onto the closed [`ScanEvent`] set.
//!
//! Parsing never unwinds a stream loop: unknown event types and malformed
//! payloads come back as a recoverable [`EventParseError`] the caller logs
//! and skips. Terminal events are the one exception to strictness — a
//! `complete`/`error`/`canceled` frame with a broken payload still parses,
//! with whatever fields could be recovered, so the stream can always close.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{RecognizedItem, SegmentedPreview};

/// Recoverable failure while mapping a wire frame onto a typed event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventParseError {
    /// The server sent an event type this client does not know.
    ///
    /// Skipped for forward compatibility; never aborts the stream.
    #[error("unknown event type: {label}")]
    UnknownType { label: String },

    /// The data payload of a known, non-terminal event type was unusable.
    #[error("malformed data for event '{event_type}': {detail}")]
    MalformedData { event_type: String, detail: String },
}

/// Typed events delivered over a job's stream. Consumed exactly once per job.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Human-readable progress update.
    Progress { message: String },
    /// One recognized item.
    Result { item: RecognizedItem },
    /// Server-side segmentation preview artifact.
    SegmentedPreview(SegmentedPreview),
    /// Sub-item progress for multi-item scans.
    ItemProgress { current: u32, total: u32, stage: Option<String> },
    /// Terminal: the scan finished.
    Complete { results_location: Option<String>, items: Option<Vec<RecognizedItem>> },
    /// Terminal: the scan failed server-side.
    Error {
        message: String,
        code: Option<String>,
        retryable: Option<bool>,
        server_job_id: Option<String>,
    },
    /// Terminal: the scan was cancelled server-side.
    Canceled,
    /// Metadata enrichment is running degraded; results may be sparse.
    EnrichmentDegraded { context: String },
    /// Keep-alive; carries no payload.
    Ping,
}

impl ScanEvent {
    /// Terminal events close the stream from the server side.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. } | Self::Canceled)
    }
}

#[derive(Deserialize)]
struct ProgressData {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewData {
    image: String,
    #[serde(default)]
    detected_count: u32,
}

#[derive(Deserialize)]
struct ItemProgressData {
    current: u32,
    total: u32,
    #[serde(default)]
    stage: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CompleteData {
    #[serde(default)]
    results_url: Option<String>,
    #[serde(default)]
    items: Option<Vec<RecognizedItem>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ErrorData {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    retryable: Option<bool>,
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Deserialize)]
struct DegradedData {
    context: String,
}

fn malformed(event_type: &str, detail: impl ToString) -> EventParseError {
    EventParseError::MalformedData {
        event_type: event_type.to_string(),
        detail: detail.to_string(),
    }
}

/// Map an event-type label and its data payload onto a typed event.
///
/// Pure function; see the module docs for the failure contract.
pub fn parse_event(event_type: &str, data: &str) -> Result<ScanEvent, EventParseError> {
    match event_type {
        "progress" => {
            let parsed: ProgressData =
                serde_json::from_str(data).map_err(|e| malformed(event_type, e))?;
            Ok(ScanEvent::Progress { message: parsed.message })
        }
        "result" => {
            let item: RecognizedItem =
                serde_json::from_str(data).map_err(|e| malformed(event_type, e))?;
            Ok(ScanEvent::Result { item })
        }
        "segmentedPreview" => {
            let parsed: PreviewData =
                serde_json::from_str(data).map_err(|e| malformed(event_type, e))?;
            let image = BASE64.decode(parsed.image.as_bytes()).map_err(|e| {
                malformed(event_type, format!("image is not valid base64: {e}"))
            })?;
            Ok(ScanEvent::SegmentedPreview(SegmentedPreview {
                image,
                detected_count: parsed.detected_count,
            }))
        }
        "itemProgress" => {
            let parsed: ItemProgressData =
                serde_json::from_str(data).map_err(|e| malformed(event_type, e))?;
            Ok(ScanEvent::ItemProgress {
                current: parsed.current,
                total: parsed.total,
                stage: parsed.stage,
            })
        }
        // Terminal events must always be able to close the stream, so a
        // malformed payload degrades to absent fields instead of failing.
        "complete" => {
            let parsed: CompleteData = serde_json::from_str(data).unwrap_or_default();
            Ok(ScanEvent::Complete {
                results_location: parsed.results_url,
                items: parsed.items,
            })
        }
        "error" => {
            let parsed: ErrorData = serde_json::from_str(data).unwrap_or_default();
            Ok(ScanEvent::Error {
                message: parsed.message,
                code: parsed.code,
                retryable: parsed.retryable,
                server_job_id: parsed.job_id,
            })
        }
        "canceled" => Ok(ScanEvent::Canceled),
        "enrichmentDegraded" => {
            let parsed: DegradedData =
                serde_json::from_str(data).map_err(|e| malformed(event_type, e))?;
            Ok(ScanEvent::EnrichmentDegraded { context: parsed.context })
        }
        "ping" => Ok(ScanEvent::Ping),
        other => Err(EventParseError::UnknownType { label: other.to_string() }),
    }
}

/// Assembles the line-oriented wire format into (event-type, data) frames.
///
/// Feed raw lines one at a time; a frame is emitted when the terminating
/// blank line arrives. Field order within a block is not assumed, trailing
/// carriage returns are stripped, and lines that are neither `event:` nor
/// `data:` (comments, server-added fields) are ignored. A reconnect must use
/// a fresh decoder: there is no mid-frame resumption across sessions.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    event_type: Option<String>,
    data: Option<String>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw line; returns a completed (type, data) frame when the
    /// blank terminator of a non-empty block arrives.
    pub fn push_line(&mut self, line: &str) -> Option<(String, String)> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            let event_type = self.event_type.take();
            let data = self.data.take();
            // A blank line with no accumulated fields is just padding.
            let event_type = event_type?;
            return Some((event_type, data.unwrap_or_default()));
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.event_type = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data = Some(value.trim_start().to_string());
        }
        // Anything else (comments, unknown fields) is ignored.
        None
    }
}
