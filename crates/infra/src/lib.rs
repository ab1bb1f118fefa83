//! # ScanStream Infra
//!
//! Adapters behind the core ports: the reqwest-based recognition transport
//! with its event-stream session, the file-backed offline queue, the
//! connectivity monitor, and configuration loading.
//!
//! ## Module Organization
//! - `http` - Shared HTTP client with retry and backoff
//! - `api` - Recognition service transport and event-stream session
//! - `offline` - File-backed durable scan queue
//! - `connectivity` - Background reachability monitor
//! - `config` - Environment-based configuration loading
//! - `telemetry` - Tracing subscriber setup

pub mod api;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod http;
pub mod offline;
pub mod telemetry;

pub use api::RecognitionClient;
pub use connectivity::ConnectivityMonitor;
pub use errors::InfraError;
pub use http::HttpClient;
pub use offline::FileScanQueue;
