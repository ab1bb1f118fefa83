//! # ScanStream Core
//!
//! Port interfaces and the scan orchestrator: the end-to-end job lifecycle
//! from captured payload through streamed results, composed over the
//! admission controller, rate-limit gate, offline durable queue, and the
//! network transport.
//!
//! ## Architecture
//! - Ports are `#[async_trait]` interfaces; adapters live in
//!   `scanstream-infra`
//! - The orchestrator is the single writer of job state; other components
//!   only read or emit events into it

pub mod orchestrator;
pub mod ports;

pub use orchestrator::{OrchestratorConfig, ScanOrchestrator};
pub use ports::{
    ConnectivityProbe, EventStreamSession, OfflineScanQueue, ScanObserver, ScanTransport,
};
