//! File-backed durable queue for scans captured while offline.

pub mod queue;

pub use queue::FileScanQueue;
