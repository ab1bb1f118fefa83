//! # ScanStream Common
//!
//! Reusable concurrency and resilience primitives shared across the engine:
//! stream admission control, the server-imposed rate-limit gate, and the
//! backoff policy used by the transport's retry loops.

pub mod resilience;

pub use resilience::{
    BackoffStrategy, Clock, ManualClock, RateLimitGate, SlotPermit, StreamAdmission, SystemClock,
};
