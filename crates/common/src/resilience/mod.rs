//! Resilience patterns for fault tolerance under service-imposed limits
//!
//! This module provides the concurrency-control primitives of the engine:
//! - **Stream admission**: bounds the number of concurrently open event
//!   streams with a strict-FIFO wait list
//! - **Rate-limit gate**: tracks a server-imposed cooldown window and the
//!   FIFO of payloads deferred behind it
//! - **Backoff**: delay policies shared by the upload retry and stream
//!   reconnect loops
//!
//! The rate-limit gate is generic over a [`Clock`] so cooldown behavior is
//! testable with injected time instead of sleeps.

pub mod admission;
pub mod backoff;
pub mod rate_gate;

use std::time::Instant;

pub use admission::{AdmissionError, SlotPermit, StreamAdmission};
pub use backoff::BackoffStrategy;
pub use rate_gate::RateLimitGate;

/// Abstraction over monotonic time for testable timestamp comparisons.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant (monotonic time).
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock pinned to the current instant.
    pub fn new() -> Self {
        Self { now: std::sync::Mutex::new(Instant::now()) }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: std::time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
