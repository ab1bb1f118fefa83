//! Server-imposed rate-limit gate
//!
//! Tracks the cooldown window a 429 response imposes and the FIFO of
//! payloads deferred until the window clears. The gate holds comparable
//! timestamps only — no timers. The 1 Hz countdown that eventually calls
//! [`RateLimitGate::drain_all`] is driven by the orchestrator's poller,
//! which keeps this type trivially testable with an injected clock.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{Clock, SystemClock};

#[derive(Default)]
struct GateState {
    expires_at: Option<Instant>,
    deferred: VecDeque<Vec<u8>>,
}

/// Process-wide rate-limit window: `Clear -> Limited -> Clear`.
pub struct RateLimitGate<C: Clock = SystemClock> {
    state: Mutex<GateState>,
    clock: C,
}

impl RateLimitGate<SystemClock> {
    /// Create a gate over the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for RateLimitGate<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateLimitGate<C> {
    /// Create a gate over an injected clock.
    pub fn with_clock(clock: C) -> Self {
        Self { state: Mutex::new(GateState::default()), clock }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition to `Limited` for `retry_after` from now.
    pub fn set_limited(&self, retry_after: Duration) {
        let expires_at = self.clock.now() + retry_after;
        self.lock().expires_at = Some(expires_at);
        debug!(retry_after_secs = retry_after.as_secs(), "rate limit window armed");
    }

    /// Whether the window is still in the future.
    pub fn is_limited(&self) -> bool {
        let state = self.lock();
        state.expires_at.is_some_and(|at| at > self.clock.now())
    }

    /// Whole seconds left in the window, rounded up; 0 when clear.
    pub fn remaining_seconds(&self) -> u64 {
        let state = self.lock();
        match state.expires_at {
            Some(at) => {
                let now = self.clock.now();
                if at <= now {
                    0
                } else {
                    let remaining = at - now;
                    remaining.as_millis().div_ceil(1000) as u64
                }
            }
            None => 0,
        }
    }

    /// Defer a payload behind the window. Meaningful only while `Limited`;
    /// the orchestrator is the single caller and checks first.
    pub fn enqueue(&self, payload: Vec<u8>) {
        let mut state = self.lock();
        state.deferred.push_back(payload);
        debug!(deferred = state.deferred.len(), "payload deferred behind rate limit");
    }

    /// Number of payloads currently deferred.
    pub fn deferred_count(&self) -> usize {
        self.lock().deferred.len()
    }

    /// Atomically take every deferred payload in FIFO order and transition
    /// back to `Clear`. Called when the countdown observes zero remaining.
    pub fn drain_all(&self) -> Vec<Vec<u8>> {
        let mut state = self.lock();
        state.expires_at = None;
        let drained: Vec<Vec<u8>> = state.deferred.drain(..).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "rate limit window cleared, draining deferred payloads");
        }
        drained
    }
}

impl<C: Clock> std::fmt::Debug for RateLimitGate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RateLimitGate")
            .field("limited", &state.expires_at.is_some_and(|at| at > self.clock.now()))
            .field("deferred", &state.deferred.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::ManualClock;
    use super::*;

    struct SharedClock(Arc<ManualClock>);

    impl Clock for SharedClock {
        fn now(&self) -> Instant {
            self.0.now()
        }
    }

    fn gate_with_manual_clock() -> (RateLimitGate<SharedClock>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimitGate::with_clock(SharedClock(Arc::clone(&clock))), clock)
    }

    #[test]
    fn starts_clear() {
        let gate = RateLimitGate::new();
        assert!(!gate.is_limited());
        assert_eq!(gate.remaining_seconds(), 0);
        assert!(gate.drain_all().is_empty());
    }

    #[test]
    fn countdown_is_non_increasing_and_reaches_zero() {
        let (gate, clock) = gate_with_manual_clock();
        gate.set_limited(Duration::from_secs(30));

        let mut last = gate.remaining_seconds();
        assert_eq!(last, 30);
        for _ in 0..30 {
            clock.advance(Duration::from_secs(1));
            let remaining = gate.remaining_seconds();
            assert!(remaining <= last);
            last = remaining;
        }
        assert_eq!(gate.remaining_seconds(), 0);
        assert!(!gate.is_limited());
    }

    #[test]
    fn remaining_seconds_rounds_up() {
        let (gate, clock) = gate_with_manual_clock();
        gate.set_limited(Duration::from_millis(2500));
        assert_eq!(gate.remaining_seconds(), 3);
        clock.advance(Duration::from_millis(2400));
        assert_eq!(gate.remaining_seconds(), 1);
    }

    #[test]
    fn drain_preserves_fifo_order_and_clears_window() {
        let (gate, clock) = gate_with_manual_clock();
        gate.set_limited(Duration::from_secs(10));
        gate.enqueue(vec![1]);
        gate.enqueue(vec![2]);
        gate.enqueue(vec![3]);
        assert_eq!(gate.deferred_count(), 3);

        clock.advance(Duration::from_secs(10));
        assert_eq!(gate.remaining_seconds(), 0);

        let drained = gate.drain_all();
        assert_eq!(drained, vec![vec![1], vec![2], vec![3]]);
        assert!(!gate.is_limited());
        assert_eq!(gate.deferred_count(), 0);
    }

    #[test]
    fn relimit_extends_window() {
        let (gate, clock) = gate_with_manual_clock();
        gate.set_limited(Duration::from_secs(5));
        clock.advance(Duration::from_secs(4));
        gate.set_limited(Duration::from_secs(10));
        assert_eq!(gate.remaining_seconds(), 10);
    }
}
