//! Bounded admission control for concurrently open event streams
//!
//! Limits the number of long-lived streams a client keeps open against the
//! recognition service. Callers beyond capacity park on a strict-FIFO wait
//! list; each released slot wakes exactly one waiter. Waiters whose acquire
//! future was dropped (cancelled jobs) are skipped without consuming the
//! freed slot.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors surfaced by slot acquisition.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Capacity must be non-zero.
    #[error("admission capacity must be greater than 0")]
    ZeroCapacity,

    /// The wait-list entry was dropped without a grant. Only possible if the
    /// controller itself is torn down while callers are parked.
    #[error("admission controller shut down while waiting for a slot")]
    Closed,
}

struct Waiter {
    job_id: Uuid,
    admission: Arc<StreamAdmission>,
    tx: oneshot::Sender<SlotPermit>,
}

#[derive(Default)]
struct AdmissionState {
    active: HashSet<Uuid>,
    waiters: VecDeque<Waiter>,
}

/// Bounded pool of stream slots with a strict-FIFO wait list.
///
/// This is the only true concurrency-control primitive in the engine: the
/// counter and wait list are owned by one mutex and mutated nowhere else.
pub struct StreamAdmission {
    capacity: usize,
    inner: Mutex<AdmissionState>,
}

impl StreamAdmission {
    /// Create a controller with the given slot capacity.
    pub fn new(capacity: usize) -> Result<Arc<Self>, AdmissionError> {
        if capacity == 0 {
            return Err(AdmissionError::ZeroCapacity);
        }
        Ok(Arc::new(Self { capacity, inner: Mutex::new(AdmissionState::default()) }))
    }

    /// Acquire a slot for `job_id`, suspending in FIFO order while the pool
    /// is at capacity. The returned permit releases its slot exactly once,
    /// explicitly or on drop.
    pub async fn acquire(self: &Arc<Self>, job_id: Uuid) -> Result<SlotPermit, AdmissionError> {
        let rx = {
            let mut state = self.lock();
            if state.active.len() < self.capacity {
                state.active.insert(job_id);
                debug!(%job_id, active = state.active.len(), "stream slot granted immediately");
                return Ok(SlotPermit::new(Arc::clone(self), job_id));
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { job_id, admission: Arc::clone(self), tx });
            debug!(%job_id, queued = state.waiters.len(), "stream slot queued");
            rx
        };

        rx.await.map_err(|_| AdmissionError::Closed)
    }

    /// Number of currently held slots.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Number of callers parked on the wait list.
    pub fn queue_depth(&self) -> usize {
        self.lock().waiters.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdmissionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a slot to the pool, handing it to the head of the wait list
    /// when one exists. At most one waiter is woken per released slot.
    fn release_slot(&self, job_id: Uuid) {
        let mut state = self.lock();
        if !state.active.remove(&job_id) {
            warn!(%job_id, "release for a job that held no slot");
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            state.active.insert(waiter.job_id);
            let granted_to = waiter.job_id;
            let permit = SlotPermit::new(waiter.admission, waiter.job_id);
            match waiter.tx.send(permit) {
                Ok(()) => {
                    debug!(job_id = %granted_to, "stream slot handed to queued waiter");
                    break;
                }
                Err(permit) => {
                    // Waiter gave up before the grant arrived; the slot stays
                    // free for the next one. Disarm so the permit's drop does
                    // not re-enter this lock.
                    permit.disarm();
                    state.active.remove(&granted_to);
                    debug!(job_id = %granted_to, "skipping abandoned waiter");
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("StreamAdmission")
            .field("capacity", &self.capacity)
            .field("active", &state.active.len())
            .field("queued", &state.waiters.len())
            .finish()
    }
}

/// Capacity ticket held by exactly one scan job at a time.
///
/// Records the grant time for metrics and releases its slot exactly once:
/// either through [`SlotPermit::release`] or when dropped, which covers every
/// way the upload+stream span can end.
#[derive(Debug)]
pub struct SlotPermit {
    admission: Arc<StreamAdmission>,
    job_id: Uuid,
    granted_at: Instant,
    released: AtomicBool,
}

impl SlotPermit {
    fn new(admission: Arc<StreamAdmission>, job_id: Uuid) -> Self {
        Self { admission, job_id, granted_at: Instant::now(), released: AtomicBool::new(false) }
    }

    /// The job this slot was granted to.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// When the slot was granted.
    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    /// Release the slot explicitly.
    pub fn release(self) {
        drop(self);
    }

    fn disarm(&self) {
        self.released.store(true, Ordering::Release);
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.admission.release_slot(self.job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn grants_up_to_capacity_immediately() {
        let admission = StreamAdmission::new(3).unwrap();
        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(admission.acquire(Uuid::new_v4()).await.unwrap());
        }
        assert_eq!(admission.active_count(), 3);
        assert_eq!(admission.queue_depth(), 0);
    }

    #[tokio::test]
    async fn caller_beyond_capacity_blocks_until_release() {
        let admission = StreamAdmission::new(1).unwrap();
        let first = admission.acquire(Uuid::new_v4()).await.unwrap();

        let admission2 = Arc::clone(&admission);
        let waiting_id = Uuid::new_v4();
        let waiter = tokio::spawn(async move { admission2.acquire(waiting_id).await });

        // Give the waiter time to park.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(admission.queue_depth(), 1);
        assert!(!waiter.is_finished());

        first.release();
        let permit = waiter.await.unwrap().unwrap();
        assert_eq!(permit.job_id(), waiting_id);
        assert_eq!(admission.active_count(), 1);
        assert_eq!(admission.queue_depth(), 0);
    }

    #[tokio::test]
    async fn waiters_are_woken_in_fifo_order() {
        let admission = StreamAdmission::new(1).unwrap();
        let held = admission.acquire(Uuid::new_v4()).await.unwrap();

        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut handles = Vec::new();
        for &id in &ids {
            let admission = Arc::clone(&admission);
            handles.push(tokio::spawn(async move {
                let permit = admission.acquire(id).await.unwrap();
                // Hold briefly so the grant order is observable.
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(permit);
                id
            }));
            // Park waiters in a deterministic order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(admission.queue_depth(), 3);

        drop(held);
        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        assert_eq!(granted, ids);
    }

    #[tokio::test]
    async fn release_wakes_exactly_one_waiter() {
        let admission = StreamAdmission::new(2).unwrap();
        let a = admission.acquire(Uuid::new_v4()).await.unwrap();
        let _b = admission.acquire(Uuid::new_v4()).await.unwrap();

        for _ in 0..2 {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move {
                let _permit = admission.acquire(Uuid::new_v4()).await.unwrap();
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(admission.queue_depth(), 2);

        a.release();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // One waiter promoted, one still parked.
        assert_eq!(admission.active_count(), 2);
        assert_eq!(admission.queue_depth(), 1);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_consume_slot() {
        let admission = StreamAdmission::new(1).unwrap();
        let held = admission.acquire(Uuid::new_v4()).await.unwrap();

        // First waiter abandons (future dropped), second stays.
        let admission2 = Arc::clone(&admission);
        let abandoned = tokio::spawn(async move {
            let _ = admission2.acquire(Uuid::new_v4()).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();
        let _ = abandoned.await;

        let admission3 = Arc::clone(&admission);
        let surviving_id = Uuid::new_v4();
        let survivor = tokio::spawn(async move { admission3.acquire(surviving_id).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        held.release();
        let permit = survivor.await.unwrap().unwrap();
        assert_eq!(permit.job_id(), surviving_id);
        assert_eq!(admission.active_count(), 1);
    }

    #[tokio::test]
    async fn permit_drop_releases_exactly_once() {
        let admission = StreamAdmission::new(1).unwrap();
        let job_id = Uuid::new_v4();
        let permit = admission.acquire(job_id).await.unwrap();
        assert_eq!(admission.active_count(), 1);
        drop(permit);
        assert_eq!(admission.active_count(), 0);
        // A stale release for the same id is a logged no-op.
        admission.release_slot(job_id);
        assert_eq!(admission.active_count(), 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(StreamAdmission::new(0), Err(AdmissionError::ZeroCapacity)));
    }
}
