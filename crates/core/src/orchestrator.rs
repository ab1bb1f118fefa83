//! Scan orchestrator: the end-to-end job lifecycle state machine.
//!
//! One cooperative task runs per in-flight scan job. The orchestrator owns
//! the active job set exclusively and composes the admission controller,
//! rate-limit gate, durable offline queue, and network transport into the
//! lifecycle described on [`JobState`]: acquire a stream slot, upload,
//! stream events, clean up, release the slot.
//!
//! A single maintenance loop (1 Hz) drives the rate-limit countdown and the
//! oldest-first replay of offline work once connectivity returns. Join
//! handles are tracked and cancellation is explicit: job tasks are
//! interrupted at suspension points, never preempted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use scanstream_common::{RateLimitGate, StreamAdmission};
use scanstream_domain::{
    parse_event, FrameDecoder, JobState, QueuedScanRecord, Result, ScanError, ScanEvent, ScanJob,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ports::{ConnectivityProbe, OfflineScanQueue, ScanObserver, ScanTransport};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of the stream admission controller.
    pub max_concurrent_streams: usize,
    /// Window applied when a 429 arrives without a retry-after duration.
    pub default_rate_window: Duration,
    /// Interval of the maintenance poller (rate countdown + offline replay).
    pub poll_interval: Duration,
    /// Join timeout when shutting the maintenance loop down.
    pub join_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 5,
            default_rate_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// How a job's upload+stream span ended; drives finalization.
enum SpanEnd {
    /// Terminal state already set on the job (completed, failed, canceled).
    Terminal,
    /// Payload was handed to the rate-limit gate; job leaves the active set.
    RateLimited,
    /// Connectivity was absent; payload belongs to the durable queue.
    WentOffline,
}

/// Composes transport, admission, rate gate, and durable queue into the
/// per-capture scan lifecycle. Single writer of all job state.
pub struct ScanOrchestrator {
    transport: Arc<dyn ScanTransport>,
    queue: Arc<dyn OfflineScanQueue>,
    connectivity: Arc<dyn ConnectivityProbe>,
    observer: Arc<dyn ScanObserver>,
    admission: Arc<StreamAdmission>,
    rate_gate: RateLimitGate,
    config: OrchestratorConfig,
    active: Mutex<HashMap<Uuid, ScanJob>>,
    finished: Mutex<Vec<ScanJob>>,
    in_replay: Mutex<HashSet<Uuid>>,
    jobs_cancel: Mutex<CancellationToken>,
    shutdown: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl ScanOrchestrator {
    /// Create an orchestrator over the given ports.
    pub fn new(
        transport: Arc<dyn ScanTransport>,
        queue: Arc<dyn OfflineScanQueue>,
        connectivity: Arc<dyn ConnectivityProbe>,
        observer: Arc<dyn ScanObserver>,
        config: OrchestratorConfig,
    ) -> Result<Arc<Self>> {
        let admission = StreamAdmission::new(config.max_concurrent_streams)
            .map_err(|e| ScanError::Config(e.to_string()))?;

        Ok(Arc::new(Self {
            transport,
            queue,
            connectivity,
            observer,
            admission,
            rate_gate: RateLimitGate::new(),
            config,
            active: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
            in_replay: Mutex::new(HashSet::new()),
            jobs_cancel: Mutex::new(CancellationToken::new()),
            shutdown: CancellationToken::new(),
            maintenance: Mutex::new(None),
        }))
    }

    /// Start the maintenance loop (rate-limit countdown + offline replay).
    #[instrument(skip(self))]
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = lock(&self.maintenance);
        if slot.is_some() {
            return Err(ScanError::Config("maintenance loop already running".into()));
        }

        info!("starting scan orchestrator maintenance loop");
        let this = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let poll_interval = self.config.poll_interval;
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("maintenance loop cancelled");
                        break;
                    }
                    () = tokio::time::sleep(poll_interval) => {
                        this.tick().await;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Stop the maintenance loop and cancel in-flight jobs.
    #[instrument(skip(self))]
    pub async fn stop(self: &Arc<Self>) {
        self.cancel_all();
        self.shutdown.cancel();
        let handle = lock(&self.maintenance).take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.config.join_timeout, handle).await.is_err() {
                warn!("maintenance loop did not stop within timeout");
            }
        }
        info!("scan orchestrator stopped");
    }

    /// Submit one captured payload. Offline submissions go straight to the
    /// durable queue; online submissions get a job task. Returns the
    /// client-side correlation id for the capture.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn submit(self: &Arc<Self>, payload: Vec<u8>) -> Result<Uuid> {
        let mut job = ScanJob::new(payload, Utc::now());
        let correlation_id = job.correlation_id;

        if !self.connectivity.is_online() {
            self.queue.enqueue(&job.payload, job.captured_at).await?;
            job.state = JobState::OfflineQueued;
            info!(%correlation_id, "network unreachable, scan queued durably");
            self.observer.job_updated(&job);
            return Ok(correlation_id);
        }

        self.spawn_job(job, None);
        Ok(correlation_id)
    }

    /// Cancel every job currently uploading or streaming.
    ///
    /// Cooperative: tasks are interrupted at their next suspension point,
    /// fire a best-effort cleanup without waiting for it, and leave the
    /// active set. Durably queued offline work is untouched. Calling this
    /// twice is a no-op.
    pub fn cancel_all(self: &Arc<Self>) {
        let previous = {
            let mut guard = lock(&self.jobs_cancel);
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        previous.cancel();
        info!("cancellation requested for all in-flight scan jobs");
    }

    /// Snapshot of jobs currently in the active set.
    pub fn active_jobs(&self) -> Vec<ScanJob> {
        lock(&self.active).values().cloned().collect()
    }

    /// Terminal jobs retained for the presentation layer.
    pub fn finished_jobs(&self) -> Vec<ScanJob> {
        lock(&self.finished).clone()
    }

    /// Drop a terminal job once the UI is done displaying it.
    pub fn drop_finished(&self, correlation_id: Uuid) {
        lock(&self.finished).retain(|job| job.correlation_id != correlation_id);
    }

    /// Streams currently open.
    pub fn stream_active_count(&self) -> usize {
        self.admission.active_count()
    }

    /// Jobs waiting for a stream slot.
    pub fn stream_queue_depth(&self) -> usize {
        self.admission.queue_depth()
    }

    /// Seconds left in the server-imposed cooldown, 0 when clear.
    pub fn rate_limit_remaining(&self) -> u64 {
        self.rate_gate.remaining_seconds()
    }

    /// Payloads deferred behind the rate-limit window.
    pub fn rate_deferred_count(&self) -> usize {
        self.rate_gate.deferred_count()
    }

    fn jobs_token(&self) -> CancellationToken {
        lock(&self.jobs_cancel).clone()
    }

    fn spawn_job(self: &Arc<Self>, job: ScanJob, record_id: Option<Uuid>) {
        let this = Arc::clone(self);
        let token = self.jobs_token();
        tokio::spawn(async move {
            this.run_job(job, record_id, token).await;
        });
    }

    /// One maintenance pass: drain the rate gate when its window cleared,
    /// then replay durable offline work if connectivity is back.
    async fn tick(self: &Arc<Self>) {
        if self.rate_gate.deferred_count() > 0 && self.rate_gate.remaining_seconds() == 0 {
            let payloads = self.rate_gate.drain_all();
            info!(count = payloads.len(), "rate limit cleared, resubmitting deferred scans");
            for payload in payloads {
                if let Err(err) = self.submit(payload).await {
                    warn!(error = %err, "failed to resubmit rate-deferred scan");
                }
            }
        }

        if self.connectivity.is_online() {
            self.replay_offline().await;
        }
    }

    /// Replay durable records oldest-first. Each record is removed only
    /// after its upload+stream span finishes or is abandoned.
    async fn replay_offline(self: &Arc<Self>) {
        let records = match self.queue.list_all().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed to list offline queue");
                return;
            }
        };

        for record in records {
            {
                let mut in_replay = lock(&self.in_replay);
                if !in_replay.insert(record.id) {
                    continue; // already in flight
                }
            }
            debug!(record_id = %record.id, "replaying offline scan");
            let QueuedScanRecord { id, payload, captured_at } = record;
            let job = ScanJob::new(payload, captured_at);
            self.spawn_job(job, Some(id));
        }
    }

    /// Run one job's full lifecycle. The stream slot acquired here is held
    /// for the whole upload+stream span and released exactly once by the
    /// permit, however the span ends.
    async fn run_job(self: Arc<Self>, mut job: ScanJob, record_id: Option<Uuid>, token: CancellationToken) {
        // The payload travels separately so active-set snapshots stay cheap.
        let payload = std::mem::take(&mut job.payload);

        job.state = JobState::Preprocessing;
        self.update_active(&job);
        self.observer.job_updated(&job);

        let permit = tokio::select! {
            () = token.cancelled() => {
                self.finish_canceled(job, record_id).await;
                return;
            }
            acquired = self.admission.acquire(job.correlation_id) => match acquired {
                Ok(permit) => permit,
                Err(err) => {
                    job.state = JobState::Failed(err.to_string());
                    self.finalize(job, record_id, true).await;
                    return;
                }
            }
        };

        job.state = JobState::Uploading;
        self.update_active(&job);
        self.observer.job_updated(&job);

        let upload = tokio::select! {
            () = token.cancelled() => {
                drop(permit);
                self.finish_canceled(job, record_id).await;
                return;
            }
            result = self.transport.upload(&payload, job.correlation_id) => result,
        };

        let receipt = match upload {
            Ok(receipt) => receipt,
            Err(err) => {
                let end = self
                    .route_upload_failure(&mut job, payload, &err, record_id.is_some())
                    .await;
                drop(permit);
                match end {
                    SpanEnd::Terminal => self.finalize(job, record_id, true).await,
                    SpanEnd::RateLimited => {
                        // Payload now lives in the gate; a durable record has
                        // been handed off and can go.
                        self.leave_active(job, record_id, true).await;
                    }
                    SpanEnd::WentOffline => {
                        // Replayed records stay durable; fresh payloads were
                        // just enqueued by the router.
                        self.leave_active(job, record_id, false).await;
                    }
                }
                return;
            }
        };

        job.server_job_id = Some(receipt.job_id.clone());
        job.token = receipt.token.clone();
        job.state = JobState::Streaming;
        self.update_active(&job);
        self.observer.job_updated(&job);

        let session = tokio::select! {
            () = token.cancelled() => {
                drop(permit);
                self.finish_canceled(job, record_id).await;
                return;
            }
            opened = self.transport.open_stream(
                &receipt.stream_location,
                receipt.token.as_deref(),
                job.correlation_id,
            ) => opened,
        };

        let mut session = match session {
            Ok(session) => session,
            Err(err) => {
                job.state = JobState::Failed(err.to_string());
                self.spawn_cleanup(receipt.job_id.clone());
                drop(permit);
                self.finalize(job, record_id, true).await;
                return;
            }
        };

        self.stream_events(&mut job, session.as_mut(), &token).await;

        self.spawn_cleanup(receipt.job_id);
        drop(permit);
        self.finalize(job, record_id, true).await;
    }

    /// Consume the event stream until a terminal event, a stream failure,
    /// or cancellation. Leaves the job in a terminal state.
    async fn stream_events(
        &self,
        job: &mut ScanJob,
        session: &mut dyn crate::ports::EventStreamSession,
        token: &CancellationToken,
    ) {
        let mut decoder = FrameDecoder::new();
        loop {
            let line = tokio::select! {
                () = token.cancelled() => {
                    job.state = JobState::Canceled;
                    return;
                }
                line = session.next_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    let Some((event_type, data)) = decoder.push_line(&line) else {
                        continue;
                    };
                    match parse_event(&event_type, &data) {
                        Ok(event) => {
                            if self.apply_event(job, event) {
                                return;
                            }
                        }
                        Err(err) => {
                            // Recoverable by contract: log and keep reading.
                            warn!(
                                correlation_id = %job.correlation_id,
                                error = %err,
                                "skipping unparseable stream event"
                            );
                        }
                    }
                }
                Ok(None) => {
                    job.state =
                        JobState::Failed("event stream ended before a terminal event".into());
                    return;
                }
                Err(err) => {
                    job.state = JobState::Failed(err.to_string());
                    return;
                }
            }
        }
    }

    /// Apply one parsed event to the job. Returns true when the event was
    /// terminal and the stream should close.
    fn apply_event(&self, job: &mut ScanJob, event: ScanEvent) -> bool {
        match event {
            ScanEvent::Progress { message } => {
                job.progress_message = Some(message);
                self.update_active(job);
                self.observer.job_updated(job);
                false
            }
            ScanEvent::ItemProgress { current, total, stage } => {
                job.items_completed = current;
                job.items_total = Some(total);
                if let Some(stage) = stage {
                    job.progress_message = Some(stage);
                }
                self.update_active(job);
                self.observer.job_updated(job);
                false
            }
            ScanEvent::Result { item } => {
                self.observer.item_recognized(job.correlation_id, &item);
                job.items.push(item);
                self.update_active(job);
                false
            }
            ScanEvent::SegmentedPreview(preview) => {
                self.observer.preview_ready(job.correlation_id, preview.detected_count);
                job.preview = Some(preview);
                self.update_active(job);
                false
            }
            ScanEvent::EnrichmentDegraded { context } => {
                debug!(correlation_id = %job.correlation_id, context, "enrichment degraded");
                job.progress_message = Some(context);
                self.update_active(job);
                self.observer.job_updated(job);
                false
            }
            ScanEvent::Ping => false,
            ScanEvent::Complete { results_location, items } => {
                if let Some(items) = items {
                    job.items.extend(items);
                }
                debug!(
                    correlation_id = %job.correlation_id,
                    results_location = results_location.as_deref().unwrap_or(""),
                    "scan complete"
                );
                job.state = JobState::Completed;
                true
            }
            ScanEvent::Error { message, code, .. } => {
                let message = if message.is_empty() { "scan failed".to_string() } else { message };
                warn!(
                    correlation_id = %job.correlation_id,
                    code = code.as_deref().unwrap_or(""),
                    "server reported scan error"
                );
                job.state = JobState::Failed(message);
                true
            }
            ScanEvent::Canceled => {
                job.state = JobState::Canceled;
                true
            }
        }
    }

    /// Route an upload failure: 429 to the rate gate, connectivity loss to
    /// the durable queue, everything else to a terminal failure.
    async fn route_upload_failure(
        &self,
        job: &mut ScanJob,
        payload: Vec<u8>,
        err: &ScanError,
        already_durable: bool,
    ) -> SpanEnd {
        match err {
            ScanError::RateLimited { retry_after } => {
                let window = retry_after.unwrap_or(self.config.default_rate_window);
                self.rate_gate.set_limited(window);
                self.rate_gate.enqueue(payload);
                job.state = JobState::RateLimited;
                info!(
                    correlation_id = %job.correlation_id,
                    window_secs = window.as_secs(),
                    "scan deferred behind rate limit"
                );
                self.observer.job_updated(job);
                SpanEnd::RateLimited
            }
            ScanError::Connectivity(_) | ScanError::Timeout(_) => {
                if !already_durable {
                    if let Err(enqueue_err) = self.queue.enqueue(&payload, job.captured_at).await {
                        warn!(
                            correlation_id = %job.correlation_id,
                            error = %enqueue_err,
                            "failed to queue scan after connectivity loss"
                        );
                        job.state = JobState::Failed(enqueue_err.to_string());
                        return SpanEnd::Terminal;
                    }
                }
                job.state = JobState::OfflineQueued;
                info!(correlation_id = %job.correlation_id, "connectivity lost, scan queued durably");
                self.observer.job_updated(job);
                SpanEnd::WentOffline
            }
            other => {
                job.state = JobState::Failed(other.to_string());
                SpanEnd::Terminal
            }
        }
    }

    /// Fire-and-forget server-side cleanup. Failures are logged only; a
    /// cleanup error must never change a job's outcome.
    fn spawn_cleanup(&self, server_job_id: String) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(err) = transport.cleanup(&server_job_id).await {
                warn!(server_job_id, error = %err, "best-effort cleanup failed");
            }
        });
    }

    /// Cancellation exit: best-effort cleanup if the server knows about the
    /// job, then finalize as canceled.
    async fn finish_canceled(&self, mut job: ScanJob, record_id: Option<Uuid>) {
        job.state = JobState::Canceled;
        if let Some(server_job_id) = job.server_job_id.clone() {
            self.spawn_cleanup(server_job_id);
        }
        self.finalize(job, record_id, true).await;
    }

    /// Terminal exit: remove from the active set, retain for display, and
    /// drop the durable record backing the job, when there is one.
    async fn finalize(&self, job: ScanJob, record_id: Option<Uuid>, remove_record: bool) {
        lock(&self.active).remove(&job.correlation_id);
        if let Some(id) = record_id {
            if remove_record {
                if let Err(err) = self.queue.remove(id).await {
                    warn!(record_id = %id, error = %err, "failed to remove replayed record");
                }
            }
            lock(&self.in_replay).remove(&id);
        }
        self.observer.job_finished(&job);
        lock(&self.finished).push(job);
    }

    /// Non-terminal exit (rate-limited or gone offline): the job leaves the
    /// active set without joining the finished list.
    async fn leave_active(&self, job: ScanJob, record_id: Option<Uuid>, remove_record: bool) {
        lock(&self.active).remove(&job.correlation_id);
        if let Some(id) = record_id {
            if remove_record {
                if let Err(err) = self.queue.remove(id).await {
                    warn!(record_id = %id, error = %err, "failed to remove handed-off record");
                }
            }
            lock(&self.in_replay).remove(&id);
        }
    }

    fn update_active(&self, job: &ScanJob) {
        lock(&self.active).insert(job.correlation_id, job.clone());
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        lock(&self.jobs_cancel).cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
