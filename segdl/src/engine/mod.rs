//! Transfer engine: runs one transfer's segments to completion.
//!
//! # Architecture
//!
//! ```text
//!            ┌────────────── TransferEngine::run ──────────────┐
//!            │ load or plan segments ─► persist                │
//!            │        │                                        │
//!            │        ▼                                        │
//!            │  JoinSet of SegmentWorkers ◄── Semaphore pool   │
//!            │        │ (segment, outcome)                     │
//!            │        ▼                                        │
//!            │  completion check ─► Merger ─► EngineOutcome    │
//!            │        ▲                                        │
//!            │  reporter: Σ counters ─► Progress events        │
//!            └─────────────────────────────────────────────────┘
//! ```
//!
//! A run ends in one of four outcomes: completed (merged), failed (some
//! segment exhausted its attempts), paused or cancelled. Failed segments do
//! not stop their siblings, and a failed transfer is never retried as a
//! whole. A paused engine can be resumed and run again; only segments that
//! are not yet complete are resubmitted.
//!
//! # Example
//!
//! ```ignore
//! let engine = Arc::new(TransferEngine::new(transfer, store, transport, merger, events, config));
//! match engine.run().await? {
//!     EngineOutcome::Completed(report) => println!("saved {}", report.path.display()),
//!     EngineOutcome::Paused => { engine.resume()?; engine.run().await?; }
//!     other => eprintln!("{:?}", other),
//! }
//! ```

mod config;
mod control;
mod error;
mod events;
mod policy;
mod progress;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::merge::{remove_sinks, MergeError, MergeReport, MergeRequest, Merger};
use crate::model::{Segment, SegmentStatus, Transfer, TransferId, TransferStatus};
use crate::storage::TransferStore;
use crate::transport::Transport;

pub use config::{
    EngineConfig, DEFAULT_BUFFER_SIZE, DEFAULT_RETRY_DELAY_MS, DEFAULT_STALL_TIMEOUT_SECS,
};
pub use control::TransferControl;
pub use error::{EngineError, SegmentError};
pub use events::{EventBus, TransferEvent, DEFAULT_EVENT_CAPACITY};
pub use policy::RetryPolicy;
pub use progress::{percent, ProgressSnapshot, SegmentCounters, TransferProgress};
pub use worker::{SegmentOutcome, SegmentWorker, WorkerContext};

/// How an engine run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Completed(MergeReport),
    Failed {
        reason: String,
        failed_segments: Vec<usize>,
    },
    Paused,
    Cancelled,
}

impl EngineOutcome {
    /// Status the transfer is left in.
    pub fn status(&self) -> TransferStatus {
        match self {
            Self::Completed(_) => TransferStatus::Completed,
            Self::Failed { .. } => TransferStatus::Failed,
            Self::Paused => TransferStatus::Paused,
            Self::Cancelled => TransferStatus::Cancelled,
        }
    }
}

/// Tallies of one run's worker results.
#[derive(Debug, Default)]
struct RunTally {
    completed: usize,
    failed: Vec<(usize, String)>,
    interrupted: usize,
    panicked: usize,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct TransferEngine {
    transfer: Mutex<Transfer>,
    store: Arc<dyn TransferStore>,
    transport: Arc<dyn Transport>,
    merger: Merger,
    events: EventBus,
    config: Arc<EngineConfig>,
    control: TransferControl,
    progress: Mutex<Option<Arc<TransferProgress>>>,
    running: AtomicBool,
}

impl TransferEngine {
    pub fn new(
        transfer: Transfer,
        store: Arc<dyn TransferStore>,
        transport: Arc<dyn Transport>,
        merger: Merger,
        events: EventBus,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            transfer: Mutex::new(transfer),
            store,
            transport,
            merger,
            events,
            config,
            control: TransferControl::new(),
            progress: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TransferId {
        self.transfer.lock().id.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.transfer.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a pause is in force (set by [`pause`](Self::pause), cleared by
    /// [`resume`](Self::resume)).
    pub fn is_pause_requested(&self) -> bool {
        self.control.is_paused()
    }

    /// Current transfer record with live progress figures.
    pub fn snapshot(&self) -> Transfer {
        let mut transfer = self.transfer.lock().clone();
        if self.is_running() {
            if let Some(progress) = self.progress.lock().as_ref() {
                let snap = progress.snapshot();
                transfer.downloaded = snap.downloaded;
                transfer.speed = snap.speed;
            }
        }
        transfer
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Requests a cooperative pause. Workers stop at the next chunk boundary
    /// and [`run`](Self::run) returns [`EngineOutcome::Paused`].
    pub fn pause(&self) -> Result<(), EngineError> {
        {
            let transfer = self.transfer.lock();
            if transfer.status.is_terminal() || transfer.status == TransferStatus::Merging {
                return Err(crate::model::InvalidTransition {
                    id: transfer.id.clone(),
                    from: transfer.status,
                    to: TransferStatus::Paused,
                }
                .into());
            }
        }
        self.control.pause();
        if !self.is_running() {
            self.set_status(TransferStatus::Paused)?;
        }
        Ok(())
    }

    /// Clears the pause flag and requeues the transfer for its next run.
    pub fn resume(&self) -> Result<(), EngineError> {
        self.control.resume();
        if !self.is_running() && self.status() == TransferStatus::Paused {
            self.set_status(TransferStatus::Queued)?;
        }
        Ok(())
    }

    /// Cancels the transfer. Idempotent; sinks are removed either by the
    /// running engine or, when idle, immediately.
    pub fn cancel(&self) -> Result<(), EngineError> {
        {
            let transfer = self.transfer.lock();
            if transfer.status == TransferStatus::Cancelled {
                return Ok(());
            }
            if !transfer.status.can_transition_to(TransferStatus::Cancelled) {
                return Err(crate::model::InvalidTransition {
                    id: transfer.id.clone(),
                    from: transfer.status,
                    to: TransferStatus::Cancelled,
                }
                .into());
            }
        }
        self.control.cancel();
        if !self.is_running() {
            self.finish_cancelled()?;
        }
        Ok(())
    }

    /// Records a failure for a run that ended without an outcome (for
    /// example, a store error). No-op on terminal transfers.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let id = {
            let mut transfer = self.transfer.lock();
            if transfer.status.is_terminal() {
                return;
            }
            transfer.fail(reason.clone());
            if let Err(e) = self.store.update(&transfer) {
                warn!(transfer_id = %transfer.id, error = %e, "failed to persist failure");
            }
            transfer.id.clone()
        };

        error!(transfer_id = %id, reason = %reason, "transfer aborted");
        self.events.status(&id, TransferStatus::Failed);
        self.events.emit(TransferEvent::Error {
            id,
            message: reason,
            segment: None,
        });
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Runs the transfer until it completes, fails, pauses or is cancelled.
    pub async fn run(&self) -> Result<EngineOutcome, EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning(self.id()));
        }
        let _running = RunningGuard(&self.running);

        let token = self.control.begin_run();
        if self.control.is_cancelled() {
            return self.finish_cancelled();
        }
        if self.control.is_paused() {
            self.set_status(TransferStatus::Paused)?;
            return Ok(EngineOutcome::Paused);
        }

        let started = self.commit(|transfer| {
            if transfer.status != TransferStatus::Active {
                transfer.transition(TransferStatus::Active)?;
            }
            transfer.error = None;
            transfer.failed_segment = None;
            Ok(())
        })?;
        let (id, url) = (started.id, started.url);
        self.events.status(&id, TransferStatus::Active);
        info!(transfer_id = %id, url = %url, "transfer started");

        let mut segments = self.prepare_segments(&token).await?;
        let total = self.transfer.lock().total_size;

        let progress = Arc::new(TransferProgress::new(&segments, total));
        *self.progress.lock() = Some(Arc::clone(&progress));

        let stop_reporter = CancellationToken::new();
        let (tally, ()) = tokio::join!(
            async {
                let tally = self.run_workers(&mut segments, &progress, &token).await;
                stop_reporter.cancel();
                tally
            },
            self.report_progress(&progress, &stop_reporter),
        );

        let snap = progress.snapshot();
        {
            let mut transfer = self.transfer.lock();
            transfer.downloaded = snap.downloaded;
            transfer.speed = 0;
        }

        self.finish(segments, tally).await
    }

    /// Loads persisted segments or plans and persists new ones.
    async fn prepare_segments(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<Segment>, EngineError> {
        let (id, url, headers, destination, hint, known_size) = {
            let t = self.transfer.lock();
            (
                t.id.clone(),
                t.url.clone(),
                t.headers.clone(),
                t.destination.clone(),
                t.segment_hint,
                t.total_size,
            )
        };

        let mut segments = self.store.segments_for(&id)?;

        if segments.is_empty() {
            let (total, ranged) = match known_size {
                Some(size) => (Some(size), true),
                None => {
                    let probe = tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        info = self.transport.probe(&url, &headers) => Some(info),
                    };
                    match probe {
                        Some(Ok(info)) => {
                            if !info.accepts_ranges {
                                info!(transfer_id = %id, "server does not accept ranges, downloading as a single stream");
                            }
                            (info.total_size, info.accepts_ranges)
                        }
                        Some(Err(e)) => {
                            warn!(transfer_id = %id, error = %e, "probe failed, downloading as a single stream");
                            (None, false)
                        }
                        None => (None, false),
                    }
                }
            };

            let planner = self.config.planner(hint);
            let ranges = if ranged {
                planner.plan(total)
            } else {
                planner.plan(None)
            };
            segments = Segment::from_plan(&id, &destination, &ranges);
            self.store.save_segments(&id, &segments)?;
            self.commit(|transfer| {
                transfer.total_size = total;
                Ok(())
            })?;

            info!(
                transfer_id = %id,
                total_size = ?total,
                segments = segments.len(),
                ranged,
                "planned segments"
            );
        } else {
            debug!(transfer_id = %id, segments = segments.len(), "loaded persisted segments");
        }

        // Attempts carry over between runs; the budget is per segment, not per run.
        for segment in segments.iter_mut().filter(|s| !s.is_complete()) {
            segment.status = SegmentStatus::Pending;
        }

        Ok(segments)
    }

    async fn run_workers(
        &self,
        segments: &mut [Segment],
        progress: &Arc<TransferProgress>,
        token: &CancellationToken,
    ) -> RunTally {
        let (url, headers, hint, max_attempts, algorithm) = {
            let t = self.transfer.lock();
            (
                t.url.clone(),
                t.headers.clone(),
                t.segment_hint,
                t.max_attempts,
                t.integrity.algorithm,
            )
        };

        let mut tally = RunTally {
            completed: segments.iter().filter(|s| s.is_complete()).count(),
            ..Default::default()
        };
        let pending = segments.len() - tally.completed;
        if pending == 0 {
            return tally;
        }

        let pool_size = pending.min(hint.max(1)).min(self.config.max_segments.max(1));
        let pool = Arc::new(Semaphore::new(pool_size));
        let ctx = WorkerContext {
            transport: Arc::clone(&self.transport),
            url: Arc::from(url.as_str()),
            headers: Arc::new(headers),
            policy: RetryPolicy::linear(max_attempts.max(1), self.config.retry_delay),
            stall_timeout: self.config.stall_timeout,
            speed_interval: self.config.speed_interval,
            buffer_size: self.config.buffer_size,
            digest: self.config.segment_digests.then_some(algorithm),
            events: self.events.clone(),
            token: token.clone(),
        };

        debug!(pending, pool_size, "spawning segment workers");

        let mut workers = JoinSet::new();
        for (position, segment) in segments.iter().enumerate() {
            if segment.is_complete() {
                continue;
            }
            let Some(counters) = progress.segment(position) else {
                continue;
            };
            let worker = SegmentWorker::new(ctx.clone(), Arc::clone(counters), segment.clone());
            workers.spawn(worker.run(Arc::clone(&pool)));
        }

        while let Some(joined) = workers.join_next().await {
            let (segment, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "segment worker panicked");
                    tally.panicked += 1;
                    continue;
                }
            };

            let index = segment.index;
            if let Err(e) = self.store.update_segment(&segment) {
                warn!(segment = index, error = %e, "failed to persist segment");
            }

            match outcome {
                SegmentOutcome::Completed => tally.completed += 1,
                SegmentOutcome::Failed(e) => tally.failed.push((index, e.to_string())),
                SegmentOutcome::Interrupted => tally.interrupted += 1,
            }

            if let Some(slot) = segments.iter_mut().find(|s| s.index == index) {
                *slot = segment;
            }

            if tally.completed + tally.failed.len() == segments.len() {
                debug!(
                    completed = tally.completed,
                    failed = tally.failed.len(),
                    "all segments settled"
                );
            }
        }

        tally
    }

    async fn report_progress(&self, progress: &TransferProgress, stop: &CancellationToken) {
        let id = self.id();
        let mut ticker = tokio::time::interval(self.config.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let snap = progress.snapshot();
                    self.events.emit(TransferEvent::Progress {
                        id: id.clone(),
                        downloaded: snap.downloaded,
                        total: snap.total,
                        percent: snap.percent,
                        speed: snap.speed,
                    });

                    let record = {
                        let mut transfer = self.transfer.lock();
                        transfer.downloaded = snap.downloaded;
                        transfer.speed = snap.speed;
                        transfer.clone()
                    };
                    if let Err(e) = self.store.update(&record) {
                        warn!(transfer_id = %id, error = %e, "failed to persist progress");
                    }
                }
            }
        }
    }

    // =========================================================================
    // Outcome handling
    // =========================================================================

    async fn finish(
        &self,
        segments: Vec<Segment>,
        tally: RunTally,
    ) -> Result<EngineOutcome, EngineError> {
        if self.control.is_cancelled() {
            return self.finish_cancelled();
        }

        // An exhausted segment fails the transfer even when a pause stopped
        // its siblings.
        if !tally.failed.is_empty() || tally.panicked > 0 {
            let mut failed: Vec<usize> = tally.failed.iter().map(|(i, _)| *i).collect();
            failed.sort_unstable();
            let reason = match tally.failed.iter().min_by_key(|(i, _)| *i) {
                Some((index, msg)) => format!("segment {} failed: {}", index, msg),
                None => "segment worker aborted".to_string(),
            };
            return self.finish_failed(reason, failed);
        }

        // Interruptions only come from a pause, even if it was lifted again
        // before the workers wound down.
        if tally.interrupted > 0 {
            self.set_status(TransferStatus::Paused)?;
            info!(transfer_id = %self.id(), "transfer paused");
            return Ok(EngineOutcome::Paused);
        }

        self.merge(segments).await
    }

    async fn merge(&self, segments: Vec<Segment>) -> Result<EngineOutcome, EngineError> {
        let transfer = self.commit(|transfer| Ok(transfer.transition(TransferStatus::Merging)?))?;
        let id = transfer.id.clone();
        let request = MergeRequest {
            transfer_id: transfer.id,
            destination: transfer.destination,
            segments,
            algorithm: transfer.integrity.algorithm,
            expected: transfer.integrity.expected,
            strict: self.config.strict_integrity,
        };
        self.events.status(&id, TransferStatus::Merging);

        match self.merger.merge(request).await {
            Ok(report) => {
                if report.verified == Some(false) {
                    let expected = self.transfer.lock().integrity.expected.clone();
                    warn!(transfer_id = %id, digest = %report.digest, "merged file does not match expected digest");
                    self.events.emit(TransferEvent::IntegrityMismatch {
                        id: id.clone(),
                        expected: expected.unwrap_or_default(),
                        actual: report.digest.clone(),
                    });
                }

                self.commit(|transfer| {
                    transfer.integrity.actual = Some(report.digest.clone());
                    transfer.integrity.verified = report.verified;
                    transfer.downloaded = report.bytes;
                    transfer.total_size = Some(report.bytes);
                    Ok(transfer.transition(TransferStatus::Completed)?)
                })?;
                if let Err(e) = self.store.delete_segments(&id) {
                    warn!(transfer_id = %id, error = %e, "failed to drop segment records");
                }

                self.events.status(&id, TransferStatus::Completed);
                self.events.emit(TransferEvent::Completed {
                    id: id.clone(),
                    path: report.path.clone(),
                    digest: report.digest.clone(),
                    verified: report.verified,
                });
                info!(transfer_id = %id, bytes = report.bytes, "transfer completed");
                Ok(EngineOutcome::Completed(report))
            }
            Err(e) => {
                if let MergeError::DigestMismatch { expected, actual } = &e {
                    let mut transfer = self.transfer.lock();
                    transfer.integrity.actual = Some(actual.clone());
                    transfer.integrity.verified = Some(false);
                    self.events.emit(TransferEvent::IntegrityMismatch {
                        id: id.clone(),
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
                self.finish_failed(format!("merge failed: {}", e), Vec::new())
            }
        }
    }

    fn finish_failed(
        &self,
        reason: String,
        failed_segments: Vec<usize>,
    ) -> Result<EngineOutcome, EngineError> {
        let id = self
            .commit(|transfer| {
                transfer.transition(TransferStatus::Failed)?;
                transfer.failed_segment = failed_segments.first().copied();
                transfer.error = Some(reason.clone());
                Ok(())
            })?
            .id;

        error!(transfer_id = %id, reason = %reason, "transfer failed");
        self.events.status(&id, TransferStatus::Failed);
        self.events.emit(TransferEvent::Error {
            id,
            message: reason.clone(),
            segment: failed_segments.first().copied(),
        });

        Ok(EngineOutcome::Failed {
            reason,
            failed_segments,
        })
    }

    fn finish_cancelled(&self) -> Result<EngineOutcome, EngineError> {
        let id = self.id();
        let segments = self.store.segments_for(&id)?;
        remove_sinks(&segments);
        self.store.delete_segments(&id)?;

        if self.status() != TransferStatus::Cancelled {
            self.commit(|transfer| Ok(transfer.transition(TransferStatus::Cancelled)?))?;
            info!(transfer_id = %id, sinks = segments.len(), "transfer cancelled");
            self.events.status(&id, TransferStatus::Cancelled);
        }
        Ok(EngineOutcome::Cancelled)
    }

    fn set_status(&self, status: TransferStatus) -> Result<(), EngineError> {
        if self.status() == status {
            return Ok(());
        }
        let id = self
            .commit(|transfer| Ok(transfer.transition(status)?))?
            .id;
        self.events.status(&id, status);
        Ok(())
    }

    /// Applies `change` to a copy of the record, persists the copy and only
    /// then installs it, so a failed write leaves the in-memory record as it
    /// was.
    fn commit<F>(&self, change: F) -> Result<Transfer, EngineError>
    where
        F: FnOnce(&mut Transfer) -> Result<(), EngineError>,
    {
        let mut transfer = self.transfer.lock();
        let mut next = transfer.clone();
        change(&mut next)?;
        self.store.update(&next)?;
        *transfer = next.clone();
        Ok(next)
    }
}
