//! Transfer orchestrator: admission control over many engines.
//!
//! The [`Orchestrator`] owns every live [`TransferEngine`] in one registry
//! and enforces a ceiling on concurrently active transfers. Transfers beyond
//! the ceiling wait in a [`PriorityQueue`]; paused ones are held until
//! resumed.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────── Orchestrator ─────────────────────────────┐
//! │                                                                         │
//! │  submit ──► store (Queued) ──► PriorityQueue ──┐                        │
//! │                                                 │ Notify                │
//! │  recover ──► Active/Merging ──► launch ◄────────┤                       │
//! │          └─► Queued/Pending ──► queue           ▼                       │
//! │          └─► Paused ──► held          admission loop                    │
//! │                                       (Semaphore: max_active)           │
//! │                                                 │                       │
//! │                                                 ▼                       │
//! │                               TransferEngine::run ──► on_finished       │
//! │                                 │                  ├─ terminal: drop    │
//! │                                 │                  ├─ paused: held      │
//! │                                 ▼                  └─ resumed: requeue  │
//! │                             EventBus ──► subscribe()                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A slot permit is held from admission until the engine's outcome has been
//! recorded, so the number of running engines never exceeds the ceiling.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(store, transport, OrchestratorConfig::default());
//! let report = orchestrator.recover()?;
//! orchestrator.start();
//!
//! let mut events = orchestrator.subscribe();
//! let id = orchestrator.submit(Transfer::builder(url, dest).build())?;
//!
//! orchestrator.pause(&id)?;
//! orchestrator.resume(&id)?;
//!
//! orchestrator.shutdown().await;
//! ```

mod config;
mod error;
mod queue;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{
    EngineConfig, EngineError, EngineOutcome, EventBus, ProgressSnapshot, TransferEngine,
    TransferEvent,
};
use crate::merge::{remove_sinks, Merger};
use crate::model::{InvalidTransition, Transfer, TransferId, TransferStatus};
use crate::storage::TransferStore;
use crate::transport::Transport;

pub use config::{OrchestratorConfig, DEFAULT_MAX_ACTIVE, DEFAULT_QUEUE_CAPACITY};
pub use error::OrchestratorError;
pub use queue::{PriorityQueue, QueuedTransfer};

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// What [`Orchestrator::recover`] did with the persisted transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted transfers restarted immediately.
    pub started: usize,
    /// Transfers placed on the queue (including demoted ones).
    pub queued: usize,
    /// Paused transfers registered but not admitted.
    pub held: usize,
    /// Interrupted transfers that found no free slot and were queued.
    pub demoted: usize,
}

/// Cross-transfer state guarded by one lock.
#[derive(Default)]
struct Registry {
    queue: PriorityQueue,
    held: HashSet<TransferId>,
    active: HashSet<TransferId>,
    /// Engines of every registered, non-terminal transfer.
    engines: HashMap<TransferId, Arc<TransferEngine>>,
    /// Active transfers paused by shutdown rather than by the user.
    shutdown_paused: HashSet<TransferId>,
}

struct Inner {
    store: Arc<dyn TransferStore>,
    transport: Arc<dyn Transport>,
    merger: Merger,
    config: OrchestratorConfig,
    engine_config: Arc<EngineConfig>,
    events: EventBus,
    registry: Mutex<Registry>,
    slots: Arc<Semaphore>,
    queued: Notify,
    shutdown: CancellationToken,
    sequence: AtomicU64,
    admission: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        transport: Arc<dyn Transport>,
        config: OrchestratorConfig,
    ) -> Self {
        let engine_config = Arc::new(config.engine.clone());
        let events = EventBus::new(config.event_capacity);
        let slots = Arc::new(Semaphore::new(config.max_active.max(1)));

        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                merger: Merger::new(),
                config,
                engine_config,
                events,
                registry: Mutex::new(Registry::default()),
                slots,
                queued: Notify::new(),
                shutdown: CancellationToken::new(),
                sequence: AtomicU64::new(0),
                admission: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Receives every event of every transfer from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the admission loop. Calling it again has no effect.
    pub fn start(&self) {
        let mut admission = self.inner.admission.lock();
        if admission.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *admission = Some(tokio::spawn(admission_loop(inner)));
        info!(
            max_active = self.inner.config.max_active,
            queue_capacity = self.inner.config.queue_capacity,
            "orchestrator started"
        );
    }

    /// Stops admitting, pauses live engines and waits for them to wind down.
    ///
    /// Transfers interrupted here are persisted as `Queued` so that the next
    /// [`recover`](Self::recover) picks them up; ones the user had paused
    /// stay `Paused`.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let active: Vec<Arc<TransferEngine>> = {
            let mut registry = self.inner.registry.lock();
            let ids: Vec<TransferId> = registry.active.iter().cloned().collect();
            let mut engines = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(engine) = registry.engines.get(&id).cloned() {
                    if !engine.is_pause_requested() {
                        registry.shutdown_paused.insert(id);
                    }
                    engines.push(engine);
                }
            }
            engines
        };

        info!(active = active.len(), "orchestrator shutting down");
        for engine in &active {
            // A merging engine cannot pause; it is left to finish.
            if let Err(e) = engine.pause() {
                debug!(transfer_id = %engine.id(), error = %e, "engine not paused for shutdown");
            }
        }

        let all = self.inner.config.max_active.max(1) as u32;
        if let Ok(permits) = self.inner.slots.acquire_many(all).await {
            permits.forget();
        }
        self.inner.slots.close();

        let handle = self.inner.admission.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "admission loop ended abnormally");
            }
        }
        info!("orchestrator stopped");
    }

    /// Re-registers every non-terminal transfer found in the store.
    ///
    /// `Active` and `Merging` transfers are restarted at once while slots are
    /// free and demoted to `Queued` otherwise; `Queued` and `Pending` ones
    /// are queued; `Paused` ones are held until resumed. Must be called from
    /// within a Tokio runtime.
    pub fn recover(&self) -> OrchestratorResult<RecoveryReport> {
        let inner = &self.inner;
        let transfers = inner.store.non_terminal()?;
        let mut report = RecoveryReport::default();

        if let Some(max) = transfers.iter().map(|t| t.sequence).max() {
            inner.sequence.fetch_max(max + 1, Ordering::SeqCst);
        }

        for mut transfer in transfers {
            let id = transfer.id.clone();
            if inner.registry.lock().engines.contains_key(&id) {
                continue;
            }

            match transfer.status {
                TransferStatus::Active | TransferStatus::Merging => {
                    match Arc::clone(&inner.slots).try_acquire_owned() {
                        Ok(permit) => {
                            let engine = inner.engine_for(transfer);
                            {
                                let mut registry = inner.registry.lock();
                                registry.engines.insert(id.clone(), Arc::clone(&engine));
                                registry.active.insert(id.clone());
                            }
                            launch(inner, engine, permit);
                            report.started += 1;
                        }
                        Err(_) => {
                            transfer.transition(TransferStatus::Queued)?;
                            inner.store.update(&transfer)?;
                            inner.enqueue(transfer);
                            report.demoted += 1;
                            report.queued += 1;
                        }
                    }
                }
                TransferStatus::Pending | TransferStatus::Queued => {
                    if transfer.status == TransferStatus::Pending {
                        transfer.transition(TransferStatus::Queued)?;
                        inner.store.update(&transfer)?;
                    }
                    inner.enqueue(transfer);
                    report.queued += 1;
                }
                TransferStatus::Paused => {
                    let engine = inner.engine_for(transfer);
                    let mut registry = inner.registry.lock();
                    registry.engines.insert(id.clone(), engine);
                    registry.held.insert(id);
                    report.held += 1;
                }
                _ => {}
            }
        }

        info!(
            started = report.started,
            queued = report.queued,
            held = report.held,
            demoted = report.demoted,
            "recovered transfers"
        );
        Ok(report)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Validates and queues a new transfer.
    ///
    /// When the queue is at capacity the transfer is persisted as `Failed`
    /// and [`OrchestratorError::QueueFull`] is returned.
    pub fn submit(&self, mut transfer: Transfer) -> OrchestratorResult<TransferId> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }
        validate(&transfer)?;
        if inner.store.get(&transfer.id)?.is_some() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "transfer {} already exists",
                transfer.id
            )));
        }

        transfer.sequence = inner.sequence.fetch_add(1, Ordering::SeqCst);
        let id = transfer.id.clone();
        let capacity = inner.config.queue_capacity;

        let mut registry = inner.registry.lock();
        if registry.queue.len() >= capacity {
            drop(registry);
            transfer.transition(TransferStatus::Failed)?;
            transfer.error = Some(format!("queue full ({} transfers waiting)", capacity));
            inner.store.insert(&transfer)?;
            inner.events.status(&id, TransferStatus::Failed);
            warn!(transfer_id = %id, capacity, "queue full, transfer rejected");
            return Err(OrchestratorError::QueueFull { id, capacity });
        }

        transfer.transition(TransferStatus::Queued)?;
        inner.store.insert(&transfer)?;
        let entry = QueuedTransfer::from_transfer(&transfer);
        let engine = inner.engine_for(transfer);
        registry.engines.insert(id.clone(), engine);
        registry.queue.push(entry);
        let queued = registry.queue.len();
        drop(registry);

        inner.events.status(&id, TransferStatus::Queued);
        inner.queued.notify_one();
        debug!(transfer_id = %id, queued, "transfer submitted");
        Ok(id)
    }

    /// Pauses a transfer. A queued transfer leaves the queue and is held; a
    /// running one winds down at the next chunk boundary.
    pub fn pause(&self, id: &TransferId) -> OrchestratorResult<()> {
        let mut registry = self.inner.registry.lock();
        let Some(engine) = registry.engines.get(id).cloned() else {
            drop(registry);
            return Err(self.inner.unregistered(id, TransferStatus::Paused));
        };

        if registry.held.contains(id) {
            return Ok(());
        }
        if registry.active.contains(id) {
            drop(registry);
            engine.pause()?;
            info!(transfer_id = %id, "pause requested");
            return Ok(());
        }

        engine.pause()?;
        registry.queue.remove(id);
        registry.held.insert(id.clone());
        info!(transfer_id = %id, "queued transfer paused");
        Ok(())
    }

    /// Resumes a paused transfer by putting it back on the queue.
    pub fn resume(&self, id: &TransferId) -> OrchestratorResult<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let mut registry = inner.registry.lock();
        let Some(engine) = registry.engines.get(id).cloned() else {
            drop(registry);
            return Err(inner.unregistered(id, TransferStatus::Queued));
        };

        if registry.active.contains(id) {
            // The engine requeues itself if it winds down after this.
            engine.resume()?;
            return Ok(());
        }
        if !registry.held.contains(id) {
            return Ok(());
        }

        engine.resume()?;
        registry.held.remove(id);
        registry.queue.push(QueuedTransfer::from_transfer(&engine.snapshot()));
        drop(registry);

        inner.queued.notify_one();
        info!(transfer_id = %id, "transfer resumed");
        Ok(())
    }

    /// Cancels a transfer and removes its sinks. Idempotent.
    pub fn cancel(&self, id: &TransferId) -> OrchestratorResult<()> {
        let mut registry = self.inner.registry.lock();
        let Some(engine) = registry.engines.get(id).cloned() else {
            drop(registry);
            return match self.inner.store.get(id)? {
                Some(t) if t.status == TransferStatus::Cancelled => Ok(()),
                Some(t) => Err(InvalidTransition {
                    id: id.clone(),
                    from: t.status,
                    to: TransferStatus::Cancelled,
                }
                .into()),
                None => Err(OrchestratorError::NotFound(id.clone())),
            };
        };

        if registry.active.contains(id) {
            drop(registry);
            engine.cancel()?;
            info!(transfer_id = %id, "cancel requested");
            return Ok(());
        }

        engine.cancel()?;
        registry.queue.remove(id);
        registry.held.remove(id);
        registry.engines.remove(id);
        info!(transfer_id = %id, "transfer cancelled");
        Ok(())
    }

    /// Deletes a finished transfer from the store together with any sinks
    /// it left behind.
    pub fn remove(&self, id: &TransferId) -> OrchestratorResult<()> {
        let inner = &self.inner;
        let transfer = inner
            .store
            .get(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;

        if !transfer.status.is_terminal() || inner.registry.lock().engines.contains_key(id) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "transfer {} is {}; cancel it before removing",
                id, transfer.status
            )));
        }

        let segments = inner.store.segments_for(id)?;
        remove_sinks(&segments);
        inner.store.delete(id)?;
        info!(transfer_id = %id, sinks = segments.len(), "transfer removed");
        Ok(())
    }

    /// Resumes every held transfer.
    pub fn resume_all(&self) -> usize {
        let ids: Vec<TransferId> = self.inner.registry.lock().held.iter().cloned().collect();
        ids.iter()
            .filter(|id| match self.resume(id) {
                Ok(()) => true,
                Err(e) => {
                    debug!(transfer_id = %id, error = %e, "not resumed");
                    false
                }
            })
            .count()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Transfers currently holding an active slot.
    pub fn active_count(&self) -> usize {
        self.inner.registry.lock().active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.registry.lock().queue.len()
    }

    pub fn held_count(&self) -> usize {
        self.inner.registry.lock().held.len()
    }

    /// Current record of a transfer, with live figures for running ones.
    pub fn transfer(&self, id: &TransferId) -> OrchestratorResult<Transfer> {
        let engine = self.inner.registry.lock().engines.get(id).cloned();
        match engine {
            Some(engine) => Ok(engine.snapshot()),
            None => self
                .inner
                .store
                .get(id)?
                .ok_or_else(|| OrchestratorError::NotFound(id.clone())),
        }
    }

    pub fn progress(&self, id: &TransferId) -> OrchestratorResult<ProgressSnapshot> {
        let transfer = self.transfer(id)?;
        Ok(ProgressSnapshot {
            downloaded: transfer.downloaded,
            total: transfer.total_size,
            percent: transfer.percent(),
            speed: transfer.speed,
        })
    }

    /// Every stored transfer, oldest first, with live figures applied.
    pub fn transfers(&self) -> OrchestratorResult<Vec<Transfer>> {
        let engines = self.inner.registry.lock().engines.clone();
        let mut transfers = self.inner.store.list()?;
        for transfer in transfers.iter_mut() {
            if let Some(engine) = engines.get(&transfer.id) {
                *transfer = engine.snapshot();
            }
        }
        Ok(transfers)
    }
}

impl Inner {
    fn engine_for(&self, transfer: Transfer) -> Arc<TransferEngine> {
        Arc::new(TransferEngine::new(
            transfer,
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.merger.clone(),
            self.events.clone(),
            Arc::clone(&self.engine_config),
        ))
    }

    /// Registers a `Queued` transfer and wakes the admission loop.
    fn enqueue(&self, transfer: Transfer) {
        let id = transfer.id.clone();
        let entry = QueuedTransfer::from_transfer(&transfer);
        let engine = self.engine_for(transfer);
        {
            let mut registry = self.registry.lock();
            registry.engines.insert(id, engine);
            registry.queue.push(entry);
        }
        self.queued.notify_one();
    }

    /// Pops the best queued transfer and marks it active.
    fn next_admission(&self) -> Option<Arc<TransferEngine>> {
        let mut registry = self.registry.lock();
        if self.shutdown.is_cancelled() {
            return None;
        }
        while let Some(entry) = registry.queue.pop() {
            let Some(engine) = registry.engines.get(&entry.id).cloned() else {
                continue;
            };
            if registry.held.contains(&entry.id) || engine.status().is_terminal() {
                continue;
            }
            debug!(
                transfer_id = %entry.id,
                priority = entry.priority.value(),
                waited_ms = entry.wait_time().as_millis() as u64,
                "admitting transfer"
            );
            registry.active.insert(entry.id);
            return Some(engine);
        }
        None
    }

    /// Error for a command on a transfer with no registered engine.
    fn unregistered(&self, id: &TransferId, to: TransferStatus) -> OrchestratorError {
        match self.store.get(id) {
            Ok(Some(t)) => InvalidTransition {
                id: id.clone(),
                from: t.status,
                to,
            }
            .into(),
            Ok(None) => OrchestratorError::NotFound(id.clone()),
            Err(e) => e.into(),
        }
    }

    /// Records an engine's outcome and releases its slot.
    fn on_finished(
        &self,
        engine: &TransferEngine,
        result: Result<EngineOutcome, EngineError>,
        permit: OwnedSemaphorePermit,
    ) {
        let id = engine.id();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(EngineError::AlreadyRunning(_)) => {
                warn!(transfer_id = %id, "engine admitted twice");
                self.registry.lock().active.remove(&id);
                return;
            }
            Err(e) => {
                engine.mark_failed(format!("engine error: {}", e));
                EngineOutcome::Failed {
                    reason: e.to_string(),
                    failed_segments: Vec::new(),
                }
            }
        };

        let mut requeued = false;
        {
            let mut registry = self.registry.lock();
            registry.active.remove(&id);
            let by_shutdown = registry.shutdown_paused.remove(&id);

            match &outcome {
                EngineOutcome::Paused if by_shutdown => {
                    if let Err(e) = engine.resume() {
                        warn!(transfer_id = %id, error = %e, "failed to requeue for next start");
                    }
                    registry.engines.remove(&id);
                }
                EngineOutcome::Paused
                    if !engine.is_pause_requested() && !self.shutdown.is_cancelled() =>
                {
                    match engine.resume() {
                        Ok(()) => {
                            registry
                                .queue
                                .push(QueuedTransfer::from_transfer(&engine.snapshot()));
                            requeued = true;
                        }
                        Err(e) => {
                            warn!(transfer_id = %id, error = %e, "failed to requeue");
                            registry.held.insert(id.clone());
                        }
                    }
                }
                EngineOutcome::Paused => {
                    registry.held.insert(id.clone());
                }
                _ => {
                    registry.engines.remove(&id);
                }
            }
        }

        match &outcome {
            EngineOutcome::Completed(report) => {
                info!(transfer_id = %id, path = %report.path.display(), "transfer finished")
            }
            EngineOutcome::Failed { reason, .. } => {
                error!(transfer_id = %id, reason = %reason, "transfer finished with failure")
            }
            EngineOutcome::Paused => debug!(transfer_id = %id, requeued, "transfer paused"),
            EngineOutcome::Cancelled => debug!(transfer_id = %id, "transfer cancelled"),
        }

        drop(permit);
        if requeued {
            self.queued.notify_one();
        }
    }
}

/// Spawns an engine run that holds `permit` until its outcome is recorded.
fn launch(inner: &Arc<Inner>, engine: Arc<TransferEngine>, permit: OwnedSemaphorePermit) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let result = engine.run().await;
        inner.on_finished(&engine, result, permit);
    });
}

/// Waits for a free slot, then for a queued transfer, then launches it.
async fn admission_loop(inner: Arc<Inner>) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            permit = Arc::clone(&inner.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let engine = loop {
            // Registered before checking the queue so no wakeup is lost.
            let notified = inner.queued.notified();
            if let Some(engine) = inner.next_admission() {
                break Some(engine);
            }
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => break None,
                _ = notified => {}
            }
        };

        let Some(engine) = engine else {
            break;
        };
        launch(&inner, engine, permit);
    }
    debug!("admission loop stopped");
}

fn validate(transfer: &Transfer) -> OrchestratorResult<()> {
    let invalid = |msg: String| Err(OrchestratorError::InvalidRequest(msg));

    if transfer.status != TransferStatus::Pending {
        return invalid(format!(
            "new transfers must be pending, {} is {}",
            transfer.id, transfer.status
        ));
    }
    match transfer.url.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => {}
        _ => return invalid(format!("'{}' is not an absolute URL", transfer.url)),
    }
    if transfer.destination.as_os_str().is_empty() || transfer.destination.file_name().is_none() {
        return invalid(format!(
            "destination '{}' does not name a file",
            transfer.destination.display()
        ));
    }
    if transfer.segment_hint == 0 {
        return invalid("segment count must be at least 1".to_string());
    }
    if transfer.max_attempts == 0 {
        return invalid("max attempts must be at least 1".to_string());
    }
    if let Some(expected) = &transfer.integrity.expected {
        let algorithm = transfer.integrity.algorithm;
        let hex = expected.trim();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return invalid(format!(
                "expected digest is not a {} hex string",
                algorithm
            ));
        }
    }
    Ok(())
}
