//! Typed transfer events.
//!
//! Engines and the orchestrator publish on one broadcast channel; any
//! number of subscribers (CLI progress bars, persistence hooks, tests)
//! observe the same ordered stream. Slow subscribers lag rather than
//! block the publishers.

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::model::{TransferId, TransferStatus};

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    StatusChanged {
        id: TransferId,
        status: TransferStatus,
    },

    /// Aggregate progress, emitted at the engine's reporting cadence.
    Progress {
        id: TransferId,
        downloaded: u64,
        total: Option<u64>,
        percent: u8,
        speed: u64,
    },

    /// Emitted at each speed sample of a segment.
    SegmentProgress {
        id: TransferId,
        index: usize,
        downloaded: u64,
        speed: u64,
    },

    /// A segment exhausted its attempts or hit a non-retryable error.
    SegmentFailed {
        id: TransferId,
        index: usize,
        reason: String,
    },

    /// The merged file does not match the expected digest.
    IntegrityMismatch {
        id: TransferId,
        expected: String,
        actual: String,
    },

    Completed {
        id: TransferId,
        path: PathBuf,
        digest: String,
        verified: Option<bool>,
    },

    Error {
        id: TransferId,
        message: String,
        segment: Option<usize>,
    },
}

impl TransferEvent {
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            Self::StatusChanged { id, .. }
            | Self::Progress { id, .. }
            | Self::SegmentProgress { id, .. }
            | Self::SegmentFailed { id, .. }
            | Self::IntegrityMismatch { id, .. }
            | Self::Completed { id, .. }
            | Self::Error { id, .. } => id,
        }
    }
}

/// Cloneable publishing handle for [`TransferEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransferEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: TransferEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.tx.subscribe()
    }

    pub fn status(&self, id: &TransferId, status: TransferStatus) {
        self.emit(TransferEvent::StatusChanged {
            id: id.clone(),
            status,
        });
    }
}
