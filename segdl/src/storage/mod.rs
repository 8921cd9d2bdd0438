//! Persistence of transfers and segments.
//!
//! The orchestrator and engines write every state transition and every
//! segment plan through a [`TransferStore`] so that a restarted process can
//! pick up where it left off.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: concurrent maps, nothing survives the process
//! - [`JsonFileStore`]: the same state snapshotted to a JSON file after each
//!   mutation (atomic rename)
//!
//! Store calls are synchronous and short; callers on the async runtime
//! invoke them inline.

mod json;
mod memory;

use std::cmp::Ordering;
use std::io;

use thiserror::Error;

use crate::model::{Segment, Transfer, TransferId, TransferStatus};

pub use json::JsonFileStore;
pub use memory::MemoryStore;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transfer {0} not found in store")]
    NotFound(TransferId),

    #[error("state file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("state file is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of transfers and their segments.
pub trait TransferStore: Send + Sync {
    /// Stores a new transfer, replacing any record with the same id.
    fn insert(&self, transfer: &Transfer) -> StorageResult<()>;

    /// Overwrites an existing transfer.
    fn update(&self, transfer: &Transfer) -> StorageResult<()>;

    fn get(&self, id: &TransferId) -> StorageResult<Option<Transfer>>;

    /// Removes a transfer together with its segments.
    fn delete(&self, id: &TransferId) -> StorageResult<()>;

    /// All transfers, oldest first.
    fn list(&self) -> StorageResult<Vec<Transfer>>;

    /// Replaces the segment set of a transfer.
    fn save_segments(&self, id: &TransferId, segments: &[Segment]) -> StorageResult<()>;

    /// Overwrites one segment, matched by transfer id and index.
    fn update_segment(&self, segment: &Segment) -> StorageResult<()>;

    /// Segments of a transfer ordered by index.
    fn segments_for(&self, id: &TransferId) -> StorageResult<Vec<Segment>>;

    fn delete_segments(&self, id: &TransferId) -> StorageResult<()>;

    /// Transfers not yet in a terminal state, in scheduling order
    /// (priority descending, then oldest first).
    fn non_terminal(&self) -> StorageResult<Vec<Transfer>> {
        let mut transfers: Vec<Transfer> = self
            .list()?
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect();
        transfers.sort_by(scheduling_order);
        Ok(transfers)
    }

    /// Transfers in the given states, in scheduling order.
    fn with_status(&self, statuses: &[TransferStatus]) -> StorageResult<Vec<Transfer>> {
        let mut transfers: Vec<Transfer> = self
            .list()?
            .into_iter()
            .filter(|t| statuses.contains(&t.status))
            .collect();
        transfers.sort_by(scheduling_order);
        Ok(transfers)
    }

    /// Number of transfers holding an active slot.
    fn count_active(&self) -> StorageResult<usize> {
        Ok(self
            .list()?
            .iter()
            .filter(|t| t.status.is_running())
            .count())
    }

    /// Persists aggregate progress for a transfer.
    fn update_progress(&self, id: &TransferId, downloaded: u64, speed: u64) -> StorageResult<()> {
        let mut transfer = self
            .get(id)?
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        transfer.downloaded = downloaded;
        transfer.speed = speed;
        self.update(&transfer)
    }
}

/// Priority descending, then creation time and submission order ascending.
pub fn scheduling_order(a: &Transfer, b: &Transfer) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.sequence.cmp(&b.sequence))
}
