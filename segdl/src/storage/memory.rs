//! In-memory store.

use dashmap::DashMap;

use super::{StorageError, StorageResult, TransferStore};
use crate::model::{Segment, Transfer, TransferId};

/// Transfer store backed by concurrent hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    transfers: DashMap<TransferId, Transfer>,
    segments: DashMap<TransferId, Vec<Segment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store from previously saved state.
    pub(crate) fn from_parts(
        transfers: impl IntoIterator<Item = Transfer>,
        segments: impl IntoIterator<Item = (TransferId, Vec<Segment>)>,
    ) -> Self {
        Self {
            transfers: transfers.into_iter().map(|t| (t.id.clone(), t)).collect(),
            segments: segments.into_iter().collect(),
        }
    }

    pub(crate) fn all_segments(&self) -> Vec<(TransferId, Vec<Segment>)> {
        self.segments
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl TransferStore for MemoryStore {
    fn insert(&self, transfer: &Transfer) -> StorageResult<()> {
        self.transfers.insert(transfer.id.clone(), transfer.clone());
        Ok(())
    }

    fn update(&self, transfer: &Transfer) -> StorageResult<()> {
        match self.transfers.get_mut(&transfer.id) {
            Some(mut existing) => {
                *existing = transfer.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(transfer.id.clone())),
        }
    }

    fn get(&self, id: &TransferId) -> StorageResult<Option<Transfer>> {
        Ok(self.transfers.get(id).map(|t| t.clone()))
    }

    fn delete(&self, id: &TransferId) -> StorageResult<()> {
        self.transfers.remove(id);
        self.segments.remove(id);
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<Transfer>> {
        let mut transfers: Vec<Transfer> = self.transfers.iter().map(|t| t.clone()).collect();
        transfers.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        Ok(transfers)
    }

    fn save_segments(&self, id: &TransferId, segments: &[Segment]) -> StorageResult<()> {
        let mut sorted = segments.to_vec();
        sorted.sort_by_key(|s| s.index);
        self.segments.insert(id.clone(), sorted);
        Ok(())
    }

    fn update_segment(&self, segment: &Segment) -> StorageResult<()> {
        let mut entry = self
            .segments
            .get_mut(&segment.transfer_id)
            .ok_or_else(|| StorageError::NotFound(segment.transfer_id.clone()))?;

        match entry.iter_mut().find(|s| s.index == segment.index) {
            Some(existing) => *existing = segment.clone(),
            None => {
                entry.push(segment.clone());
                entry.sort_by_key(|s| s.index);
            }
        }
        Ok(())
    }

    fn segments_for(&self, id: &TransferId) -> StorageResult<Vec<Segment>> {
        Ok(self
            .segments
            .get(id)
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    fn delete_segments(&self, id: &TransferId) -> StorageResult<()> {
        self.segments.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::exercise_store;

    #[test]
    fn test_memory_store_contract() {
        exercise_store(&MemoryStore::new());
    }
}
