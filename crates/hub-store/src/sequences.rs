//! Sequence store

use async_trait::async_trait;
use dashmap::DashMap;
use hub_core::{Sequence, SequenceId, SequenceStore, StoreError, StoreResult};

/// Sequences held in memory
#[derive(Debug, Default)]
pub struct MemorySequenceStore {
    sequences: DashMap<SequenceId, Sequence>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequences(sequences: impl IntoIterator<Item = Sequence>) -> Self {
        let store = Self::new();
        for sequence in sequences {
            store.add(sequence);
        }
        store
    }

    /// Add or replace a sequence
    pub fn add(&self, sequence: Sequence) {
        self.sequences.insert(sequence.id, sequence);
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn get(&self, id: SequenceId) -> StoreResult<Sequence> {
        self.sequences
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StoreError::not_found("sequence", id))
    }
}
