//! In-memory embedding index published as immutable snapshots.
//!
//! A new [`Snapshot`] is built off to the side and installed with a single
//! pointer swap, so a reader holding a snapshot sees either the old or the new
//! index, never a mix of both.

use crate::types::{EmbeddingError, EmbeddingVector, IdentityKey};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable identity → embeddings mapping with stable insertion order.
#[derive(Debug)]
pub struct Snapshot {
    entries: Vec<(IdentityKey, Vec<EmbeddingVector>)>,
    index: HashMap<IdentityKey, usize>,
    created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty() -> Self {
        SnapshotBuilder::new().build()
    }

    /// Build a snapshot from ordered entries.
    ///
    /// Repeated keys are merged into the position of their first occurrence.
    pub fn from_entries(entries: Vec<(IdentityKey, Vec<EmbeddingVector>)>) -> Self {
        let mut builder = SnapshotBuilder::new();
        for (key, vectors) in entries {
            builder.extend(key, vectors);
        }
        builder.build()
    }

    /// Embeddings for one identity, empty when the key is unknown.
    pub fn lookup(&self, key: &IdentityKey) -> &[EmbeddingVector] {
        self.index
            .get(key)
            .map(|&i| self.entries[i].1.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&IdentityKey, &[EmbeddingVector])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn identity_count(&self) -> usize {
        self.entries.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Accumulates entries for a snapshot before publication.
#[derive(Default)]
pub struct SnapshotBuilder {
    entries: Vec<(IdentityKey, Vec<EmbeddingVector>)>,
    index: HashMap<IdentityKey, usize>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, key: IdentityKey) -> &mut Vec<EmbeddingVector> {
        let idx = match self.index.get(&key).copied() {
            Some(i) => i,
            None => {
                self.entries.push((key.clone(), Vec::new()));
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    pub fn extend(&mut self, key: IdentityKey, vectors: Vec<EmbeddingVector>) {
        self.slot(key).extend(vectors);
    }

    pub fn push(&mut self, key: IdentityKey, vector: EmbeddingVector) {
        self.slot(key).push(vector);
    }

    /// Insert raw values, rejecting anything that is not a unit-length 128-dim vector.
    pub fn push_raw(&mut self, key: IdentityKey, values: Vec<f64>) -> Result<(), EmbeddingError> {
        let vector = EmbeddingVector::from_unit(values)?;
        self.push(key, vector);
        Ok(())
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            entries: self.entries,
            index: self.index,
            created_at: Utc::now(),
        }
    }
}

/// Shared handle to the currently published snapshot.
pub struct EmbeddingStore {
    current: ArcSwap<Snapshot>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    /// The snapshot visible right now. Holding it keeps it alive across a swap.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Install a fully built snapshot and return it.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(snapshot);
        tracing::info!(
            identities = next.identity_count(),
            embeddings = next.embedding_count(),
            "publishing embedding snapshot"
        );
        self.current.store(Arc::clone(&next));
        next
    }

    /// Replace the whole index with `entries`. No merge with the prior snapshot.
    pub fn replace(&self, entries: Vec<(IdentityKey, Vec<EmbeddingVector>)>) -> Arc<Snapshot> {
        self.publish(Snapshot::from_entries(entries))
    }

    pub fn lookup(&self, key: &IdentityKey) -> Vec<EmbeddingVector> {
        self.current.load().lookup(key).to_vec()
    }
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}
