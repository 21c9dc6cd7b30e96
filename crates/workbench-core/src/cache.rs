//! Per-incident embedding storage.
//!
//! A cache holds at most one current vector per incident. Writes are a single
//! atomic replace keyed by incident id, so concurrent embed calls over
//! overlapping incident sets need no coordination beyond the cache itself.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StorageError};
use crate::model::{EmbeddingVector, IncidentId};

/// Owner of the current embedding for each incident.
pub trait VectorCache: Send + Sync {
    /// Current vector for an incident, whatever model produced it.
    fn get(&self, id: IncidentId) -> Result<Option<EmbeddingVector>>;

    /// Atomically store `vector` as the incident's current embedding.
    fn replace(&self, vector: &EmbeddingVector) -> Result<()>;

    /// Store several vectors; each one is replaced independently.
    fn replace_many(&self, vectors: &[EmbeddingVector]) -> Result<usize> {
        for vector in vectors {
            self.replace(vector)?;
        }
        Ok(vectors.len())
    }

    /// Ids from `ids` without a current vector tagged `model`, in input order.
    fn missing(&self, ids: &[IncidentId], model: &str) -> Result<Vec<IncidentId>> {
        let mut out = Vec::new();
        for &id in ids {
            if !self.get(id)?.is_some_and(|v| v.model() == model) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Vectors tagged `model` for `ids`, in input order; others are skipped.
    fn get_many(&self, ids: &[IncidentId], model: &str) -> Result<Vec<EmbeddingVector>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(v) = self.get(id)?.filter(|v| v.model() == model) {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Number of incidents with a current vector.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Process-local cache for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryVectorCache {
    entries: RwLock<HashMap<IncidentId, EmbeddingVector>>,
    writes: AtomicU64,
}

impl MemoryVectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of replace operations performed.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl VectorCache for MemoryVectorCache {
    fn get(&self, id: IncidentId) -> Result<Option<EmbeddingVector>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(&id).cloned())
    }

    fn replace(&self, vector: &EmbeddingVector) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(vector.incident_id(), vector.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(id: IncidentId, model: &str, x: f32) -> EmbeddingVector {
        EmbeddingVector::new(id, model, vec![x, 1.0]).unwrap()
    }

    #[test]
    fn replace_overwrites_current_vector() {
        let cache = MemoryVectorCache::new();
        cache.replace(&vector(1, "a", 0.1)).unwrap();
        cache.replace(&vector(1, "b", 0.2)).unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        let current = cache.get(1).unwrap().unwrap();
        assert_eq!(current.model(), "b");
        assert_eq!(cache.writes(), 2);
    }

    #[test]
    fn missing_respects_model_tag_and_order() {
        let cache = MemoryVectorCache::new();
        cache.replace(&vector(2, "m", 0.0)).unwrap();
        cache.replace(&vector(3, "other", 0.0)).unwrap();
        assert_eq!(cache.missing(&[3, 1, 2], "m").unwrap(), vec![3, 1]);
    }

    #[test]
    fn get_many_skips_absent_and_stale() {
        let cache = MemoryVectorCache::new();
        cache
            .replace_many(&[vector(1, "m", 0.1), vector(2, "old", 0.2), vector(3, "m", 0.3)])
            .unwrap();
        let got: Vec<_> = cache
            .get_many(&[3, 2, 1, 9], "m")
            .unwrap()
            .iter()
            .map(EmbeddingVector::incident_id)
            .collect();
        assert_eq!(got, vec![3, 1]);
    }

    #[test]
    fn empty_cache() {
        let cache = MemoryVectorCache::new();
        assert!(cache.is_empty().unwrap());
        assert!(cache.get(1).unwrap().is_none());
    }
}
