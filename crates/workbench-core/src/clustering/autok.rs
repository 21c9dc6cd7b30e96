//! Data-driven choice of the cluster count.
//!
//! One distance matrix and one dendrogram are built per sweep; every
//! candidate k is a cut of the same tree scored by mean silhouette.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::hierarchical::{HierarchicalClusterer, Partition, PreparedClustering};
use crate::error::{ConfigurationError, Error, Result};
use crate::model::EmbeddingVector;

pub const DEFAULT_K_MIN: usize = 2;
pub const DEFAULT_K_MAX: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoKSelector {
    k_min: usize,
    k_max: usize,
}

impl Default for AutoKSelector {
    fn default() -> Self {
        Self {
            k_min: DEFAULT_K_MIN,
            k_max: DEFAULT_K_MAX,
        }
    }
}

/// Outcome of a k sweep.
#[derive(Debug, Clone)]
pub struct KSelection {
    pub best_k: usize,
    pub best_score: f64,
    /// Silhouette for every candidate evaluated
    pub scores_by_k: BTreeMap<usize, f64>,
    /// Partition at `best_k`
    pub partition: Partition,
}

impl AutoKSelector {
    /// Build a selector; `k_min` must be at least 2 and not exceed `k_max`.
    pub fn new(k_min: usize, k_max: usize) -> std::result::Result<Self, ConfigurationError> {
        if k_min < 2 || k_max < k_min {
            return Err(ConfigurationError::InvalidKRange { k_min, k_max });
        }
        Ok(Self { k_min, k_max })
    }

    pub fn k_min(&self) -> usize {
        self.k_min
    }

    pub fn k_max(&self) -> usize {
        self.k_max
    }

    /// Fewest vectors a sweep can run on.
    pub fn min_vectors(&self) -> usize {
        self.k_min + 1
    }

    /// Sweep `[k_min, min(k_max, n - 1)]` and keep the best silhouette.
    pub fn select_k(
        &self,
        vectors: &[EmbeddingVector],
        clusterer: &HierarchicalClusterer,
    ) -> Result<KSelection> {
        if vectors.len() < self.min_vectors() {
            return Err(Error::insufficient(
                self.min_vectors(),
                vectors.len(),
                "vectors for automatic k selection",
            ));
        }
        let prepared = clusterer.prepare(vectors)?;
        self.select_prepared(&prepared)
    }

    /// Sweep over an already-built tree.
    pub fn select_prepared(&self, prepared: &PreparedClustering) -> Result<KSelection> {
        let n = prepared.len();
        if n < self.min_vectors() {
            return Err(Error::insufficient(
                self.min_vectors(),
                n,
                "vectors for automatic k selection",
            ));
        }
        let upper = self.k_max.min(n - 1);

        let mut scores_by_k = BTreeMap::new();
        let mut best: Option<(usize, f64, Partition)> = None;
        for k in self.k_min..=upper {
            let partition = prepared.partition(k);
            let Some(score) = prepared.silhouette(&partition) else {
                continue;
            };
            debug!(k, score, "Scored candidate k");
            scores_by_k.insert(k, score);
            if best.as_ref().is_none_or(|(_, best_score, _)| score > *best_score) {
                best = Some((k, score, partition));
            }
        }

        let (best_k, best_score, partition) = best.ok_or_else(|| {
            Error::insufficient(self.min_vectors(), n, "vectors for automatic k selection")
        })?;
        info!(
            best_k,
            best_score,
            candidates = scores_by_k.len(),
            "Selected cluster count"
        );
        Ok(KSelection {
            best_k,
            best_score,
            scores_by_k,
            partition,
        })
    }
}
