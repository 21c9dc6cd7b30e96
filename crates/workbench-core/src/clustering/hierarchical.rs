//! Agglomerative clustering of embedding vectors into a flat partition.

use std::collections::BTreeMap;

use tracing::debug;

use super::dendrogram::Dendrogram;
use super::distance::DistanceMatrix;
use super::linkage::{self, LinkageConfig};
use super::silhouette::silhouette_score;
use crate::error::{ConfigurationError, Error, Result};
use crate::model::{EmbeddingVector, IncidentId};

/// Minimum number of vectors for any clustering.
pub const MIN_VECTORS: usize = 2;

/// A flat assignment of every input vector to exactly one dense label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    ids: Vec<IncidentId>,
    labels: Vec<usize>,
    k: usize,
}

impl Partition {
    pub(crate) fn new(ids: Vec<IncidentId>, labels: Vec<usize>) -> Self {
        let k = labels.iter().copied().max().map_or(0, |m| m + 1);
        Self { ids, labels, k }
    }

    /// Number of groups.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Labels parallel to the input vector order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn ids(&self) -> &[IncidentId] {
        &self.ids
    }

    pub fn label_of(&self, id: IncidentId) -> Option<usize> {
        self.ids
            .iter()
            .position(|&x| x == id)
            .map(|pos| self.labels[pos])
    }

    /// `(incident id, label)` pairs in input order.
    pub fn assignments(&self) -> impl Iterator<Item = (IncidentId, usize)> + '_ {
        self.ids.iter().copied().zip(self.labels.iter().copied())
    }

    /// Members per label, each sorted ascending.
    pub fn groups(&self) -> BTreeMap<usize, Vec<IncidentId>> {
        let mut groups: BTreeMap<usize, Vec<IncidentId>> = BTreeMap::new();
        for (id, label) in self.assignments() {
            groups.entry(label).or_default().push(id);
        }
        for members in groups.values_mut() {
            members.sort_unstable();
        }
        groups
    }
}

/// Distance matrix and merge tree for one vector set, reusable across k.
#[derive(Debug, Clone)]
pub struct PreparedClustering {
    ids: Vec<IncidentId>,
    matrix: DistanceMatrix,
    dendrogram: Dendrogram,
}

impl PreparedClustering {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn matrix(&self) -> &DistanceMatrix {
        &self.matrix
    }

    pub fn dendrogram(&self) -> &Dendrogram {
        &self.dendrogram
    }

    /// Cut the tree into `k` groups. `k` must already be within `1..=len()`.
    pub fn partition(&self, k: usize) -> Partition {
        Partition::new(self.ids.clone(), self.dendrogram.cut(k))
    }

    /// Mean silhouette of a partition over this vector set.
    pub fn silhouette(&self, partition: &Partition) -> Option<f64> {
        silhouette_score(&self.matrix, partition.labels())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchicalClusterer {
    config: LinkageConfig,
}

impl HierarchicalClusterer {
    pub fn new(config: LinkageConfig) -> Self {
        Self { config }
    }

    /// Validate a raw (method, metric) pair and build a clusterer.
    pub fn try_new(method: &str, metric: &str) -> Result<Self> {
        Ok(Self::new(linkage::validate_names(method, metric)?))
    }

    pub fn config(&self) -> LinkageConfig {
        self.config
    }

    /// Build the distance matrix and full dendrogram once.
    pub fn prepare(&self, vectors: &[EmbeddingVector]) -> Result<PreparedClustering> {
        if vectors.len() < MIN_VECTORS {
            return Err(Error::insufficient(MIN_VECTORS, vectors.len(), "vectors to cluster"));
        }
        let dimension = vectors[0].dimension();
        if let Some(bad) = vectors.iter().find(|v| v.dimension() != dimension) {
            return Err(Error::InvalidInput(format!(
                "incident {} has dimension {}, expected {dimension}",
                bad.incident_id(),
                bad.dimension()
            )));
        }

        let points: Vec<&[f32]> = vectors.iter().map(EmbeddingVector::values).collect();
        let matrix = DistanceMatrix::build(&points, self.config.metric());
        let dendrogram = Dendrogram::build(&matrix, self.config.method());
        debug!(
            n = vectors.len(),
            dimension,
            linkage = %self.config,
            "Built dendrogram"
        );
        Ok(PreparedClustering {
            ids: vectors.iter().map(EmbeddingVector::incident_id).collect(),
            matrix,
            dendrogram,
        })
    }

    /// Partition `vectors` into exactly `k` groups.
    pub fn cluster(&self, vectors: &[EmbeddingVector], k: usize) -> Result<Partition> {
        if k == 0 {
            return Err(ConfigurationError::InvalidClusterCount(k).into());
        }
        if vectors.len() < MIN_VECTORS {
            return Err(Error::insufficient(MIN_VECTORS, vectors.len(), "vectors to cluster"));
        }
        if k > vectors.len() {
            return Err(Error::insufficient(k, vectors.len(), "vectors for the requested k"));
        }
        Ok(self.prepare(vectors)?.partition(k))
    }
}
