//! Hierarchical clustering of incident embeddings.
//!
//! - [`validate`]: closed method/metric enums and the Ward rule
//! - [`DistanceMatrix`]: condensed pairwise distances, built once per run
//! - [`Dendrogram`]: merge history with deterministic tie-breaking
//! - [`HierarchicalClusterer`]: flat k-way partitions
//! - [`AutoKSelector`]: silhouette sweep over candidate k

mod autok;
mod dendrogram;
mod distance;
mod hierarchical;
mod linkage;
mod silhouette;

pub use autok::{AutoKSelector, DEFAULT_K_MAX, DEFAULT_K_MIN, KSelection};
pub use dendrogram::{Dendrogram, Merge};
pub use distance::{DistanceMatrix, cosine_distance, euclidean_distance};
pub use hierarchical::{HierarchicalClusterer, MIN_VECTORS, Partition, PreparedClustering};
pub use linkage::{DistanceMetric, LinkageConfig, LinkageMethod, validate, validate_names};
pub use silhouette::{silhouette_samples, silhouette_score};
