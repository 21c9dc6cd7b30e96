//! Property-based tests for the clustering module.
//!
//! Covers linkage validation, dense labeling, silhouette range,
//! determinism of repeated clustering, and automatic k selection bounds.

use std::collections::BTreeSet;

use proptest::prelude::*;

use workbench_core::Error;
use workbench_core::clustering::{
    AutoKSelector, DistanceMatrix, DistanceMetric, HierarchicalClusterer, LinkageMethod,
    silhouette_samples, validate,
};
use workbench_core::error::ConfigurationError;
use workbench_core::model::{EmbeddingVector, IncidentId};

// =============================================================================
// Strategies
// =============================================================================

/// Point sets of 2..16 vectors in three dimensions.
fn arb_points() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 2..16)
}

fn arb_method() -> impl Strategy<Value = LinkageMethod> {
    prop_oneof![
        Just(LinkageMethod::Average),
        Just(LinkageMethod::Complete),
        Just(LinkageMethod::Single),
        Just(LinkageMethod::Ward),
    ]
}

fn arb_metric() -> impl Strategy<Value = DistanceMetric> {
    prop_oneof![Just(DistanceMetric::Cosine), Just(DistanceMetric::Euclidean)]
}

fn to_vectors(points: &[Vec<f32>]) -> Vec<EmbeddingVector> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| EmbeddingVector::new(i as IncidentId * 10, "prop", p.clone()).unwrap())
        .collect()
}

// =============================================================================
// Linkage validation
// =============================================================================

proptest! {
    #[test]
    fn proptest_ward_requires_euclidean(method in arb_method(), metric in arb_metric()) {
        let result = validate(method, metric);
        if method == LinkageMethod::Ward && metric == DistanceMetric::Cosine {
            let is_ward_error = matches!(
                result,
                Err(ConfigurationError::WardRequiresEuclidean { .. })
            );
            prop_assert!(is_ward_error);
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn proptest_ward_cosine_never_clusters(points in arb_points()) {
        let err = HierarchicalClusterer::try_new("ward", "cosine").unwrap_err();
        prop_assert!(matches!(err, Error::Configuration(_)));
        // The default clusterer still accepts the same vectors.
        prop_assert!(HierarchicalClusterer::default().prepare(&to_vectors(&points)).is_ok());
    }
}

// =============================================================================
// Partitions
// =============================================================================

proptest! {
    #[test]
    fn proptest_labels_dense_and_cover_every_vector(
        points in arb_points(),
        complete in any::<bool>(),
        k_seed in any::<usize>(),
    ) {
        let method = if complete { "complete" } else { "average" };
        let clusterer = HierarchicalClusterer::try_new(method, "cosine").unwrap();
        let vectors = to_vectors(&points);
        let k = 1 + k_seed % vectors.len();
        let partition = clusterer.cluster(&vectors, k).unwrap();

        prop_assert_eq!(partition.k(), k);
        prop_assert_eq!(partition.labels().len(), vectors.len());
        let used: BTreeSet<usize> = partition.labels().iter().copied().collect();
        prop_assert_eq!(used, (0..k).collect::<BTreeSet<_>>());

        let members: Vec<IncidentId> = partition.groups().into_values().flatten().collect();
        prop_assert_eq!(members.len(), vectors.len());
        let unique: BTreeSet<IncidentId> = members.into_iter().collect();
        prop_assert_eq!(unique.len(), vectors.len());
    }

    #[test]
    fn proptest_clustering_is_deterministic(
        points in arb_points(),
        method in arb_method(),
        k_seed in any::<usize>(),
    ) {
        let metric = if method == LinkageMethod::Ward { "euclidean" } else { "cosine" };
        let clusterer = HierarchicalClusterer::try_new(method.as_str(), metric).unwrap();
        let vectors = to_vectors(&points);
        let k = 1 + k_seed % vectors.len();
        let first = clusterer.cluster(&vectors, k).unwrap();
        let second = clusterer.cluster(&vectors, k).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn proptest_merge_distances_never_decrease_for_average(points in arb_points()) {
        let clusterer = HierarchicalClusterer::try_new("average", "euclidean").unwrap();
        let prepared = clusterer.prepare(&to_vectors(&points)).unwrap();
        let merges = prepared.dendrogram().merges();
        prop_assert_eq!(merges.len(), points.len() - 1);
        for pair in merges.windows(2) {
            prop_assert!(pair[1].distance >= pair[0].distance - 1e-9);
        }
    }
}

// =============================================================================
// Silhouette
// =============================================================================

proptest! {
    #[test]
    fn proptest_silhouette_in_unit_range(
        points in arb_points(),
        metric in arb_metric(),
        k_seed in any::<usize>(),
    ) {
        let matrix = DistanceMatrix::build(&points, metric);
        let n = points.len();
        let groups = 3usize.min(n);
        let labels: Vec<usize> = (0..n).map(|i| (i + k_seed % groups) % groups).collect();
        if let Some(samples) = silhouette_samples(&matrix, &labels) {
            for s in samples {
                prop_assert!((-1.0..=1.0).contains(&s), "sample {} out of range", s);
            }
        }
    }

    #[test]
    fn proptest_auto_k_within_bounds(points in prop::collection::vec(
        prop::collection::vec(-10.0f32..10.0, 3),
        3..16,
    )) {
        let selector = AutoKSelector::new(2, 6).unwrap();
        let clusterer = HierarchicalClusterer::try_new("average", "euclidean").unwrap();
        let selection = selector.select_k(&to_vectors(&points), &clusterer).unwrap();

        let upper = 6usize.min(points.len() - 1);
        prop_assert!((2..=upper).contains(&selection.best_k));
        prop_assert!((-1.0..=1.0).contains(&selection.best_score));
        for (&k, &score) in &selection.scores_by_k {
            prop_assert!((2..=upper).contains(&k));
            prop_assert!(score <= selection.best_score);
        }
        prop_assert_eq!(selection.partition.k(), selection.best_k);
    }
}
