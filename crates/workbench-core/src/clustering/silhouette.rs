//! Silhouette coefficient over a precomputed distance matrix.

use super::distance::DistanceMatrix;

/// Per-point silhouette values `s(i) = (b - a) / max(a, b)`.
///
/// `a` is the mean distance to the other members of the point's own cluster
/// (0 for singletons) and `b` is the smallest mean distance to any other
/// cluster. Returns `None` when fewer than two distinct labels are present.
pub fn silhouette_samples(matrix: &DistanceMatrix, labels: &[usize]) -> Option<Vec<f64>> {
    let n = labels.len();
    debug_assert_eq!(matrix.len(), n);
    let k = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut counts = vec![0usize; k];
    for &l in labels {
        counts[l] += 1;
    }
    if counts.iter().filter(|&&c| c > 0).count() < 2 {
        return None;
    }

    let mut sums = vec![0.0f64; k];
    let samples = (0..n)
        .map(|i| {
            sums.iter_mut().for_each(|s| *s = 0.0);
            for j in 0..n {
                if i != j {
                    sums[labels[j]] += matrix.get(i, j);
                }
            }
            let own = labels[i];
            let a = if counts[own] > 1 {
                sums[own] / (counts[own] - 1) as f64
            } else {
                0.0
            };
            let b = (0..k)
                .filter(|&c| c != own && counts[c] > 0)
                .map(|c| sums[c] / counts[c] as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom <= 0.0 {
                0.0
            } else {
                ((b - a) / denom).clamp(-1.0, 1.0)
            }
        })
        .collect();
    Some(samples)
}

/// Mean silhouette over all points, in `[-1, 1]`.
pub fn silhouette_score(matrix: &DistanceMatrix, labels: &[usize]) -> Option<f64> {
    let samples = silhouette_samples(matrix, labels)?;
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::DistanceMetric;

    fn matrix(points: &[[f32; 2]]) -> DistanceMatrix {
        let pts: Vec<Vec<f32>> = points.iter().map(|p| p.to_vec()).collect();
        DistanceMatrix::build(&pts, DistanceMetric::Euclidean)
    }

    #[test]
    fn single_cluster_has_no_score() {
        let m = matrix(&[[0.0, 0.0], [1.0, 0.0]]);
        assert_eq!(silhouette_score(&m, &[0, 0]), None);
    }

    #[test]
    fn well_separated_groups_score_near_one() {
        let m = matrix(&[[0.0, 0.0], [0.1, 0.0], [10.0, 0.0], [10.1, 0.0]]);
        let s = silhouette_score(&m, &[0, 0, 1, 1]).unwrap();
        assert!(s > 0.95, "{s}");
    }

    #[test]
    fn swapped_labels_score_negative() {
        let m = matrix(&[[0.0, 0.0], [0.1, 0.0], [10.0, 0.0], [10.1, 0.0]]);
        let s = silhouette_score(&m, &[0, 1, 0, 1]).unwrap();
        assert!(s < 0.0, "{s}");
    }

    #[test]
    fn singleton_uses_zero_intra_distance() {
        let m = matrix(&[[0.0, 0.0], [1.0, 0.0], [5.0, 0.0]]);
        let samples = silhouette_samples(&m, &[0, 0, 1]).unwrap();
        // a = 0 for the singleton, so its value is (b - 0) / b = 1.
        assert!((samples[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn coincident_points_score_zero() {
        let m = matrix(&[[1.0, 1.0], [1.0, 1.0]]);
        let samples = silhouette_samples(&m, &[0, 1]).unwrap();
        assert_eq!(samples, vec![0.0, 0.0]);
    }

    #[test]
    fn known_value() {
        // Points 0, 1, 4 on a line with labels {0,1} and {4}.
        let m = matrix(&[[0.0, 0.0], [1.0, 0.0], [4.0, 0.0]]);
        let samples = silhouette_samples(&m, &[0, 0, 1]).unwrap();
        assert!((samples[0] - 0.75).abs() < 1e-12);
        assert!((samples[1] - 2.0 / 3.0).abs() < 1e-12);
        let score = silhouette_score(&m, &[0, 0, 1]).unwrap();
        assert!((score - (0.75 + 2.0 / 3.0 + 1.0) / 3.0).abs() < 1e-12);
    }
}
