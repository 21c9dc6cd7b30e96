//! Pairwise dissimilarity matrix.
//!
//! Stored in condensed (upper-triangle, row-major) form: `n * (n - 1) / 2`
//! entries, built once per run and shared by every candidate k.

use super::linkage::DistanceMetric;

/// Cosine distance, `1 - cos(a, b)`, accumulated in f64.
///
/// A zero-norm vector has no direction; its distance to anything is 1.0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 1.0;
    }
    (1.0 - dot / denom).clamp(0.0, 2.0)
}

/// Euclidean (L2) distance, accumulated in f64.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
        }
    }
}

/// Symmetric pairwise distances with an implicit zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Compute all pairwise distances. O(n²·d).
    pub fn build<V: AsRef<[f32]>>(points: &[V], metric: DistanceMetric) -> Self {
        let n = points.len();
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            let a = points[i].as_ref();
            for b in &points[i + 1..] {
                data.push(metric.distance(a, b.as_ref()));
            }
        }
        Self { n, data }
    }

    /// Build from a full square matrix (upper triangle is used).
    pub fn from_square(rows: &[Vec<f64>]) -> Self {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for (i, row) in rows.iter().enumerate() {
            data.extend_from_slice(&row[i + 1..n]);
        }
        Self { n, data }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.n);
        self.n * i - i * (i + 1) / 2 + (j - i - 1)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match i.cmp(&j) {
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => self.data[self.index(i, j)],
            std::cmp::Ordering::Greater => self.data[self.index(j, i)],
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = if i < j { self.index(i, j) } else { self.index(j, i) };
        self.data[idx] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_with_zero_vector_is_one() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 1.0]), 1.0);
    }

    #[test]
    fn euclidean_3_4_5() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let points = vec![vec![0.0f32, 0.0], vec![3.0, 4.0], vec![6.0, 8.0]];
        let m = DistanceMatrix::build(&points, DistanceMetric::Euclidean);
        assert_eq!(m.len(), 3);
        assert_eq!(m.get(1, 1), 0.0);
        assert!((m.get(0, 1) - 5.0).abs() < 1e-12);
        assert!((m.get(2, 0) - 10.0).abs() < 1e-12);
        assert_eq!(m.get(1, 2), m.get(2, 1));
    }

    #[test]
    fn from_square_matches_build() {
        let points = vec![vec![1.0f32, 0.0], vec![0.0, 1.0], vec![1.0, 1.0], vec![-1.0, 0.5]];
        let built = DistanceMatrix::build(&points, DistanceMetric::Cosine);
        let square: Vec<Vec<f64>> = (0..4)
            .map(|i| (0..4).map(|j| built.get(i, j)).collect())
            .collect();
        assert_eq!(DistanceMatrix::from_square(&square), built);
    }

    #[test]
    fn set_updates_both_orientations() {
        let points = vec![vec![0.0f32], vec![1.0], vec![2.0]];
        let mut m = DistanceMatrix::build(&points, DistanceMetric::Euclidean);
        m.set(2, 0, 9.0);
        assert_eq!(m.get(0, 2), 9.0);
        assert_eq!(m.get(2, 0), 9.0);
    }
}
