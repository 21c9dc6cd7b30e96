//! Agglomerative merge tree.
//!
//! Built once from a [`DistanceMatrix`] with Lance-Williams updates, then cut
//! at any k without recomputation. Each active cluster occupies the slot of
//! its smallest member index, and every row caches its nearest neighbour
//! among higher slots.
//!
//! Ties are broken toward the lexicographically smallest `(i, j)` pair, which
//! makes the merge order (and therefore every cut) a pure function of the
//! input order.

use super::distance::DistanceMatrix;
use super::linkage::LinkageMethod;

/// One agglomeration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    /// Slot of the surviving cluster (smaller member index)
    pub left: usize,
    /// Slot absorbed into `left`
    pub right: usize,
    /// Linkage distance at which the two clusters joined
    pub distance: f64,
    /// Size of the merged cluster
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct Dendrogram {
    n: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    /// Run the full agglomeration down to a single cluster.
    pub fn build(matrix: &DistanceMatrix, method: LinkageMethod) -> Self {
        let n = matrix.len();
        let mut dist = matrix.clone();
        let mut active = vec![true; n];
        let mut sizes = vec![1usize; n];
        let mut nearest: Vec<Option<(usize, f64)>> =
            (0..n).map(|i| nearest_above(&dist, &active, i)).collect();
        let mut merges = Vec::with_capacity(n.saturating_sub(1));

        while merges.len() + 1 < n {
            let Some((a, b, d_ab)) = closest_pair(&active, &nearest) else {
                break;
            };

            let (na, nb) = (sizes[a], sizes[b]);
            for k in 0..n {
                if !active[k] || k == a || k == b {
                    continue;
                }
                let updated = lance_williams(
                    method,
                    dist.get(k, a),
                    dist.get(k, b),
                    d_ab,
                    na,
                    nb,
                    sizes[k],
                );
                dist.set(k, a, updated);
            }

            active[b] = false;
            nearest[b] = None;
            sizes[a] = na + nb;
            merges.push(Merge {
                left: a,
                right: b,
                distance: d_ab,
                size: na + nb,
            });

            for i in 0..n {
                if !active[i] {
                    continue;
                }
                let stale = i == a || matches!(nearest[i], Some((j, _)) if j == a || j == b);
                if stale {
                    nearest[i] = nearest_above(&dist, &active, i);
                } else if i < a {
                    let d_ia = dist.get(i, a);
                    if let Some((j, best)) = nearest[i] {
                        if d_ia < best || (d_ia == best && a < j) {
                            nearest[i] = Some((a, d_ia));
                        }
                    }
                }
            }
        }

        Self { n, merges }
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Flat partition with exactly `k` groups (clamped to `1..=len()`).
    ///
    /// Labels are dense `0..k`, assigned in order of first appearance in
    /// the input, so equal partitions always produce equal label vectors.
    pub fn cut(&self, k: usize) -> Vec<usize> {
        let k = k.clamp(1, self.n.max(1));
        let steps = self.n.saturating_sub(k);
        let mut uf = UnionFind::new(self.n);
        for merge in &self.merges[..steps.min(self.merges.len())] {
            uf.union(merge.left, merge.right);
        }

        let mut root_label: Vec<Option<usize>> = vec![None; self.n];
        let mut next = 0;
        (0..self.n)
            .map(|i| {
                let root = uf.find(i);
                *root_label[root].get_or_insert_with(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }
}

/// Smallest-distance pair over all cached row minima, smallest `i` on ties.
fn closest_pair(active: &[bool], nearest: &[Option<(usize, f64)>]) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for (i, entry) in nearest.iter().enumerate() {
        if !active[i] {
            continue;
        }
        if let Some((j, d)) = *entry {
            if best.is_none_or(|(_, _, bd)| d < bd) {
                best = Some((i, j, d));
            }
        }
    }
    best
}

/// Nearest active slot strictly above `i`, smallest `j` on ties.
fn nearest_above(dist: &DistanceMatrix, active: &[bool], i: usize) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for j in (i + 1)..active.len() {
        if !active[j] {
            continue;
        }
        let d = dist.get(i, j);
        if best.is_none_or(|(_, bd)| d < bd) {
            best = Some((j, d));
        }
    }
    best
}

/// Distance from cluster k to the union of clusters a and b.
fn lance_williams(
    method: LinkageMethod,
    d_ka: f64,
    d_kb: f64,
    d_ab: f64,
    na: usize,
    nb: usize,
    nk: usize,
) -> f64 {
    match method {
        LinkageMethod::Single => d_ka.min(d_kb),
        LinkageMethod::Complete => d_ka.max(d_kb),
        LinkageMethod::Average => {
            let (na, nb) = (na as f64, nb as f64);
            (na * d_ka + nb * d_kb) / (na + nb)
        }
        LinkageMethod::Ward => {
            let (na, nb, nk) = (na as f64, nb as f64, nk as f64);
            let sq = ((nk + na) * d_ka * d_ka + (nk + nb) * d_kb * d_kb - nk * d_ab * d_ab)
                / (nk + na + nb);
            sq.max(0.0).sqrt()
        }
    }
}

/// Disjoint-set forest used to replay merges when cutting.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::DistanceMetric;

    fn line(points: &[f32]) -> DistanceMatrix {
        let pts: Vec<Vec<f32>> = points.iter().map(|&x| vec![x]).collect();
        DistanceMatrix::build(&pts, DistanceMetric::Euclidean)
    }

    #[test]
    fn merges_n_minus_one_times() {
        let d = Dendrogram::build(&line(&[0.0, 1.0, 5.0, 6.0, 20.0]), LinkageMethod::Average);
        assert_eq!(d.len(), 5);
        assert_eq!(d.merges().len(), 4);
        assert_eq!(d.merges().last().map(|m| m.size), Some(5));
    }

    #[test]
    fn merge_distances_are_monotone() {
        let m = line(&[0.0, 0.4, 1.1, 3.0, 3.2, 7.5, 8.0, 8.1]);
        for method in LinkageMethod::ALL {
            let d = Dendrogram::build(&m, method);
            for pair in d.merges().windows(2) {
                assert!(
                    pair[0].distance <= pair[1].distance + 1e-12,
                    "{method}: {pair:?}"
                );
            }
        }
    }

    #[test]
    fn cut_recovers_obvious_groups() {
        let d = Dendrogram::build(&line(&[0.0, 10.0, 0.5, 10.5, 20.0]), LinkageMethod::Average);
        assert_eq!(d.cut(3), vec![0, 1, 0, 1, 2]);
        assert_eq!(d.cut(1), vec![0; 5]);
        assert_eq!(d.cut(5), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cut_clamps_out_of_range_k() {
        let d = Dendrogram::build(&line(&[0.0, 1.0, 2.0]), LinkageMethod::Single);
        assert_eq!(d.cut(0), vec![0, 0, 0]);
        assert_eq!(d.cut(10), vec![0, 1, 2]);
    }

    #[test]
    fn ties_merge_smallest_pair_first() {
        // Equidistant chain: (0,1) and (1,2) tie; (0,1) must merge first.
        let d = Dendrogram::build(&line(&[0.0, 1.0, 2.0]), LinkageMethod::Single);
        assert_eq!((d.merges()[0].left, d.merges()[0].right), (0, 1));
        assert_eq!(d.cut(2), vec![0, 0, 1]);
    }

    #[test]
    fn single_and_complete_differ_on_chains() {
        let m = line(&[0.0, 1.0, 2.0, 3.0, 10.0]);
        let single = Dendrogram::build(&m, LinkageMethod::Single);
        assert_eq!(single.cut(2), vec![0, 0, 0, 0, 1]);
        // Complete linkage ends with the chain merged last at distance 10.
        let complete = Dendrogram::build(&m, LinkageMethod::Complete);
        let last = complete.merges().last().map(|m| m.distance);
        assert_eq!(last, Some(10.0));
    }

    #[test]
    fn ward_distance_for_two_singletons_is_their_distance() {
        let d = Dendrogram::build(&line(&[0.0, 2.0]), LinkageMethod::Ward);
        assert!((d.merges()[0].distance - 2.0).abs() < 1e-12);
    }

    #[test]
    fn lance_williams_average_is_size_weighted() {
        let v = lance_williams(LinkageMethod::Average, 1.0, 4.0, 0.5, 3, 1, 2);
        assert!((v - 1.75).abs() < 1e-12);
    }

    #[test]
    fn empty_and_single_point_trees() {
        let empty = Dendrogram::build(&line(&[]), LinkageMethod::Average);
        assert!(empty.is_empty());
        assert!(empty.cut(1).is_empty());
        let one = Dendrogram::build(&line(&[4.0]), LinkageMethod::Average);
        assert!(one.merges().is_empty());
        assert_eq!(one.cut(1), vec![0]);
    }
}
