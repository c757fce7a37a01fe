//! Average-linkage agglomerative clustering over a precomputed distance matrix.
//!
//! The number of clusters falls out of the data: the two closest clusters merge while
//! their average linkage distance is `<= threshold`. Clusters are kept ordered by their
//! lowest member index and pairs are scanned in that order with a strict `<`, so among
//! equally distant pairs the lowest one merges first. Labels are numbered in the same
//! order, so the cluster holding index 0 is always label 0.

use std::collections::BTreeMap;

/// Cluster label per input index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
    count: usize,
}

impl ClusterAssignment {
    pub fn labels(&self) -> &[usize] { &self.labels }
    pub fn into_labels(self) -> Vec<usize> { self.labels }
    pub fn cluster_count(&self) -> usize { self.count }

    /// Label -> member count.
    pub fn sizes(&self) -> BTreeMap<usize, usize> {
        let mut sizes = BTreeMap::new();
        for l in &self.labels { *sizes.entry(*l).or_insert(0) += 1; }
        sizes
    }

    pub fn members(&self, label: usize) -> Vec<usize> {
        self.labels.iter().enumerate().filter(|(_, l)| **l == label).map(|(i, _)| i).collect()
    }
}

fn average_linkage(d: &[Vec<f64>], a: &[usize], b: &[usize]) -> f64 {
    let total: f64 = a.iter().flat_map(|i| b.iter().map(move |j| d[*i][*j])).sum();
    total / (a.len() * b.len()) as f64
}

/// Clusters `distances` (square, symmetric) with merges allowed up to `threshold`.
pub fn cluster(distances: &[Vec<f64>], threshold: f64) -> ClusterAssignment {
    let n = distances.len();
    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    while clusters.len() > 1 {
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let dist = average_linkage(distances, &clusters[a], &clusters[b]);
                if best.map_or(true, |(_, _, bd)| dist < bd) { best = Some((a, b, dist)); }
            }
        }
        match best {
            Some((a, b, dist)) if dist <= threshold => {
                let absorbed = clusters.remove(b);
                clusters[a].extend(absorbed);
                clusters[a].sort_unstable();
                tracing::trace!(into = clusters[a][0], dist, remaining = clusters.len(), "merge");
            }
            _ => break,
        }
    }
    let mut labels = vec![0; n];
    for (label, members) in clusters.iter().enumerate() {
        for i in members { labels[*i] = label; }
    }
    ClusterAssignment { labels, count: clusters.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(n: usize, pairs: &[(usize, usize, f64)], fill: f64) -> Vec<Vec<f64>> {
        let mut d = vec![vec![fill; n]; n];
        for i in 0..n { d[i][i] = 0.0; }
        for (i, j, v) in pairs { d[*i][*j] = *v; d[*j][*i] = *v; }
        d
    }

    #[test]
    fn tight_batch_collapses_to_one_cluster() {
        let c = cluster(&sym(4, &[], 0.1), 0.25);
        assert_eq!(c.labels(), &[0, 0, 0, 0]);
        assert_eq!(c.cluster_count(), 1);
    }

    #[test]
    fn distant_pair_stays_split() {
        let c = cluster(&sym(2, &[], 0.9), 0.25);
        assert_eq!(c.labels(), &[0, 1]);
        assert_eq!(c.sizes(), BTreeMap::from([(0, 1), (1, 1)]));
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(cluster(&sym(2, &[], 0.25), 0.25).cluster_count(), 1);
    }

    #[test]
    fn splits_two_groups() {
        let d = sym(5, &[(0, 2, 0.05), (1, 3, 0.1), (1, 4, 0.2), (3, 4, 0.15)], 0.9);
        let c = cluster(&d, 0.25);
        assert_eq!(c.labels(), &[0, 1, 0, 1, 1]);
        assert_eq!(c.members(1), vec![1, 3, 4]);
    }

    #[test]
    fn ties_merge_the_lowest_pair_first() {
        // (0,1) and (1,2) tie; merging (0,1) leaves 2 at average 0.4 > 0.3.
        let d = sym(3, &[(0, 1, 0.2), (1, 2, 0.2), (0, 2, 0.6)], 0.0);
        assert_eq!(cluster(&d, 0.3).labels(), &[0, 0, 1]);
    }

    #[test]
    fn uses_average_not_single_linkage() {
        // single linkage would pull 2 in via d(1,2) = 0.1; the average is 0.45.
        let d = sym(3, &[(0, 1, 0.05), (1, 2, 0.1), (0, 2, 0.8)], 0.0);
        assert_eq!(cluster(&d, 0.25).labels(), &[0, 0, 1]);
    }

    #[test]
    fn repeated_runs_agree() {
        let d = sym(6, &[(0, 5, 0.1), (2, 3, 0.1), (1, 4, 0.1)], 0.5);
        assert_eq!(cluster(&d, 0.2), cluster(&d, 0.2));
        assert_eq!(cluster(&d, 0.2).labels(), &[0, 1, 2, 2, 1, 0]);
    }
}
