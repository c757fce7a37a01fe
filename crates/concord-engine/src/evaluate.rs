//! Turns similarities and a clustering into an agreement verdict.

use concord_schema::{Decision, Diagnostics, GateReport, Thresholds};

use crate::cluster::ClusterAssignment;
use crate::similarity::SimilarityMatrix;

/// Mean silhouette over precomputed distances.
///
/// 0 when there is a single cluster. A point alone in its cluster scores 0, as does a
/// point whose intra- and nearest inter-cluster distances are both 0.
pub fn silhouette(distances: &[Vec<f64>], assignment: &ClusterAssignment) -> f64 {
    let n = distances.len();
    if assignment.cluster_count() < 2 || n == 0 { return 0.0; }
    let labels = assignment.labels();
    let sizes = assignment.sizes();
    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if sizes[&own] == 1 { continue; }
        let mut sums = vec![0.0f64; assignment.cluster_count()];
        for j in 0..n { if j != i { sums[labels[j]] += distances[i][j]; } }
        let a = sums[own] / (sizes[&own] - 1) as f64;
        let b = sizes
            .iter()
            .filter(|(l, _)| **l != own)
            .map(|(l, c)| sums[*l] / *c as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 { total += (b - a) / denom; }
    }
    total / n as f64
}

/// Largest cluster; ties go to the lowest label.
pub fn core_cluster(assignment: &ClusterAssignment) -> (usize, Vec<usize>) {
    let mut best = (0usize, 0usize);
    for (label, count) in assignment.sizes() {
        if count > best.1 { best = (label, count); }
    }
    (best.0, assignment.members(best.0))
}

/// Evaluates all four gates eagerly and assembles the decision record.
pub fn evaluate(similarity: SimilarityMatrix, assignment: ClusterAssignment, thresholds: Thresholds, embed_model: &str) -> Decision {
    let n = similarity.len();
    let mean_cos = similarity.mean_off_diagonal();
    let min_cos = similarity.min_off_diagonal();
    let distances = similarity.distances();
    let sil = silhouette(&distances, &assignment);
    let (_, core_idx) = core_cluster(&assignment);
    let core_fraction = core_idx.len() as f64 / n as f64;
    let cluster_count = assignment.cluster_count();

    let gates = GateReport {
        mean_cos: mean_cos >= thresholds.mean_cos,
        min_cos: min_cos >= thresholds.min_cos,
        core_fraction: core_fraction >= thresholds.core_fraction,
        // one cluster leaves no separation to score
        silhouette: cluster_count == 1 || sil >= thresholds.silhouette,
    };

    Decision {
        agreement: gates.all(),
        mean_cos,
        min_cos,
        core_idx,
        pairwise: similarity.into_rows(),
        diagnostics: Diagnostics {
            cluster_sizes: assignment.sizes(),
            cluster_count,
            core_fraction,
            silhouette: sil,
            gates,
            thresholds,
            embed_model: embed_model.to_string(),
        },
        labels: assignment.into_labels(),
    }
}
