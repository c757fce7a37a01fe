use crate::embed::EmbeddingSet;
use crate::error::{AgreementError, Result};

/// Dense pairwise cosine similarities. Symmetric by construction, unit diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    rows: Vec<Vec<f64>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f64 { a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum() }

impl SimilarityMatrix {
    /// Vectors in `set` are unit norm, so cosine reduces to a dot product.
    pub fn from_embeddings(set: &EmbeddingSet) -> Result<Self> {
        let v = set.vectors();
        let n = v.len();
        let mut rows = vec![vec![1.0f64; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let s = cosine(&v[i], &v[j]);
                if !s.is_finite() { return Err(AgreementError::DegenerateClustering(format!("similarity of texts {i} and {j} is {s}"))); }
                let s = s.clamp(-1.0, 1.0);
                rows[i][j] = s;
                rows[j][i] = s;
            }
        }
        Ok(Self { rows })
    }

    /// Builds from an explicit matrix, checking size, shape, range and symmetry.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        if n < 2 { return Err(AgreementError::DegenerateClustering(format!("{n}x{n} matrix, need at least 2 texts"))); }
        if let Some(i) = rows.iter().position(|r| r.len() != n) {
            return Err(AgreementError::DegenerateClustering(format!("row {i} has {} entries, expected {n}", rows[i].len())));
        }
        for (i, row) in rows.iter().enumerate() {
            for (j, s) in row.iter().enumerate() {
                if !s.is_finite() || !(-1.0..=1.0).contains(s) { return Err(AgreementError::DegenerateClustering(format!("similarity [{i}][{j}] is {s}"))); }
                if *s != rows[j][i] { return Err(AgreementError::DegenerateClustering(format!("matrix is not symmetric at [{i}][{j}]"))); }
            }
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn get(&self, i: usize, j: usize) -> f64 { self.rows[i][j] }
    pub fn rows(&self) -> &[Vec<f64>] { &self.rows }
    pub fn into_rows(self) -> Vec<Vec<f64>> { self.rows }

    /// Mean over off-diagonal entries: `(sum(S) - n) / (n * (n - 1))`.
    pub fn mean_off_diagonal(&self) -> f64 {
        let n = self.len();
        if n < 2 { return 1.0; }
        let total: f64 = self.rows.iter().flatten().sum();
        (total - n as f64) / (n * (n - 1)) as f64
    }

    /// Minimum over off-diagonal entries. The diagonal is masked with 2.0, above any valid cosine.
    pub fn min_off_diagonal(&self) -> f64 {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().enumerate().map(move |(j, s)| if i == j { 2.0 } else { *s }))
            .fold(f64::INFINITY, f64::min)
    }

    /// Cosine distances `1 - S`, zero on the diagonal.
    pub fn distances(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| row.iter().enumerate().map(|(j, s)| if i == j { 0.0 } else { (1.0 - s).max(0.0) }).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests { use super::*; use proptest::prelude::*;
    fn approx(a: f64, b: f64) -> bool { (a - b).abs() < 1e-9 }
    proptest! {
        #[test] fn prop_matrix_is_symmetric(raw in proptest::collection::vec(proptest::collection::vec(-1.0f32..1.0, 4), 2..8)) {
            prop_assume!(raw.iter().all(|v| v.iter().map(|x| x * x).sum::<f32>() > 1e-3));
            let set = EmbeddingSet::from_raw("m", raw).unwrap();
            let s = SimilarityMatrix::from_embeddings(&set).unwrap();
            for i in 0..s.len() { for j in 0..s.len() {
                prop_assert_eq!(s.get(i, j), s.get(j, i));
                prop_assert!((-1.0..=1.0).contains(&s.get(i, j)));
            } }
            prop_assert!(s.min_off_diagonal() <= s.mean_off_diagonal() + 1e-12);
        }
    }
    #[test] fn statistics_skip_the_diagonal() {
        let s = SimilarityMatrix::from_rows(vec![vec![1.0, 0.5, -0.5], vec![0.5, 1.0, 0.25], vec![-0.5, 0.25, 1.0]]).unwrap();
        assert!(approx(s.mean_off_diagonal(), (0.5 - 0.5 + 0.25) / 3.0));
        assert_eq!(s.min_off_diagonal(), -0.5);
        assert_eq!(s.distances()[0][2], 1.5);
        assert_eq!(s.distances()[1][1], 0.0);
    }
    #[test] fn min_keeps_values_near_one() {
        let s = SimilarityMatrix::from_rows(vec![vec![1.0, 0.999], vec![0.999, 1.0]]).unwrap();
        assert_eq!(s.min_off_diagonal(), 0.999);
    }
    #[test] fn rejects_bad_matrices() {
        assert!(SimilarityMatrix::from_rows(vec![vec![1.0, 0.5], vec![0.4, 1.0]]).is_err());
        assert!(SimilarityMatrix::from_rows(vec![vec![1.0, f64::NAN], vec![f64::NAN, 1.0]]).is_err());
        assert!(SimilarityMatrix::from_rows(vec![vec![1.0, 0.5]]).is_err());
    }
    #[test] fn fewer_than_two_rows_is_degenerate() {
        for rows in [vec![], vec![vec![1.0]]] {
            assert_eq!(SimilarityMatrix::from_rows(rows).unwrap_err().kind(), "degenerate_clustering");
        }
    }
    #[test] fn identical_vectors_are_fully_similar() {
        let set = EmbeddingSet::from_raw("m", vec![vec![0.3, 0.1, 0.7], vec![0.3, 0.1, 0.7]]).unwrap();
        let s = SimilarityMatrix::from_embeddings(&set).unwrap();
        assert!((s.mean_off_diagonal() - 1.0).abs() < 1e-6);
        assert!((s.min_off_diagonal() - 1.0).abs() < 1e-6);
    }
}
