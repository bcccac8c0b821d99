use std::cmp::Ordering;

use serde::Serialize;

use crate::error::{Error, Result};

/// One retrieval hit: a passage position and its cosine similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: usize,
    pub score: f32,
}

/// Exact cosine-similarity index over a fixed, ordered set of passage vectors.
///
/// Rows are L2-normalised once at construction and stored contiguously, so a
/// query costs one inner product per passage. Row `i` belongs to passage `i`.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    rows: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let mut rows = Vec::with_capacity(dimension * vectors.len());
        for vector in vectors {
            if vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            rows.extend(vector);
        }
        Self::from_flat(dimension, rows)
    }

    /// Build from a row-major buffer of `len * dimension` values.
    pub fn from_flat(dimension: usize, mut rows: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Index("dimension must be at least 1".to_string()));
        }
        if rows.len() % dimension != 0 {
            return Err(Error::Index(format!(
                "{} values do not divide into rows of {}",
                rows.len(),
                dimension
            )));
        }
        if rows.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteVector);
        }

        for row in rows.chunks_exact_mut(dimension) {
            normalize(row);
        }

        Ok(Self { dimension, rows })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.rows.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Top-`k` passages by descending cosine similarity, ties broken by
    /// ascending passage id. Returns `min(k, len)` hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(Error::InvalidTopK);
        }
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteVector);
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let norm = l2_norm(query);
        let mut hits: Vec<SearchHit> = self
            .rows
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, row)| {
                // A zero query has no direction; every passage scores 0.
                let score = if norm > 0.0 { dot(row, query) / norm } else { 0.0 };
                // `+ 0.0` folds -0.0 into 0.0 so orthogonal rows tie on id.
                SearchHit { id, score: score + 0.0 }
            })
            .collect();

        let k = k.min(hits.len());
        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank_order);
            hits.truncate(k);
        }
        hits.sort_by(rank_order);
        Ok(hits)
    }
}

fn rank_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(vectors: Vec<Vec<f32>>) -> VectorIndex {
        let dim = vectors.first().map(|v| v.len()).unwrap_or(3);
        VectorIndex::new(dim, vectors).unwrap()
    }

    #[test]
    fn test_nearest_first() {
        let idx = index(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.7, 0.7, 0.0],
        ]);
        let hits = idx.search(&[0.1, 1.0, 0.0], 3).unwrap();
        let ids: Vec<usize> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_scores_are_cosine() {
        let idx = index(vec![vec![3.0, 4.0], vec![-4.0, 3.0]]);
        let hits = idx.search(&[6.0, 8.0], 2).unwrap();
        assert_eq!(hits[0].id, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[1].score.abs() < 1e-6);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let idx = index(vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
        ]);
        let hits = idx.search(&[1.0, 0.0], 4).unwrap();
        let ids: Vec<usize> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3, 0, 2]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_orthogonal_rows_tie_on_id() {
        let idx = index(vec![vec![0.0, 1.0], vec![0.0, -1.0], vec![0.0, 1.0]]);
        let hits = idx.search(&[-1.0, 0.0], 3).unwrap();
        let ids: Vec<usize> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(hits.iter().all(|h| h.score == 0.0 && h.score.is_sign_positive()));
    }

    #[test]
    fn test_search_is_deterministic() {
        let idx = index(vec![
            vec![0.2, 0.9, 0.1],
            vec![0.2, 0.9, 0.1],
            vec![0.5, 0.5, 0.5],
            vec![0.9, 0.1, 0.0],
        ]);
        let first = idx.search(&[0.3, 0.8, 0.2], 3).unwrap();
        for _ in 0..10 {
            assert_eq!(idx.search(&[0.3, 0.8, 0.2], 3).unwrap(), first);
        }
    }

    #[test]
    fn test_returns_min_of_k_and_corpus_size() {
        let idx = index(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        assert_eq!(idx.search(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(idx.search(&[1.0, 0.0], 3).unwrap().len(), 3);
        assert_eq!(idx.search(&[1.0, 0.0], 10).unwrap().len(), 3);
    }

    #[test]
    fn test_partial_selection_matches_full_sort() {
        let vectors: Vec<Vec<f32>> = (0..50)
            .map(|i| {
                let t = i as f32 * 0.37;
                vec![t.sin(), t.cos(), (t * 0.5).sin()]
            })
            .collect();
        let idx = index(vectors);
        let query = [0.4, -0.2, 0.9];
        let all = idx.search(&query, 50).unwrap();
        let top = idx.search(&query, 7).unwrap();
        assert_eq!(top.as_slice(), &all[..7]);
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let idx = VectorIndex::new(4, Vec::new()).unwrap();
        assert!(idx.is_empty());
        assert_eq!(idx.len(), 0);
        assert!(idx.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let idx = index(vec![vec![1.0, 0.0, 0.0]]);
        let err = idx.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn test_zero_k_rejected() {
        let idx = index(vec![vec![1.0, 0.0]]);
        assert!(matches!(idx.search(&[1.0, 0.0], 0), Err(Error::InvalidTopK)));
    }

    #[test]
    fn test_non_finite_rejected() {
        let idx = index(vec![vec![1.0, 0.0]]);
        assert!(matches!(
            idx.search(&[f32::NAN, 0.0], 1),
            Err(Error::NonFiniteVector)
        ));
        assert!(matches!(
            VectorIndex::new(2, vec![vec![f32::INFINITY, 0.0]]),
            Err(Error::NonFiniteVector)
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = VectorIndex::new(2, vec![vec![1.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(matches!(VectorIndex::from_flat(2, vec![1.0; 3]), Err(Error::Index(_))));
        assert!(matches!(VectorIndex::from_flat(0, Vec::new()), Err(Error::Index(_))));
    }

    #[test]
    fn test_zero_query_falls_back_to_id_order() {
        let idx = index(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        let ids: Vec<usize> = idx
            .search(&[0.0, 0.0], 3)
            .unwrap()
            .iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
