//! Late interaction scoring (MaxSim) for multi-vector embeddings.
//!
//! Vision-document retrieval in the ColPali style keeps one vector per page
//! patch (and per query token) instead of pooling everything into a single
//! vector. Similarity is computed at query time:
//!
//! ```text
//! MaxSim(Q, D) = sum_{q in Q} max_{d in D} cos_sim(q, d)
//! ```
//!
//! The scorer is asymmetric: query rows are maxed over document columns, not
//! the other way around. Complexity is O(m * n * d) for m query rows, n
//! document rows and dimension d: quadratic in patch count, which is fine
//! for per-page scoring at a few hundred patches but worth keeping in mind
//! when ranking large corpora.
//!
//! # Example
//!
//! ```rust
//! use lateral::late_interaction::{LateInteractionScorer, MultiVectorEmbedding};
//!
//! let query = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
//! let doc = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
//! let score = LateInteractionScorer::max_sim(&query, &doc).unwrap();
//! assert!((score - 1.0).abs() < 1e-6);
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::LateralError;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Epsilon added to L2 norms so degenerate all-zero rows divide cleanly.
const NORM_EPSILON: f32 = 1e-8;

// ============================================================================
// MultiVectorEmbedding
// ============================================================================

/// Multi-vector embedding for one page, image, or query.
///
/// An ordered sequence of patch vectors, all of the same length. Rows are
/// stored as a contiguous `Vec<f32>` (`n_rows * dimension`), which keeps the
/// pairwise similarity loop cache-friendly.
///
/// The dimension is recorded at construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVectorEmbedding {
    /// Flattened row data: `n_rows * dimension` contiguous f32 values
    data: Vec<f32>,
    /// Length of every row
    dimension: usize,
    /// Number of rows
    n_rows: usize,
    /// Whether rows are L2 normalized
    normalized: bool,
}

impl MultiVectorEmbedding {
    /// Create an embedding from flattened data.
    ///
    /// Returns `InvalidInput` when `data.len()` is not a multiple of
    /// `dimension`.
    pub fn new(data: Vec<f32>, dimension: usize) -> Result<Self, LateralError> {
        if dimension == 0 {
            if !data.is_empty() {
                return Err(LateralError::InvalidInput(
                    "embedding dimension cannot be zero for non-empty data".to_string(),
                ));
            }
            return Ok(Self {
                data,
                dimension,
                n_rows: 0,
                normalized: false,
            });
        }
        if data.len() % dimension != 0 {
            return Err(LateralError::InvalidInput(format!(
                "data length {} is not a multiple of dimension {}",
                data.len(),
                dimension
            )));
        }
        let n_rows = data.len() / dimension;
        Ok(Self {
            data,
            dimension,
            n_rows,
            normalized: false,
        })
    }

    /// Create an empty embedding with a known dimension.
    pub fn empty(dimension: usize) -> Self {
        Self {
            data: Vec::new(),
            dimension,
            n_rows: 0,
            normalized: false,
        }
    }

    /// Build from per-row vectors, checking that every row has the same
    /// length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, LateralError> {
        let Some(first) = rows.first() else {
            return Ok(Self::empty(0));
        };
        let dimension = first.len();
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(LateralError::InvalidInput(format!(
                    "row {} has length {}, expected {}",
                    i,
                    row.len(),
                    dimension
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(data, dimension)
    }

    /// Row at `index`, or `None` when out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&[f32]> {
        if index >= self.n_rows {
            return None;
        }
        let start = index * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.n_rows
    }

    /// True when there are no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Row length.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// All rows as one contiguous slice.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Convert to per-row vectors.
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.iter().map(|r| r.to_vec()).collect()
    }

    /// True once rows have been L2 normalized.
    #[inline]
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    /// L2-normalize every row in place.
    ///
    /// The norm denominator carries a small epsilon so all-zero rows stay
    /// finite instead of dividing by zero. No-op when already normalized.
    pub fn normalize(&mut self) {
        if self.normalized || self.dimension == 0 {
            self.normalized = true;
            return;
        }
        for row in self.data.chunks_exact_mut(self.dimension) {
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
            for x in row.iter_mut() {
                *x /= norm;
            }
        }
        self.normalized = true;
    }

    /// Normalized copy.
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.normalize();
        copy
    }

    /// Iterate over rows.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// Borrow when already normalized, otherwise a normalized copy.
    fn normalized_cow(&self) -> Cow<'_, Self> {
        if self.normalized {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.normalized())
        }
    }
}

// ============================================================================
// Scoring and ranking
// ============================================================================

/// One entry of a ranking: a document identifier with its MaxSim score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    pub document_id: String,
    pub score: f64,
}

/// MaxSim scoring and ranking over multi-vector embeddings.
///
/// Scores accumulate in f64 even though rows are stored as f32; summing a few
/// hundred similarities in f32 loses enough precision to reorder near ties.
pub struct LateInteractionScorer;

impl LateInteractionScorer {
    /// MaxSim score between a query and one document.
    ///
    /// Rows are L2-normalized first (borrowed when the embedding is already
    /// normalized, copied otherwise; pre-normalize when scoring many
    /// documents against the same query). Mismatched dimensions are a data
    /// error and fail with [`LateralError::DimensionMismatch`]; an empty side
    /// scores 0.0.
    ///
    /// For a query with `m` rows the score lies in `[-m, m]`.
    pub fn max_sim(
        query: &MultiVectorEmbedding,
        document: &MultiVectorEmbedding,
    ) -> Result<f64, LateralError> {
        Self::check_dimensions(query, document)?;
        if query.is_empty() || document.is_empty() {
            return Ok(0.0);
        }
        let q = query.normalized_cow();
        let d = document.normalized_cow();
        Ok(Self::max_sim_prenormalized(&q, &d))
    }

    /// Score a query against every document, preserving input order.
    ///
    /// This is the raw variant for callers that need the full score vector
    /// (batch operations over several queries reuse the same document set).
    pub fn score_all(
        query: &MultiVectorEmbedding,
        documents: &[MultiVectorEmbedding],
    ) -> Result<Vec<f64>, LateralError> {
        let q = query.normalized_cow();
        let mut scores = Vec::with_capacity(documents.len());
        for doc in documents {
            Self::check_dimensions(query, doc)?;
            if q.is_empty() || doc.is_empty() {
                scores.push(0.0);
                continue;
            }
            let d = doc.normalized_cow();
            scores.push(Self::max_sim_prenormalized(&q, &d));
        }
        Ok(scores)
    }

    /// Rank documents by MaxSim score, descending, truncated to `top_k`.
    ///
    /// `document_ids` runs parallel to `documents`. The sort is stable, so
    /// equal scores keep their input order and rankings are deterministic.
    pub fn rank_documents(
        query: &MultiVectorEmbedding,
        documents: &[MultiVectorEmbedding],
        document_ids: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedDocument>, LateralError> {
        if documents.len() != document_ids.len() {
            return Err(LateralError::InvalidInput(format!(
                "{} documents but {} document ids",
                documents.len(),
                document_ids.len()
            )));
        }
        let scores = Self::score_all(query, documents)?;
        Ok(Self::sort_ranking(document_ids, scores, top_k))
    }

    /// Score every query against every document.
    ///
    /// Returns `result[q][d]`. No cross-query state: this is [`Self::score_all`]
    /// once per query over a shared document set.
    pub fn batch_score(
        queries: &[MultiVectorEmbedding],
        documents: &[MultiVectorEmbedding],
    ) -> Result<Vec<Vec<f64>>, LateralError> {
        queries
            .iter()
            .map(|q| Self::score_all(q, documents))
            .collect()
    }

    fn sort_ranking(document_ids: &[String], scores: Vec<f64>, top_k: usize) -> Vec<RankedDocument> {
        let mut ranked: Vec<RankedDocument> = document_ids
            .iter()
            .zip(scores)
            .map(|(id, score)| RankedDocument {
                document_id: id.clone(),
                score,
            })
            .collect();
        // stable sort: equal scores keep input order
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(top_k);
        ranked
    }

    fn check_dimensions(
        query: &MultiVectorEmbedding,
        document: &MultiVectorEmbedding,
    ) -> Result<(), LateralError> {
        if !query.is_empty() && !document.is_empty() && query.dimension() != document.dimension() {
            return Err(LateralError::DimensionMismatch {
                query: query.dimension(),
                document: document.dimension(),
            });
        }
        Ok(())
    }

    /// Core loop over already-normalized inputs.
    fn max_sim_prenormalized(query: &MultiVectorEmbedding, document: &MultiVectorEmbedding) -> f64 {
        let mut total = 0.0f64;
        for q_row in query.iter() {
            let mut best = f64::NEG_INFINITY;
            for d_row in document.iter() {
                let sim = Self::dot(q_row, d_row);
                if sim > best {
                    best = sim;
                }
            }
            total += best;
        }
        total
    }

    #[inline]
    fn dot(a: &[f32], b: &[f32]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (*x as f64) * (*y as f64))
            .sum()
    }
}

#[cfg(feature = "parallel")]
impl LateInteractionScorer {
    /// Parallel ranking over large document collections.
    ///
    /// Scoring runs on the rayon pool; the final stable sort happens after
    /// collection in input order, so ordering guarantees match
    /// [`Self::rank_documents`].
    pub fn rank_documents_parallel(
        query: &MultiVectorEmbedding,
        documents: &[MultiVectorEmbedding],
        document_ids: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedDocument>, LateralError> {
        if documents.len() != document_ids.len() {
            return Err(LateralError::InvalidInput(format!(
                "{} documents but {} document ids",
                documents.len(),
                document_ids.len()
            )));
        }
        let q = query.normalized_cow();
        let scores: Result<Vec<f64>, LateralError> = documents
            .par_iter()
            .map(|doc| {
                Self::check_dimensions(query, doc)?;
                if q.is_empty() || doc.is_empty() {
                    return Ok(0.0);
                }
                let d = doc.normalized_cow();
                Ok(Self::max_sim_prenormalized(&q, &d))
            })
            .collect();
        Ok(Self::sort_ranking(document_ids, scores?, top_k))
    }

    /// Parallel variant of [`Self::batch_score`]: queries are scored on the
    /// rayon pool.
    pub fn batch_score_parallel(
        queries: &[MultiVectorEmbedding],
        documents: &[MultiVectorEmbedding],
    ) -> Result<Vec<Vec<f64>>, LateralError> {
        queries
            .par_iter()
            .map(|q| Self::score_all(q, documents))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("doc_{i}")).collect()
    }

    #[test]
    fn test_embedding_creation() {
        let mv = MultiVectorEmbedding::new(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(mv.len(), 2);
        assert_eq!(mv.dimension(), 3);
        assert_eq!(mv.get(0), Some(&[1.0, 0.0, 0.0][..]));
        assert_eq!(mv.get(1), Some(&[0.0, 1.0, 0.0][..]));
        assert_eq!(mv.get(2), None);
    }

    #[test]
    fn test_embedding_rejects_ragged_data() {
        assert!(MultiVectorEmbedding::new(vec![1.0, 2.0, 3.0], 2).is_err());
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(MultiVectorEmbedding::from_rows(rows).is_err());
    }

    #[test]
    fn test_empty_embedding() {
        let mv = MultiVectorEmbedding::empty(128);
        assert!(mv.is_empty());
        assert_eq!(mv.dimension(), 128);
    }

    #[test]
    fn test_normalization() {
        // magnitude 5
        let mut mv = MultiVectorEmbedding::new(vec![3.0, 4.0, 0.0], 3).unwrap();
        assert!(!mv.is_normalized());
        mv.normalize();
        let row = mv.get(0).unwrap();
        assert!((row[0] - 0.6).abs() < 1e-4);
        assert!((row[1] - 0.8).abs() < 1e-4);
        assert!(mv.is_normalized());

        // second call is a no-op
        mv.normalize();
        assert!((mv.get(0).unwrap()[0] - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_normalization_zero_row_stays_finite() {
        let mut mv = MultiVectorEmbedding::new(vec![0.0, 0.0, 0.0], 3).unwrap();
        mv.normalize();
        assert!(mv.get(0).unwrap().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_round_trip_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let mv = MultiVectorEmbedding::from_rows(rows.clone()).unwrap();
        assert_eq!(mv.to_rows(), rows);
    }

    #[test]
    fn test_max_sim_identical() {
        let rows = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let a = MultiVectorEmbedding::from_rows(rows.clone()).unwrap();
        let b = MultiVectorEmbedding::from_rows(rows).unwrap();
        let score = LateInteractionScorer::max_sim(&a, &b).unwrap();
        assert!((score - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_max_sim_orthogonal() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0, 0.0]]).unwrap();
        let d = MultiVectorEmbedding::from_rows(vec![vec![0.0, 1.0, 0.0]]).unwrap();
        let score = LateInteractionScorer::max_sim(&q, &d).unwrap();
        assert!(score.abs() < 1e-4);
    }

    #[test]
    fn test_max_sim_bounds() {
        // m query rows: score must land in [-m, m]
        let q = MultiVectorEmbedding::from_rows(vec![
            vec![0.3, -0.7, 0.2],
            vec![-0.1, 0.9, 0.4],
            vec![0.5, 0.5, 0.5],
        ])
        .unwrap();
        let d = MultiVectorEmbedding::from_rows(vec![vec![-0.3, 0.7, -0.2], vec![1.0, 0.0, 0.0]])
            .unwrap();
        let score = LateInteractionScorer::max_sim(&q, &d).unwrap();
        let m = q.len() as f64;
        assert!(score >= -m && score <= m);
    }

    #[test]
    fn test_self_score_is_maximal_in_result_set() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![0.2, 0.9], vec![-0.5, 0.4]]).unwrap();
        let other =
            MultiVectorEmbedding::from_rows(vec![vec![0.9, -0.2], vec![0.1, -0.8]]).unwrap();
        let self_score = LateInteractionScorer::max_sim(&q, &q).unwrap();
        let other_score = LateInteractionScorer::max_sim(&q, &other).unwrap();
        assert!(self_score >= other_score);
    }

    #[test]
    fn test_max_sim_dimension_mismatch_fails() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let d = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0, 0.0]]).unwrap();
        let err = LateInteractionScorer::max_sim(&q, &d).unwrap_err();
        assert!(matches!(
            err,
            LateralError::DimensionMismatch {
                query: 2,
                document: 3
            }
        ));
    }

    #[test]
    fn test_max_sim_empty_sides() {
        let empty = MultiVectorEmbedding::empty(3);
        let full = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0, 0.0]]).unwrap();
        assert_eq!(LateInteractionScorer::max_sim(&empty, &full).unwrap(), 0.0);
        assert_eq!(LateInteractionScorer::max_sim(&full, &empty).unwrap(), 0.0);
    }

    #[test]
    fn test_score_all_preserves_input_order() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let docs = vec![
            MultiVectorEmbedding::from_rows(vec![vec![0.0, 1.0]]).unwrap(),
            MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            MultiVectorEmbedding::from_rows(vec![vec![0.5, 0.5]]).unwrap(),
        ];
        let scores = LateInteractionScorer::score_all(&q, &docs).unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores[0].abs() < 1e-4);
        assert!((scores[1] - 1.0).abs() < 1e-4);
        assert!(scores[2] > scores[0] && scores[2] < scores[1]);
    }

    #[test]
    fn test_rank_documents_sorted_and_truncated() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let docs = vec![
            MultiVectorEmbedding::from_rows(vec![vec![0.0, 1.0]]).unwrap(),
            MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            MultiVectorEmbedding::from_rows(vec![vec![0.5, 0.5]]).unwrap(),
        ];
        let ranked = LateInteractionScorer::rank_documents(&q, &docs, &ids(3), 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].document_id, "doc_1");
        assert_eq!(ranked[1].document_id, "doc_2");
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_rank_documents_stable_tie_break() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let same = MultiVectorEmbedding::from_rows(vec![vec![0.6, 0.8]]).unwrap();
        // identical documents at input order [A, B] must come back [A, B]
        let docs = vec![same.clone(), same];
        let document_ids = vec!["A".to_string(), "B".to_string()];
        let ranked = LateInteractionScorer::rank_documents(&q, &docs, &document_ids, 10).unwrap();
        assert_eq!(ranked[0].document_id, "A");
        assert_eq!(ranked[1].document_id, "B");
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[test]
    fn test_rank_documents_id_length_mismatch() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let docs = vec![MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap()];
        assert!(LateInteractionScorer::rank_documents(&q, &docs, &ids(2), 5).is_err());
    }

    #[test]
    fn test_batch_score() {
        let queries = vec![
            MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            MultiVectorEmbedding::from_rows(vec![vec![0.0, 1.0]]).unwrap(),
        ];
        let docs = queries.clone();
        let scores = LateInteractionScorer::batch_score(&queries, &docs).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0][0] > scores[0][1]);
        assert!(scores[1][1] > scores[1][0]);
    }

    #[test]
    fn test_unnormalized_input_scores_as_cosine() {
        // scaling a document must not change its cosine-based score
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let d1 = MultiVectorEmbedding::from_rows(vec![vec![2.0, 0.0]]).unwrap();
        let d2 = MultiVectorEmbedding::from_rows(vec![vec![200.0, 0.0]]).unwrap();
        let s1 = LateInteractionScorer::max_sim(&q, &d1).unwrap();
        let s2 = LateInteractionScorer::max_sim(&q, &d2).unwrap();
        assert!((s1 - s2).abs() < 1e-4);
        assert!((s1 - 1.0).abs() < 1e-3);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_ranking_matches_serial() {
        let q = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let docs: Vec<MultiVectorEmbedding> = (0..50)
            .map(|i| {
                let x = i as f32 / 50.0;
                MultiVectorEmbedding::from_rows(vec![vec![x, 1.0 - x]]).unwrap()
            })
            .collect();
        let id_list = ids(50);
        let serial = LateInteractionScorer::rank_documents(&q, &docs, &id_list, 5).unwrap();
        let parallel =
            LateInteractionScorer::rank_documents_parallel(&q, &docs, &id_list, 5).unwrap();
        assert_eq!(serial, parallel);
    }
}
