//! Ranking of songs by embedding similarity.
//!
//! Both strategies (LSA and GNN) reduce to the same thing at query time: one
//! fixed-length embedding row per song, ranked by cosine similarity against a
//! query vector. [`SimilarityStrategy`] captures that seam so the CLI and the
//! evaluation code never care which model produced the embeddings.

use anyhow::{anyhow, bail, Result};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One ranked song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub track_id: String,
    /// Position in the strategy's song list (dataset order).
    pub position: usize,
    pub score: f64,
}

/// Cosine similarity; 0 when either vector is all zeros.
#[must_use]
pub fn cosine_similarity(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    a.dot(&b) / (norm_a * norm_b)
}

/// Scales every row to unit length; zero rows stay zero.
pub fn normalize_rows(matrix: &mut Array2<f64>) {
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|x| x / norm);
        }
    }
}

/// Selects the `n` best-scoring positions.
///
/// Sorting is stable and descending; equal scores keep dataset order, NaN
/// sorts last. `exclude` (the query itself) never appears. The result holds
/// exactly `min(n, candidates)` entries.
#[must_use]
pub fn top_n(scores: &[f64], n: usize, exclude: Option<usize>) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|&(position, _)| Some(position) != exclude)
        .collect();

    ranked.sort_by(|(pa, a), (pb, b)| compare_desc(*a, *b).then(pa.cmp(pb)));
    ranked.truncate(n);
    ranked
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// A model that embeds every song of a fixed list in one shared space.
pub trait SimilarityStrategy: Sync {
    /// Human readable strategy name for logs and reports.
    fn name(&self) -> &'static str;

    /// Track ids in row order of [`SimilarityStrategy::embeddings`].
    fn track_ids(&self) -> &[String];

    /// One row per track.
    fn embeddings(&self) -> &Array2<f64>;

    /// Embedding dimensionality, shared by all songs.
    fn dimension(&self) -> usize {
        self.embeddings().ncols()
    }

    fn position(&self, track_id: &str) -> Option<usize> {
        self.track_ids().iter().position(|id| id == track_id)
    }

    /// Cosine similarity of `query` against every song.
    fn scores(&self, query: ArrayView1<'_, f64>) -> Vec<f64> {
        self.embeddings()
            .axis_iter(Axis(0))
            .map(|row| cosine_similarity(row, query))
            .collect()
    }

    /// Ranks all songs against an arbitrary vector of the embedding space.
    fn recommend_vector(
        &self,
        query: ArrayView1<'_, f64>,
        n: usize,
        exclude: Option<usize>,
    ) -> Result<Vec<Recommendation>> {
        if query.len() != self.dimension() {
            bail!(
                "{} query has {} dimensions, expected {}",
                self.name(),
                query.len(),
                self.dimension()
            );
        }

        let scores = self.scores(query);
        Ok(top_n(&scores, n, exclude)
            .into_iter()
            .map(|(position, score)| Recommendation {
                track_id: self.track_ids()[position].clone(),
                position,
                score,
            })
            .collect())
    }

    /// The `n` songs most similar to a known song, never the song itself.
    fn recommend(&self, track_id: &str, n: usize) -> Result<Vec<Recommendation>> {
        let position = self
            .position(track_id)
            .ok_or_else(|| anyhow!("Track `{track_id}` is not known to the {} model", self.name()))?;
        let query = self.embeddings().row(position);
        self.recommend_vector(query, n, Some(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct Fixed {
        ids: Vec<String>,
        embeddings: Array2<f64>,
    }

    impl SimilarityStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn track_ids(&self) -> &[String] {
            &self.ids
        }

        fn embeddings(&self) -> &Array2<f64> {
            &self.embeddings
        }
    }

    fn fixed() -> Fixed {
        Fixed {
            ids: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            embeddings: array![[1.0, 0.0], [1.0, 0.1], [0.0, 1.0], [2.0, 0.2]],
        }
    }

    #[test]
    fn test_cosine_of_zero_vector_is_zero() {
        let zero = array![0.0, 0.0];
        let other = array![1.0, 2.0];
        assert_eq!(cosine_similarity(zero.view(), other.view()), 0.0);
        assert!((cosine_similarity(other.view(), other.view()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_n_breaks_ties_by_position() {
        let ranked = top_n(&[0.5, 0.9, 0.5, 0.9, 0.1], 4, None);
        let positions: Vec<usize> = ranked.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_top_n_excludes_query_and_caps_length() {
        let scores = [1.0, 0.2, f64::NAN, 0.7];
        let ranked = top_n(&scores, 10, Some(0));
        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|(p, _)| *p != 0));
        assert_eq!(ranked.last().map(|(p, _)| *p), Some(2), "NaN sorts last");

        assert_eq!(top_n(&scores, 2, Some(0)).len(), 2);
        assert!(top_n(&scores, 0, None).is_empty());
    }

    #[test]
    fn test_recommend_never_returns_query() -> Result<()> {
        let model = fixed();
        let recommendations = model.recommend("B", 3)?;
        assert_eq!(recommendations.len(), 3);
        assert!(recommendations.iter().all(|r| r.track_id != "B"));
        // D is B scaled by two, so it ties at the top with cosine 1.
        assert_eq!(recommendations[0].track_id, "D");
        Ok(())
    }

    #[test]
    fn test_recommend_unknown_track_is_an_error() {
        assert!(fixed().recommend("Z", 3).is_err());
    }

    #[test]
    fn test_recommend_vector_checks_dimension() {
        let query = array![1.0, 0.0, 0.0];
        assert!(fixed().recommend_vector(query.view(), 2, None).is_err());
    }

    #[test]
    fn test_normalize_rows_leaves_zero_rows() {
        let mut matrix = array![[3.0, 4.0], [0.0, 0.0]];
        normalize_rows(&mut matrix);
        assert!((matrix[[0, 0]] - 0.6).abs() < 1e-12);
        assert_eq!(matrix[[1, 1]], 0.0);
    }
}
