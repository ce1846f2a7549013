//! Latent Semantic Analysis over bag-of-words lyrics.
//!
//! The songs × vocabulary term matrix is factorized with a truncated SVD and
//! every song is represented by its projection on the top `k` right singular
//! vectors. Ranking is plain cosine similarity in that space.
//!
//! Lyrics overlap alone is a weak predictor of Last.fm similarity, so expect
//! low mAP and recall from this strategy.

use crate::config::{LsaConfig, TermWeighting};
use crate::linalg::{truncated_svd, CsrMatrix, SvdParams, TruncatedSvd};
use crate::recommend::SimilarityStrategy;
use crate::song::{Song, TermVector};
use anyhow::{bail, Context, Result};
use log::info;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Maps term vectors into a latent space: optional IDF weighting followed by
/// the right singular vectors of the fitted term matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermProjection {
    /// Right singular vectors as rows, shape `k × vocabulary`.
    components: Vec<Vec<f64>>,
    /// Per-term IDF factors when TF-IDF weighting is used.
    idf: Option<Vec<f64>>,
}

impl TermProjection {
    fn new(components: &Array2<f64>, idf: Option<Vec<f64>>) -> Self {
        Self {
            components: components.rows().into_iter().map(|row| row.to_vec()).collect(),
            idf,
        }
    }

    /// Latent dimensionality `k`.
    pub fn dimension(&self) -> usize {
        self.components.len()
    }

    /// Projects a term vector. Terms outside the fitted vocabulary are
    /// ignored.
    pub fn project(&self, terms: &TermVector) -> Array1<f64> {
        let mut latent = Array1::zeros(self.dimension());
        for &(term, count) in terms.entries() {
            let term = term as usize;
            if term >= self.vocabulary_len() {
                continue;
            }
            let idf = self
                .idf
                .as_ref()
                .and_then(|idf| idf.get(term))
                .copied()
                .unwrap_or(1.0);
            let weight = f64::from(count) * idf;
            for (value, component) in latent.iter_mut().zip(&self.components) {
                if let Some(&loading) = component.get(term) {
                    *value += weight * loading;
                }
            }
        }
        latent
    }

    /// Checks the shape after deserialization.
    pub fn validate(&self, vocabulary_len: usize) -> Result<()> {
        if self.components.iter().any(|row| row.len() != vocabulary_len) {
            bail!("Projection rows do not match a vocabulary of {vocabulary_len} words");
        }
        if self.idf.as_ref().is_some_and(|idf| idf.len() != vocabulary_len) {
            bail!("IDF factors do not match a vocabulary of {vocabulary_len} words");
        }
        Ok(())
    }

    /// Vocabulary size the projection was fitted on.
    pub fn vocabulary_len(&self) -> usize {
        self.components.first().map_or(0, Vec::len)
    }
}

/// A fitted LSA model over a fixed list of songs.
#[derive(Debug, Clone)]
pub struct LsaModel {
    track_ids: Vec<String>,
    projection: TermProjection,
    singular_values: Array1<f64>,
    latent: Array2<f64>,
}

/// Builds the weighted sparse term matrix of `songs`.
pub fn term_matrix(
    songs: &[Song],
    vocabulary_len: usize,
    weighting: TermWeighting,
) -> Result<(CsrMatrix, Option<Vec<f64>>)> {
    let mut matrix = CsrMatrix::from_rows(
        songs.iter().map(|song| {
            song.lyrics
                .entries()
                .iter()
                .map(|&(term, count)| (term, f64::from(count)))
        }),
        vocabulary_len,
    )
    .context("Lyrics reference words outside the vocabulary")?;

    let idf = match weighting {
        TermWeighting::Raw => None,
        TermWeighting::TfIdf => {
            let idf = inverse_document_frequency(songs, vocabulary_len);
            matrix.map_values(|term, value| value * idf[term]);
            Some(idf)
        }
    };
    Ok((matrix, idf))
}

/// Smoothed IDF: `ln((1 + n) / (1 + df)) + 1`.
fn inverse_document_frequency(songs: &[Song], vocabulary_len: usize) -> Vec<f64> {
    let mut document_frequency = vec![0usize; vocabulary_len];
    for song in songs {
        for &(term, _) in song.lyrics.entries() {
            document_frequency[term as usize] += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let documents = songs.len() as f64;
    document_frequency
        .into_iter()
        .map(|df| ((1.0 + documents) / (1.0 + df as f64)).ln() + 1.0)
        .collect()
}

impl LsaModel {
    /// Fits the model on `songs`, keeping their order.
    ///
    /// Builds the songs × vocabulary term matrix (raw counts or smoothed
    /// TF-IDF, per `config.weighting`), factorizes it with a randomized
    /// truncated SVD of `config.components` components, and stores every
    /// song's latent vector `A·Vᵀ`. Unseen songs go through
    /// [`LsaModel::project`] into the same space.
    ///
    /// # Arguments
    ///
    /// * `songs` - Dataset songs; row `i` of the latent matrix is `songs[i]`
    /// * `vocabulary_len` - Size of the musiXmatch vocabulary
    /// * `config` - Component count, weighting and SVD parameters
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - `config.components` is not in `1..=min(songs, vocabulary)`
    /// - A lyrics vector references a word outside the vocabulary
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lyrec::config::LsaConfig;
    /// use lyrec::lsa::LsaModel;
    /// use lyrec::recommend::SimilarityStrategy;
    /// # use std::path::Path;
    ///
    /// let (vocabulary, songs) = lyrec::storage::load_songs(Path::new("data"))?;
    /// let model = LsaModel::fit(songs.songs(), vocabulary.len(), &LsaConfig::default())?;
    /// for rec in model.recommend("TRAAAAV128F421A322", 10)? {
    ///     println!("{} {:.3}", rec.track_id, rec.score);
    /// }
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    ///
    /// # Performance
    ///
    /// The term matrix stays sparse. The SVD costs a few sparse products
    /// per power iteration plus a dense `(k + oversampling)²` eigenproblem,
    /// so fitting is roughly linear in the number of non-zero counts.
    pub fn fit(songs: &[Song], vocabulary_len: usize, config: &LsaConfig) -> Result<Self> {
        let (matrix, idf) = term_matrix(songs, vocabulary_len, config.weighting)?;
        let TruncatedSvd {
            singular_values,
            components,
        } = truncated_svd(
            &matrix,
            SvdParams {
                components: config.components,
                oversampling: config.oversampling,
                power_iterations: config.power_iterations,
                seed: config.seed,
            },
        )
        .context("LSA decomposition failed")?;

        let latent = matrix.dot_dense(&components.t().to_owned());
        info!(
            "Fitted LSA with {} components over {} songs × {} words",
            config.components,
            songs.len(),
            vocabulary_len
        );

        Ok(Self {
            track_ids: songs.iter().map(|s| s.track_id.clone()).collect(),
            projection: TermProjection::new(&components, idf),
            singular_values,
            latent,
        })
    }

    /// Projects any term vector into the latent space.
    pub fn project(&self, terms: &TermVector) -> Array1<f64> {
        self.projection.project(terms)
    }

    pub fn projection(&self) -> &TermProjection {
        &self.projection
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    /// Latent vector of a fitted song.
    pub fn latent(&self) -> &Array2<f64> {
        &self.latent
    }
}

impl SimilarityStrategy for LsaModel {
    fn name(&self) -> &'static str {
        "LSA"
    }

    fn track_ids(&self) -> &[String] {
        &self.track_ids
    }

    fn embeddings(&self) -> &Array2<f64> {
        &self.latent
    }
}
