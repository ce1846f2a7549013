//! # GNN Strategy
//!
//! A simplified graph convolution over the song graph:
//!
//! 1. Node features are the LSA vectors of the node lyrics, L2-normalized
//! 2. Features are smoothed `hops` times over the normalized adjacency
//! 3. One learned layer, `tanh(H·W)`, maps them to the embedding space
//!
//! Training pulls the two ends of every training edge together and pushes a
//! random node away (logistic loss, mini-batch SGD). Validation songs lose
//! their edges during training and are ranked every `eval_every` epochs;
//! the weights with the best validation mAP are kept.

use crate::config::{GnnConfig, LsaConfig, GNN_MODEL_FILE};
use crate::dataset::sample_indices;
use crate::evaluation::{score_ranking, SplitEntry};
use crate::graph::SimilarityGraph;
use crate::lsa::{LsaModel, TermProjection};
use crate::metrics::mean;
use crate::recommend::{normalize_rows, top_n, Recommendation, SimilarityStrategy};
use crate::song::{Song, SongTable, TermVector};
use crate::storage::PendingWrites;
use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub nodes: usize,
    pub edges: usize,
    pub training_edges: usize,
    pub validation_queries: usize,
    pub epochs_run: usize,
    /// Epoch of the kept weights (the last one without validation).
    pub best_epoch: usize,
    pub best_map: Option<f64>,
    pub best_recall: Option<f64>,
    /// Mean loss per training pair in the last epoch.
    pub final_loss: Option<f64>,
    pub stopped_early: bool,
}

/// A validation song and its relevant songs, most relevant first.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationQuery {
    pub node: usize,
    pub relevant: Vec<String>,
}

/// Graph, features and validation queries ready for training.
#[derive(Debug, Clone)]
pub struct GraphProblem {
    pub graph: SimilarityGraph,
    /// `graph` without the edges of validation nodes.
    pub training_graph: SimilarityGraph,
    pub features: Array2<f64>,
    /// Maps lyrics to node features; kept so unseen songs can be embedded.
    pub projection: TermProjection,
    pub queries: Vec<ValidationQuery>,
}

/// Picks the graph nodes: a seeded sample of at most `max_nodes` songs, in
/// dataset order. Only songs with similar-song lists qualify when the edges
/// come from those lists.
pub fn select_nodes(
    songs: &SongTable,
    training: &[SplitEntry],
    validation: &[SplitEntry],
    config: &GnnConfig,
) -> Vec<usize> {
    let candidates: Vec<usize> = if config.edge_source.uses_similars() {
        let listed: HashSet<&str> = training
            .iter()
            .chain(validation)
            .map(|entry| entry.track_id.as_str())
            .collect();
        songs
            .songs()
            .iter()
            .enumerate()
            .filter(|(_, song)| listed.contains(song.track_id.as_str()))
            .map(|(position, _)| position)
            .collect()
    } else {
        (0..songs.len()).collect()
    };

    sample_indices(candidates.len(), config.max_nodes, config.seed)
        .into_iter()
        .map(|i| candidates[i])
        .collect()
}

/// LSA vectors of `nodes`, one unit row per node, and the projection that
/// produced them.
fn node_features(
    nodes: &[Song],
    vocabulary_len: usize,
    lsa: &LsaConfig,
    feature_dim: usize,
) -> Result<(Array2<f64>, TermProjection)> {
    let components = feature_dim.min(nodes.len()).min(vocabulary_len);
    if components < feature_dim {
        warn!("Only {components} feature components fit {} nodes", nodes.len());
    }
    let model = LsaModel::fit(
        nodes,
        vocabulary_len,
        &LsaConfig {
            components,
            ..lsa.clone()
        },
    )
    .context("Failed to compute GNN node features")?;

    let mut features = model.latent().clone();
    normalize_rows(&mut features);
    Ok((features, model.projection().clone()))
}

impl GraphProblem {
    /// Selects the nodes, builds the graph and its features, and sets
    /// validation songs apart.
    ///
    /// # Errors
    ///
    /// Fails when fewer than two nodes qualify, when a node is not in the
    /// dataset, or when no training edge is left.
    pub fn prepare(
        songs: &SongTable,
        vocabulary_len: usize,
        training: &[SplitEntry],
        validation: &[SplitEntry],
        lsa: &LsaConfig,
        config: &GnnConfig,
    ) -> Result<Self> {
        let positions = select_nodes(songs, training, validation, config);
        if positions.len() < 2 {
            if config.edge_source.uses_similars() {
                bail!(
                    "Only {} songs have similar-song lists; rebuild with evaluation data or use the `tags` edge source",
                    positions.len()
                );
            }
            bail!("The GNN needs at least two songs, found {}", positions.len());
        }

        let nodes: Vec<Song> = positions.iter().map(|&p| songs.songs()[p].clone()).collect();
        let node_refs: Vec<&Song> = nodes.iter().collect();
        let listed: Vec<SplitEntry> = training.iter().chain(validation).cloned().collect();
        let graph = SimilarityGraph::from_songs(
            &node_refs,
            &listed,
            config.edge_source,
            config.min_shared_tags,
        )?;
        graph
            .verify_nodes(songs)
            .context("Similarity graph does not match the dataset")?;
        info!(
            "Similarity graph: {} nodes, {} edges ({:?})",
            graph.node_count(),
            graph.edge_count(),
            config.edge_source
        );

        let queries = if config.edge_source.uses_similars() {
            similar_song_queries(&graph, validation)
        } else {
            neighbour_queries(&graph, config)
        };
        let held_out: HashSet<usize> = queries.iter().map(|q| q.node).collect();
        let training_graph = graph.without_edges_of(&held_out);
        if training_graph.edge_count() == 0 {
            bail!(
                "The training graph has no edges; raise gnn.max_nodes or lower gnn.min_shared_tags"
            );
        }
        debug!(
            "{} validation queries, {} training edges",
            queries.len(),
            training_graph.edge_count()
        );

        let (features, projection) = node_features(&nodes, vocabulary_len, lsa, config.feature_dim)?;
        Ok(Self {
            graph,
            training_graph,
            features,
            projection,
            queries,
        })
    }

    /// Trains the embedding layer and embeds every node on the full graph.
    pub fn train(&self, config: &GnnConfig) -> Result<GnnModel> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut weights = xavier_uniform(self.features.ncols(), config.embedding_dim, &mut rng);
        let training_inputs = self.training_graph.propagate(&self.features, config.hops);

        let mut pairs: Vec<(usize, usize)> = self
            .training_graph
            .edges()
            .into_iter()
            .map(|(a, b, _)| (a, b))
            .collect();
        if pairs.is_empty() {
            bail!("Nothing to train on: the training graph has no edges");
        }

        let mut report = TrainReport {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            training_edges: pairs.len(),
            validation_queries: self.queries.len(),
            epochs_run: 0,
            best_epoch: 0,
            best_map: None,
            best_recall: None,
            final_loss: None,
            stopped_early: false,
        };
        if self.queries.is_empty() {
            warn!("No validation queries; training runs for all {} epochs", config.epochs);
        }

        let progress = ProgressBar::new(config.epochs as u64);
        progress.set_style(
            ProgressStyle::with_template("Training GNN [{bar:40}] {pos}/{len} epochs {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut best_weights = weights.clone();
        let mut stale = 0usize;
        for epoch in 1..=config.epochs {
            pairs.shuffle(&mut rng);
            let mut loss = 0.0;
            for batch in pairs.chunks(config.batch_size) {
                loss += sgd_step(&mut weights, &training_inputs, batch, config.learning_rate, &mut rng);
            }
            #[allow(clippy::cast_precision_loss)]
            let epoch_loss = loss / (2 * pairs.len()) as f64;
            report.final_loss = Some(epoch_loss);
            report.epochs_run = epoch;
            progress.set_message(format!("loss {epoch_loss:.4}"));
            progress.inc(1);
            debug!("Epoch {epoch}: loss {epoch_loss:.5}");

            if self.queries.is_empty() {
                best_weights.assign(&weights);
                report.best_epoch = epoch;
                continue;
            }
            if epoch % config.eval_every != 0 && epoch != config.epochs {
                continue;
            }

            let (map, recall) = self.validate(&training_inputs, &weights, config.eval_top_n);
            info!("Epoch {epoch}: validation mAP@{} {map:.4}, recall {recall:.4}", config.eval_top_n);
            if report.best_map.map_or(true, |best| map > best) {
                report.best_map = Some(map);
                report.best_recall = Some(recall);
                report.best_epoch = epoch;
                best_weights.assign(&weights);
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience {
                    report.stopped_early = true;
                    info!("No improvement in {stale} validations, stopping at epoch {epoch}");
                    break;
                }
            }
        }
        progress.finish_and_clear();

        if config.epochs == 0 {
            warn!("gnn.epochs is 0; embeddings use the initial weights");
        }

        let full_inputs = self.graph.propagate(&self.features, config.hops);
        let embeddings = embed(&full_inputs, &best_weights);
        Ok(GnnModel {
            track_ids: self.graph.node_ids().to_vec(),
            projection: self.projection.clone(),
            weights: best_weights,
            embeddings,
            report,
        })
    }

    /// Mean average precision and recall of the validation queries.
    fn validate(&self, inputs: &Array2<f64>, weights: &Array2<f64>, top: usize) -> (f64, f64) {
        let embeddings = embed(inputs, weights);
        let ids = self.graph.node_ids();
        let scored: Vec<(f64, f64)> = self
            .queries
            .par_iter()
            .map(|query| {
                let scores = embeddings.dot(&embeddings.row(query.node)).to_vec();
                let ranked: Vec<&str> = top_n(&scores, top, Some(query.node))
                    .into_iter()
                    .map(|(position, _)| ids[position].as_str())
                    .collect();
                score_ranking(&ranked, &query.relevant, top)
            })
            .collect();

        let (precisions, recalls): (Vec<f64>, Vec<f64>) = scored.into_iter().unzip();
        (mean(&precisions), mean(&recalls))
    }
}

/// Validation nodes from the validation split; relevant songs are their
/// lists restricted to graph nodes.
fn similar_song_queries(graph: &SimilarityGraph, validation: &[SplitEntry]) -> Vec<ValidationQuery> {
    validation
        .iter()
        .filter_map(|entry| {
            let node = graph.position(&entry.track_id)?;
            let relevant: Vec<String> = entry
                .similars
                .iter()
                .filter(|id| graph.position(id).is_some())
                .cloned()
                .collect();
            (!relevant.is_empty()).then_some(ValidationQuery { node, relevant })
        })
        .collect()
}

/// A seeded share of the connected nodes; relevant songs are their graph
/// neighbours, heaviest edge first.
fn neighbour_queries(graph: &SimilarityGraph, config: &GnnConfig) -> Vec<ValidationQuery> {
    let connected: Vec<usize> = (0..graph.node_count())
        .filter(|&node| graph.degree(node) > 0)
        .collect();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let count = (connected.len() as f64 * config.validation_fraction).round() as usize;

    sample_indices(connected.len(), count, config.seed)
        .into_iter()
        .map(|i| {
            let node = connected[i];
            let mut neighbours: Vec<(usize, f64)> = graph.neighbours(node).collect();
            neighbours.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            ValidationQuery {
                node,
                relevant: neighbours
                    .into_iter()
                    .map(|(n, _)| graph.node_ids()[n].clone())
                    .collect(),
            }
        })
        .collect()
}

fn xavier_uniform(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    #[allow(clippy::cast_precision_loss)]
    let bound = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
}

/// Unit-length `tanh(inputs · weights)` rows.
fn embed(inputs: &Array2<f64>, weights: &Array2<f64>) -> Array2<f64> {
    let mut embeddings = inputs.dot(weights).mapv(f64::tanh);
    normalize_rows(&mut embeddings);
    embeddings
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Logistic loss of a batch of (anchor, positive, negative) triples and its
/// gradient with respect to `weights`.
fn loss_and_gradient(
    weights: &Array2<f64>,
    inputs: &Array2<f64>,
    anchors: &[usize],
    positives: &[usize],
    negatives: &[usize],
) -> (f64, Array2<f64>) {
    let forward = |rows: &[usize]| {
        let x = inputs.select(Axis(0), rows);
        let z = x.dot(weights).mapv(f64::tanh);
        (x, z)
    };
    let (xa, za) = forward(anchors);
    let (xp, zp) = forward(positives);
    let (xn, zn) = forward(negatives);

    let positive_scores = (&za * &zp).sum_axis(Axis(1));
    let negative_scores = (&za * &zn).sum_axis(Axis(1));
    let loss = positive_scores.iter().map(|&s| softplus(-s)).sum::<f64>()
        + negative_scores.iter().map(|&s| softplus(s)).sum::<f64>();

    let dp = positive_scores.mapv(|s| sigmoid(s) - 1.0).insert_axis(Axis(1));
    let dn = negative_scores.mapv(sigmoid).insert_axis(Axis(1));

    let through_tanh = |z: &Array2<f64>, upstream: Array2<f64>| upstream * &z.mapv(|v| 1.0 - v * v);
    let grad_a = through_tanh(&za, &zp * &dp + &zn * &dn);
    let grad_p = through_tanh(&zp, &za * &dp);
    let grad_n = through_tanh(&zn, &za * &dn);

    let gradient = xa.t().dot(&grad_a) + xp.t().dot(&grad_p) + xn.t().dot(&grad_n);
    (loss, gradient)
}

/// One SGD update over `batch`; returns the summed batch loss.
fn sgd_step(
    weights: &mut Array2<f64>,
    inputs: &Array2<f64>,
    batch: &[(usize, usize)],
    learning_rate: f64,
    rng: &mut StdRng,
) -> f64 {
    let nodes = inputs.nrows();
    let anchors: Vec<usize> = batch.iter().map(|&(a, _)| a).collect();
    let positives: Vec<usize> = batch.iter().map(|&(_, b)| b).collect();
    let negatives: Vec<usize> = anchors
        .iter()
        .map(|&anchor| {
            let sampled = rng.gen_range(0..nodes);
            if sampled == anchor {
                (sampled + 1) % nodes
            } else {
                sampled
            }
        })
        .collect();

    let (loss, gradient) = loss_and_gradient(weights, inputs, &anchors, &positives, &negatives);
    #[allow(clippy::cast_precision_loss)]
    let step = learning_rate / batch.len() as f64;
    weights.scaled_add(-step, &gradient);
    loss
}

/// Trained GNN: node ids, feature projection, layer weights and unit
/// embeddings.
#[derive(Debug, Clone)]
pub struct GnnModel {
    track_ids: Vec<String>,
    projection: TermProjection,
    weights: Array2<f64>,
    embeddings: Array2<f64>,
    report: TrainReport,
}

/// On-disk form of [`GnnModel`].
#[derive(Serialize, Deserialize)]
struct GnnArtifact {
    track_ids: Vec<String>,
    projection: TermProjection,
    weights: Vec<Vec<f64>>,
    embeddings: Vec<Vec<f64>>,
    report: TrainReport,
}

fn to_rows(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn from_rows(rows: Vec<Vec<f64>>, what: &str) -> Result<Array2<f64>> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != ncols) {
        bail!("Ragged {what} matrix in {GNN_MODEL_FILE}");
    }
    Array2::from_shape_vec((nrows, ncols), rows.into_iter().flatten().collect())
        .with_context(|| format!("Invalid {what} matrix in {GNN_MODEL_FILE}"))
}

impl GnnModel {
    /// Full training pipeline over the unified dataset.
    ///
    /// Selects at most `config.max_nodes` songs as graph nodes, connects
    /// them according to `config.edge_source`, computes LSA node features
    /// and trains the embedding layer with early stopping on validation
    /// mAP. The returned model holds one embedding per node, computed on
    /// the full graph with the best weights.
    ///
    /// # Arguments
    ///
    /// * `songs` - The unified dataset
    /// * `vocabulary_len` - Size of the musiXmatch vocabulary
    /// * `training` / `validation` - GNN splits from `lyrec build`; only
    ///   read when the edge source uses similar-song lists
    /// * `lsa` - Weighting and SVD parameters of the node features
    /// * `config` - Graph, training and validation parameters
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - Fewer than two songs qualify as nodes (for the similar-song edge
    ///   source: fewer than two split songs)
    /// - A graph node is not a dataset song
    /// - No training edge is left once validation edges are removed
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lyrec::config::PipelineConfig;
    /// use lyrec::gnn::GnnModel;
    /// # use std::path::Path;
    ///
    /// let config = PipelineConfig::default();
    /// let (vocabulary, songs) = lyrec::storage::load_songs(Path::new("data"))?;
    /// let model = GnnModel::train(&songs, vocabulary.len(), &[], &[], &config.lsa, &config.gnn)?;
    /// model.save(Path::new("data"))?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    ///
    /// # Design Notes
    ///
    /// Propagation has no parameters, so it runs once per graph and the
    /// training loop only multiplies by the layer weights. Validation songs
    /// keep their features but lose their edges, which is exactly how an
    /// unseen song is embedded at inference.
    pub fn train(
        songs: &SongTable,
        vocabulary_len: usize,
        training: &[SplitEntry],
        validation: &[SplitEntry],
        lsa: &LsaConfig,
        config: &GnnConfig,
    ) -> Result<Self> {
        GraphProblem::prepare(songs, vocabulary_len, training, validation, lsa, config)?
            .train(config)
    }

    pub fn report(&self) -> &TrainReport {
        &self.report
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    /// Embeds a song that is not a graph node.
    ///
    /// Without neighbours, propagation over `A + I` leaves the feature row
    /// unchanged, so the embedding is `tanh(normalize(project(x)) · W)`,
    /// normalized.
    pub fn embed_lyrics(&self, lyrics: &TermVector) -> Array1<f64> {
        let mut features = self.projection.project(lyrics).insert_axis(Axis(0));
        normalize_rows(&mut features);
        embed(&features, &self.weights).row(0).to_owned()
    }

    /// Recommends for any song: graph nodes use their trained embedding,
    /// other songs are embedded from their lyrics.
    pub fn recommend_song(&self, song: &Song, n: usize) -> Result<Vec<Recommendation>> {
        if self.position(&song.track_id).is_some() {
            return self.recommend(&song.track_id, n);
        }
        debug!("{} is not a graph node; embedding its lyrics", song.track_id);
        self.recommend_vector(self.embed_lyrics(&song.lyrics).view(), n, None)
    }

    /// Writes `gnn_model.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let artifact = GnnArtifact {
            track_ids: self.track_ids.clone(),
            projection: self.projection.clone(),
            weights: to_rows(&self.weights),
            embeddings: to_rows(&self.embeddings),
            report: self.report.clone(),
        };
        let mut pending = PendingWrites::new(dir)?;
        pending.add_json(GNN_MODEL_FILE, &artifact)?;
        pending
            .commit()?
            .pop()
            .ok_or_else(|| anyhow!("{GNN_MODEL_FILE} was not written"))
    }

    /// Reads the model saved by [`GnnModel::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(GNN_MODEL_FILE);
        if !path.is_file() {
            bail!(
                "No trained GNN at {}. Run `lyrec train-gnn` first.",
                path.display()
            );
        }
        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let artifact: GnnArtifact = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed GNN model {}", path.display()))?;

        let embeddings = from_rows(artifact.embeddings, "embeddings")?;
        if embeddings.nrows() != artifact.track_ids.len() {
            bail!(
                "{} has {} embeddings for {} tracks",
                path.display(),
                embeddings.nrows(),
                artifact.track_ids.len()
            );
        }
        let weights = from_rows(artifact.weights, "weights")?;
        artifact
            .projection
            .validate(artifact.projection.vocabulary_len())
            .with_context(|| format!("Malformed GNN model {}", path.display()))?;
        if artifact.projection.dimension() != weights.nrows() {
            bail!(
                "{}: projection has {} components, weights expect {}",
                path.display(),
                artifact.projection.dimension(),
                weights.nrows()
            );
        }
        Ok(Self {
            track_ids: artifact.track_ids,
            projection: artifact.projection,
            weights,
            embeddings,
            report: artifact.report,
        })
    }
}

impl SimilarityStrategy for GnnModel {
    fn name(&self) -> &'static str {
        "GNN"
    }

    fn track_ids(&self) -> &[String] {
        &self.track_ids
    }

    fn embeddings(&self) -> &Array2<f64> {
        &self.embeddings
    }
}
