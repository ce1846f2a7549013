//! # Configuration Module
//!
//! Data directory management and the tunable parameters of the pipeline.
//!
//! ## Data Storage
//!
//! The unified dataset and the GNN artifact live in the platform-standard data
//! directory unless `--data-dir` is given:
//! - Linux: `~/.local/share/lyrec/`
//! - macOS: `~/Library/Application Support/lyrec/`
//! - Windows: `%APPDATA%\lyrec\`
//!
//! ## Parameters
//!
//! Every experimental choice (subsampling, thresholds, LSA rank, GNN
//! hyperparameters) is a field of [`PipelineConfig`]. A JSON file passed with
//! `--config` may override any subset of them:
//!
//! ```json
//! { "lsa": { "components": 50 }, "gnn": { "edge_source": "tags", "min_shared_tags": 3 } }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Raw lyrics file name.
pub const LYRICS_FILE: &str = "mxm_dataset_train.txt";
/// Raw MSD track metadata database.
pub const METADATA_DB: &str = "mxm_metadata.db";
/// Raw Last.fm tags database.
pub const TAGS_DB: &str = "lastfm_tags.db";
/// Raw Last.fm similar-songs database.
pub const SIMILARS_DB: &str = "lastfm_similar_songs.db";

/// Unified dataset written by `build`.
pub const SONGS_FILE: &str = "songs_data.csv";
pub const VOCABULARY_FILE: &str = "top_words.txt";
pub const EVALUATION_FILE: &str = "eval_similar_songs.csv";
pub const GNN_TRAINING_FILE: &str = "training_songs_gnn.csv";
pub const GNN_VALIDATION_FILE: &str = "validation_songs_gnn.csv";
pub const GNN_MODEL_FILE: &str = "gnn_model.json";

/// Returns the platform-appropriate data directory for Lyrec, creating it
/// if needed.
///
/// # Errors
///
/// Fails when the system data directory cannot be determined or the `lyrec`
/// subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Pass --data-dir explicitly."
        )
    })?;

    let lyrec_dir = data_dir.join("lyrec");
    fs::create_dir_all(&lyrec_dir).with_context(|| {
        format!(
            "Failed to create Lyrec data directory at {}. Please check file permissions.",
            lyrec_dir.display()
        )
    })?;

    Ok(lyrec_dir)
}

/// Uses `explicit` when given, the platform data directory otherwise.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
            Ok(dir.to_path_buf())
        }
        None => get_data_dir(),
    }
}

/// Parameters of the dataset builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Drop songs absent from the metadata database.
    pub require_metadata: bool,
    /// Drop songs without any Last.fm tag.
    pub require_tags: bool,
    /// Tags weaker than this are ignored.
    pub min_tag_strength: f64,
    /// Keep at most this many songs (seeded, order preserving).
    pub subsample: Option<usize>,
    pub seed: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            require_metadata: true,
            require_tags: true,
            min_tag_strength: 0.0,
            subsample: None,
            seed: 42,
        }
    }
}

/// Parameters of the evaluation and GNN split data derived from Last.fm
/// similar songs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    /// Minimum raw similar-song count for an evaluation candidate.
    pub min_raw_similars: usize,
    /// Minimum similar songs present in the dataset.
    pub min_present_similars: usize,
    /// Minimum similar songs left once evaluation songs are removed.
    pub min_final_similars: usize,
    /// Fraction of GNN songs held out for validation.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_raw_similars: 250,
            min_present_similars: 125,
            min_final_similars: 106,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Term weighting applied before the SVD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TermWeighting {
    #[default]
    Raw,
    TfIdf,
}

/// Parameters of the LSA strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsaConfig {
    /// Number of latent components `k`.
    pub components: usize,
    pub weighting: TermWeighting,
    pub oversampling: usize,
    pub power_iterations: usize,
    pub seed: u64,
}

impl Default for LsaConfig {
    fn default() -> Self {
        Self {
            components: 100,
            weighting: TermWeighting::Raw,
            oversampling: 10,
            power_iterations: 4,
            seed: 42,
        }
    }
}

/// Where graph edges come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    /// Songs sharing at least `min_shared_tags` tags.
    Tags,
    /// Last.fm similar-song relations of the training split.
    #[default]
    Similars,
    /// Union of both, weights summed.
    Combined,
}

impl EdgeSource {
    pub fn uses_tags(self) -> bool {
        matches!(self, Self::Tags | Self::Combined)
    }

    pub fn uses_similars(self) -> bool {
        matches!(self, Self::Similars | Self::Combined)
    }
}

/// Parameters of the GNN strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnnConfig {
    /// Graph size cap; the node subset is a seeded sample.
    pub max_nodes: usize,
    pub edge_source: EdgeSource,
    pub min_shared_tags: usize,
    /// Share of nodes held out when no validation split file is used.
    pub validation_fraction: f64,
    /// LSA components used as node features.
    pub feature_dim: usize,
    pub embedding_dim: usize,
    /// Feature propagation steps.
    pub hops: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Validation every this many epochs.
    pub eval_every: usize,
    /// Stop after this many validations without improvement.
    pub patience: usize,
    /// Ranking depth of the validation metric.
    pub eval_top_n: usize,
    pub seed: u64,
}

impl Default for GnnConfig {
    fn default() -> Self {
        Self {
            max_nodes: 5000,
            edge_source: EdgeSource::Similars,
            min_shared_tags: 2,
            validation_fraction: 0.2,
            feature_dim: 64,
            embedding_dim: 32,
            hops: 2,
            epochs: 50,
            batch_size: 64,
            learning_rate: 0.05,
            eval_every: 5,
            patience: 3,
            eval_top_n: 100,
            seed: 42,
        }
    }
}

/// All tunable parameters of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub build: BuildConfig,
    pub evaluation: EvaluationConfig,
    pub lsa: LsaConfig,
    pub gnn: GnnConfig,
}

impl PipelineConfig {
    /// Loads a JSON config file, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        if self.lsa.components == 0 {
            bail!("lsa.components must be at least 1");
        }
        if !(0.0..1.0).contains(&self.evaluation.validation_fraction) {
            bail!("evaluation.validation_fraction must be in [0, 1)");
        }
        if !(0.0..1.0).contains(&self.gnn.validation_fraction) {
            bail!("gnn.validation_fraction must be in [0, 1)");
        }
        if self.gnn.feature_dim == 0 || self.gnn.embedding_dim == 0 {
            bail!("gnn.feature_dim and gnn.embedding_dim must be at least 1");
        }
        if self.gnn.batch_size == 0 || self.gnn.eval_every == 0 {
            bail!("gnn.batch_size and gnn.eval_every must be at least 1");
        }
        if self.gnn.max_nodes < 2 {
            bail!("gnn.max_nodes must be at least 2");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert_eq!(PipelineConfig::load(None).expect("defaults"), PipelineConfig::default());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "lsa": { "components": 7, "weighting": "tf_idf" }, "gnn": { "edge_source": "tags" } }"#,
        )
        .expect("write config");

        let config = PipelineConfig::load(Some(&path)).expect("valid config");
        assert_eq!(config.lsa.components, 7);
        assert_eq!(config.lsa.weighting, TermWeighting::TfIdf);
        assert_eq!(config.lsa.power_iterations, LsaConfig::default().power_iterations);
        assert_eq!(config.gnn.edge_source, EdgeSource::Tags);
        assert_eq!(config.build, BuildConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.lsa.components = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.gnn.validation_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_explicit_data_dir_creates_it() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("nested").join("data");
        let resolved = resolve_data_dir(Some(&target)).expect("created");
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }

    #[test]
    fn test_malformed_json_names_the_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write config");
        let message = format!("{:#}", PipelineConfig::load(Some(&path)).expect_err("broken"));
        assert!(message.contains("broken.json"));
    }
}
