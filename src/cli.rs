//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `lyrec` binary.
//!
//! ## Commands
//!
//! - `build`: Join the raw downloads into the unified dataset
//! - `recommend`: Top-N similar songs for a track (LSA or GNN)
//! - `train-gnn`: Train the graph model and save it next to the dataset
//! - `evaluate`: LSA mAP and recall against Last.fm similar songs
//! - `show`: Print one song of the dataset
//! - `completion`: Shell completion scripts
//!
//! ## Examples
//!
//! ```bash
//! lyrec build --raw-dir downloads --subsample 20000
//! lyrec recommend TRAAAAV128F421A322 -n 5
//! lyrec --config experiment.json train-gnn --edge-source tags
//! ```

use crate::config::EdgeSource;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Which embedding answers a query.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum Strategy {
    /// Truncated SVD of the lyrics term matrix
    #[default]
    Lsa,
    /// Trained graph model (run `train-gnn` first)
    Gnn,
}

/// Graph edge source, as accepted on the command line.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum EdgeSourceArg {
    Tags,
    Similars,
    Combined,
}

impl From<EdgeSourceArg> for EdgeSource {
    fn from(arg: EdgeSourceArg) -> Self {
        match arg {
            EdgeSourceArg::Tags => EdgeSource::Tags,
            EdgeSourceArg::Similars => EdgeSource::Similars,
            EdgeSourceArg::Combined => EdgeSource::Combined,
        }
    }
}

/// Main application arguments structure.
///
/// Pipeline parameters come from the defaults, then the `--config` file,
/// then the per-command flags.
#[derive(Parser, Debug)]
#[command(name = "lyrec")]
#[command(about = "Lyrec: lyrics-based song recommendations from the Million Song Dataset")]
#[command(version)]
pub struct Args {
    /// JSON file overriding pipeline parameters
    #[arg(long, global = true, env = "LYREC_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory of the unified dataset (default: platform data directory)
    #[arg(long, global = true, env = "LYREC_DATA_DIR", value_hint = clap::ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the unified dataset from the raw downloads
    ///
    /// Expects `mxm_dataset_train.txt`, `mxm_metadata.db` and
    /// `lastfm_tags.db` in the raw directory, plus `lastfm_similar_songs.db`
    /// unless evaluation data is disabled. Nothing is written if any input is
    /// missing or malformed.
    Build {
        /// Directory holding the raw files
        #[arg(long, default_value = "downloads", value_hint = clap::ValueHint::DirPath)]
        raw_dir: PathBuf,

        /// Keep at most this many songs
        #[arg(long)]
        subsample: Option<usize>,

        /// Seed for subsampling and the GNN split
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the evaluation set and GNN split files
        #[arg(long)]
        no_evaluation: bool,
    },

    /// Recommend the songs most similar to a track
    Recommend {
        /// MSD track id of the query song
        #[arg(value_hint = clap::ValueHint::Other)]
        track_id: String,

        #[arg(short, long, value_enum, default_value_t = Strategy::Lsa)]
        strategy: Strategy,

        /// Number of recommendations
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// LSA latent components
        #[arg(long)]
        components: Option<usize>,
    },

    /// Train the GNN strategy and save `gnn_model.json`
    ///
    /// Uses the GNN split files written by `build` when edges come from
    /// similar songs.
    TrainGnn {
        #[arg(long, value_enum)]
        edge_source: Option<EdgeSourceArg>,

        /// Graph size cap
        #[arg(long)]
        max_nodes: Option<usize>,

        #[arg(long)]
        epochs: Option<usize>,
    },

    /// Evaluate LSA against the Last.fm similar-song lists
    Evaluate {
        /// Ranking depth of mAP and recall
        #[arg(short = 'n', long, default_value_t = 100)]
        top_n: usize,

        /// LSA latent components
        #[arg(long)]
        components: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a song of the unified dataset with its lyrics words
    Show {
        #[arg(value_hint = clap::ValueHint::Other)]
        track_id: String,
    },

    /// Generate shell completions
    ///
    /// Usage: lyrec completion bash > ~/.local/share/bash-completion/completions/lyrec
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List dataset track ids for completion scripts (hidden command)
    #[command(hide = true)]
    CompleteTracks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "lyrec", "recommend", "TRA", "-n", "3", "--data-dir", "/tmp/data", "-s", "gnn",
        ])
        .expect("valid arguments");
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/data")));
        match args.command {
            Command::Recommend {
                track_id,
                strategy,
                count,
                components,
            } => {
                assert_eq!(track_id, "TRA");
                assert_eq!(strategy, Strategy::Gnn);
                assert_eq!(count, 3);
                assert_eq!(components, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_build_defaults() {
        let args = Args::try_parse_from(["lyrec", "build"]).expect("valid arguments");
        match args.command {
            Command::Build {
                raw_dir,
                subsample,
                no_evaluation,
                ..
            } => {
                assert_eq!(raw_dir, PathBuf::from("downloads"));
                assert_eq!(subsample, None);
                assert!(!no_evaluation);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_edge_source_argument() {
        let args = Args::try_parse_from(["lyrec", "train-gnn", "--edge-source", "combined"])
            .expect("valid arguments");
        match args.command {
            Command::TrainGnn { edge_source, .. } => {
                assert_eq!(edge_source.map(EdgeSource::from), Some(EdgeSource::Combined));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
