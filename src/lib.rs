//! Lyrics-based song recommendations over the Million Song Dataset.
//!
//! Core modules:
//! - [`dataset`] - Dataset builder joining lyrics, metadata and tags
//! - [`lsa`] - Latent Semantic Analysis strategy
//! - [`gnn`] - Graph neural network strategy over [`graph`]
//! - [`recommend`] - Shared ranking seam ([`recommend::SimilarityStrategy`])
//! - [`evaluation`] - Last.fm ground truth and mAP/recall evaluation
//!
//! ### Supporting Modules
//!
//! - [`mxm`] - musiXmatch bag-of-words parser
//! - [`db`] - Read-only access to the MSD and Last.fm SQLite databases
//! - [`storage`] - CSV/JSON outputs of the unified dataset
//! - [`song`] - Songs, term vectors and the vocabulary
//! - [`linalg`] - Sparse matrices and the truncated SVD
//! - [`metrics`] - Ranking metrics
//! - [`config`] - Pipeline parameters and data directory management
//! - [`cli`] / [`completion`] - Command-line interface
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use lyrec::config::PipelineConfig;
//! use lyrec::dataset::{build_dataset, RawSources};
//! use lyrec::lsa::LsaModel;
//! use lyrec::recommend::SimilarityStrategy;
//! use std::path::Path;
//!
//! let config = PipelineConfig::default();
//! let sources = RawSources::in_dir(Path::new("downloads"));
//! let dataset = build_dataset(&sources, &config.build, &config.evaluation)?;
//! dataset.write(Path::new("data"))?;
//!
//! let model = LsaModel::fit(dataset.songs.songs(), dataset.vocabulary.len(), &config.lsa)?;
//! for rec in model.recommend("TRAAAAV128F421A322", 10)? {
//!     println!("{:.3} {}", rec.score, rec.track_id);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All fallible functions return `anyhow::Result` with context naming the
//! file, line or track involved. A failed build writes nothing.

pub mod cli;
pub mod completion;
pub mod config;
pub mod dataset;
pub mod db;
pub mod evaluation;
pub mod gnn;
pub mod graph;
pub mod linalg;
pub mod lsa;
pub mod metrics;
pub mod mxm;
pub mod recommend;
pub mod song;
pub mod storage;
