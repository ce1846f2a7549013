//! # Lyrec
//!
//! Builds a lyrics dataset from the Million Song Dataset, musiXmatch and
//! Last.fm, and recommends songs by lyrics similarity (LSA) or through a
//! graph model trained on Last.fm relations (GNN).
//!
//! ## Usage
//!
//! ```bash
//! lyrec build --raw-dir downloads
//! lyrec recommend TRAAAAV128F421A322
//! lyrec train-gnn && lyrec recommend TRAAAAV128F421A322 --strategy gnn
//! lyrec evaluate -n 100
//! ```
//!
//! ## Logging
//!
//! Controlled through `RUST_LOG` (default `info`):
//! - `RUST_LOG=debug lyrec build` - Join statistics and staged files
//! - `RUST_LOG=lyrec::gnn=debug lyrec train-gnn` - Per-epoch losses

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{info, warn};
use lyrec::cli::{self, Command, Strategy};
use lyrec::config::{self, PipelineConfig, GNN_TRAINING_FILE, GNN_VALIDATION_FILE};
use lyrec::dataset::{self, RawSources};
use lyrec::evaluation::{self, SplitEntry};
use lyrec::gnn::GnnModel;
use lyrec::lsa::LsaModel;
use lyrec::recommend::{Recommendation, SimilarityStrategy};
use lyrec::song::SongTable;
use lyrec::{completion, storage};
use std::io;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Args::parse();
    let mut pipeline = PipelineConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Build {
            raw_dir,
            subsample,
            seed,
            no_evaluation,
        } => {
            if subsample.is_some() {
                pipeline.build.subsample = subsample;
            }
            if let Some(seed) = seed {
                pipeline.build.seed = seed;
                pipeline.evaluation.seed = seed;
            }
            if no_evaluation {
                pipeline.evaluation.enabled = false;
            }
            run_build(&raw_dir, &data_dir(args.data_dir)?, &pipeline)?;
        }
        Command::Recommend {
            track_id,
            strategy,
            count,
            components,
        } => {
            if let Some(components) = components {
                pipeline.lsa.components = components;
            }
            run_recommend(&data_dir(args.data_dir)?, &track_id, strategy, count, &pipeline)?;
        }
        Command::TrainGnn {
            edge_source,
            max_nodes,
            epochs,
        } => {
            if let Some(source) = edge_source {
                pipeline.gnn.edge_source = source.into();
            }
            if let Some(max_nodes) = max_nodes {
                pipeline.gnn.max_nodes = max_nodes;
            }
            if let Some(epochs) = epochs {
                pipeline.gnn.epochs = epochs;
            }
            pipeline.validate()?;
            run_train_gnn(&data_dir(args.data_dir)?, &pipeline)?;
        }
        Command::Evaluate {
            top_n,
            components,
            json,
        } => {
            if let Some(components) = components {
                pipeline.lsa.components = components;
            }
            pipeline.validate()?;
            run_evaluate(&data_dir(args.data_dir)?, top_n, json, &pipeline)?;
        }
        Command::Show { track_id } => {
            run_show(&data_dir(args.data_dir)?, &track_id)?;
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(
                completion::shell_to_completion_shell(shell),
                &mut cmd,
                &mut io::stdout(),
            );
        }
        Command::CompleteTracks => {
            completion::write_track_completions(&data_dir(args.data_dir)?, &mut io::stdout())?;
        }
    }

    Ok(())
}

fn data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    config::resolve_data_dir(explicit.as_deref())
}

fn run_build(raw_dir: &Path, data_dir: &Path, pipeline: &PipelineConfig) -> Result<()> {
    info!("Building the dataset from {}", raw_dir.display());
    let sources = RawSources::in_dir(raw_dir);
    let built = dataset::build_dataset(&sources, &pipeline.build, &pipeline.evaluation)?;

    println!("- Saving data ...");
    let written = built.write(data_dir)?;
    println!(
        "Dataset: {} songs, {} words in the vocabulary",
        built.songs.len(),
        built.vocabulary.len()
    );
    if let Some(evaluation) = &built.evaluation {
        println!(
            "Evaluation: {} songs; GNN split: {} training, {} validation",
            evaluation.entries.len(),
            evaluation.training.len(),
            evaluation.validation.len()
        );
    }
    println!("Wrote {} files to {}", written.len(), data_dir.display());
    Ok(())
}

fn print_recommendations(songs: &SongTable, recommendations: &[Recommendation]) {
    for (rank, rec) in recommendations.iter().enumerate() {
        match songs.get(&rec.track_id) {
            Some(song) => println!("{:>3}. {:.4}  {song}", rank + 1, rec.score),
            None => println!("{:>3}. {:.4}  [{}]", rank + 1, rec.score, rec.track_id),
        }
    }
}

fn run_recommend(
    data_dir: &Path,
    track_id: &str,
    strategy: Strategy,
    count: usize,
    pipeline: &PipelineConfig,
) -> Result<()> {
    let (vocabulary, songs) = storage::load_songs(data_dir)?;
    let query = songs
        .get(track_id)
        .with_context(|| format!("Track `{track_id}` is not in the dataset"))?;

    let recommendations = match strategy {
        Strategy::Lsa => {
            LsaModel::fit(songs.songs(), vocabulary.len(), &pipeline.lsa)?.recommend(track_id, count)?
        }
        Strategy::Gnn => GnnModel::load(data_dir)?.recommend_song(query, count)?,
    };

    println!("Songs similar to {query} ({strategy:?}):");
    print_recommendations(&songs, &recommendations);
    if recommendations.len() < count {
        warn!("Only {} candidates available", recommendations.len());
    }
    Ok(())
}

fn load_split_or_empty(path: &Path) -> Result<Vec<SplitEntry>> {
    if path.is_file() {
        storage::load_split(path)
    } else {
        warn!("{} not found; build with evaluation data to use it", path.display());
        Ok(Vec::new())
    }
}

fn run_train_gnn(data_dir: &Path, pipeline: &PipelineConfig) -> Result<()> {
    let (vocabulary, songs) = storage::load_songs(data_dir)?;
    let (training, validation) = if pipeline.gnn.edge_source.uses_similars() {
        (
            load_split_or_empty(&data_dir.join(GNN_TRAINING_FILE))?,
            load_split_or_empty(&data_dir.join(GNN_VALIDATION_FILE))?,
        )
    } else {
        (Vec::new(), Vec::new())
    };

    let model = GnnModel::train(
        &songs,
        vocabulary.len(),
        &training,
        &validation,
        &pipeline.lsa,
        &pipeline.gnn,
    )?;
    let path = model.save(data_dir)?;

    let report = model.report();
    println!(
        "Graph: {} nodes, {} edges ({} used for training)",
        report.nodes, report.edges, report.training_edges
    );
    println!(
        "Trained {} epochs{}; kept epoch {}",
        report.epochs_run,
        if report.stopped_early { " (early stop)" } else { "" },
        report.best_epoch
    );
    if let (Some(map), Some(recall)) = (report.best_map, report.best_recall) {
        println!(
            "Validation over {} songs: mAP@{} {map:.4}, recall {recall:.4}",
            report.validation_queries, pipeline.gnn.eval_top_n
        );
    }
    println!("Saved {}", path.display());
    Ok(())
}

fn run_evaluate(data_dir: &Path, top_n: usize, json: bool, pipeline: &PipelineConfig) -> Result<()> {
    let (vocabulary, songs) = storage::load_songs(data_dir)?;
    let entries = storage::load_evaluation(data_dir, &vocabulary)?;
    info!("Evaluating LSA with {} queries", entries.len());

    let model = LsaModel::fit(songs.songs(), vocabulary.len(), &pipeline.lsa)?;
    let report = evaluation::evaluate_lsa(&model, &entries, top_n)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Strategy: {}", report.strategy);
        println!("Queries: {}", report.queries);
        println!("mAP@{}: {:.4}", report.top_n, report.mean_average_precision);
        println!("Recall@{}: {:.4}", report.top_n, report.mean_recall);
    }
    Ok(())
}

fn run_show(data_dir: &Path, track_id: &str) -> Result<()> {
    let (vocabulary, songs) = storage::load_songs(data_dir)?;
    let song = songs
        .get(track_id)
        .with_context(|| format!("Track `{track_id}` is not in the dataset"))?;

    println!("{song}");
    if let Some(year) = song.metadata.year {
        println!("Year: {year}");
    }
    println!("Tags: {}", song.tags.join(", "));
    println!(
        "Words: {} distinct, {} total",
        song.lyrics.len(),
        song.lyrics.total_count()
    );
    println!("{}", vocabulary.render(&song.lyrics));
    Ok(())
}
