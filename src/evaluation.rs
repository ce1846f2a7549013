//! Ground truth from Last.fm similar songs, and strategy evaluation.
//!
//! Last.fm lists, for many MSD tracks, a ranked list of similar tracks with a
//! similarity score. Those lists serve two purposes:
//!
//! - **Evaluation set**: songs with long lists are pulled out of the dataset
//!   and used as queries; their lists, restricted to songs still in the
//!   dataset, are the relevant results in relevance order.
//! - **GNN splits**: the remaining songs with lists are split into training
//!   and validation; every list is restricted to training songs.

use crate::config::EvaluationConfig;
use crate::dataset::sample_indices;
use crate::lsa::LsaModel;
use crate::metrics::{average_precision_at_k, mean, recall_at_k};
use crate::recommend::SimilarityStrategy;
use crate::song::{Song, SongTable};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A held-out query song and its relevant songs, most similar first.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationEntry {
    pub song: Song,
    pub similars: Vec<String>,
}

/// A GNN training or validation row.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitEntry {
    pub track_id: String,
    pub similars: Vec<String>,
    pub scores: Vec<f64>,
}

/// Everything derived from the similar-songs database.
#[derive(Debug, Clone, Default)]
pub struct EvaluationData {
    pub entries: Vec<EvaluationEntry>,
    pub training: Vec<SplitEntry>,
    pub validation: Vec<SplitEntry>,
}

/// Parses `id1,score1,id2,score2,...` into pairs.
pub fn parse_similars(target: &str) -> Result<Vec<(String, f64)>> {
    let fields: Vec<&str> = target
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() % 2 != 0 {
        bail!("Similar-songs list has an odd number of fields");
    }

    fields
        .chunks(2)
        .map(|pair| -> Result<(String, f64)> {
            let score = pair[1]
                .parse::<f64>()
                .with_context(|| format!("Invalid similarity score `{}`", pair[1]))?;
            Ok((pair[0].to_string(), score))
        })
        .collect()
}

/// Keeps the ids accepted by `keep`, preserving relevance order.
fn retain_ordered(ids: &[String], keep: impl Fn(&str) -> bool) -> Vec<String> {
    ids.iter().filter(|id| keep(id.as_str())).cloned().collect()
}

/// Builds the evaluation set and GNN splits, and returns the dataset without
/// the evaluation songs.
pub fn build_evaluation_data(
    songs: SongTable,
    raw_similars: &HashMap<String, String>,
    config: &EvaluationConfig,
) -> Result<(EvaluationData, SongTable)> {
    // Songs with a similar-songs list, in dataset order.
    let mut with_similars: Vec<(usize, Vec<(String, f64)>)> = Vec::new();
    for (position, song) in songs.songs().iter().enumerate() {
        if let Some(target) = raw_similars.get(&song.track_id) {
            let pairs = parse_similars(target)
                .with_context(|| format!("Malformed similar songs for `{}`", song.track_id))?;
            with_similars.push((position, pairs));
        }
    }
    info!("{} of {} songs have similar-song lists", with_similars.len(), songs.len());

    // Evaluation candidates: long raw lists, then long lists within the dataset.
    let candidates: Vec<(usize, Vec<String>)> = with_similars
        .iter()
        .filter(|(_, pairs)| pairs.len() >= config.min_raw_similars)
        .map(|(position, pairs)| {
            let ids: Vec<String> = pairs.iter().map(|(id, _)| id.clone()).collect();
            (*position, retain_ordered(&ids, |id| songs.contains(id)))
        })
        .filter(|(_, ids)| ids.len() >= config.min_present_similars)
        .collect();

    // Lists drop every candidate, including those rejected below.
    let candidate_ids: HashSet<String> = candidates
        .iter()
        .map(|(position, _)| songs.songs()[*position].track_id.clone())
        .collect();

    let entries: Vec<EvaluationEntry> = candidates
        .into_iter()
        .map(|(position, ids)| EvaluationEntry {
            song: songs.songs()[position].clone(),
            similars: retain_ordered(&ids, |id| !candidate_ids.contains(id)),
        })
        .filter(|entry| entry.similars.len() >= config.min_final_similars)
        .collect();
    debug!(
        "{} evaluation candidates, {} kept as queries",
        candidate_ids.len(),
        entries.len()
    );

    // Only the kept queries leave the dataset and the GNN pool.
    let evaluation_ids: HashSet<String> = entries
        .iter()
        .map(|entry| entry.song.track_id.clone())
        .collect();

    let (training, validation) =
        split_for_gnn(&songs, &with_similars, &evaluation_ids, config);

    let remaining = songs.retain(|song| !evaluation_ids.contains(&song.track_id));
    if remaining.is_empty() {
        warn!("No songs left in the dataset after removing evaluation songs");
    }
    info!(
        "Evaluation: {} queries; GNN: {} training, {} validation songs",
        entries.len(),
        training.len(),
        validation.len()
    );

    Ok((
        EvaluationData {
            entries,
            training,
            validation,
        },
        remaining,
    ))
}

fn split_for_gnn(
    songs: &SongTable,
    with_similars: &[(usize, Vec<(String, f64)>)],
    evaluation_ids: &HashSet<String>,
    config: &EvaluationConfig,
) -> (Vec<SplitEntry>, Vec<SplitEntry>) {
    let pool: Vec<SplitEntry> = with_similars
        .iter()
        .filter(|(position, _)| !evaluation_ids.contains(&songs.songs()[*position].track_id))
        .map(|(position, pairs)| SplitEntry {
            track_id: songs.songs()[*position].track_id.clone(),
            similars: pairs.iter().map(|(id, _)| id.clone()).collect(),
            scores: pairs.iter().map(|(_, score)| *score).collect(),
        })
        .collect();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let validation_size = (pool.len() as f64 * config.validation_fraction).round() as usize;
    let validation_positions: HashSet<usize> = sample_indices(pool.len(), validation_size, config.seed)
        .into_iter()
        .collect();

    let (validation, training): (Vec<_>, Vec<_>) = pool
        .into_iter()
        .enumerate()
        .partition(|(position, _)| validation_positions.contains(position));

    let training_ids: HashSet<String> = training
        .iter()
        .map(|(_, entry)| entry.track_id.clone())
        .collect();
    let restrict = |entries: Vec<(usize, SplitEntry)>| -> Vec<SplitEntry> {
        entries
            .into_iter()
            .map(|(_, entry)| restrict_split(entry, &training_ids))
            .filter(|entry| !entry.similars.is_empty())
            .collect()
    };

    (restrict(training), restrict(validation))
}

/// Drops similar ids (and their scores) outside `allowed`.
fn restrict_split(entry: SplitEntry, allowed: &HashSet<String>) -> SplitEntry {
    let (similars, scores): (Vec<String>, Vec<f64>) = entry
        .similars
        .into_iter()
        .zip(entry.scores)
        .filter(|(id, _)| allowed.contains(id))
        .unzip();
    SplitEntry {
        track_id: entry.track_id,
        similars,
        scores,
    }
}

/// Ranking quality of a strategy over a set of queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub strategy: String,
    pub queries: usize,
    pub top_n: usize,
    pub mean_average_precision: f64,
    pub mean_recall: f64,
}

/// Scores one ranked list against its relevant ids.
pub fn score_ranking(ranked: &[&str], relevant: &[String], top_n: usize) -> (f64, f64) {
    let relevant: HashSet<&str> = relevant.iter().map(String::as_str).collect();
    (
        average_precision_at_k(ranked, &relevant, top_n),
        recall_at_k(ranked, &relevant, top_n),
    )
}

/// Evaluates LSA: every evaluation song is projected into the latent space
/// fitted on the dataset and ranked against the whole dataset.
pub fn evaluate_lsa(
    model: &LsaModel,
    entries: &[EvaluationEntry],
    top_n: usize,
) -> Result<EvaluationReport> {
    let scored = entries
        .par_iter()
        .map(|entry| -> Result<(f64, f64)> {
            let query = model.project(&entry.song.lyrics);
            let ranked = model.recommend_vector(query.view(), top_n, None)?;
            let ranked: Vec<&str> = ranked.iter().map(|r| r.track_id.as_str()).collect();
            Ok(score_ranking(&ranked, &entry.similars, top_n))
        })
        .collect::<Result<Vec<_>>>()?;

    let (precisions, recalls): (Vec<f64>, Vec<f64>) = scored.into_iter().unzip();
    Ok(EvaluationReport {
        strategy: model.name().to_string(),
        queries: entries.len(),
        top_n,
        mean_average_precision: mean(&precisions),
        mean_recall: mean(&recalls),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{Metadata, TermVector};

    fn song(id: &str) -> Song {
        Song {
            track_id: id.to_string(),
            lyrics: TermVector::from_counts(vec![(0, 1)]),
            tags: vec!["rock".into()],
            metadata: Metadata::default(),
        }
    }

    fn target(ids: &[&str]) -> String {
        ids.iter()
            .enumerate()
            .map(|(i, id)| format!("{id},{}", 1.0 / (i + 1) as f64))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn small_config() -> EvaluationConfig {
        EvaluationConfig {
            enabled: true,
            min_raw_similars: 3,
            min_present_similars: 2,
            min_final_similars: 2,
            validation_fraction: 0.0,
            seed: 1,
        }
    }

    #[test]
    fn test_parse_similars() -> Result<()> {
        let pairs = parse_similars("TRA,0.5,TRB,1")?;
        assert_eq!(pairs, vec![("TRA".to_string(), 0.5), ("TRB".to_string(), 1.0)]);
        assert!(parse_similars("TRA,0.5,TRB").is_err());
        assert!(parse_similars("TRA,high").is_err());
        assert!(parse_similars("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_evaluation_lists_keep_order_and_exclude_queries() -> Result<()> {
        let table = SongTable::new(["Q1", "Q2", "A", "B", "C", "D"].map(song).to_vec());
        let mut raw = HashMap::new();
        // Q1 lists Q2, an evaluation song, which must disappear from its list.
        raw.insert("Q1".to_string(), target(&["C", "X", "Q2", "A", "B"]));
        raw.insert("Q2".to_string(), target(&["D", "B", "Y", "A"]));
        // Too short to be a query.
        raw.insert("A".to_string(), target(&["B", "C"]));

        let (data, remaining) = build_evaluation_data(table, &raw, &small_config())?;

        let queries: Vec<&str> = data.entries.iter().map(|e| e.song.track_id.as_str()).collect();
        assert_eq!(queries, vec!["Q1", "Q2"]);
        assert_eq!(data.entries[0].similars, vec!["C", "A", "B"]);
        assert_eq!(data.entries[1].similars, vec!["D", "B", "A"]);

        assert_eq!(remaining.track_ids(), vec!["A", "B", "C", "D"]);

        // A is the only GNN song; its list keeps training songs only (none).
        assert!(data.training.is_empty());
        Ok(())
    }

    #[test]
    fn test_gnn_split_restricts_to_training_ids() -> Result<()> {
        let table = SongTable::new(["A", "B", "C", "D", "E"].map(song).to_vec());
        let mut raw = HashMap::new();
        for (id, list) in [
            ("A", vec!["B", "C", "Z"]),
            ("B", vec!["A", "E"]),
            ("C", vec!["D", "A"]),
            ("D", vec!["C"]),
            ("E", vec!["A", "B", "C", "D"]),
        ] {
            raw.insert(id.to_string(), target(&list));
        }
        let config = EvaluationConfig {
            min_raw_similars: 100,
            validation_fraction: 0.4,
            ..small_config()
        };

        let (data, remaining) = build_evaluation_data(table, &raw, &config)?;
        assert!(data.entries.is_empty());
        assert_eq!(remaining.len(), 5);

        let training_ids: HashSet<&str> =
            data.training.iter().map(|e| e.track_id.as_str()).collect();
        for entry in data.training.iter().chain(&data.validation) {
            assert_eq!(entry.similars.len(), entry.scores.len());
            assert!(!entry.similars.is_empty());
            assert!(entry.similars.iter().all(|id| training_ids.contains(id.as_str())));
        }
        assert!(data.validation.len() <= 2);
        Ok(())
    }

    #[test]
    fn test_rejected_candidate_stays_in_dataset() -> Result<()> {
        let table = SongTable::new(["Q1", "Q2", "A", "B"].map(song).to_vec());
        let mut raw = HashMap::new();
        raw.insert("Q1".to_string(), target(&["A", "B", "Q2"]));
        // Q2 passes the raw and present thresholds, but only A survives once
        // Q1 is removed from its list.
        raw.insert("Q2".to_string(), target(&["Q1", "A", "X"]));
        raw.insert("A".to_string(), target(&["Q2", "B"]));

        let (data, remaining) = build_evaluation_data(table, &raw, &small_config())?;

        let queries: Vec<&str> = data.entries.iter().map(|e| e.song.track_id.as_str()).collect();
        assert_eq!(queries, vec!["Q1"]);
        assert_eq!(data.entries[0].similars, vec!["A", "B"]);
        assert_eq!(remaining.track_ids(), vec!["Q2", "A", "B"]);

        // Q2 stays in the GNN pool and can still be named by A.
        let training: Vec<&str> = data.training.iter().map(|e| e.track_id.as_str()).collect();
        assert_eq!(training, vec!["Q2", "A"]);
        assert_eq!(data.training[0].similars, vec!["A"]);
        assert_eq!(data.training[1].similars, vec!["Q2"]);
        assert_eq!(data.training[1].scores, vec![1.0]);
        Ok(())
    }

    #[test]
    fn test_score_ranking() {
        let relevant = vec!["A".to_string(), "B".to_string()];
        let (ap, recall) = score_ranking(&["A", "B", "C"], &relevant, 2);
        assert!((ap - 1.0).abs() < 1e-12);
        assert!((recall - 1.0).abs() < 1e-12);
    }
}
