//! # Dataset Builder
//!
//! Joins the musiXmatch lyrics, the MSD track metadata and the Last.fm tags
//! on the MSD track id, and writes the unified dataset.
//!
//! ## Pipeline
//!
//! 1. Check that every raw file exists (all missing files are reported at once)
//! 2. Parse the lyrics file; lyrics are mandatory, songs without words are dropped
//! 3. Attach metadata and tags (inner joins by default)
//! 4. Optionally subsample, seeded and order preserving
//! 5. Optionally derive the evaluation set and GNN splits from Last.fm similar songs
//! 6. Write every output file, or none
//!
//! Any missing or malformed input aborts the build.

use crate::config::{
    BuildConfig, EvaluationConfig, LYRICS_FILE, METADATA_DB, SIMILARS_DB, TAGS_DB,
};
use crate::db;
use crate::evaluation::{build_evaluation_data, EvaluationData};
use crate::mxm::{self, LyricsCorpus};
use crate::song::{Metadata, Song, SongTable, Vocabulary};
use crate::storage::{self, PendingWrites};
use anyhow::{bail, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Locations of the raw input files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSources {
    pub lyrics: PathBuf,
    pub metadata: PathBuf,
    pub tags: PathBuf,
    pub similars: PathBuf,
}

impl RawSources {
    /// Standard file names inside one directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            lyrics: dir.join(LYRICS_FILE),
            metadata: dir.join(METADATA_DB),
            tags: dir.join(TAGS_DB),
            similars: dir.join(SIMILARS_DB),
        }
    }

    /// Fails listing every required file that does not exist.
    pub fn check(&self, with_similars: bool) -> Result<()> {
        let mut required = vec![&self.lyrics, &self.metadata, &self.tags];
        if with_similars {
            required.push(&self.similars);
        }

        let missing: Vec<String> = required
            .into_iter()
            .filter(|path| !path.is_file())
            .map(|path| path.display().to_string())
            .collect();
        if !missing.is_empty() {
            bail!("Missing raw data files:\n  {}", missing.join("\n  "));
        }
        Ok(())
    }
}

/// The unified dataset plus the optional evaluation data.
#[derive(Debug, Clone)]
pub struct BuiltDataset {
    pub vocabulary: Vocabulary,
    pub songs: SongTable,
    pub evaluation: Option<EvaluationData>,
}

impl BuiltDataset {
    /// Writes every output file into `dir`. Nothing is written on failure.
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut pending = PendingWrites::new(dir)?;
        storage::stage_songs(&mut pending, &self.songs, &self.vocabulary)?;
        if let Some(evaluation) = &self.evaluation {
            storage::stage_evaluation(&mut pending, &evaluation.entries, &self.vocabulary)?;
            storage::stage_splits(&mut pending, &evaluation.training, &evaluation.validation)?;
        }
        pending.commit()
    }
}

/// Join statistics, logged after the build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub rows: usize,
    pub without_lyrics: usize,
    pub without_metadata: usize,
    pub without_tags: usize,
    pub duplicates: usize,
}

/// Joins lyrics rows with metadata and tags, in lyrics file order.
pub fn join_sources(
    corpus: LyricsCorpus,
    metadata: &HashMap<String, Metadata>,
    tags: &HashMap<String, Vec<String>>,
    config: &BuildConfig,
) -> (SongTable, JoinStats) {
    let mut stats = JoinStats {
        rows: corpus.rows.len(),
        ..JoinStats::default()
    };
    let mut songs = Vec::with_capacity(corpus.rows.len());

    for row in corpus.rows {
        if row.terms.is_empty() {
            stats.without_lyrics += 1;
            continue;
        }

        let song_metadata = match metadata.get(&row.track_id) {
            Some(meta) => meta.clone(),
            None if config.require_metadata => {
                stats.without_metadata += 1;
                continue;
            }
            None => Metadata::default(),
        };

        let song_tags = tags.get(&row.track_id).cloned().unwrap_or_default();
        if song_tags.is_empty() && config.require_tags {
            stats.without_tags += 1;
            continue;
        }

        songs.push(Song {
            track_id: row.track_id,
            lyrics: row.terms,
            tags: song_tags,
            metadata: song_metadata,
        });
    }

    let candidates = songs.len();
    let table = SongTable::new(songs);
    stats.duplicates = candidates - table.len();
    (table, stats)
}

/// `count` distinct indices out of `0..len`, ascending, deterministic per seed.
pub fn sample_indices(len: usize, count: usize, seed: u64) -> Vec<usize> {
    if count >= len {
        return (0..len).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = rand::seq::index::sample(&mut rng, len, count).into_vec();
    indices.sort_unstable();
    indices
}

/// Keeps at most `size` songs, in dataset order.
pub fn subsample(songs: SongTable, size: usize, seed: u64) -> SongTable {
    if songs.len() <= size {
        return songs;
    }
    let keep = sample_indices(songs.len(), size, seed);
    let mut all: Vec<Option<Song>> = songs.into_songs().into_iter().map(Some).collect();
    SongTable::new(keep.into_iter().filter_map(|i| all[i].take()).collect())
}

/// Runs the whole builder over the raw files.
///
/// Steps, in order:
///
/// 1. Check that every raw file is present (all missing files are reported
///    in one error)
/// 2. Parse the musiXmatch lyrics and vocabulary
/// 3. Join metadata and tags by track id, dropping songs without lyrics
/// 4. Subsample when `build.subsample` is set
/// 5. When `evaluation.enabled`, build the evaluation set and GNN splits and
///    remove the evaluation songs from the dataset
///
/// Nothing is written here; call [`BuiltDataset::write`] on the result.
///
/// # Errors
///
/// This function will return an error if:
/// - A raw file is missing (the similar-songs database only when
///   evaluation data is enabled)
/// - A lyrics line or similar-songs entry is malformed
/// - A SQLite database cannot be opened or queried
/// - No song is left after the join
///
/// # Examples
///
/// ```no_run
/// use lyrec::config::PipelineConfig;
/// use lyrec::dataset::{build_dataset, RawSources};
/// use std::path::Path;
///
/// let config = PipelineConfig::default();
/// let sources = RawSources::in_dir(Path::new("downloads"));
/// let built = build_dataset(&sources, &config.build, &config.evaluation)?;
/// built.write(Path::new("data"))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Determinism
///
/// Output order follows the lyrics file. Subsampling and the GNN split are
/// seeded, so the same inputs and configuration give byte-identical files.
pub fn build_dataset(
    sources: &RawSources,
    build: &BuildConfig,
    evaluation: &EvaluationConfig,
) -> Result<BuiltDataset> {
    sources.check(evaluation.enabled)?;

    println!("- Retrieving the lyrics and the top words ...");
    let corpus = mxm::read_lyrics_file(&sources.lyrics)?;
    let vocabulary = corpus.vocabulary.clone();

    println!("- Merging metadata and tags ...");
    let metadata = db::load_metadata(&sources.metadata)?;
    let tags = db::load_tags(&sources.tags, build.min_tag_strength)?;
    let (mut songs, stats) = join_sources(corpus, &metadata, &tags, build);
    info!(
        "Joined {} of {} lyric rows ({} without lyrics, {} without metadata, {} without tags, {} duplicates)",
        songs.len(),
        stats.rows,
        stats.without_lyrics,
        stats.without_metadata,
        stats.without_tags,
        stats.duplicates
    );

    if let Some(size) = build.subsample {
        songs = subsample(songs, size, build.seed);
        info!("Subsampled to {} songs", songs.len());
    }

    let evaluation_data = if evaluation.enabled {
        println!("- Building the evaluation dataset ...");
        let similars = db::load_similars(&sources.similars)?;
        let (data, remaining) = build_evaluation_data(songs, &similars, evaluation)?;
        songs = remaining;
        Some(data)
    } else {
        debug!("Evaluation data disabled");
        None
    };

    if songs.is_empty() {
        bail!("No song survived the join; check that the raw files belong together");
    }

    Ok(BuiltDataset {
        vocabulary,
        songs,
        evaluation: evaluation_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mxm::LyricsRow;
    use crate::song::TermVector;

    fn corpus(rows: &[(&str, Vec<(u32, u32)>)]) -> LyricsCorpus {
        LyricsCorpus {
            vocabulary: Vocabulary::new(vec!["a".into(), "b".into(), "c".into()]),
            rows: rows
                .iter()
                .map(|(id, counts)| LyricsRow {
                    track_id: id.to_string(),
                    mxm_id: "0".into(),
                    terms: TermVector::from_counts(counts.clone()),
                })
                .collect(),
        }
    }

    fn everything_known(ids: &[&str]) -> (HashMap<String, Metadata>, HashMap<String, Vec<String>>) {
        let metadata = ids
            .iter()
            .map(|id| (id.to_string(), Metadata::default()))
            .collect();
        let tags = ids
            .iter()
            .map(|id| (id.to_string(), vec!["pop".to_string()]))
            .collect();
        (metadata, tags)
    }

    #[test]
    fn test_songs_without_lyrics_are_dropped() {
        let corpus = corpus(&[("A", vec![(0, 1)]), ("B", vec![(1, 2)]), ("C", vec![])]);
        let (metadata, tags) = everything_known(&["A", "B", "C"]);

        let (songs, stats) = join_sources(corpus, &metadata, &tags, &BuildConfig::default());
        assert_eq!(songs.track_ids(), vec!["A", "B"]);
        assert_eq!(stats.without_lyrics, 1);
        assert!(songs.songs().iter().all(|s| !s.lyrics.is_empty()));
    }

    #[test]
    fn test_join_policy_switches() {
        let corpus_rows = [("A", vec![(0, 1)]), ("B", vec![(1, 1)]), ("C", vec![(2, 1)])];
        let (mut metadata, mut tags) = everything_known(&["A", "B", "C"]);
        metadata.remove("B");
        tags.remove("C");

        let (strict, stats) =
            join_sources(corpus(&corpus_rows), &metadata, &tags, &BuildConfig::default());
        assert_eq!(strict.track_ids(), vec!["A"]);
        assert_eq!((stats.without_metadata, stats.without_tags), (1, 1));

        let lenient = BuildConfig {
            require_metadata: false,
            require_tags: false,
            ..BuildConfig::default()
        };
        let (all, _) = join_sources(corpus(&corpus_rows), &metadata, &tags, &lenient);
        assert_eq!(all.track_ids(), vec!["A", "B", "C"]);
        assert!(all.get("C").map(|s| s.tags.is_empty()).unwrap_or(false));
    }

    #[test]
    fn test_duplicate_tracks_keep_first() {
        let corpus = corpus(&[("A", vec![(0, 1)]), ("A", vec![(1, 1)])]);
        let (metadata, tags) = everything_known(&["A"]);
        let (songs, stats) = join_sources(corpus, &metadata, &tags, &BuildConfig::default());
        assert_eq!(songs.len(), 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(songs.songs()[0].lyrics.entries(), &[(0, 1)]);
    }

    #[test]
    fn test_subsample_is_deterministic_and_ordered() {
        let ids: Vec<String> = (0..50).map(|i| format!("TR{i:03}")).collect();
        let rows: Vec<(&str, Vec<(u32, u32)>)> =
            ids.iter().map(|id| (id.as_str(), vec![(0, 1)])).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (metadata, tags) = everything_known(&id_refs);

        let build = || join_sources(corpus(&rows), &metadata, &tags, &BuildConfig::default()).0;
        let first = subsample(build(), 10, 9);
        let second = subsample(build(), 10, 9);

        assert_eq!(first.track_ids(), second.track_ids());
        assert_eq!(first.len(), 10);
        let mut sorted = first.track_ids();
        sorted.sort();
        assert_eq!(sorted, first.track_ids(), "dataset order is preserved");

        assert_eq!(subsample(build(), 100, 9).len(), 50);
    }

    #[test]
    fn test_sample_indices_bounds() {
        assert_eq!(sample_indices(3, 5, 1), vec![0, 1, 2]);
        let picked = sample_indices(100, 7, 1);
        assert_eq!(picked.len(), 7);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert!(sample_indices(10, 0, 1).is_empty());
    }

    #[test]
    fn test_missing_sources_are_listed_together() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let sources = RawSources::in_dir(dir.path());
        let message = format!("{:#}", sources.check(true).expect_err("nothing exists"));
        for name in [LYRICS_FILE, METADATA_DB, TAGS_DB, SIMILARS_DB] {
            assert!(message.contains(name), "{name} missing from: {message}");
        }
        let without_similars = format!("{:#}", sources.check(false).expect_err("still missing"));
        assert!(!without_similars.contains(SIMILARS_DB));
    }
}
