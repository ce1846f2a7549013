//! On-disk form of the unified dataset.
//!
//! Tables are CSV files with a header row; the vocabulary is a JSON array.
//! Writes go through [`PendingWrites`]: every file is first written to a
//! temporary file in the target directory and only renamed into place once
//! all of them were written, so a failed build leaves no new output behind.

use crate::config::{
    EVALUATION_FILE, GNN_TRAINING_FILE, GNN_VALIDATION_FILE, SONGS_FILE, VOCABULARY_FILE,
};
use crate::evaluation::{EvaluationEntry, SplitEntry};
use crate::song::{Metadata, Song, SongTable, TermVector, Vocabulary};
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One row of `songs_data.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub track_id: String,
    pub title: Option<String>,
    pub artist_name: Option<String>,
    pub year: Option<u32>,
    /// JSON array of tags, strongest first.
    pub tags: String,
    /// `index:count` pairs with 1-based indices.
    pub word_counts: String,
    /// Bag-of-words text rebuilt from the counts.
    pub lyrics: String,
}

impl SongRecord {
    pub fn from_song(song: &Song, vocabulary: &Vocabulary) -> Result<Self> {
        Ok(Self {
            track_id: song.track_id.clone(),
            title: song.metadata.title.clone(),
            artist_name: song.metadata.artist.clone(),
            year: song.metadata.year,
            tags: serde_json::to_string(&song.tags)?,
            word_counts: song.lyrics.to_one_based(),
            lyrics: vocabulary.render(&song.lyrics),
        })
    }

    pub fn into_song(self, vocabulary: &Vocabulary) -> Result<Song> {
        let lyrics = TermVector::parse_one_based(&self.word_counts, vocabulary.len())
            .with_context(|| format!("Invalid word counts for track `{}`", self.track_id))?;
        let tags: Vec<String> = if self.tags.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.tags)
                .with_context(|| format!("Invalid tags for track `{}`", self.track_id))?
        };

        Ok(Song {
            track_id: self.track_id,
            lyrics,
            tags,
            metadata: Metadata {
                title: self.title,
                artist: self.artist_name,
                year: self.year,
            },
        })
    }
}

/// One row of `eval_similar_songs.csv`: the song plus its ordered relevant ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub track_id: String,
    pub title: Option<String>,
    pub artist_name: Option<String>,
    pub year: Option<u32>,
    pub tags: String,
    pub word_counts: String,
    pub lyrics: String,
    /// Comma separated similar track ids, most similar first.
    pub target: String,
}

/// One row of the GNN training or validation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub track_id: String,
    pub similars: String,
    pub sim_scores: String,
}

/// Files waiting to be moved into the output directory.
pub struct PendingWrites {
    dir: PathBuf,
    files: Vec<(NamedTempFile, PathBuf)>,
}

impl PendingWrites {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            files: Vec::new(),
        })
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {}", self.dir.display()))
    }

    pub fn add_csv<T: Serialize>(&mut self, name: &str, rows: &[T]) -> Result<()> {
        let file = self.temp_file()?;
        {
            let mut writer = csv::Writer::from_writer(BufWriter::new(file.as_file()));
            for row in rows {
                writer
                    .serialize(row)
                    .with_context(|| format!("Failed to write a row of {name}"))?;
            }
            writer.flush().with_context(|| format!("Failed to flush {name}"))?;
        }
        debug!("Staged {} rows for {name}", rows.len());
        self.files.push((file, self.dir.join(name)));
        Ok(())
    }

    pub fn add_json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let file = self.temp_file()?;
        {
            let mut writer = BufWriter::new(file.as_file());
            serde_json::to_writer(&mut writer, value)
                .with_context(|| format!("Failed to serialize {name}"))?;
            writer.flush().with_context(|| format!("Failed to flush {name}"))?;
        }
        self.files.push((file, self.dir.join(name)));
        Ok(())
    }

    /// Moves every staged file to its final name.
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for (file, target) in self.files {
            file.persist(&target)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            info!("Wrote {}", target.display());
            written.push(target);
        }
        Ok(written)
    }
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for (line, row) in reader.deserialize().enumerate() {
        rows.push(row.with_context(|| {
            format!("Malformed row {} in {}", line + 2, path.display())
        })?);
    }
    Ok(rows)
}

pub fn stage_songs(pending: &mut PendingWrites, songs: &SongTable, vocabulary: &Vocabulary) -> Result<()> {
    let records = songs
        .songs()
        .iter()
        .map(|song| SongRecord::from_song(song, vocabulary))
        .collect::<Result<Vec<_>>>()?;
    pending.add_csv(SONGS_FILE, &records)?;
    pending.add_json(VOCABULARY_FILE, vocabulary)
}

pub fn stage_evaluation(
    pending: &mut PendingWrites,
    entries: &[EvaluationEntry],
    vocabulary: &Vocabulary,
) -> Result<()> {
    let records = entries
        .iter()
        .map(|entry| -> Result<EvaluationRecord> {
            let song = SongRecord::from_song(&entry.song, vocabulary)?;
            Ok(EvaluationRecord {
                track_id: song.track_id,
                title: song.title,
                artist_name: song.artist_name,
                year: song.year,
                tags: song.tags,
                word_counts: song.word_counts,
                lyrics: song.lyrics,
                target: entry.similars.join(","),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    pending.add_csv(EVALUATION_FILE, &records)
}

pub fn stage_splits(
    pending: &mut PendingWrites,
    training: &[SplitEntry],
    validation: &[SplitEntry],
) -> Result<()> {
    pending.add_csv(GNN_TRAINING_FILE, &split_records(training))?;
    pending.add_csv(GNN_VALIDATION_FILE, &split_records(validation))
}

fn split_records(entries: &[SplitEntry]) -> Vec<SplitRecord> {
    entries
        .iter()
        .map(|entry| SplitRecord {
            track_id: entry.track_id.clone(),
            similars: entry.similars.join(","),
            sim_scores: entry
                .scores
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(","),
        })
        .collect()
}

pub fn load_vocabulary(dir: &Path) -> Result<Vocabulary> {
    let path = dir.join(VOCABULARY_FILE);
    let file = File::open(&path).with_context(|| {
        format!("Failed to open {}. Run `lyrec build` first.", path.display())
    })?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Invalid vocabulary file {}", path.display()))
}

/// Loads the vocabulary and the unified dataset.
pub fn load_songs(dir: &Path) -> Result<(Vocabulary, SongTable)> {
    let vocabulary = load_vocabulary(dir)?;
    let path = dir.join(SONGS_FILE);
    let songs = read_csv::<SongRecord>(&path)?
        .into_iter()
        .map(|record| record.into_song(&vocabulary))
        .collect::<Result<Vec<_>>>()?;

    info!("Loaded {} songs from {}", songs.len(), path.display());
    Ok((vocabulary, SongTable::new(songs)))
}

pub fn load_evaluation(dir: &Path, vocabulary: &Vocabulary) -> Result<Vec<EvaluationEntry>> {
    let path = dir.join(EVALUATION_FILE);
    read_csv::<EvaluationRecord>(&path)?
        .into_iter()
        .map(|record| -> Result<EvaluationEntry> {
            let similars = split_ids(&record.target);
            let song = SongRecord {
                track_id: record.track_id,
                title: record.title,
                artist_name: record.artist_name,
                year: record.year,
                tags: record.tags,
                word_counts: record.word_counts,
                lyrics: record.lyrics,
            }
            .into_song(vocabulary)?;
            Ok(EvaluationEntry { song, similars })
        })
        .collect()
}

pub fn load_split(path: &Path) -> Result<Vec<SplitEntry>> {
    read_csv::<SplitRecord>(path)?
        .into_iter()
        .map(|record| -> Result<SplitEntry> {
            let similars = split_ids(&record.similars);
            let scores = record
                .sim_scores
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Invalid scores for track `{}`", record.track_id))?;
            if scores.len() != similars.len() {
                anyhow::bail!(
                    "Track `{}` has {} similar ids but {} scores",
                    record.track_id,
                    similars.len(),
                    scores.len()
                );
            }
            Ok(SplitEntry {
                track_id: record.track_id,
                similars,
                scores,
            })
        })
        .collect()
}

fn split_ids(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
