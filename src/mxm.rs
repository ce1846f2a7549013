//! Reader for the musiXmatch bag-of-words distribution (`mxm_dataset_*.txt`).
//!
//! The file starts with `#` comment lines, then one `%word,word,...` line
//! holding the vocabulary, then one line per track:
//!
//! ```text
//! TRAAAAV128F421A322,4623710,1:6,2:4,3:2,4:2,5:5
//! ```
//!
//! Word indices are 1-based positions in the vocabulary.

use crate::song::{TermVector, Vocabulary};
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One track line of the lyrics file.
#[derive(Debug, Clone, PartialEq)]
pub struct LyricsRow {
    pub track_id: String,
    pub mxm_id: String,
    pub terms: TermVector,
}

/// Parsed content of a lyrics file, rows in file order.
#[derive(Debug, Clone)]
pub struct LyricsCorpus {
    pub vocabulary: Vocabulary,
    pub rows: Vec<LyricsRow>,
}

/// Reads and parses a lyrics file from disk.
pub fn read_lyrics_file(path: &Path) -> Result<LyricsCorpus> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open lyrics file {}", path.display()))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);

    let progress = ProgressBar::new(size);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message("Reading lyrics");

    let corpus = parse_lyrics(BufReader::new(progress.wrap_read(file)))
        .with_context(|| format!("Malformed lyrics file {}", path.display()))?;
    progress.finish_and_clear();

    info!(
        "Read {} lyric rows over {} words from {}",
        corpus.rows.len(),
        corpus.vocabulary.len(),
        path.display()
    );
    Ok(corpus)
}

/// Parses a lyrics file from any buffered reader.
pub fn parse_lyrics<R: BufRead>(reader: R) -> Result<LyricsCorpus> {
    let mut vocabulary: Option<Vocabulary> = None;
    let mut rows = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line_number = number + 1;
        let line = line.with_context(|| format!("Failed to read line {line_number}"))?;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(words) = line.strip_prefix('%') {
            if vocabulary.is_some() {
                bail!("Second vocabulary line at line {line_number}");
            }
            let words: Vec<String> = words.split(',').map(|w| w.trim().to_string()).collect();
            if words.iter().any(String::is_empty) {
                bail!("Empty word in vocabulary at line {line_number}");
            }
            debug!("Vocabulary of {} words at line {line_number}", words.len());
            vocabulary = Some(Vocabulary::new(words));
            continue;
        }

        let Some(vocabulary) = vocabulary.as_ref() else {
            bail!("Track line {line_number} appears before the vocabulary line");
        };
        let row = parse_row(line, vocabulary.len())
            .with_context(|| format!("Invalid track line {line_number}"))?;
        rows.push(row);
    }

    let vocabulary = vocabulary.context("Lyrics file has no `%` vocabulary line")?;
    Ok(LyricsCorpus { vocabulary, rows })
}

fn parse_row(line: &str, vocabulary_len: usize) -> Result<LyricsRow> {
    let mut fields = line.splitn(3, ',');
    let track_id = fields.next().map(str::trim).unwrap_or_default();
    let mxm_id = fields.next().map(str::trim).unwrap_or_default();
    if track_id.is_empty() || mxm_id.is_empty() {
        bail!("Missing track id or musiXmatch id");
    }

    let terms = TermVector::parse_one_based(fields.next().unwrap_or_default(), vocabulary_len)?;

    Ok(LyricsRow {
        track_id: track_id.to_string(),
        mxm_id: mxm_id.to_string(),
        terms,
    })
}
