//! Song records shared by the dataset builder and both similarity strategies.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sparse bag-of-words lyrics over a fixed vocabulary.
///
/// Entries are `(term_index, count)` pairs with 0-based term indices, sorted
/// by index, without duplicates and without zero counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TermVector {
    entries: Vec<(u32, u32)>,
}

impl TermVector {
    /// Builds a normalized vector from raw pairs.
    ///
    /// Duplicate indices are summed, saturating at `u32::MAX`, and zero
    /// counts are dropped. Use [`TermVector::try_from_counts`] for untrusted
    /// input.
    pub fn from_counts(counts: Vec<(u32, u32)>) -> Self {
        Self::merge(counts, |a, b| Some(a.saturating_add(b)))
            .unwrap_or_default()
    }

    /// Like [`TermVector::from_counts`], but a duplicate index whose summed
    /// count overflows `u32` is an error.
    pub fn try_from_counts(counts: Vec<(u32, u32)>) -> Result<Self> {
        Self::merge(counts, u32::checked_add)
    }

    fn merge(
        mut counts: Vec<(u32, u32)>,
        add: impl Fn(u32, u32) -> Option<u32>,
    ) -> Result<Self> {
        counts.sort_by_key(|&(index, _)| index);

        let mut entries: Vec<(u32, u32)> = Vec::with_capacity(counts.len());
        for (index, count) in counts {
            match entries.last_mut() {
                Some(last) if last.0 == index => {
                    last.1 = add(last.1, count).with_context(|| {
                        format!("Count of word index {} overflows", u64::from(index) + 1)
                    })?;
                }
                _ => entries.push((index, count)),
            }
        }
        entries.retain(|&(_, count)| count > 0);

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total number of word occurrences.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|&(_, count)| u64::from(count)).sum()
    }

    /// Parses the `idx:count,idx:count` form with 1-based indices, as used by
    /// the musiXmatch distribution and by `songs_data.csv`.
    pub fn parse_one_based(text: &str, vocabulary_len: usize) -> Result<Self> {
        let mut counts = Vec::new();
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (index, count) = pair
                .split_once(':')
                .with_context(|| format!("Expected `index:count`, found `{pair}`"))?;
            let index: u32 = index
                .trim()
                .parse()
                .with_context(|| format!("Invalid word index in `{pair}`"))?;
            let count: u32 = count
                .trim()
                .parse()
                .with_context(|| format!("Invalid word count in `{pair}`"))?;

            if index == 0 || index as usize > vocabulary_len {
                bail!("Word index {index} outside vocabulary of {vocabulary_len} words");
            }
            counts.push((index - 1, count));
        }
        Self::try_from_counts(counts)
    }

    /// Inverse of [`TermVector::parse_one_based`].
    pub fn to_one_based(&self) -> String {
        self.entries
            .iter()
            .map(|&(index, count)| format!("{}:{count}", index + 1))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The ordered musiXmatch top-words list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    words: Vec<String>,
}

impl Vocabulary {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, index: u32) -> Option<&str> {
        self.words.get(index as usize).map(String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Rebuilds a lyrics text from a term vector: every word repeated
    /// `count` times, in term order.
    pub fn render(&self, terms: &TermVector) -> String {
        let mut words = Vec::with_capacity(terms.total_count() as usize);
        for &(index, count) in terms.entries() {
            if let Some(word) = self.word(index) {
                words.extend(std::iter::repeat(word).take(count as usize));
            }
        }
        words.join(" ")
    }
}

/// Title, artist and year from the MSD track metadata.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub year: Option<u32>,
}

/// A song of the unified dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// MSD track id, e.g. `TRAAAAV128F421A322`.
    pub track_id: String,
    pub lyrics: TermVector,
    /// Last.fm tags, strongest first.
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl Song {
    pub fn artist(&self) -> &str {
        self.metadata.artist.as_deref().unwrap_or("Unknown")
    }

    pub fn title(&self) -> &str {
        self.metadata.title.as_deref().unwrap_or("Unknown")
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} [{}]", self.artist(), self.title(), self.track_id)
    }
}

/// Songs in dataset order plus an index by track id.
#[derive(Debug, Clone, Default)]
pub struct SongTable {
    songs: Vec<Song>,
    index: HashMap<String, usize>,
}

impl SongTable {
    /// Builds the table, keeping the first song for each track id.
    pub fn new(songs: Vec<Song>) -> Self {
        let mut table = Self::default();
        for song in songs {
            if table.index.contains_key(&song.track_id) {
                log::trace!("Dropping duplicate track `{}'", song.track_id);
                continue;
            }
            table.index.insert(song.track_id.clone(), table.songs.len());
            table.songs.push(song);
        }
        table
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn position(&self, track_id: &str) -> Option<usize> {
        self.index.get(track_id).copied()
    }

    pub fn get(&self, track_id: &str) -> Option<&Song> {
        self.position(track_id).map(|i| &self.songs[i])
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.index.contains_key(track_id)
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.songs.iter().map(|s| s.track_id.clone()).collect()
    }

    /// Keeps only the songs for which `keep` returns true, in order.
    pub fn retain(self, mut keep: impl FnMut(&Song) -> bool) -> Self {
        Self::new(self.songs.into_iter().filter(|s| keep(s)).collect())
    }

    pub fn into_songs(self) -> Vec<Song> {
        self.songs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_vector_merges_duplicates_and_drops_zeros() {
        let terms = TermVector::from_counts(vec![(3, 1), (1, 2), (3, 4), (7, 0)]);
        assert_eq!(terms.entries(), &[(1, 2), (3, 5)]);
        assert_eq!(terms.total_count(), 7);
    }

    #[test]
    fn test_parse_one_based_shifts_indices() {
        let terms = TermVector::parse_one_based("1:3,4:1", 5).expect("valid pairs");
        assert_eq!(terms.entries(), &[(0, 3), (3, 1)]);
        assert_eq!(terms.to_one_based(), "1:3,4:1");
    }

    #[test]
    fn test_parse_one_based_rejects_out_of_range() {
        assert!(TermVector::parse_one_based("6:1", 5).is_err());
        assert!(TermVector::parse_one_based("0:1", 5).is_err());
        assert!(TermVector::parse_one_based("2:x", 5).is_err());
        assert!(TermVector::parse_one_based("2", 5).is_err());
    }

    #[test]
    fn test_duplicate_counts_overflow() {
        let err = TermVector::parse_one_based("1:4294967295,1:1", 3).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let saturated = TermVector::from_counts(vec![(0, u32::MAX), (0, 1)]);
        assert_eq!(saturated.entries(), &[(0, u32::MAX)]);
    }

    #[test]
    fn test_vocabulary_render() {
        let vocabulary = Vocabulary::new(vec!["i".into(), "love".into(), "you".into()]);
        let terms = TermVector::from_counts(vec![(0, 1), (1, 2), (2, 1)]);
        assert_eq!(vocabulary.render(&terms), "i love love you");
    }

    #[test]
    fn test_song_table_keeps_first_duplicate() {
        let song = |id: &str, title: &str| Song {
            track_id: id.to_string(),
            lyrics: TermVector::from_counts(vec![(0, 1)]),
            tags: Vec::new(),
            metadata: Metadata {
                title: Some(title.to_string()),
                ..Metadata::default()
            },
        };

        let table = SongTable::new(vec![song("A", "first"), song("B", "b"), song("A", "second")]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("A").map(Song::title), Some("first"));
        assert_eq!(table.position("B"), Some(1));
    }
}
