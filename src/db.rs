//! # Raw Database Module
//!
//! Read-only access to the three SQLite files of the MSD distribution:
//!
//! - `mxm_metadata.db` (MSD `track_metadata.db`): title, artist and year
//! - `lastfm_tags.db`: Last.fm tags with their strength per track
//! - `lastfm_similar_songs.db` (Last.fm `lastfm_similars.db`): ranked similar tracks
//!
//! All databases are opened read-only. A missing file is an error, never an
//! empty result: SQLite would otherwise silently create an empty database.

use crate::song::Metadata;
use anyhow::{bail, Context, Result};
use log::{debug, info, trace};
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;

/// Opens an existing SQLite database without write access.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        bail!("Database file {} does not exist", path.display());
    }

    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open database {}", path.display()))
}

/// Loads title, artist and year for every track of the metadata database.
///
/// MSD stores unknown years as `0`; those become `None`.
pub fn load_metadata(path: &Path) -> Result<HashMap<String, Metadata>> {
    let conn = open_read_only(path)?;
    let mut stmt = conn
        .prepare("SELECT track_id, title, artist_name, year FROM songs")
        .with_context(|| format!("Invalid metadata schema in {}", path.display()))?;

    let rows = stmt
        .query_map([], |row| {
            let year: Option<i64> = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                Metadata {
                    title: row.get(1)?,
                    artist: row.get(2)?,
                    year: year.filter(|&y| y > 0).and_then(|y| u32::try_from(y).ok()),
                },
            ))
        })
        .context("Cannot query track metadata")?;

    let mut metadata = HashMap::new();
    for row in rows {
        let (track_id, meta) = row.context("Malformed metadata row")?;
        metadata.entry(track_id).or_insert(meta);
    }

    info!("Loaded metadata for {} tracks", metadata.len());
    Ok(metadata)
}

/// Loads Last.fm tags per track, strongest first.
///
/// Tags with a strength below `min_strength` are ignored. Ties keep database
/// order.
pub fn load_tags(path: &Path, min_strength: f64) -> Result<HashMap<String, Vec<String>>> {
    let conn = open_read_only(path)?;
    let mut stmt = conn
        .prepare(
            "SELECT tids.tid, tags.tag, tid_tag.val
             FROM tid_tag, tids, tags
             WHERE tags.ROWID = tid_tag.tag AND tid_tag.tid = tids.ROWID
             ORDER BY tid_tag.ROWID",
        )
        .with_context(|| format!("Invalid tags schema in {}", path.display()))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
            ))
        })
        .context("Cannot query tags")?;

    let mut weighted: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    let mut skipped = 0usize;
    for row in rows {
        let (track_id, tag, strength) = row.context("Malformed tag row")?;
        if strength < min_strength {
            skipped += 1;
            continue;
        }
        let tags = weighted.entry(track_id).or_default();
        if !tags.iter().any(|(existing, _)| existing == &tag) {
            tags.push((tag, strength));
        }
    }
    debug!("Ignored {skipped} tags below strength {min_strength}");

    let tags: HashMap<String, Vec<String>> = weighted
        .into_iter()
        .map(|(track_id, mut tags)| {
            // Stable sort keeps database order among equal strengths.
            tags.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            (track_id, tags.into_iter().map(|(tag, _)| tag).collect())
        })
        .collect();

    info!("Loaded tags for {} tracks", tags.len());
    Ok(tags)
}

/// Loads the raw `id,score,id,score,...` similar-songs strings per track.
pub fn load_similars(path: &Path) -> Result<HashMap<String, String>> {
    let conn = open_read_only(path)?;
    let mut stmt = conn
        .prepare("SELECT tid, target FROM similars_src")
        .with_context(|| format!("Invalid similar-songs schema in {}", path.display()))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("Cannot query similar songs")?;

    let mut similars = HashMap::new();
    for row in rows {
        let (track_id, target) = row.context("Malformed similar-songs row")?;
        trace!("Similar list for `{track_id}'");
        similars.entry(track_id).or_insert(target);
    }

    info!("Loaded similar-song lists for {} tracks", similars.len());
    Ok(similars)
}
