//! Song similarity graph for the GNN strategy.
//!
//! Nodes are a subset of the unified dataset. Undirected weighted edges come
//! from shared Last.fm tags, from Last.fm similar-song lists, or both.

use crate::config::EdgeSource;
use crate::evaluation::SplitEntry;
use crate::song::{Song, SongTable};
use anyhow::{bail, Result};
use log::debug;
use ndarray::{Array1, Array2};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Undirected weighted graph over songs.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityGraph {
    node_ids: Vec<String>,
    node_index: HashMap<String, usize>,
    /// Neighbour → weight, per node. Always symmetric, never a self loop.
    adjacency: Vec<BTreeMap<usize, f64>>,
}

impl SimilarityGraph {
    /// An edgeless graph over `node_ids`.
    ///
    /// # Errors
    ///
    /// Fails on duplicate ids.
    pub fn new(node_ids: Vec<String>) -> Result<Self> {
        let mut node_index = HashMap::with_capacity(node_ids.len());
        for (position, id) in node_ids.iter().enumerate() {
            if node_index.insert(id.clone(), position).is_some() {
                bail!("Track `{id}` appears twice in the graph");
            }
        }
        Ok(Self {
            adjacency: vec![BTreeMap::new(); node_ids.len()],
            node_ids,
            node_index,
        })
    }

    /// Builds the graph of `nodes` with edges from `source`.
    ///
    /// `similars` is only read when the source uses similar-song relations.
    pub fn from_songs(
        nodes: &[&Song],
        similars: &[SplitEntry],
        source: EdgeSource,
        min_shared_tags: usize,
    ) -> Result<Self> {
        let mut graph = Self::new(nodes.iter().map(|s| s.track_id.clone()).collect())?;
        if source.uses_tags() {
            let tags: Vec<&[String]> = nodes.iter().map(|s| s.tags.as_slice()).collect();
            let added = graph.add_tag_edges(&tags, min_shared_tags);
            debug!("{added} tag edges (min {min_shared_tags} shared tags)");
        }
        if source.uses_similars() {
            let added = graph.add_similar_edges(similars);
            debug!("{added} similar-song edges");
        }
        Ok(graph)
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(BTreeMap::len).sum::<usize>() / 2
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    pub fn position(&self, track_id: &str) -> Option<usize> {
        self.node_index.get(track_id).copied()
    }

    /// Neighbours of `node` with edge weights, by position.
    pub fn neighbours(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adjacency[node].iter().map(|(&n, &w)| (n, w))
    }

    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    /// Every edge once, as `(a, b, weight)` with `a < b`.
    pub fn edges(&self) -> Vec<(usize, usize, f64)> {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(a, row)| {
                row.range(a + 1..).map(move |(&b, &weight)| (a, b, weight))
            })
            .collect()
    }

    /// Adds `weight` to the edge between `a` and `b`. Self loops and
    /// non-positive weights are ignored.
    pub fn add_edge(&mut self, a: usize, b: usize, weight: f64) {
        if a == b || weight <= 0.0 || !weight.is_finite() {
            return;
        }
        *self.adjacency[a].entry(b).or_insert(0.0) += weight;
        *self.adjacency[b].entry(a).or_insert(0.0) += weight;
    }

    /// Connects nodes sharing at least `min_shared` tags, weighted by the
    /// Jaccard overlap of their tag sets. Returns the number of pairs linked.
    pub fn add_tag_edges(&mut self, tags: &[&[String]], min_shared: usize) -> usize {
        let min_shared = min_shared.max(1);
        let tag_sets: Vec<HashSet<&str>> = tags
            .iter()
            .map(|t| t.iter().map(String::as_str).collect())
            .collect();

        let mut inverted: HashMap<&str, Vec<usize>> = HashMap::new();
        for (node, set) in tag_sets.iter().enumerate() {
            for tag in set {
                inverted.entry(*tag).or_default().push(node);
            }
        }

        let mut added = 0;
        for (node, set) in tag_sets.iter().enumerate() {
            let mut shared: BTreeMap<usize, usize> = BTreeMap::new();
            for tag in set {
                for &other in &inverted[tag] {
                    if other > node {
                        *shared.entry(other).or_insert(0) += 1;
                    }
                }
            }
            for (other, count) in shared {
                if count < min_shared {
                    continue;
                }
                let union = set.len() + tag_sets[other].len() - count;
                #[allow(clippy::cast_precision_loss)]
                let jaccard = count as f64 / union as f64;
                self.add_edge(node, other, jaccard);
                added += 1;
            }
        }
        added
    }

    /// Adds one edge per similar-song relation whose two ends are nodes,
    /// weighted by the Last.fm score. Returns the number of relations used.
    pub fn add_similar_edges(&mut self, entries: &[SplitEntry]) -> usize {
        let mut added = 0;
        for entry in entries {
            let Some(source) = self.position(&entry.track_id) else {
                continue;
            };
            for (similar, &score) in entry.similars.iter().zip(&entry.scores) {
                if let Some(target) = self.position(similar) {
                    self.add_edge(source, target, score);
                    added += 1;
                }
            }
        }
        added
    }

    /// A copy without the edges touching any of `nodes`.
    pub fn without_edges_of(&self, nodes: &HashSet<usize>) -> Self {
        let mut graph = self.clone();
        for (node, row) in graph.adjacency.iter_mut().enumerate() {
            if nodes.contains(&node) {
                row.clear();
            } else {
                row.retain(|neighbour, _| !nodes.contains(neighbour));
            }
        }
        graph
    }

    /// Fails unless every node is a song of `songs`.
    pub fn verify_nodes(&self, songs: &SongTable) -> Result<()> {
        let missing: Vec<&str> = self
            .node_ids
            .iter()
            .filter(|id| !songs.contains(id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            bail!(
                "{} graph nodes are not in the dataset (first: `{}`)",
                missing.len(),
                missing[0]
            );
        }
        Ok(())
    }

    /// Applies `hops` times the symmetrically normalized adjacency with self
    /// loops, `D^-1/2 (A + I) D^-1/2`, to the node feature rows.
    pub fn propagate(&self, features: &Array2<f64>, hops: usize) -> Array2<f64> {
        let inverse_sqrt_degree: Array1<f64> = self
            .adjacency
            .iter()
            .map(|row| (1.0 + row.values().sum::<f64>()).sqrt().recip())
            .collect();

        let mut current = features.clone();
        for _ in 0..hops {
            let mut next = Array2::zeros(current.raw_dim());
            for (node, row) in self.adjacency.iter().enumerate() {
                let own = inverse_sqrt_degree[node];
                let mut target = next.row_mut(node);
                target.scaled_add(own * own, &current.row(node));
                for (&neighbour, &weight) in row {
                    target.scaled_add(
                        own * weight * inverse_sqrt_degree[neighbour],
                        &current.row(neighbour),
                    );
                }
            }
            current = next;
        }
        current
    }
}
