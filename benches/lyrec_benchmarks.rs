//! # Lyrec Performance Benchmarks
//!
//! Benchmarks for the hot paths of the pipeline on synthetic data.
//!
//! ## Benchmark Categories
//!
//! - **Parsing**: musiXmatch bag-of-words lines
//! - **LSA**: truncated SVD of the term matrix and query ranking
//! - **Graph**: tag edges and feature propagation
//!
//! ```bash
//! cargo bench
//! cargo bench lsa
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lyrec::config::{EdgeSource, LsaConfig};
use lyrec::graph::SimilarityGraph;
use lyrec::lsa::{term_matrix, LsaModel};
use lyrec::linalg::{truncated_svd, SvdParams};
use lyrec::mxm::parse_lyrics;
use lyrec::recommend::{top_n, SimilarityStrategy};
use lyrec::song::{Metadata, Song, TermVector};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::io::Cursor;

const VOCABULARY: usize = 5000;
const TAGS: &[&str] = &["rock", "pop", "jazz", "metal", "indie", "soul", "folk", "punk"];

/// Songs with Zipf-like word usage and two or three tags.
fn create_test_songs(count: usize) -> Vec<Song> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..count)
        .map(|i| {
            let words = rng.gen_range(40..120);
            let counts = (0..words)
                .map(|_| {
                    let rank = (rng.gen::<f64>().powi(3) * VOCABULARY as f64) as u32;
                    (rank.min(VOCABULARY as u32 - 1), rng.gen_range(1..6))
                })
                .collect();
            let tags = (0..rng.gen_range(2..4))
                .map(|_| TAGS[rng.gen_range(0..TAGS.len())].to_string())
                .collect();
            Song {
                track_id: format!("TR{i:08}"),
                lyrics: TermVector::from_counts(counts),
                tags,
                metadata: Metadata::default(),
            }
        })
        .collect()
}

fn lyrics_text(songs: &[Song]) -> String {
    let words: Vec<String> = (0..VOCABULARY).map(|i| format!("w{i}")).collect();
    let mut text = format!("%{}\n", words.join(","));
    for (i, song) in songs.iter().enumerate() {
        text.push_str(&format!("{},{},{}\n", song.track_id, i, song.lyrics.to_one_based()));
    }
    text
}

fn benchmark_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    let text = lyrics_text(&create_test_songs(2000));

    group.bench_function("lyrics_2000_songs", |b| {
        b.iter(|| parse_lyrics(Cursor::new(black_box(text.as_bytes()))).expect("valid lyrics"))
    });
    group.finish();
}

fn benchmark_lsa(c: &mut Criterion) {
    let mut group = c.benchmark_group("lsa");
    group.sample_size(10);

    for size in [1000, 5000].iter() {
        let songs = create_test_songs(*size);
        let (matrix, _) = term_matrix(&songs, VOCABULARY, Default::default()).expect("valid matrix");

        group.bench_with_input(BenchmarkId::new("truncated_svd_k50", size), &matrix, |b, matrix| {
            b.iter(|| {
                truncated_svd(
                    black_box(matrix),
                    SvdParams {
                        components: 50,
                        oversampling: 10,
                        power_iterations: 4,
                        seed: 42,
                    },
                )
                .expect("valid rank")
            })
        });
    }

    let songs = create_test_songs(5000);
    let model = LsaModel::fit(
        &songs,
        VOCABULARY,
        &LsaConfig {
            components: 50,
            ..LsaConfig::default()
        },
    )
    .expect("fitted model");
    group.bench_function("recommend_top10_of_5000", |b| {
        b.iter(|| model.recommend(black_box("TR00000042"), 10).expect("known track"))
    });
    group.finish();
}

fn benchmark_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking");
    let mut rng = StdRng::seed_from_u64(3);
    let scores: Vec<f64> = (0..100_000).map(|_| rng.gen_range(-1.0..1.0)).collect();

    for n in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::new("top_n_of_100k", n), n, |b, &n| {
            b.iter(|| top_n(black_box(&scores), n, Some(0)))
        });
    }
    group.finish();
}

fn benchmark_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");
    let songs = create_test_songs(2000);
    let nodes: Vec<&Song> = songs.iter().collect();

    group.bench_function("tag_edges_2000_songs", |b| {
        b.iter(|| {
            SimilarityGraph::from_songs(black_box(&nodes), &[], EdgeSource::Tags, 2)
                .expect("unique ids")
        })
    });

    let graph = SimilarityGraph::from_songs(&nodes, &[], EdgeSource::Tags, 2).expect("unique ids");
    let features = Array2::from_elem((songs.len(), 64), 0.5);
    group.bench_function("propagate_2_hops", |b| {
        b.iter(|| graph.propagate(black_box(&features), 2))
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_parsing,
    benchmark_lsa,
    benchmark_ranking,
    benchmark_graph
);

criterion_main!(benches);
