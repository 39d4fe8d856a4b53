use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use concord::compression::codec::{self, CodecId};
use concord::core::config::IndexConfig;
use concord::index::index::Index;

fn random_postings(count: usize, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut postings = Vec::with_capacity(count);
    let mut current = 0u64;
    for _ in 0..count {
        current += rng.gen_range(1..100);
        postings.push(current);
    }
    postings
}

fn bench_codecs(c: &mut Criterion) {
    let postings = random_postings(32_768, 7);
    let mut group = c.benchmark_group("codec");
    for codec_id in [
        CodecId::VByte,
        CodecId::Gamma,
        CodecId::Golomb,
        CodecId::Simple9,
        CodecId::LLRun,
        CodecId::Interpolative,
    ] {
        group.bench_function(format!("encode/{:?}", codec_id), |b| {
            b.iter(|| codec::encode(codec_id, black_box(&postings)).unwrap())
        });
        let block = codec::encode(codec_id, &postings).unwrap();
        group.bench_function(format!("decode/{:?}", codec_id), |b| {
            b.iter(|| codec::decode(black_box(&block)).unwrap())
        });
    }
    group.finish();
}

fn bench_ingest_and_query(c: &mut Criterion) {
    let words = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    let mut rng = StdRng::seed_from_u64(42);
    let text: String = (0..20_000)
        .map(|_| words[rng.gen_range(0..words.len())])
        .collect::<Vec<_>>()
        .join(" ");

    c.bench_function("ingest/20k_tokens", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let config = IndexConfig {
                directory: dir.path().to_path_buf(),
                ..IndexConfig::default()
            };
            let index = Index::open(config).unwrap();
            index.index_text(black_box(&text)).unwrap();
        })
    });

    let dir = TempDir::new().unwrap();
    let config = IndexConfig {
        directory: dir.path().to_path_buf(),
        ..IndexConfig::default()
    };
    let index = Index::open(config).unwrap();
    index.index_text(&text).unwrap();
    index.flush().unwrap();

    c.bench_function("query/phrase", |b| {
        b.iter(|| {
            index
                .query(black_box("\"quick brown\""))
                .unwrap()
                .all_extents()
        })
    });
    c.bench_function("query/containment", |b| {
        b.iter(|| {
            index
                .query(black_box("(\"fox\"^\"dog\")<[20]"))
                .unwrap()
                .all_extents()
        })
    });
}

criterion_group!(benches, bench_codecs, bench_ingest_and_query);
criterion_main!(benches);
