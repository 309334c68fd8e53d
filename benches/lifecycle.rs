//! Benchmarks for playbook lifecycle, retrieval and merge.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use ace_playbook::{Bullet, BulletKind, Config, Delta, Playbook};
use tempfile::tempdir;

fn bullets(count: usize, prefix: &str) -> Vec<Bullet> {
    (0..count)
        .map(|i| {
            Bullet::new(
                BulletKind::Strategy,
                format!("{prefix} {i}"),
                format!("Guidance {prefix} number {i}: check inputs before calling the API."),
            )
            .unwrap()
        })
        .collect()
}

/// Benchmark opening a new playbook.
fn bench_open_new(c: &mut Criterion) {
    c.bench_function("open_new_playbook", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;

            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let path = dir.path().join("bench.db");

                let start = std::time::Instant::now();
                let playbook = Playbook::open(&path, Config::default()).unwrap();
                total += start.elapsed();

                playbook.close().unwrap();
            }

            total
        });
    });
}

/// Benchmark ranking a 50-bullet playbook against a text query.
fn bench_retrieve(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let playbook = Playbook::open(dir.path().join("bench.db"), Config::default()).unwrap();
    playbook
        .merge(Delta {
            bullets: bullets(50, "seed"),
            ..Default::default()
        })
        .unwrap();

    c.bench_function("retrieve_top_8_of_50", |b| {
        b.iter(|| playbook.retrieve("How should I validate API inputs?").unwrap());
    });
}

/// Benchmark merging a 10-bullet delta into a fresh playbook.
fn bench_merge(c: &mut Criterion) {
    c.bench_function("merge_10_bullets", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let playbook = Playbook::open(dir.path().join("bench.db"), Config::default()).unwrap();
                (dir, playbook, bullets(10, "batch"))
            },
            |(_dir, playbook, bullets)| {
                playbook
                    .merge(Delta {
                        bullets,
                        ..Default::default()
                    })
                    .unwrap()
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, bench_open_new, bench_retrieve, bench_merge);
criterion_main!(benches);
