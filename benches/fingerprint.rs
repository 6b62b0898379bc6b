//! Benchmarks for the local side of a sync: digests and tree walks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dirsnap::local::{digest_bytes, file_digest, IgnoreSet, TreeWalker};
use tempfile::TempDir;

fn bench_file_digest(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();

    let mut group = c.benchmark_group("file_digest");
    for size in [1024usize, 64 * 1024, 4 * 1024 * 1024] {
        let path = dir.path().join(format!("blob-{}", size));
        std::fs::write(&path, vec![0xa5u8; size]).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &path, |b, path| {
            b.iter(|| file_digest(black_box(path)).unwrap())
        });
    }
    group.finish();
}

fn bench_digest_bytes(c: &mut Criterion) {
    let data = vec![0x5au8; 64 * 1024];

    let mut group = c.benchmark_group("digest_bytes");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("64k", |b| b.iter(|| digest_bytes(black_box(&data))));
    group.finish();
}

fn bench_tree_walk(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    for d in 0..20 {
        let sub = dir.path().join(format!("dir{}", d)).join("nested");
        std::fs::create_dir_all(&sub).unwrap();
        for f in 0..25 {
            std::fs::write(sub.join(format!("file{}.txt", f)), "x").unwrap();
            std::fs::write(sub.join(format!("file{}.log", f)), "x").unwrap();
        }
    }

    let mut group = c.benchmark_group("tree_walk");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("no_ignore", |b| {
        let matcher = IgnoreSet::empty().compile(dir.path()).unwrap();
        b.iter(|| TreeWalker::new(dir.path(), matcher.clone()).count())
    });

    group.bench_function("ignore_logs", |b| {
        let matcher = IgnoreSet::from_patterns(["*.log"])
            .compile(dir.path())
            .unwrap();
        b.iter(|| TreeWalker::new(dir.path(), matcher.clone()).count())
    });

    group.finish();
}

criterion_group!(benches, bench_file_digest, bench_digest_bytes, bench_tree_walk);
criterion_main!(benches);
