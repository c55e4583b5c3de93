use canopy_store::{ContentStore, FsStore, MemoryStore, WritableStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

fn bench_fs_put(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let store = FsStore::new(temp.path()).unwrap();
    let data = vec![7u8; 4096];

    // Repeated content exercises the dedup path, which dominates in practice
    c.bench_function("fs_put_4kb", |b| b.iter(|| store.put(black_box(&data)).unwrap()));
}

fn bench_fs_fetch(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let store = FsStore::new(temp.path()).unwrap();
    let data = vec![7u8; 4096];
    let hash = store.put(&data).unwrap();

    c.bench_function("fs_fetch_4kb", |b| {
        b.iter(|| store.fetch(black_box(&hash)).unwrap())
    });
}

fn bench_memory_fetch(c: &mut Criterion) {
    let store = MemoryStore::new();
    let hash = store.put(&[1u8; 512]).unwrap();

    c.bench_function("memory_fetch_512b", |b| {
        b.iter(|| store.fetch(black_box(&hash)).unwrap())
    });
}

criterion_group!(benches, bench_fs_put, bench_fs_fetch, bench_memory_fetch);
criterion_main!(benches);
