//! Object store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use objstore_core::{KeySpace, LocalStore, LogBackend, MemoryBackend, StoreConfig, StoredObject};
use objstore_core::ObjectKey;
use tempfile::TempDir;

/// Payload of `size` bytes that differs for every `seed`.
fn payload(seed: u64, size: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let prefix = seed.to_le_bytes();
    let n = prefix.len().min(size);
    data[..n].copy_from_slice(&prefix[..n]);
    data
}

fn open_log(dir: &TempDir, sync: bool) -> LocalStore {
    let config = StoreConfig::default().sync_on_commit(sync);
    let backend = LogBackend::open(dir.path().join("bench.log"), config).unwrap();
    LocalStore::new(backend)
}

/// Benchmark fresh puts on both backends.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for size in [256, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("memory", size), size, |b, &size| {
            let store = LocalStore::new(MemoryBackend::new());
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                let key = store
                    .put_content(KeySpace::Blob, black_box(&payload(seed, size)))
                    .unwrap();
                black_box(key);
            });
        });

        group.bench_with_input(BenchmarkId::new("log_nosync", size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = open_log(&dir, false);
            let mut seed = 0u64;
            b.iter(|| {
                seed += 1;
                let key = store
                    .put_content(KeySpace::Blob, black_box(&payload(seed, size)))
                    .unwrap();
                black_box(key);
            });
        });
    }

    group.finish();
}

/// Benchmark gets of present keys.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    let size = 1024;
    group.throughput(Throughput::Bytes(size as u64));

    let dir = TempDir::new().unwrap();
    let stores = [
        ("memory", LocalStore::new(MemoryBackend::new())),
        ("log", open_log(&dir, false)),
    ];
    for (name, store) in &stores {
        let keys: Vec<ObjectKey> = (0..1000)
            .map(|seed| store.put_content(KeySpace::Blob, &payload(seed, size)).unwrap())
            .collect();
        group.bench_function(*name, |b| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                black_box(store.get(KeySpace::Blob, &keys[i]).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark batched writes of 100 entries.
fn bench_put_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_batch");
    group.sample_size(50);
    group.throughput(Throughput::Elements(100));

    group.bench_function("log_sync", |b| {
        let dir = TempDir::new().unwrap();
        let store = open_log(&dir, true);
        let mut seed = 0u64;
        b.iter(|| {
            let entries: Vec<(ObjectKey, StoredObject)> = (0..100)
                .map(|_| {
                    seed += 1;
                    let data = payload(seed, 512);
                    (ObjectKey::digest(&data), StoredObject::from(data))
                })
                .collect();
            store.put_batch(KeySpace::Tree, black_box(&entries)).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_put_batch);
criterion_main!(benches);
