use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kvsem_core::config::SemaphoreConfig;
use kvsem_core::infrastructure_in_memory::InMemoryKvStore;
use kvsem_core::semaphore::Semaphore;
use kvsem_core::types::ResourceDescriptor;

fn config(resources: usize, limit: u64) -> SemaphoreConfig {
    SemaphoreConfig::new(
        (0..resources)
            .map(|i| ResourceDescriptor::new(format!("res-{}", i), limit, 1))
            .collect(),
        30,
        "bench",
    )
}

fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release_cycle");

    for resources in [1, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("resources", resources),
            &resources,
            |b, &count| {
                let store = InMemoryKvStore::new();
                let mut sem = Semaphore::new(store, config(count, 8)).unwrap();
                b.iter(|| {
                    black_box(sem.acquire().unwrap());
                    sem.release();
                })
            },
        );
    }

    group.finish();
}

fn bench_crowded_resource(c: &mut Criterion) {
    let mut group = c.benchmark_group("crowded_resource");

    for holders in [10u64, 100] {
        group.bench_with_input(
            BenchmarkId::new("holders", holders),
            &holders,
            |b, &holders| {
                let store = InMemoryKvStore::new();
                // Keep the semaphores alive so their grants stay live
                let _held: Vec<_> = (0..holders)
                    .map(|_| {
                        let mut sem = Semaphore::new(store.clone(), config(1, holders + 1)).unwrap();
                        sem.acquire().unwrap();
                        sem
                    })
                    .collect();

                let mut sem = Semaphore::new(store.clone(), config(1, holders + 1)).unwrap();
                b.iter(|| {
                    black_box(sem.acquire().unwrap());
                    sem.release();
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_crowded_resource);
criterion_main!(benches);
