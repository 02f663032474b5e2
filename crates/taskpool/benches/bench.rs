use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use taskpool::{PoolOptions, TaskPool};
use tokio::runtime::Builder;

const JOBS_PER_ITER: u64 = 1_024;

fn pool_throughput(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .worker_threads(8)
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let mut group = c.benchmark_group("pool/throughput");
    group.throughput(Throughput::Elements(JOBS_PER_ITER));

    for size in [1_usize, 4, 16, 64] {
        group.bench_function(format!("async/workers/{size}"), |b| {
            b.to_async(&rt).iter(|| async move {
                let pool = TaskPool::new(PoolOptions::new().with_size(size));
                pool.start().await.expect("start");
                let counter = Arc::new(AtomicU64::new(0));
                for _ in 0..JOBS_PER_ITER {
                    let counter = Arc::clone(&counter);
                    pool.submit(move || async move {
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .await
                    .expect("submit");
                }
                pool.stop().await.expect("stop");
                black_box(counter.load(Ordering::Relaxed))
            });
        });

        group.bench_function(format!("blocking/workers/{size}"), |b| {
            b.to_async(&rt).iter(|| async move {
                let pool = TaskPool::new(PoolOptions::new().with_size(size));
                pool.start().await.expect("start");
                let counter = Arc::new(AtomicU64::new(0));
                for _ in 0..JOBS_PER_ITER {
                    let counter = Arc::clone(&counter);
                    pool.submit_fn(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .await
                    .expect("submit");
                }
                pool.stop().await.expect("stop");
                black_box(counter.load(Ordering::Relaxed))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, pool_throughput);
criterion_main!(benches);
