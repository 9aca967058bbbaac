//! Ring transport benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flux_packet::BufferHandle;
use flux_runtime::SpscRing;

fn bench_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_ring");
    for batch in [1usize, 32, 256] {
        let ring = SpscRing::new(1024);
        let handles: Vec<BufferHandle> = (0..batch as u32).map(BufferHandle::from_index).collect();
        let mut out = Vec::with_capacity(batch);

        group.throughput(Throughput::Elements(batch as u64));
        group.bench_function(format!("roundtrip_{batch}"), |b| {
            b.iter(|| {
                let put = ring.enqueue_batch(black_box(&handles));
                out.clear();
                let got = ring.dequeue_batch(&mut out, batch);
                black_box((put, got))
            })
        });
    }
    group.finish();
}

fn bench_cross_thread(c: &mut Criterion) {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let mut group = c.benchmark_group("spsc_cross_thread");
    group.throughput(Throughput::Elements(32));
    group.bench_function("handoff_32", |b| {
        let ring = SpscRing::new(1024);
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = {
            let ring = ring.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut out = Vec::with_capacity(64);
                while !stop.load(Ordering::Relaxed) {
                    out.clear();
                    ring.dequeue_batch(&mut out, 64);
                }
            })
        };

        let handles: Vec<BufferHandle> = (0..32).map(BufferHandle::from_index).collect();
        b.iter(|| {
            let mut sent = 0;
            while sent < handles.len() {
                sent += ring.enqueue_batch(black_box(&handles[sent..]));
            }
        });

        stop.store(true, Ordering::Relaxed);
        consumer.join().unwrap();
    });
    group.finish();
}

criterion_group!(benches, bench_enqueue_dequeue, bench_cross_thread);
criterion_main!(benches);
