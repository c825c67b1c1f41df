// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ring buffer throughput benchmarks.
//
// Run with:
//   cargo bench --bench ring
//
// Groups:
//   put_only      : producer with no consumers (pure copy-in + cursor publish)
//   put_get       : one put followed by one get in the same thread
//   put_get_lag   : put/get with three consumers all draining
//   wrap          : records sized so every few puts straddle the top of the ring
//
// Record sizes:
//   small  : 64 bytes
//   medium : 4 KiB
//   large  : 256 KiB

use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daqring::{Consumer, Producer, RingBuffer};

const RING_BYTES: usize = 4 * 1024 * 1024;

const SIZES: &[(&str, usize)] = &[
    ("small_64", 64),
    ("medium_4k", 4 * 1024),
    ("large_256k", 256 * 1024),
];

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A ring that is removed when the benchmark finishes.
struct BenchRing(String);

impl BenchRing {
    fn new(data_bytes: usize) -> Self {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("bench_ring_{}_{n}", std::process::id());
        let _ = RingBuffer::remove(&name);
        RingBuffer::create_with(&name, data_bytes, 4).expect("create bench ring");
        BenchRing(name)
    }
}

impl Drop for BenchRing {
    fn drop(&mut self) {
        let _ = RingBuffer::remove(&self.0);
    }
}

// ---------------------------------------------------------------------------
// Producer only
// ---------------------------------------------------------------------------

fn bench_put_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_only");
    let ring = BenchRing::new(RING_BYTES);
    let mut producer = Producer::attach(&ring.0).expect("producer");

    for &(label, size) in SIZES {
        let record = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &record, |b, rec| {
            b.iter(|| producer.put(black_box(rec)).expect("put"));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Producer + one consumer, same thread
// ---------------------------------------------------------------------------

fn bench_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_get");
    let ring = BenchRing::new(RING_BYTES);
    let mut producer = Producer::attach(&ring.0).expect("producer");
    let mut consumer = Consumer::attach(&ring.0).expect("consumer");

    for &(label, size) in SIZES {
        let record = vec![0xCDu8; size];
        let mut out = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            b.iter(|| {
                producer.put(&record).expect("put");
                black_box(consumer.get(&mut out, sz).expect("get"));
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Several consumers: put space is recomputed across every slot
// ---------------------------------------------------------------------------

fn bench_put_get_lag(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_get_lag");
    let ring = BenchRing::new(RING_BYTES);
    let mut producer = Producer::attach(&ring.0).expect("producer");
    let mut readers: Vec<Consumer> =
        (0..3).map(|_| Consumer::attach(&ring.0).expect("consumer")).collect();

    for &(label, size) in &SIZES[..2] {
        let record = vec![0x11u8; size];
        let mut out = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            b.iter(|| {
                producer.put(&record).expect("put");
                for r in readers.iter_mut() {
                    black_box(r.get(&mut out, sz).expect("get"));
                }
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Wraparound: a small ring so most transfers split into two copies
// ---------------------------------------------------------------------------

fn bench_wrap(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrap");
    let ring = BenchRing::new(64 * 1024);
    let mut producer = Producer::attach(&ring.0).expect("producer");
    let mut consumer = Consumer::attach(&ring.0).expect("consumer");

    // 3 KiB + 1 never divides the ring evenly.
    let size = 3 * 1024 + 1;
    let record = vec![0x5Au8; size];
    let mut out = vec![0u8; size];
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("record_3k", |b| {
        b.iter(|| {
            producer.put(&record).expect("put");
            black_box(consumer.get(&mut out, size).expect("get"));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_put_only, bench_put_get, bench_put_get_lag, bench_wrap);
criterion_main!(benches);
