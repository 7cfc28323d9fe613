//! Benchmarks for the ITM decode hot path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use swotrace_rs::{ChannelRegistry, ItmDecoder, SampleMap, TraceStore};

/// A realistic frame: a mix of 1-byte stimulus packets on two channels
fn stimulus_frame() -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    let text = b"cycle=12345 temp=23.5\n";
    for (i, &byte) in text.iter().enumerate() {
        let channel = (i % 2) as u8;
        frame.push(0x01 | (channel << 3));
        frame.push(byte);
    }
    frame
}

/// A profile-mode frame full of PC samples
fn sample_frame() -> Vec<u8> {
    let mut frame = Vec::with_capacity(64);
    for i in 0..12u32 {
        frame.push(0x17);
        frame.extend_from_slice(&(0x0800_0000 + i * 24).to_le_bytes());
    }
    frame
}

fn bench_text_decode(c: &mut Criterion) {
    let frame = stimulus_frame();
    let mut group = c.benchmark_group("text_decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("frame_to_store", |b| {
        let mut registry = ChannelRegistry::new();
        registry.set_enabled(1, true);
        b.iter_batched(
            || (ItmDecoder::new(), TraceStore::new()),
            |(mut decoder, mut store)| {
                let _ = decoder.decode_text_frame(black_box(&frame), &mut |channel, payload| {
                    if registry.is_enabled(channel as usize) {
                        store.append_text(channel, payload, 1.0);
                    }
                });
                store
            },
            criterion::BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_profile_decode(c: &mut Criterion) {
    let frame = sample_frame();
    let mut group = c.benchmark_group("profile_decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("frame_to_histogram", |b| {
        let mut decoder = ItmDecoder::new();
        let mut samples = SampleMap::new(0x0800_0000, 0x0810_0000);
        b.iter(|| decoder.decode_profile_frame(black_box(&frame), &mut samples));
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut store = TraceStore::new();
    for i in 0..10_000 {
        store.append_text(0, format!("line number {}\n", i).as_bytes(), 1.0 + i as f64);
    }

    c.bench_function("find_case_insensitive_10k", |b| {
        b.iter(|| store.find(black_box("NUMBER 9999"), None));
    });
}

criterion_group!(benches, bench_text_decode, bench_profile_decode, bench_search);
criterion_main!(benches);
