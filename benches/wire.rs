//! Criterion benchmarks for envelope encoding and frame reassembly.
//!
//! Run with:
//!   cargo bench --bench wire

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use neurobridge::prelude::*;
use neurobridge::schema::StepRecord;
use neurobridge::wire::{encode_frame, DEFAULT_MAX_FRAME_BYTES};

fn steps_message(records: usize, width: usize) -> Message {
    let records = (0..records as u64)
        .map(|step| {
            let mut parameters = BTreeMap::new();
            parameters.insert(
                "probeable.decoded_output".to_string(),
                Sample::Vector((0..width).map(|i| (step as f64 + i as f64).sin()).collect()),
            );
            StepRecord {
                step,
                node_name: "ens".to_string(),
                parameters,
            }
        })
        .collect();
    Message::SimulationSteps(records)
}

fn bench_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for records in [10usize, 100, 1000].iter() {
        let msg = steps_message(*records, 16);
        let payload = msg.to_payload().expect("encode");
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", records), &msg, |b, msg| {
            b.iter(|| black_box(msg.to_payload().map(|p| p.len()).ok()))
        });
        group.bench_with_input(BenchmarkId::new("decode", records), &payload, |b, payload| {
            b.iter(|| black_box(Message::from_payload(payload).is_ok()))
        });
    }

    group.finish();
}

/// Frames arriving in small chunks, as a slow socket would deliver them.
fn bench_frame_buffer(c: &mut Criterion) {
    let payload = steps_message(100, 16).to_payload().expect("encode");
    let frame = encode_frame(&payload).expect("frame");
    let stream: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 8).collect();

    c.bench_function("frame_buffer_chunked_8_frames", |b| {
        b.iter(|| {
            let mut buf = FrameBuffer::new(DEFAULT_MAX_FRAME_BYTES);
            let mut bytes = 0;
            for chunk in stream.chunks(1500) {
                buf.extend(chunk);
                while let Ok(Some(f)) = buf.next_frame() {
                    bytes += f.len();
                }
            }
            black_box(bytes)
        })
    });
}

criterion_group!(benches, bench_encode_decode, bench_frame_buffer);
criterion_main!(benches);
