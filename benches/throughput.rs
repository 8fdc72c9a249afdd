//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use rangewatch_core::core::protocol::{
    decode_register_response, encode_envelope, encode_register_response, parse_envelope,
    FrameType, MeasurementEntry,
};
use rangewatch_core::core::smoother::{MeasurementSmoother, SmootherConfig};
use rangewatch_core::core::stream_reader::{encode_stream_frame, StreamReader};
use std::hint::black_box;
use std::io::Cursor;

fn entries(count: usize) -> Vec<MeasurementEntry> {
    (0..count)
        .map(|i| MeasurementEntry::new(0.5 + i as f32 * 0.01, (i * 37 % 1000) as u16))
        .collect()
}

fn codec_benchmark(c: &mut Criterion) {
    let payload = encode_envelope(&[0u8; 16], &entries(64)).unwrap();
    let response = encode_register_response(FrameType::ReadResponse, 0x06, 0x0000_0103);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("parse_envelope", |b| {
        b.iter(|| black_box(parse_envelope(black_box(&payload))))
    });

    group.bench_function("decode_register_response", |b| {
        b.iter(|| {
            black_box(decode_register_response(
                black_box(&response),
                FrameType::ReadResponse,
            ))
        })
    });

    group.finish();
}

fn stream_benchmark(c: &mut Criterion) {
    let frame = encode_stream_frame(&encode_envelope(&[], &entries(4)).unwrap()).unwrap();
    let mut wire = vec![0x00, 0x55];
    for _ in 0..100 {
        wire.extend(&frame);
    }

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("read_frames", |b| {
        b.iter(|| {
            let mut src = Cursor::new(black_box(&wire));
            let mut reader = StreamReader::default();
            while let Ok(frame) = reader.read_frame(&mut src) {
                black_box(frame);
            }
        })
    });

    group.bench_function("smooth_frames", |b| {
        let frame = entries(4);
        b.iter(|| {
            let mut smoother = MeasurementSmoother::new(SmootherConfig::new(10, 10)).unwrap();
            for _ in 0..100 {
                black_box(smoother.accept(black_box(&frame)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, codec_benchmark, stream_benchmark);
criterion_main!(benches);
