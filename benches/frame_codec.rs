//! Benchmarks for the wire codecs and the built-in detector
//!
//! Covers the per-frame work on both sides of the link:
//! - Frame datagram encode/decode at several payload sizes
//! - Command stream encode/decode through `CommandCodec`
//! - `CenterBiasDetector::analyse` on a synthetic camera image
//!
//! Run: `cargo bench --features benchmark --bench frame_codec`

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rovelink::test_utils::loopback_config;
use rovelink::vision::{CenterBiasDetector, SteeringPolicy};
use rovelink::wire::{CommandCodec, Message, decode_frame, encode_frame};
use rovelink::{Command, Frame, SyntheticCamera};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn bench_frame_datagram(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_datagram");

    for (width, height) in [(64, 48), (160, 120), (320, 180)] {
        let camera = SyntheticCamera::with_size(20, width, height);
        let frame = Frame::new(7, 1_000, 1_700_000_000_000_000, camera.render(3));
        let mut datagram = Vec::new();
        encode_frame(&frame, &mut datagram);
        group.throughput(Throughput::Bytes(datagram.len() as u64));

        let label = format!("{width}x{height}");
        group.bench_with_input(BenchmarkId::new("encode", &label), &frame, |b, frame| {
            let mut out = Vec::with_capacity(datagram.len());
            b.iter(|| {
                encode_frame(black_box(frame), &mut out);
                black_box(out.len())
            })
        });
        group.bench_with_input(BenchmarkId::new("decode", &label), &datagram, |b, datagram| {
            b.iter(|| black_box(decode_frame(black_box(datagram)).expect("valid datagram")))
        });
    }

    group.finish();
}

fn bench_command_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_stream");
    let message = Message::Command(Command::new(3, 42, 0.5, -0.25));

    group.bench_function("encode", |b| {
        let mut codec = CommandCodec;
        let mut out = BytesMut::with_capacity(64);
        b.iter(|| {
            out.clear();
            codec.encode(black_box(message), &mut out).expect("encodable");
            black_box(out.len())
        })
    });

    let mut encoded = BytesMut::new();
    CommandCodec.encode(message, &mut encoded).expect("encodable");
    group.bench_function("decode", |b| {
        let mut codec = CommandCodec;
        b.iter(|| {
            let mut src = encoded.clone();
            black_box(codec.decode(&mut src).expect("decodable"))
        })
    });

    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let camera = SyntheticCamera::new(20);
    let image = camera.render(5);
    let detector = CenterBiasDetector::new(SyntheticCamera::DEFAULT_WIDTH);
    let policy = SteeringPolicy::new(loopback_config().policy);

    let mut group = c.benchmark_group("detection");
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("analyse", |b| b.iter(|| black_box(detector.analyse(black_box(&image)))));

    group.bench_function("analyse_and_steer", |b| {
        b.iter(|| black_box(policy.velocity_and_steering(&detector.analyse(black_box(&image)))))
    });
    group.finish();
}

criterion_group!(benches, bench_frame_datagram, bench_command_stream, bench_detection);
criterion_main!(benches);
