//! Criterion benchmarks for encoding.
//!
//! Tracks performance across quality levels, partition counts and input
//! layouts.
//!
//! Run with: cargo bench --bench encode_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use zenvp8::{EncodeRequest, EncoderConfig, PixelLayout};

fn synthetic_rgb(width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let texture = ((x * 7 + y * 13) % 23) as u8;
            rgb.push((x * 255 / width) as u8 ^ texture);
            rgb.push((y * 255 / height) as u8);
            rgb.push(((x + y) / 2) as u8 ^ (texture << 2));
        }
    }
    rgb
}

fn bench_quality(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_quality");
    let (width, height) = (512, 384);
    let rgb = synthetic_rgb(width, height);
    group.throughput(Throughput::Elements(u64::from(width * height)));

    for quality in [25, 50, 75, 90] {
        let config = EncoderConfig::new().with_quality(quality);
        group.bench_with_input(BenchmarkId::new("rgb", quality), &rgb, |b, data| {
            b.iter(|| {
                EncodeRequest::new(&config, black_box(data), PixelLayout::Rgb8, width, height)
                    .encode()
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_layouts(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_layout");
    let (width, height) = (512, 384);
    let rgb = synthetic_rgb(width, height);
    let rgba: Vec<u8> = rgb
        .chunks_exact(3)
        .flat_map(|p| [p[0], p[1], p[2], 255])
        .collect();
    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
    let yuv: Vec<u8> = (0..width * height + 2 * cw * ch)
        .map(|i| (i % 251) as u8)
        .collect();
    group.throughput(Throughput::Elements(u64::from(width * height)));

    let config = EncoderConfig::new();
    for (name, data, layout) in [
        ("rgb8", &rgb, PixelLayout::Rgb8),
        ("rgba8", &rgba, PixelLayout::Rgba8),
        ("yuv420", &yuv, PixelLayout::Yuv420),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), data, |b, data| {
            b.iter(|| {
                EncodeRequest::new(&config, black_box(data), layout, width, height)
                    .encode()
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_partitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_partitions");
    let (width, height) = (1024, 768);
    let rgb = synthetic_rgb(width, height);
    group.throughput(Throughput::Elements(u64::from(width * height)));

    for partitions in [1, 4, 8] {
        let config = EncoderConfig::new().with_partitions(partitions);
        group.bench_with_input(BenchmarkId::new("rgb", partitions), &rgb, |b, data| {
            b.iter(|| {
                EncodeRequest::new(&config, black_box(data), PixelLayout::Rgb8, width, height)
                    .encode()
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_quality, bench_layouts, bench_partitions);
criterion_main!(benches);
