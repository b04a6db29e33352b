//! Criterion benchmarks for decoding.
//!
//! Run with: cargo bench --bench decode_benchmark

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use zenvp8::vp8::Vp8Decoder;
use zenvp8::{DecodeConfig, DecodeRequest, EncodeRequest, EncoderConfig, PixelLayout, UpsamplingMethod};

/// Gradients with a repeating texture, roughly photo-like in cost.
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

fn make_webp(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let rgb = synthetic_rgb(width, height);
    let config = EncoderConfig::new().with_quality(quality);
    EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
        .encode()
        .expect("synthetic image encodes")
}

const SIZES: &[(u32, u32)] = &[(128, 128), (512, 384), (1024, 768)];

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &(width, height) in SIZES {
        let webp = make_webp(width, height, 75);
        let name = format!("{width}x{height}");
        group.throughput(Throughput::Elements(u64::from(width * height)));

        group.bench_with_input(BenchmarkId::new("rgba", &name), &webp, |b, data| {
            b.iter(|| zenvp8::decode_rgba(black_box(data)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("yuv420", &name), &webp, |b, data| {
            b.iter(|| zenvp8::decode_yuv420(black_box(data)).unwrap());
        });

        let config = DecodeConfig::new().with_upsampling(UpsamplingMethod::Simple);
        group.bench_with_input(BenchmarkId::new("rgba_simple", &name), &webp, |b, data| {
            b.iter(|| DecodeRequest::new(&config, black_box(data)).decode_rgba().unwrap());
        });
    }

    group.finish();
}

fn bench_quality(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_quality");
    let (width, height) = (512, 384);
    group.throughput(Throughput::Elements(u64::from(width * height)));

    for quality in [25, 75, 95] {
        let webp = make_webp(width, height, quality);
        // the bare VP8 payload skips the container and color conversion
        let vp8 = webp[20..].to_vec();
        group.bench_with_input(BenchmarkId::new("frame", quality), &vp8, |b, data| {
            b.iter(|| Vp8Decoder::decode_frame(black_box(data)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_quality);
criterion_main!(benches);
