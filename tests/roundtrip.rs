//! Encode then decode through the public API.
//!
//! Checks that the encoder's output is a valid lossy WebP file, that the
//! decoder reproduces the encoder's own reconstruction bit for bit, and that
//! the quality setting moves size and fidelity the right way.

use rand::{Rng, SeedableRng};
use zenvp8::vp8::Vp8Decoder;
use zenvp8::{
    decode_rgb, decode_rgba, decode_yuv420, DecodeConfig, DecodeRequest, EncodeRequest,
    EncoderConfig, ImageInfo, PixelLayout, UpsamplingMethod,
};

/// Smooth color ramps with a little noise, so every predictor gets used.
fn test_image(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let noise: i32 = rng.gen_range(-6..=6);
            let r = (x * 255 / width.max(1)) as i32 + noise;
            let g = (y * 255 / height.max(1)) as i32 - noise;
            let b = ((x + y) * 2 % 256) as i32;
            rgb.extend([r, g, b].map(|c| c.clamp(0, 255) as u8));
        }
    }
    rgb
}

fn psnr(a: &[u8], b: &[u8]) -> f64 {
    assert_eq!(a.len(), b.len());
    let mse = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        / a.len() as f64;
    if mse == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (255.0 * 255.0 / mse).log10()
}

#[test]
fn rgb_round_trip_keeps_dimensions_and_quality() {
    for (width, height) in [(1, 1), (16, 16), (17, 9), (64, 48), (100, 37)] {
        let rgb = test_image(width, height, u64::from(width * 1000 + height));
        let config = EncoderConfig::new().with_quality(90);
        let webp = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
            .encode()
            .unwrap();

        assert_eq!(&webp[..4], b"RIFF");
        assert_eq!(&webp[8..16], b"WEBPVP8 ");
        let riff_size = u32::from_le_bytes(webp[4..8].try_into().unwrap()) as usize;
        assert_eq!(riff_size + 8, webp.len());

        let (decoded, w, h) = decode_rgb(&webp).unwrap();
        assert_eq!((w, h), (width, height));
        assert_eq!(decoded.len(), rgb.len());
        if width * height >= 256 {
            let quality = psnr(&rgb, &decoded);
            assert!(quality > 28.0, "{width}x{height}: {quality:.2} dB");
        }
    }
}

#[test]
fn rgba_input_drops_alpha() {
    let (width, height) = (24, 20);
    let rgb = test_image(width, height, 7);
    let rgba: Vec<u8> = rgb
        .chunks_exact(3)
        .flat_map(|p| [p[0], p[1], p[2], 17])
        .collect();

    let config = EncoderConfig::new();
    let from_rgb = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
        .encode()
        .unwrap();
    let from_rgba = EncodeRequest::new(&config, &rgba, PixelLayout::Rgba8, width, height)
        .encode()
        .unwrap();
    assert_eq!(from_rgb, from_rgba);

    let (decoded, _, _) = decode_rgba(&from_rgba).unwrap();
    assert!(decoded.chunks_exact(4).all(|p| p[3] == 255));
}

#[test]
fn decoder_matches_encoder_reconstruction() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    for (width, height) in [(33, 47), (80, 16), (129, 65)] {
        for partitions in [1, 2, 8] {
            let quality = rng.gen_range(0..=100);
            let config = EncoderConfig::new()
                .with_quality(quality)
                .with_partitions(partitions)
                .with_simple_filter(rng.gen())
                .with_sharpness(rng.gen_range(0..=7));
            let rgb = test_image(width, height, rng.gen());
            let encoded = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
                .encode_frame()
                .unwrap();

            let decoded = Vp8Decoder::decode_frame(&encoded.data).unwrap();
            assert_eq!(
                decoded, encoded.reconstruction,
                "{width}x{height} q{quality} {partitions} partitions"
            );
            assert_eq!(encoded.stats.partition_bytes.len(), usize::from(partitions));
            assert_eq!(encoded.stats.coded_size as usize, encoded.data.len());
        }
    }
}

#[test]
fn gray_macroblock_decodes_within_one_step() {
    // Y = U = V = 128
    let yuv = vec![128u8; 16 * 16 + 2 * 8 * 8];
    let config = EncoderConfig::new().with_quality(75);
    let webp = EncodeRequest::new(&config, &yuv, PixelLayout::Yuv420, 16, 16)
        .encode()
        .unwrap();

    let planes = decode_yuv420(&webp).unwrap();
    assert_eq!((planes.y_width, planes.y_height), (16, 16));
    assert_eq!((planes.uv_width, planes.uv_height), (8, 8));
    // the quantizer step at quality 75 is far above one level
    for &p in planes.y.iter().chain(&planes.u).chain(&planes.v) {
        assert!(p.abs_diff(128) <= 1, "{p}");
    }
}

#[test]
fn yuv_input_round_trip() {
    let (width, height) = (35u32, 19u32);
    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
    let mut yuv = Vec::new();
    for y in 0..height {
        for x in 0..width {
            yuv.push((40 + x * 4 + y) as u8);
        }
    }
    yuv.extend((0..cw * ch).map(|i| (100 + i % 30) as u8));
    yuv.extend((0..cw * ch).map(|i| (150 - i % 20) as u8));

    let config = EncoderConfig::new().with_quality(95);
    let webp = EncodeRequest::new(&config, &yuv, PixelLayout::Yuv420, width, height)
        .encode()
        .unwrap();
    let planes = decode_yuv420(&webp).unwrap();
    assert_eq!(planes.y.len(), (width * height) as usize);
    assert_eq!(planes.u.len(), (cw * ch) as usize);
    let luma = &yuv[..(width * height) as usize];
    assert!(psnr(luma, &planes.y) > 35.0);
}

#[test]
fn higher_quality_is_larger_and_closer() {
    let (width, height) = (96, 64);
    let rgb = test_image(width, height, 3);

    let mut previous: Option<(usize, f64)> = None;
    for quality in [10, 50, 90] {
        let config = EncoderConfig::new().with_quality(quality);
        let webp = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
            .encode()
            .unwrap();
        let (decoded, _, _) = decode_rgb(&webp).unwrap();
        let quality_db = psnr(&rgb, &decoded);

        if let Some((size, db)) = previous {
            assert!(webp.len() > size, "q{quality}: {} <= {size}", webp.len());
            assert!(quality_db > db, "q{quality}: {quality_db:.2} <= {db:.2}");
        }
        previous = Some((webp.len(), quality_db));
    }
}

#[test]
fn stats_describe_the_frame() {
    let (width, height) = (48, 32);
    let rgb = test_image(width, height, 11);
    let config = EncoderConfig::new().with_quality(50);
    let (webp, stats) = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
        .encode_with_stats()
        .unwrap();

    assert_eq!(stats.block_count, 3 * 2);
    assert!(stats.block_count_skip <= stats.block_count);
    assert_eq!(stats.luma_mode_counts.iter().sum::<u32>(), stats.block_count);
    // the top-left macroblock can only use DC
    assert!(stats.luma_mode_counts[0] >= 1);
    assert_eq!(stats.quant_index, config.quant_index());
    assert_eq!(webp.len(), 20 + stats.coded_size as usize + stats.coded_size as usize % 2);
    assert!(stats.psnr.iter().all(|&p| p > 20.0));
}

#[test]
fn both_upsamplers_keep_a_flat_color() {
    let (width, height) = (20, 20);
    let color = [60u8, 120, 200];
    let rgb: Vec<u8> = (0..width * height).flat_map(|_| color).collect();
    let config = EncoderConfig::new().with_quality(100);
    let webp = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, width, height)
        .encode()
        .unwrap();

    for upsampling in [UpsamplingMethod::Bilinear, UpsamplingMethod::Simple] {
        let config = DecodeConfig::new().with_upsampling(upsampling);
        let (decoded, _, _) = DecodeRequest::new(&config, &webp).decode_rgb().unwrap();
        for p in decoded.chunks_exact(3) {
            for (&got, &want) in p.iter().zip(&color) {
                assert!(got.abs_diff(want) <= 4, "{upsampling:?}: {p:?}");
            }
        }
    }

    let info = ImageInfo::from_webp(&webp).unwrap();
    assert_eq!((info.width, info.height), (width, height));
    assert!(!info.has_alpha);
    assert!(!info.is_extended);
}

#[cfg(feature = "std")]
#[test]
fn encode_to_writer() {
    let rgb = test_image(16, 16, 5);
    let config = EncoderConfig::new();
    let mut out = Vec::new();
    EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, 16, 16)
        .encode_to(&mut out)
        .unwrap();
    let direct = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, 16, 16)
        .encode()
        .unwrap();
    assert_eq!(out, direct);
}
