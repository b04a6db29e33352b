//! Error paths of the container and the bitstream.
//!
//! Every malformed input must come back as the matching error, never as a
//! panic or as partial output.

use zenvp8::vp8::Vp8Decoder;
use zenvp8::{
    decode_rgba, DecodeConfig, DecodeError, DecodeRequest, EncodeRequest, EncoderConfig, Limits,
    PixelLayout,
};

/// RIFF header (12 bytes) and `VP8 ` chunk header (8 bytes).
const VP8_OFFSET: usize = 20;

fn sample_webp() -> Vec<u8> {
    let (width, height) = (40u32, 24u32);
    let rgb: Vec<u8> = (0..width * height)
        .flat_map(|i| {
            let (x, y) = (i % width, i / width);
            [(x * 6) as u8, (y * 10) as u8, ((x + y) * 3) as u8]
        })
        .collect();
    EncodeRequest::new(
        &EncoderConfig::new().with_quality(80),
        &rgb,
        PixelLayout::Rgb8,
        width,
        height,
    )
    .encode()
    .unwrap()
}

#[test]
fn sample_decodes() {
    let (pixels, w, h) = decode_rgba(&sample_webp()).unwrap();
    assert_eq!((w, h), (40, 24));
    assert_eq!(pixels.len(), 40 * 24 * 4);
}

#[test]
fn any_flipped_magic_byte_is_invalid_magic() {
    let webp = sample_webp();
    for offset in 3..6 {
        for bit in 0..8 {
            let mut data = webp.clone();
            data[VP8_OFFSET + offset] ^= 1 << bit;
            match decode_rgba(&data) {
                Err(DecodeError::InvalidMagic(magic)) => {
                    assert_eq!(magic, data[VP8_OFFSET + 3..VP8_OFFSET + 6]);
                }
                other => panic!("byte {offset} bit {bit}: {other:?}"),
            }
        }
    }
}

/// Rewrites the 19 bit first partition length in the frame tag.
fn with_first_partition_size(vp8: &[u8], size: u32) -> Vec<u8> {
    let tag = u32::from(vp8[0]) | u32::from(vp8[1]) << 8 | u32::from(vp8[2]) << 16;
    let tag = (tag & 0x1f) | size << 5;
    let mut data = vp8.to_vec();
    data[..3].copy_from_slice(&tag.to_le_bytes()[..3]);
    data
}

fn first_partition_size(vp8: &[u8]) -> u32 {
    (u32::from(vp8[0]) | u32::from(vp8[1]) << 8 | u32::from(vp8[2]) << 16) >> 5
}

#[test]
fn first_partition_too_short_is_corrupt() {
    let webp = sample_webp();
    let vp8 = &webp[VP8_OFFSET..];
    let size = first_partition_size(vp8);
    assert!(size > 4);

    // empty: every header bool comes from past the end
    assert!(matches!(
        Vp8Decoder::decode_frame(&with_first_partition_size(vp8, 0)),
        Err(DecodeError::BitstreamCorruption)
    ));

    // one missing byte is stood in for by the implicit zero, two or more run out
    for short in 2..=4 {
        let data = with_first_partition_size(vp8, size - short);
        assert!(
            matches!(
                Vp8Decoder::decode_frame(&data),
                Err(DecodeError::BitstreamCorruption)
            ),
            "{short} bytes short"
        );
    }
}

#[test]
fn truncated_files_fail_cleanly() {
    let webp = sample_webp();
    for len in [0, 4, 11, 12, 19, VP8_OFFSET + 5, VP8_OFFSET + 9, webp.len() / 2] {
        let result = decode_rgba(&webp[..len]);
        assert!(result.is_err(), "{len} bytes decoded");
    }
}

#[test]
fn truncated_vp8_payload() {
    let webp = sample_webp();
    let vp8 = &webp[VP8_OFFSET..];
    assert!(matches!(
        Vp8Decoder::decode_frame(&vp8[..9]),
        Err(DecodeError::StreamTruncated)
    ));
}

#[test]
fn signatures_are_checked() {
    let mut riff = sample_webp();
    riff[0] = b'X';
    assert!(matches!(
        decode_rgba(&riff),
        Err(DecodeError::RiffSignatureInvalid(_))
    ));

    let mut webp = sample_webp();
    webp[8..12].copy_from_slice(b"WEBQ");
    assert!(matches!(
        decode_rgba(&webp),
        Err(DecodeError::WebpSignatureInvalid(_))
    ));
}

#[test]
fn lossless_chunk_is_unsupported() {
    let mut webp = sample_webp();
    webp[12..16].copy_from_slice(b"VP8L");
    assert!(matches!(
        decode_rgba(&webp),
        Err(DecodeError::UnsupportedFeature(_))
    ));
}

#[test]
fn limits_reject_large_images() {
    let webp = sample_webp();
    let config = DecodeConfig::new().with_limits(Limits::default().with_max_dimensions(32, 32));
    assert!(matches!(
        DecodeRequest::new(&config, &webp).decode_rgba(),
        Err(DecodeError::LimitExceeded(_))
    ));

    let config = DecodeConfig::new().with_limits(Limits::default().with_max_memory(1000));
    assert!(matches!(
        DecodeRequest::new(&config, &webp).decode_rgba(),
        Err(DecodeError::LimitExceeded(_))
    ));
}

#[test]
fn corrupted_payload_never_panics() {
    use rand::{Rng, SeedableRng};

    let webp = sample_webp();
    let mut rng = rand::rngs::StdRng::seed_from_u64(6386);
    for _ in 0..200 {
        let mut data = webp.clone();
        for _ in 0..rng.gen_range(1..8) {
            let i = rng.gen_range(VP8_OFFSET + 10..data.len());
            data[i] = rng.gen();
        }
        // any outcome but a panic is fine
        let _ = decode_rgba(&data);
    }
}
