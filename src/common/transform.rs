//! The 4x4 block transforms: DCT and WHT in both directions.
//!
//! The inverse transforms must match every decoder bit for bit, so their
//! rounding is fixed. The forward transforms only need to invert them closely.

use core::array;

/// `sqrt(2) * cos(pi / 8) - 1` in 16.16 fixed point.
const COS_PI8_SQRT2_MINUS1: i64 = 20091;
/// `sqrt(2) * sin(pi / 8)` in 16.16 fixed point.
const SIN_PI8_SQRT2: i64 = 35468;

/// Products with the constants above need more than 32 bits.
#[inline(always)]
fn widen(block: &[i32], idx: usize) -> i64 {
    i64::from(block[idx])
}

#[inline(always)]
fn mul_cos(x: i64) -> i64 {
    x + ((x * COS_PI8_SQRT2_MINUS1) >> 16)
}

#[inline(always)]
fn mul_sin(x: i64) -> i64 {
    (x * SIN_PI8_SQRT2) >> 16
}

/// One 4-point inverse DCT butterfly.
#[inline(always)]
fn idct_1d([x0, x1, x2, x3]: [i64; 4]) -> [i64; 4] {
    let a = x0 + x2;
    let b = x0 - x2;
    let c = mul_sin(x1) - mul_cos(x3);
    let d = mul_cos(x1) + mul_sin(x3);
    [a + d, b + c, b - c, a - d]
}

/// One 4-point Walsh-Hadamard butterfly, its own inverse up to scale.
#[inline(always)]
fn wht_1d([x0, x1, x2, x3]: [i32; 4]) -> [i32; 4] {
    let a = x0 + x3;
    let b = x1 + x2;
    let c = x1 - x2;
    let d = x0 - x3;
    [a + b, c + d, a - b, d - c]
}

/// Inverse DCT of the first 16 coefficients, in place.
///
/// Columns go first. The row pass divides by 8, rounding half up.
pub(crate) fn idct4x4(block: &mut [i32]) {
    let block = &mut block[..16];

    for col in 0..4 {
        let out = idct_1d(array::from_fn(|k| i64::from(block[col + 4 * k])));
        for (k, v) in out.into_iter().enumerate() {
            block[col + 4 * k] = v as i32;
        }
    }

    for row in block.chunks_exact_mut(4) {
        let out = idct_1d(array::from_fn(|k| i64::from(row[k])));
        for (dst, v) in row.iter_mut().zip(out) {
            *dst = ((v + 4) >> 3) as i32;
        }
    }
}

/// Inverse WHT of the 16 luma DC coefficients, in place.
///
/// The row pass divides by 8 with a bias of 3.
pub(crate) fn iwht4x4(block: &mut [i32]) {
    let block = &mut block[..16];

    for col in 0..4 {
        let out = wht_1d(array::from_fn(|k| block[col + 4 * k]));
        for (k, v) in out.into_iter().enumerate() {
            block[col + 4 * k] = v;
        }
    }

    for row in block.chunks_exact_mut(4) {
        let out = wht_1d(array::from_fn(|k| row[k]));
        for (dst, v) in row.iter_mut().zip(out) {
            *dst = (v + 3) >> 3;
        }
    }
}

/// Forward walsh-hadamard transform of the 16 luma DC coefficients.
///
/// The second pass halves with round-to-nearest, ties away from zero.
pub(crate) fn wht4x4(block: &mut [i32; 16]) {
    for i in 0..4 {
        let a = widen(block, i * 4) + widen(block, i * 4 + 3);
        let b = widen(block, i * 4 + 1) + widen(block, i * 4 + 2);
        let c = widen(block, i * 4 + 1) - widen(block, i * 4 + 2);
        let d = widen(block, i * 4) - widen(block, i * 4 + 3);

        block[i * 4] = (a + b) as i32;
        block[i * 4 + 1] = (c + d) as i32;
        block[i * 4 + 2] = (a - b) as i32;
        block[i * 4 + 3] = (d - c) as i32;
    }

    for i in 0..4 {
        let a1 = widen(block, i) + widen(block, i + 12);
        let b1 = widen(block, i + 4) + widen(block, i + 8);
        let c1 = widen(block, i + 4) - widen(block, i + 8);
        let d1 = widen(block, i) - widen(block, i + 12);

        let a2 = a1 + b1;
        let b2 = c1 + d1;
        let c2 = a1 - b1;
        let d2 = d1 - c1;

        block[i] = ((a2 + a2.signum()) / 2) as i32;
        block[i + 4] = ((b2 + b2.signum()) / 2) as i32;
        block[i + 8] = ((c2 + c2.signum()) / 2) as i32;
        block[i + 12] = ((d2 + d2.signum()) / 2) as i32;
    }
}

/// Forward DCT, the inverse of [`idct4x4`] up to quantization.
pub(crate) fn dct4x4(block: &mut [i32; 16]) {
    // vertical
    for i in 0..4 {
        let a = (widen(block, i * 4) + widen(block, i * 4 + 3)) * 8;
        let b = (widen(block, i * 4 + 1) + widen(block, i * 4 + 2)) * 8;
        let c = (widen(block, i * 4 + 1) - widen(block, i * 4 + 2)) * 8;
        let d = (widen(block, i * 4) - widen(block, i * 4 + 3)) * 8;

        block[i * 4] = (a + b) as i32;
        block[i * 4 + 2] = (a - b) as i32;
        block[i * 4 + 1] = ((c * 2217 + d * 5352 + 14500) >> 12) as i32;
        block[i * 4 + 3] = ((d * 2217 - c * 5352 + 7500) >> 12) as i32;
    }

    // horizontal
    for i in 0..4 {
        let a = widen(block, i) + widen(block, i + 12);
        let b = widen(block, i + 4) + widen(block, i + 8);
        let c = widen(block, i + 4) - widen(block, i + 8);
        let d = widen(block, i) - widen(block, i + 12);

        block[i] = ((a + b + 7) >> 4) as i32;
        block[i + 8] = ((a - b + 7) >> 4) as i32;
        block[i + 4] = (((c * 2217 + d * 5352 + 12000) >> 16) + i64::from(d != 0)) as i32;
        block[i + 12] = ((d * 2217 - c * 5352 + 51000) >> 16) as i32;
    }
}
