//! Conversions between interleaved RGB(A) pixels and VP8's planar YUV 4:2:0.
//!
//! The frame planes are macroblock aligned: luma rows are `16 * mbwidth`
//! bytes apart and chroma rows `8 * mbwidth`. Only the visible
//! `width x height` area is converted to RGB.
//!
//! Chroma is stored at half resolution in both directions. Simple upsampling
//! gives each 2x2 pixel quad the chroma sample it was averaged from. Fancy
//! upsampling (libwebp's default) interpolates between the four nearest
//! samples with weights 9/3/3/1, e.g. the pixel one down and one right of the
//! origin gets `(9*u0 + 3*u1 + 3*u2 + u3 + 8) / 16`. Samples past the edge
//! of the plane are mirrored from the nearest row or column.
//!
//! All coefficients are libwebp's fixed point ones so that the output is
//! bit-exact with `dwebp`.

use alloc::vec;
use alloc::vec::Vec;

/// `_mm_mulhi_epu16` emulation
fn mulhi(v: u8, coeff: u16) -> i32 {
    ((u32::from(v) * u32::from(coeff)) >> 8) as i32
}

// Clippy suggests the clamp method, but it seems to optimize worse as of rustc 1.82.0 nightly.
#[allow(clippy::manual_clamp)]
fn clip(v: i32) -> u8 {
    const YUV_FIX2: i32 = 6;
    (v >> YUV_FIX2).max(0).min(255) as u8
}

#[inline(always)]
fn yuv_to_r(y: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(v, 26149) - 14234)
}

#[inline(always)]
fn yuv_to_g(y: u8, u: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) - mulhi(u, 6419) - mulhi(v, 13320) + 8708)
}

#[inline(always)]
fn yuv_to_b(y: u8, u: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(u, 33050) - 17685)
}

/// Writes one pixel. Four byte pixels get an opaque alpha.
#[inline]
fn set_pixel<const BPP: usize>(px: &mut [u8], y: u8, u: u8, v: u8) {
    px[0] = yuv_to_r(y, v);
    px[1] = yuv_to_g(y, u, v);
    px[2] = yuv_to_b(y, u);
    if BPP == 4 {
        px[3] = 255;
    }
}

#[inline]
fn fancy_chroma(main: u8, secondary1: u8, secondary2: u8, tertiary: u8) -> u8 {
    let val0 = u16::from(main);
    let val1 = u16::from(secondary1);
    let val2 = u16::from(secondary2);
    let val3 = u16::from(tertiary);
    ((9 * val0 + 3 * val1 + 3 * val2 + val3 + 8) / 16) as u8
}

/// Fills `buffer` (`width * height * BPP` bytes) from the planes with
/// bilinear chroma upsampling.
pub(crate) fn fill_rgb_buffer_fancy<const BPP: usize>(
    buffer: &mut [u8],
    y_buffer: &[u8],
    u_buffer: &[u8],
    v_buffer: &[u8],
    width: usize,
    height: usize,
    buffer_width: usize,
) {
    // buffer width is a multiple of 16 so no div_ceil here
    let chroma_stride = buffer_width / 2;
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    let row_bytes = width * BPP;

    for (y, out) in buffer.chunks_exact_mut(row_bytes).take(height).enumerate() {
        let y_row = &y_buffer[y * buffer_width..][..width];
        // Even rows below the first lean on the chroma row above them, odd
        // rows on the one below. The first and last rows only have one.
        let near = y / 2;
        let far = if y == 0 {
            0
        } else if y % 2 == 1 {
            near + 1
        } else {
            near - 1
        };
        let near = near.min(chroma_height - 1) * chroma_stride;
        let far = far.min(chroma_height - 1) * chroma_stride;
        fill_row_fancy::<BPP>(
            out,
            y_row,
            &u_buffer[near..][..chroma_width],
            &u_buffer[far..][..chroma_width],
            &v_buffer[near..][..chroma_width],
            &v_buffer[far..][..chroma_width],
        );
    }
}

/// One output row from its nearest chroma row and the second nearest one.
fn fill_row_fancy<const BPP: usize>(
    out: &mut [u8],
    y_row: &[u8],
    u_near: &[u8],
    u_far: &[u8],
    v_near: &[u8],
    v_far: &[u8],
) {
    let last = u_near.len() - 1;

    for (x, (px, &y)) in out.chunks_exact_mut(BPP).zip(y_row).enumerate() {
        // pixel 2k-1 and 2k lie between chroma columns k-1 and k
        let main = x / 2;
        let side = if x == 0 {
            0
        } else if x % 2 == 1 {
            (main + 1).min(last)
        } else {
            main - 1
        };
        let main = main.min(last);

        let u = fancy_chroma(u_near[main], u_near[side], u_far[main], u_far[side]);
        let v = fancy_chroma(v_near[main], v_near[side], v_far[main], v_far[side]);
        set_pixel::<BPP>(px, y, u, v);
    }
}

/// Fills `buffer` from the planes using the nearest chroma sample, like
/// `dwebp -nofancy`.
pub(crate) fn fill_rgb_buffer_simple<const BPP: usize>(
    buffer: &mut [u8],
    y_buffer: &[u8],
    u_buffer: &[u8],
    v_buffer: &[u8],
    width: usize,
    height: usize,
    buffer_width: usize,
) {
    let chroma_stride = buffer_width / 2;
    let chroma_width = width.div_ceil(2);

    for (y, out) in buffer.chunks_exact_mut(width * BPP).take(height).enumerate() {
        let y_row = &y_buffer[y * buffer_width..][..width];
        let u_row = &u_buffer[(y / 2) * chroma_stride..][..chroma_width];
        let v_row = &v_buffer[(y / 2) * chroma_stride..][..chroma_width];

        // pixel pairs share their chroma sample
        for (((pair, y_pair), &u), &v) in out
            .chunks_mut(2 * BPP)
            .zip(y_row.chunks(2))
            .zip(u_row)
            .zip(v_row)
        {
            for (px, &y) in pair.chunks_exact_mut(BPP).zip(y_pair) {
                set_pixel::<BPP>(px, y, u, v);
            }
        }
    }
}

// constants used for rgb -> yuv conversion, using ones from libwebp
const YUV_FIX: i32 = 16;
const YUV_HALF: i32 = 1 << (YUV_FIX - 1);

/// Macroblock-aligned planes of an encoder input.
pub(crate) struct YuvImage {
    pub(crate) y: Vec<u8>,
    pub(crate) u: Vec<u8>,
    pub(crate) v: Vec<u8>,
}

/// Converts RGB8 (`BPP = 3`) or RGBA8 (`BPP = 4`) pixels to YUV 4:2:0.
///
/// Each chroma sample averages its 2x2 pixel quad; at odd right and bottom
/// edges the last column and row stand in for the missing ones. Alpha is
/// ignored. The planes are padded to whole macroblocks by replicating the
/// last visible row and column.
pub(crate) fn convert_image_yuv<const BPP: usize>(
    image_data: &[u8],
    width: usize,
    height: usize,
) -> YuvImage {
    let mb_width = width.div_ceil(16);
    let mb_height = height.div_ceil(16);
    let luma_stride = 16 * mb_width;
    let chroma_stride = 8 * mb_width;
    let mut y_bytes = vec![0u8; luma_stride * 16 * mb_height];
    let mut u_bytes = vec![0u8; chroma_stride * 8 * mb_height];
    let mut v_bytes = vec![0u8; chroma_stride * 8 * mb_height];

    let pixel = |x: usize, y: usize| rgb_at::<BPP>(image_data, width, x, y);

    for y in 0..height {
        for x in 0..width {
            y_bytes[y * luma_stride + x] = rgb_to_y(pixel(x, y));
        }
    }

    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    for cy in 0..chroma_height {
        let y0 = 2 * cy;
        let y1 = (y0 + 1).min(height - 1);
        for cx in 0..chroma_width {
            let x0 = 2 * cx;
            let x1 = (x0 + 1).min(width - 1);
            let quad = [pixel(x0, y0), pixel(x1, y0), pixel(x0, y1), pixel(x1, y1)];
            u_bytes[cy * chroma_stride + cx] = rgb_to_u_avg(quad);
            v_bytes[cy * chroma_stride + cx] = rgb_to_v_avg(quad);
        }
    }

    pad_plane(&mut y_bytes, luma_stride, width, height);
    pad_plane(&mut u_bytes, chroma_stride, chroma_width, chroma_height);
    pad_plane(&mut v_bytes, chroma_stride, chroma_width, chroma_height);

    YuvImage {
        y: y_bytes,
        u: u_bytes,
        v: v_bytes,
    }
}

/// Copies packed `[Y][U][V]` 4:2:0 input into macroblock-aligned planes.
///
/// The caller has checked that `data` holds `width * height` luma bytes
/// followed by two `ceil(width / 2) x ceil(height / 2)` chroma planes.
pub(crate) fn import_yuv420(data: &[u8], width: usize, height: usize) -> YuvImage {
    let mb_width = width.div_ceil(16);
    let mb_height = height.div_ceil(16);
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);

    let (y_src, chroma) = data.split_at(width * height);
    let (u_src, v_src) = chroma.split_at(chroma_width * chroma_height);

    let copy_plane = |src: &[u8], w: usize, h: usize, stride: usize, rows: usize| {
        let mut plane = vec![0u8; stride * rows];
        for (dst, src) in plane.chunks_exact_mut(stride).zip(src.chunks_exact(w)).take(h) {
            dst[..w].copy_from_slice(src);
        }
        pad_plane(&mut plane, stride, w, h);
        plane
    };

    YuvImage {
        y: copy_plane(y_src, width, height, 16 * mb_width, 16 * mb_height),
        u: copy_plane(u_src, chroma_width, chroma_height, 8 * mb_width, 8 * mb_height),
        v: copy_plane(v_src, chroma_width, chroma_height, 8 * mb_width, 8 * mb_height),
    }
}

/// Replicates the last visible column to the right and the last visible row
/// downwards to fill a macroblock-aligned plane.
fn pad_plane(plane: &mut [u8], stride: usize, width: usize, height: usize) {
    for row in plane.chunks_exact_mut(stride).take(height) {
        let last = row[width - 1];
        row[width..].fill(last);
    }

    let (visible, padding) = plane.split_at_mut(height * stride);
    let last_row = &visible[(height - 1) * stride..];
    for row in padding.chunks_exact_mut(stride) {
        row.copy_from_slice(last_row);
    }
}

fn rgb_at<const BPP: usize>(image_data: &[u8], width: usize, x: usize, y: usize) -> &[u8] {
    &image_data[(y * width + x) * BPP..][..3]
}

// values come from libwebp
// Y = 0.2568 * R + 0.5041 * G + 0.0979 * B + 16
// U = -0.1482 * R - 0.2910 * G + 0.4392 * B + 128
// V = 0.4392 * R - 0.3678 * G - 0.0714 * B + 128

// this is converted to 16 bit fixed point by multiplying by 2^16
// and shifting back

fn rgb_to_y(rgb: &[u8]) -> u8 {
    let luma = 16839 * i32::from(rgb[0]) + 33059 * i32::from(rgb[1]) + 6420 * i32::from(rgb[2]);
    ((luma + YUV_HALF + (16 << YUV_FIX)) >> YUV_FIX) as u8
}

// the quad sum keeps two extra bits of precision until the final shift
fn rgb_to_u_avg(quad: [&[u8]; 4]) -> u8 {
    let sum: i32 = quad.iter().map(|rgb| rgb_to_u_raw(rgb)).sum();
    ((sum + (YUV_HALF << 2)) >> (YUV_FIX + 2)) as u8
}

fn rgb_to_v_avg(quad: [&[u8]; 4]) -> u8 {
    let sum: i32 = quad.iter().map(|rgb| rgb_to_v_raw(rgb)).sum();
    ((sum + (YUV_HALF << 2)) >> (YUV_FIX + 2)) as u8
}

fn rgb_to_u_raw(rgb: &[u8]) -> i32 {
    -9719 * i32::from(rgb[0]) - 19081 * i32::from(rgb[1])
        + 28800 * i32::from(rgb[2])
        + (128 << YUV_FIX)
}

fn rgb_to_v_raw(rgb: &[u8]) -> i32 {
    28800 * i32::from(rgb[0]) - 24116 * i32::from(rgb[1]) - 4684 * i32::from(rgb[2])
        + (128 << YUV_FIX)
}
