//! Methods related to vp8 prediction used in both the decoder and the encoder
//!
//! Prediction works on small bordered work buffers: row 0 holds the pixels
//! above the block (plus the above-right pixels for luma), column 0 holds the
//! pixels to its left and `[0]` is the above-left corner. The block itself
//! starts at `(1, 1)`.

use super::types::{ChromaMode, IntraMode, LumaMode};

/// Luma prediction block stride.
/// Layout: 1 border pixel + 16 luma pixels + 4 above-right + padding to 32
pub(crate) const LUMA_STRIDE: usize = 32;
/// Luma prediction block size: 17 rows (1 border + 16) x 32 byte stride
pub(crate) const LUMA_BLOCK_SIZE: usize = LUMA_STRIDE * (1 + 16);

/// Chroma prediction block stride.
pub(crate) const CHROMA_STRIDE: usize = 32;
/// Chroma prediction block size: 9 rows (1 border + 8) x 32 byte stride
pub(crate) const CHROMA_BLOCK_SIZE: usize = CHROMA_STRIDE * (8 + 1);

/// Value used for the row above the first macroblock row.
pub(crate) const BORDER_ABOVE: u8 = 127;
/// Value used for the column left of the first macroblock column.
pub(crate) const BORDER_LEFT: u8 = 129;

/// Creates a luma block with border used for luma prediction.
///
/// `top` is the bottom row of the previous macroblock row for the whole
/// frame width, `left` is the corner pixel followed by the 16 pixels of the
/// right column of the previous macroblock.
pub(crate) fn create_border_luma(
    mbx: usize,
    mby: usize,
    mbw: usize,
    top: &[u8],
    left: &[u8],
) -> [u8; LUMA_BLOCK_SIZE] {
    let stride = LUMA_STRIDE;
    let mut ws = [0u8; LUMA_BLOCK_SIZE];

    // A
    {
        let above = &mut ws[1..stride];
        if mby == 0 {
            above.fill(BORDER_ABOVE);
        } else {
            above[..16].copy_from_slice(&top[mbx * 16..][..16]);

            if mbx == mbw - 1 {
                let last = top[mbx * 16 + 15];
                above[16..].fill(last);
            } else {
                for (above, &top) in above[16..].iter_mut().zip(&top[mbx * 16 + 16..]) {
                    *above = top;
                }
            }
        }
    }

    // Subblocks on the right column of rows 1-3 see the macroblock's above-right pixels
    for i in 17usize..21 {
        ws[4 * stride + i] = ws[i];
        ws[8 * stride + i] = ws[i];
        ws[12 * stride + i] = ws[i];
    }

    // L
    for (i, &l) in left[1..17].iter().enumerate() {
        ws[(i + 1) * stride] = if mbx == 0 { BORDER_LEFT } else { l };
    }

    // P
    ws[0] = corner(mbx, mby, left);

    ws
}

/// Creates a chroma block with border used for chroma prediction
pub(crate) fn create_border_chroma(
    mbx: usize,
    mby: usize,
    top: &[u8],
    left: &[u8],
) -> [u8; CHROMA_BLOCK_SIZE] {
    let stride: usize = CHROMA_STRIDE;
    let mut chroma_block = [0u8; CHROMA_BLOCK_SIZE];

    // above
    if mby == 0 {
        chroma_block[1..stride].fill(BORDER_ABOVE);
    } else {
        chroma_block[1..][..8].copy_from_slice(&top[mbx * 8..][..8]);
    }

    // left
    for (y, &l) in left[1..9].iter().enumerate() {
        chroma_block[(y + 1) * stride] = if mbx == 0 { BORDER_LEFT } else { l };
    }

    chroma_block[0] = corner(mbx, mby, left);

    chroma_block
}

fn corner(mbx: usize, mby: usize, left: &[u8]) -> u8 {
    if mby == 0 {
        BORDER_ABOVE
    } else if mbx == 0 {
        BORDER_LEFT
    } else {
        left[0]
    }
}

/// Stores the right column and bottom row of a reconstructed block as the
/// borders of the next blocks. `size` is 16 for luma and 8 for chroma.
pub(crate) fn update_borders(
    ws: &[u8],
    size: usize,
    stride: usize,
    mbx: usize,
    top: &mut [u8],
    left: &mut [u8],
) {
    // the above-right of this block is the corner of the next one
    left[0] = ws[size];
    for (i, l) in left[1..=size].iter_mut().enumerate() {
        *l = ws[(i + 1) * stride + size];
    }
    top[mbx * size..][..size].copy_from_slice(&ws[size * stride + 1..][..size]);
}

/// Adds a 4x4 residual onto the prediction at `(x0, y0)`, saturating to `0..=255`.
#[inline(always)]
pub(crate) fn add_residue(
    pblock: &mut [u8],
    rblock: &[i32; 16],
    y0: usize,
    x0: usize,
    stride: usize,
) {
    let mut pos = y0 * stride + x0;
    for row in rblock.chunks_exact(4) {
        for (p, &a) in pblock[pos..][..4].iter_mut().zip(row) {
            *p = (a + i32::from(*p)).clamp(0, 255) as u8;
        }
        pos += stride;
    }
}

/// Fills the 16x16 luma area of `ws` for a whole-block mode.
///
/// `LumaMode::B` leaves the area untouched; its subblocks are predicted one
/// at a time with [`predict_subblock`] as the residuals get added.
pub(crate) fn predict_luma(ws: &mut [u8], mode: LumaMode, mbx: usize, mby: usize) {
    let stride = LUMA_STRIDE;
    match mode {
        LumaMode::DC => predict_dcpred(ws, 16, stride, mby != 0, mbx != 0),
        LumaMode::V => predict_vpred(ws, 16, 1, 1, stride),
        LumaMode::H => predict_hpred(ws, 16, 1, 1, stride),
        LumaMode::TM => predict_tmpred(ws, 16, 1, 1, stride),
        LumaMode::B => {}
    }
}

/// Fills the 8x8 area of a chroma work buffer.
pub(crate) fn predict_chroma(ws: &mut [u8], mode: ChromaMode, mbx: usize, mby: usize) {
    let stride = CHROMA_STRIDE;
    match mode {
        ChromaMode::DC => predict_dcpred(ws, 8, stride, mby != 0, mbx != 0),
        ChromaMode::V => predict_vpred(ws, 8, 1, 1, stride),
        ChromaMode::H => predict_hpred(ws, 8, 1, 1, stride),
        ChromaMode::TM => predict_tmpred(ws, 8, 1, 1, stride),
    }
}

fn avg3(left: u8, this: u8, right: u8) -> u8 {
    let avg = (u16::from(left) + 2 * u16::from(this) + u16::from(right) + 2) >> 2;
    avg as u8
}

fn avg2(this: u8, right: u8) -> u8 {
    let avg = (u16::from(this) + u16::from(right) + 1) >> 1;
    avg as u8
}

fn predict_vpred(a: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    // copies the row above to every row of the block
    let (above, curr) = a.split_at_mut(stride * y0);
    let above_slice = &above[(y0 - 1) * stride + x0..][..size];

    for row in curr.chunks_exact_mut(stride).take(size) {
        row[x0..][..size].copy_from_slice(above_slice);
    }
}

fn predict_hpred(a: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    // copies the left pixel of each row across it
    for row in a.chunks_exact_mut(stride).skip(y0).take(size) {
        let left = row[x0 - 1];
        row[x0..][..size].fill(left);
    }
}

fn predict_dcpred(a: &mut [u8], size: usize, stride: usize, above: bool, left: bool) {
    let mut sum = 0u32;
    let mut shf = if size == 8 { 2u32 } else { 3u32 };

    if left {
        sum += (0..size).map(|y| u32::from(a[(y + 1) * stride])).sum::<u32>();
        shf += 1;
    }

    if above {
        sum += a[1..][..size].iter().map(|&p| u32::from(p)).sum::<u32>();
        shf += 1;
    }

    let dcval = if !left && !above {
        128u8
    } else {
        ((sum + (1 << (shf - 1))) >> shf) as u8
    };

    for y in 0usize..size {
        a[1 + stride * (y + 1)..][..size].fill(dcval);
    }
}

fn predict_tmpred(a: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    // X_ij = L_i + A_j - P, RFC 6386 section 12.2
    let (above, x_block) = a.split_at_mut(y0 * stride + (x0 - 1));
    let p = i32::from(above[(y0 - 1) * stride + x0 - 1]);
    let above_slice = &above[(y0 - 1) * stride + x0..][..size];

    for y in 0usize..size {
        let left_minus_p = i32::from(x_block[y * stride]) - p;

        // skip over the left pixel
        for (cur, &abv) in x_block[y * stride + 1..][..size].iter_mut().zip(above_slice) {
            *cur = (left_minus_p + i32::from(abv)).clamp(0, 255) as u8;
        }
    }
}

/// Edge pixels of a 4x4 subblock: `L3 L2 L1 L0 P A0 .. A7`.
///
/// `A4..A7` are the above-right pixels.
fn subblock_edges(a: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 13] {
    let mut e = [0u8; 13];
    for (i, l) in e[..4].iter_mut().enumerate() {
        *l = a[(y0 + 3 - i) * stride + x0 - 1];
    }
    e[4..].copy_from_slice(&a[(y0 - 1) * stride + x0 - 1..][..9]);
    e
}

/// Predicts one 4x4 luma subblock at `(x0, y0)` of the work buffer.
pub(crate) fn predict_subblock(a: &mut [u8], mode: IntraMode, x0: usize, y0: usize, stride: usize) {
    let e = subblock_edges(a, x0, y0, stride);
    let p = e[4];
    let top = |c: usize| e[5 + c];
    let left = |r: usize| e[3 - r];

    let mut b = [[0u8; 4]; 4];
    match mode {
        IntraMode::DC => {
            let sum: u32 = (0..4).map(|i| u32::from(top(i)) + u32::from(left(i))).sum();
            b = [[((sum + 4) >> 3) as u8; 4]; 4];
        }
        IntraMode::TM => {
            for (r, row) in b.iter_mut().enumerate() {
                for (c, px) in row.iter_mut().enumerate() {
                    let v = i32::from(left(r)) + i32::from(top(c)) - i32::from(p);
                    *px = v.clamp(0, 255) as u8;
                }
            }
        }
        IntraMode::VE => {
            let row = [0, 1, 2, 3].map(|c| avg3(e[4 + c], e[5 + c], e[6 + c]));
            b = [row; 4];
        }
        IntraMode::HE => {
            for (r, row) in b.iter_mut().enumerate() {
                *row = [avg3(e[4 - r], e[3 - r], e[(2usize).saturating_sub(r)]); 4];
            }
        }
        IntraMode::LD => {
            for (r, row) in b.iter_mut().enumerate() {
                for (c, px) in row.iter_mut().enumerate() {
                    let i = r + c;
                    *px = avg3(top(i), top(i + 1), top((i + 2).min(7)));
                }
            }
        }
        IntraMode::RD => {
            for (r, row) in b.iter_mut().enumerate() {
                for (c, px) in row.iter_mut().enumerate() {
                    let i = 4 + c - r;
                    *px = avg3(e[i - 1], e[i], e[i + 1]);
                }
            }
        }
        IntraMode::VR => {
            b[3][0] = avg3(e[1], e[2], e[3]);
            b[2][0] = avg3(e[2], e[3], e[4]);
            b[3][1] = avg3(e[3], e[4], e[5]);
            b[1][0] = b[3][1];
            b[2][1] = avg2(e[4], e[5]);
            b[0][0] = b[2][1];
            b[3][2] = avg3(e[4], e[5], e[6]);
            b[1][1] = b[3][2];
            b[2][2] = avg2(e[5], e[6]);
            b[0][1] = b[2][2];
            b[3][3] = avg3(e[5], e[6], e[7]);
            b[1][2] = b[3][3];
            b[2][3] = avg2(e[6], e[7]);
            b[0][2] = b[2][3];
            b[1][3] = avg3(e[6], e[7], e[8]);
            b[0][3] = avg2(e[7], e[8]);
        }
        IntraMode::VL => {
            b[0][0] = avg2(top(0), top(1));
            b[1][0] = avg3(top(0), top(1), top(2));
            b[2][0] = avg2(top(1), top(2));
            b[0][1] = b[2][0];
            b[1][1] = avg3(top(1), top(2), top(3));
            b[3][0] = b[1][1];
            b[2][1] = avg2(top(2), top(3));
            b[0][2] = b[2][1];
            b[3][1] = avg3(top(2), top(3), top(4));
            b[1][2] = b[3][1];
            b[2][2] = avg2(top(3), top(4));
            b[0][3] = b[2][2];
            b[3][2] = avg3(top(3), top(4), top(5));
            b[1][3] = b[3][2];
            // these two break the pattern
            b[2][3] = avg3(top(4), top(5), top(6));
            b[3][3] = avg3(top(5), top(6), top(7));
        }
        IntraMode::HD => {
            b[3][0] = avg2(e[0], e[1]);
            b[3][1] = avg3(e[0], e[1], e[2]);
            b[2][0] = avg2(e[1], e[2]);
            b[3][2] = b[2][0];
            b[2][1] = avg3(e[1], e[2], e[3]);
            b[3][3] = b[2][1];
            b[2][2] = avg2(e[2], e[3]);
            b[1][0] = b[2][2];
            b[2][3] = avg3(e[2], e[3], e[4]);
            b[1][1] = b[2][3];
            b[1][2] = avg2(e[3], e[4]);
            b[0][0] = b[1][2];
            b[1][3] = avg3(e[3], e[4], e[5]);
            b[0][1] = b[1][3];
            b[0][2] = avg3(e[4], e[5], e[6]);
            b[0][3] = avg3(e[5], e[6], e[7]);
        }
        IntraMode::HU => {
            let (l0, l1, l2, l3) = (left(0), left(1), left(2), left(3));
            b = [[l3; 4]; 4];
            b[0][0] = avg2(l0, l1);
            b[0][1] = avg3(l0, l1, l2);
            b[0][2] = avg2(l1, l2);
            b[1][0] = b[0][2];
            b[0][3] = avg3(l1, l2, l3);
            b[1][1] = b[0][3];
            b[1][2] = avg2(l2, l3);
            b[2][0] = b[1][2];
            b[1][3] = avg3(l2, l3, l3);
            b[2][1] = b[1][3];
        }
    }

    for (r, row) in b.iter().enumerate() {
        a[(y0 + r) * stride + x0..][..4].copy_from_slice(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg2() {
        for i in 0u8..=255 {
            for j in 0u8..=255 {
                let ceil_avg = (f32::from(i) + f32::from(j)) / 2.0;
                let ceil_avg = ceil_avg.ceil() as u8;
                assert_eq!(ceil_avg, avg2(i, j), "avg2({i}, {j})");
            }
        }
    }

    #[test]
    fn test_avg3() {
        for i in (0u8..=255).step_by(3) {
            for j in 0u8..=255 {
                for k in (0u8..=255).step_by(5) {
                    let floor_avg = (f32::from(i) + 2.0 * f32::from(j) + f32::from(k) + 2.0) / 4.0;
                    assert_eq!(floor_avg.floor() as u8, avg3(i, j, k), "avg3({i}, {j}, {k})");
                }
            }
        }
    }

    #[test]
    fn test_subblock_edges() {
        #[rustfmt::skip]
        let im = vec![5, 6, 7, 8, 9, 10, 11, 12, 13,
                      4, 0, 0, 0, 0, 0, 0, 0, 0,
                      3, 0, 0, 0, 0, 0, 0, 0, 0,
                      2, 0, 0, 0, 0, 0, 0, 0, 0,
                      1, 0, 0, 0, 0, 0, 0, 0, 0];
        let e = subblock_edges(&im, 1, 1, 9);
        assert_eq!(e, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn test_add_residue() {
        let mut pblock = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let rblock = [
            -1, -2, -3, -4, 250, 249, 248, 250, -10, -18, -192, -17, -3, 15, 18, 9,
        ];
        let expected: [u8; 16] = [0, 0, 0, 0, 255, 255, 255, 255, 0, 0, 0, 0, 10, 29, 33, 25];

        add_residue(&mut pblock, &rblock, 0, 0, 4);

        assert_eq!(pblock, expected);
    }

    fn bordered_4x4() -> Vec<u8> {
        #[rustfmt::skip]
        let im = vec![5, 6, 7, 8, 9, 10, 11, 12, 13,
                      4, 0, 0, 0, 0, 0, 0, 0, 0,
                      3, 0, 0, 0, 0, 0, 0, 0, 0,
                      2, 0, 0, 0, 0, 0, 0, 0, 0,
                      1, 0, 0, 0, 0, 0, 0, 0, 0];
        im
    }

    fn block_of(im: &[u8]) -> [[u8; 4]; 4] {
        let mut out = [[0u8; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            row.copy_from_slice(&im[(r + 1) * 9 + 1..][..4]);
        }
        out
    }

    #[test]
    fn test_predict_bhepred() {
        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::HE, 1, 1, 9);
        assert_eq!(block_of(&im), [[4; 4], [3; 4], [2; 4], [1; 4]]);
    }

    #[test]
    fn test_predict_brdpred() {
        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::RD, 1, 1, 9);
        assert_eq!(
            block_of(&im),
            [[5, 6, 7, 8], [4, 5, 6, 7], [3, 4, 5, 6], [2, 3, 4, 5]]
        );
    }

    #[test]
    fn test_predict_bldpred() {
        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::LD, 1, 1, 9);
        // A = 6..=13, the last value repeats the final above-right pixel
        assert_eq!(
            block_of(&im),
            [[7, 8, 9, 10], [8, 9, 10, 11], [9, 10, 11, 12], [10, 11, 12, 13]]
        );
    }

    #[test]
    fn test_predict_bvepred() {
        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::VE, 1, 1, 9);
        assert_eq!(block_of(&im), [[6, 7, 8, 9]; 4]);
    }

    #[test]
    fn test_predict_bhupred() {
        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::HU, 1, 1, 9);
        // L0..L3 = 4, 3, 2, 1
        assert_eq!(
            block_of(&im),
            [[4, 3, 3, 2], [3, 2, 2, 1], [2, 1, 1, 1], [1, 1, 1, 1]]
        );
    }

    #[test]
    fn test_predict_bdc_and_tm() {
        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::DC, 1, 1, 9);
        // (6 + 7 + 8 + 9 + 4 + 3 + 2 + 1 + 4) >> 3
        assert_eq!(block_of(&im), [[5; 4]; 4]);

        let mut im = bordered_4x4();
        predict_subblock(&mut im, IntraMode::TM, 1, 1, 9);
        assert_eq!(
            block_of(&im),
            [[5, 6, 7, 8], [4, 5, 6, 7], [3, 4, 5, 6], [2, 3, 4, 5]]
        );
    }

    #[test]
    fn first_macroblock_dc_predicts_128() {
        let top = [0u8; 16 + 4];
        let left = [0u8; 17];
        let mut ws = create_border_luma(0, 0, 1, &top, &left);
        predict_luma(&mut ws, LumaMode::DC, 0, 0);
        for y in 0..16 {
            assert!(ws[(y + 1) * LUMA_STRIDE + 1..][..16].iter().all(|&p| p == 128));
        }

        let mut cws = create_border_chroma(0, 0, &top[..8], &left[..9]);
        predict_chroma(&mut cws, ChromaMode::DC, 0, 0);
        for y in 0..8 {
            assert!(cws[(y + 1) * CHROMA_STRIDE + 1..][..8].iter().all(|&p| p == 128));
        }
    }

    #[test]
    fn borders_use_sentinels() {
        let top = [50u8; 32 + 4];
        let left = [60u8; 17];
        let ws = create_border_luma(0, 1, 2, &top, &left);
        assert_eq!(ws[0], BORDER_LEFT);
        assert_eq!(ws[LUMA_STRIDE], BORDER_LEFT);
        assert_eq!(ws[1], 50);

        let ws = create_border_luma(1, 0, 2, &top, &left);
        assert_eq!(ws[0], BORDER_ABOVE);
        assert!(ws[1..LUMA_STRIDE].iter().all(|&p| p == BORDER_ABOVE));
        assert_eq!(ws[LUMA_STRIDE], 60);
    }

    #[test]
    fn last_column_replicates_above_right() {
        let mut top = [0u8; 32 + 4];
        for (i, t) in top.iter_mut().enumerate() {
            *t = i as u8;
        }
        let left = [0u8; 17];
        let ws = create_border_luma(1, 1, 2, &top, &left);
        assert!(ws[17..21].iter().all(|&p| p == 31));
        // rows 4, 8 and 12 carry the same pixels
        assert_eq!(ws[4 * LUMA_STRIDE + 17..][..4], ws[17..21]);

        let ws = create_border_luma(0, 1, 2, &top, &left);
        assert_eq!(ws[17..21], [16, 17, 18, 19]);
    }

    #[test]
    fn tm_prediction_clamps() {
        let mut ws = [0u8; CHROMA_BLOCK_SIZE];
        ws[0] = 0;
        ws[1..9].fill(250);
        for y in 0..8 {
            ws[(y + 1) * CHROMA_STRIDE] = 200;
        }
        predict_chroma(&mut ws, ChromaMode::TM, 1, 1);
        assert_eq!(ws[CHROMA_STRIDE + 1], 255);
    }
}
