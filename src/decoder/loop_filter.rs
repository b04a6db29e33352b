//! The in-loop deblocking filter, RFC 6386 section 15.
//!
//! Runs as a second pass over a fully reconstructed frame. The encoder runs
//! the same pass over its reconstruction so both sides agree on every pixel.
//!
//! Edge accessors take the index of the first pixel past the edge (`q0`) and
//! the distance between taps: 1 across a vertical edge, the row stride across
//! a horizontal one.

use crate::common::types::{LumaMode, MacroBlock, MAX_SEGMENTS};

#[inline]
fn c(v: i32) -> i32 {
    v.clamp(-128, 127)
}

// unsigned pixel to signed filter value
#[inline]
fn u2s(v: u8) -> i32 {
    i32::from(v) - 128
}

#[inline]
fn s2u(v: i32) -> u8 {
    (c(v) + 128) as u8
}

#[inline]
fn diff(a: u8, b: u8) -> u8 {
    a.abs_diff(b)
}

/// Adjusts `p0` and `q0` towards each other and returns the `q0` step.
#[inline]
fn common_adjust(use_outer_taps: bool, buf: &mut [u8], point: usize, step: usize) -> i32 {
    let p1 = u2s(buf[point - 2 * step]);
    let p0 = u2s(buf[point - step]);
    let q0 = u2s(buf[point]);
    let q1 = u2s(buf[point + step]);

    let outer = if use_outer_taps { c(p1 - q1) } else { 0 };
    let a = c(outer + 3 * (q0 - p0));

    // the two steps round differently so that a step of 4 does not overshoot
    let b = c(a + 3) >> 3;
    let a = c(a + 4) >> 3;

    buf[point] = s2u(q0 - a);
    buf[point - step] = s2u(p0 + b);

    a
}

#[inline]
fn simple_threshold(filter_limit: u8, buf: &[u8], point: usize, step: usize) -> bool {
    let p1 = buf[point - 2 * step];
    let p0 = buf[point - step];
    let q0 = buf[point];
    let q1 = buf[point + step];
    i32::from(diff(p0, q0)) * 2 + i32::from(diff(p1, q1) >> 1) <= i32::from(filter_limit)
}

#[inline]
fn should_filter(
    interior_limit: u8,
    edge_limit: u8,
    buf: &[u8],
    point: usize,
    step: usize,
) -> bool {
    let px = |k: isize| buf[point.wrapping_add_signed(k * step as isize)];
    let (p3, p2, p1, p0) = (px(-4), px(-3), px(-2), px(-1));
    let (q0, q1, q2, q3) = (px(0), px(1), px(2), px(3));

    simple_threshold(edge_limit, buf, point, step)
        && diff(p3, p2) <= interior_limit
        && diff(p2, p1) <= interior_limit
        && diff(p1, p0) <= interior_limit
        && diff(q3, q2) <= interior_limit
        && diff(q2, q1) <= interior_limit
        && diff(q1, q0) <= interior_limit
}

#[inline]
fn high_edge_variance(threshold: u8, buf: &[u8], point: usize, step: usize) -> bool {
    diff(buf[point - 2 * step], buf[point - step]) > threshold
        || diff(buf[point + step], buf[point]) > threshold
}

/// Simple filter on one position of an edge.
pub(crate) fn simple_segment(edge_limit: u8, buf: &mut [u8], point: usize, step: usize) {
    if simple_threshold(edge_limit, buf, point, step) {
        common_adjust(true, buf, point, step);
    }
}

/// Normal filter on one position of an inner (subblock) edge.
pub(crate) fn subblock_filter(
    hev_threshold: u8,
    interior_limit: u8,
    edge_limit: u8,
    buf: &mut [u8],
    point: usize,
    step: usize,
) {
    if !should_filter(interior_limit, edge_limit, buf, point, step) {
        return;
    }

    let hv = high_edge_variance(hev_threshold, buf, point, step);
    let a = (common_adjust(hv, buf, point, step) + 1) >> 1;

    if !hv {
        let q1 = point + step;
        let p1 = point - 2 * step;
        buf[q1] = s2u(u2s(buf[q1]) - a);
        buf[p1] = s2u(u2s(buf[p1]) + a);
    }
}

/// Normal filter on one position of a macroblock edge.
pub(crate) fn macroblock_filter(
    hev_threshold: u8,
    interior_limit: u8,
    edge_limit: u8,
    buf: &mut [u8],
    point: usize,
    step: usize,
) {
    if !should_filter(interior_limit, edge_limit, buf, point, step) {
        return;
    }

    if high_edge_variance(hev_threshold, buf, point, step) {
        common_adjust(true, buf, point, step);
        return;
    }

    let p2 = u2s(buf[point - 3 * step]);
    let p1 = u2s(buf[point - 2 * step]);
    let p0 = u2s(buf[point - step]);
    let q0 = u2s(buf[point]);
    let q1 = u2s(buf[point + step]);
    let q2 = u2s(buf[point + 2 * step]);

    let w = c(c(p1 - q1) + 3 * (q0 - p0));

    // 27/128, 18/128 and 9/128 of w, roughly 3/7, 2/7 and 1/7
    let a = c((27 * w + 63) >> 7);
    buf[point] = s2u(q0 - a);
    buf[point - step] = s2u(p0 + a);

    let a = c((18 * w + 63) >> 7);
    buf[point + step] = s2u(q1 - a);
    buf[point - 2 * step] = s2u(p1 + a);

    let a = c((9 * w + 63) >> 7);
    buf[point + 2 * step] = s2u(q2 - a);
    buf[point - 3 * step] = s2u(p2 + a);
}

/// Frame-level loop filter parameters from the frame header.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FilterSettings {
    /// Simple filter (luma only) instead of the normal one.
    pub(crate) simple: bool,
    pub(crate) level: u8,
    pub(crate) sharpness: u8,
    /// Per-segment level and whether it is a delta on `level`. `None` without segmentation.
    pub(crate) segments: Option<[(bool, i8); MAX_SEGMENTS]>,
    /// Reference frame and mode deltas when adjustments are enabled.
    pub(crate) adjustments: Option<([i32; 4], [i32; 4])>,
}

/// Filter strength for one macroblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct EdgeParams {
    pub(crate) level: u8,
    pub(crate) interior_limit: u8,
    pub(crate) hev_threshold: u8,
}

impl EdgeParams {
    const fn mbedge_limit(self) -> u8 {
        (self.level + 2) * 2 + self.interior_limit
    }

    const fn sub_bedge_limit(self) -> u8 {
        self.level * 2 + self.interior_limit
    }
}

impl FilterSettings {
    /// Filter level, interior limit and hev threshold of a macroblock.
    pub(crate) fn edge_params(&self, mb: &MacroBlock) -> EdgeParams {
        let mut level = i32::from(self.level);

        if let Some(segments) = &self.segments {
            let (delta, value) = segments[usize::from(mb.segmentid)];
            if delta {
                level += i32::from(value);
            } else {
                level = i32::from(value);
            }
            level = level.clamp(0, 63);
        }

        if let Some((ref_delta, mode_delta)) = &self.adjustments {
            // intra frames only use the first reference and the B_PRED mode delta
            level += ref_delta[0];
            if mb.luma_mode == LumaMode::B {
                level += mode_delta[0];
            }
        }

        let level = level.clamp(0, 63) as u8;

        let mut interior_limit = level;
        if self.sharpness > 0 {
            interior_limit >>= if self.sharpness > 4 { 2 } else { 1 };
            interior_limit = interior_limit.min(9 - self.sharpness);
        }
        let interior_limit = interior_limit.max(1);

        let hev_threshold = if level >= 40 {
            2
        } else if level >= 15 {
            1
        } else {
            0
        };

        EdgeParams {
            level,
            interior_limit,
            hev_threshold,
        }
    }
}

/// Macroblock-aligned planes being filtered in place.
pub(crate) struct Planes<'a> {
    pub(crate) y: &'a mut [u8],
    pub(crate) u: &'a mut [u8],
    pub(crate) v: &'a mut [u8],
    pub(crate) mbwidth: usize,
    pub(crate) mbheight: usize,
}

/// Runs the loop filter over every macroblock in raster order.
///
/// A macroblock is skipped when its own level is 0. The frame level alone
/// does not decide, since segments may override it.
pub(crate) fn filter_frame(settings: &FilterSettings, planes: Planes<'_>, macroblocks: &[MacroBlock]) {
    let Planes {
        y,
        u,
        v,
        mbwidth,
        mbheight,
    } = planes;
    let luma_stride = mbwidth * 16;
    let chroma_stride = mbwidth * 8;
    debug_assert_eq!(macroblocks.len(), mbwidth * mbheight);

    for mby in 0..mbheight {
        for mbx in 0..mbwidth {
            let mb = &macroblocks[mby * mbwidth + mbx];
            let params = settings.edge_params(mb);
            if params.level == 0 {
                continue;
            }

            let inner = mb.luma_mode == LumaMode::B || mb.non_zero_dct;
            let luma = Block {
                x: mbx * 16,
                y: mby * 16,
                size: 16,
                stride: luma_stride,
            };

            if settings.simple {
                filter_simple_luma(y, luma, params, mbx > 0, mby > 0, inner);
            } else {
                filter_normal(y, luma, params, mbx > 0, mby > 0, inner);
                for plane in [&mut *u, &mut *v] {
                    let chroma = Block {
                        x: mbx * 8,
                        y: mby * 8,
                        size: 8,
                        stride: chroma_stride,
                    };
                    filter_normal(plane, chroma, params, mbx > 0, mby > 0, inner);
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Block {
    x: usize,
    y: usize,
    size: usize,
    stride: usize,
}

impl Block {
    fn index(&self, x: usize, y: usize) -> usize {
        (self.y + y) * self.stride + self.x + x
    }
}

fn filter_simple_luma(
    buf: &mut [u8],
    b: Block,
    params: EdgeParams,
    left: bool,
    top: bool,
    inner: bool,
) {
    let mbedge = params.mbedge_limit();
    let subedge = params.sub_bedge_limit();

    if left {
        for i in 0..16 {
            simple_segment(mbedge, buf, b.index(0, i), 1);
        }
    }
    if inner {
        for x in [4, 8, 12] {
            for i in 0..16 {
                simple_segment(subedge, buf, b.index(x, i), 1);
            }
        }
    }
    if top {
        for i in 0..16 {
            simple_segment(mbedge, buf, b.index(i, 0), b.stride);
        }
    }
    if inner {
        for y in [4, 8, 12] {
            for i in 0..16 {
                simple_segment(subedge, buf, b.index(i, y), b.stride);
            }
        }
    }
}

fn filter_normal(
    buf: &mut [u8],
    b: Block,
    params: EdgeParams,
    left: bool,
    top: bool,
    inner: bool,
) {
    let EdgeParams {
        interior_limit,
        hev_threshold,
        ..
    } = params;
    let mbedge = params.mbedge_limit();
    let subedge = params.sub_bedge_limit();
    // chroma blocks only have the inner edge in the middle
    let inner_edges: &[usize] = if b.size == 16 { &[4, 8, 12] } else { &[4] };

    if left {
        for i in 0..b.size {
            macroblock_filter(hev_threshold, interior_limit, mbedge, buf, b.index(0, i), 1);
        }
    }
    if inner {
        for &x in inner_edges {
            for i in 0..b.size {
                subblock_filter(hev_threshold, interior_limit, subedge, buf, b.index(x, i), 1);
            }
        }
    }
    if top {
        for i in 0..b.size {
            let point = b.index(i, 0);
            macroblock_filter(hev_threshold, interior_limit, mbedge, buf, point, b.stride);
        }
    }
    if inner {
        for &y in inner_edges {
            for i in 0..b.size {
                let point = b.index(i, y);
                subblock_filter(hev_threshold, interior_limit, subedge, buf, point, b.stride);
            }
        }
    }
}
