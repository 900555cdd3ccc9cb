//! Perspective warping and colour-to-intensity conversion.
//!
//! The row kernels are the unit of work shared by every execution strategy:
//! a sequential loop and a parallel pool call the same functions and must
//! produce byte-identical buffers.

use nalgebra::{Matrix3, Vector3};

use crate::homography::Homography;
use crate::image::{luma_bt601, sample_bilinear_rgb, GrayImage, RgbImage, RgbImageView};

/// Precomputed destination-to-source mapping for a fixed output size.
#[derive(Clone, Copy, Debug)]
pub struct WarpPlan {
    dst_to_src: Matrix3<f64>,
    pub width: usize,
    pub height: usize,
}

impl WarpPlan {
    /// Build a plan for `src -> dst` homography `h` and an output size.
    ///
    /// Returns `None` when `h` is not invertible.
    pub fn new(h: &Homography, width: usize, height: usize) -> Option<Self> {
        let inv = h.inverse()?;
        Some(Self {
            dst_to_src: inv.h,
            width,
            height,
        })
    }

    /// Source coordinate sampled for destination pixel `(x, y)`.
    ///
    /// Destination pixels are addressed at integer coordinates, the same
    /// convention as OpenCV `warpPerspective`.
    #[inline]
    pub fn source_of(&self, x: usize, y: usize) -> Option<(f32, f32)> {
        let v = self.dst_to_src * Vector3::new(x as f64, y as f64, 1.0);
        if v[2].abs() < 1e-12 {
            return None;
        }
        let sx = v[0] / v[2];
        let sy = v[1] / v[2];
        if !sx.is_finite() || !sy.is_finite() {
            return None;
        }
        Some((sx as f32, sy as f32))
    }
}

#[inline]
fn inside(sx: f32, sy: f32, w: usize, h: usize) -> bool {
    sx > -1.0 && sy > -1.0 && sx < w as f32 && sy < h as f32
}

/// Warp one destination row of an RGB image. `out_row` holds `3 * plan.width` bytes.
#[inline]
pub fn warp_rgb_row(plan: &WarpPlan, src: &RgbImageView<'_>, y: usize, out_row: &mut [u8]) {
    debug_assert_eq!(out_row.len(), plan.width * 3);
    for (x, px) in out_row.chunks_exact_mut(3).enumerate() {
        match plan.source_of(x, y) {
            Some((sx, sy)) if inside(sx, sy, src.width, src.height) => {
                let v = sample_bilinear_rgb(src, sx, sy);
                for c in 0..3 {
                    px[c] = (v[c] + 0.5).clamp(0.0, 255.0) as u8;
                }
            }
            _ => px.fill(0),
        }
    }
}

/// Convert one interleaved RGB row to intensity.
#[inline]
pub fn gray_row(rgb_row: &[u8], out_row: &mut [u8]) {
    debug_assert_eq!(rgb_row.len(), out_row.len() * 3);
    for (px, g) in rgb_row.chunks_exact(3).zip(out_row.iter_mut()) {
        *g = luma_bt601(px[0], px[1], px[2]);
    }
}

/// Warp a full RGB frame into a `plan.width x plan.height` canvas.
pub fn warp_perspective_rgb(src: &RgbImageView<'_>, plan: &WarpPlan) -> RgbImage {
    let mut out = RgbImage::new(plan.width, plan.height);
    let stride = plan.width * 3;
    if stride == 0 {
        return out;
    }
    for (y, row) in out.data.chunks_exact_mut(stride).enumerate() {
        warp_rgb_row(plan, src, y, row);
    }
    out
}

/// Whole-image intensity conversion.
pub fn rgb_to_gray(src: &RgbImageView<'_>) -> GrayImage {
    let mut out = GrayImage::new(src.width, src.height);
    gray_row(&src.data[..src.width * src.height * 3], &mut out.data);
    out
}
