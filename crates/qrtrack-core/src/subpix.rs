//! Sub-pixel saddle refinement for checkerboard corners.
//!
//! Every gradient inside the search window is orthogonal to the vector
//! joining the true corner and the gradient's location. The refined corner is
//! the least-squares solution of that constraint, iterated until it settles.

use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::image::{sample_bilinear, GrayImageView};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half side of the square search window; 5 gives an 11x11 window.
    pub half_window: usize,
    pub max_iters: usize,
    /// Stop when the estimate moves less than this many pixels.
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iters: 30,
            epsilon: 0.1,
        }
    }
}

fn refine_one(img: &GrayImageView<'_>, start: Point2<f32>, params: &SubPixParams) -> Point2<f32> {
    let hw = params.half_window as i32;
    if hw == 0 {
        return start;
    }
    let coeff = 1.0 / (hw * hw) as f32;
    let eps2 = params.epsilon * params.epsilon;

    let mut cur = start;
    for _ in 0..params.max_iters.max(1) {
        let mut a = Matrix2::<f32>::zeros();
        let mut b = Vector2::<f32>::zeros();

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let px = cur.x + dx as f32;
                let py = cur.y + dy as f32;
                let gx = 0.5 * (sample_bilinear(img, px + 1.0, py) - sample_bilinear(img, px - 1.0, py));
                let gy = 0.5 * (sample_bilinear(img, px, py + 1.0) - sample_bilinear(img, px, py - 1.0));
                let w = (-((dx * dx + dy * dy) as f32) * coeff).exp();

                let gxx = gx * gx * w;
                let gxy = gx * gy * w;
                let gyy = gy * gy * w;

                a[(0, 0)] += gxx;
                a[(0, 1)] += gxy;
                a[(1, 0)] += gxy;
                a[(1, 1)] += gyy;
                b[0] += gxx * px + gxy * py;
                b[1] += gxy * px + gyy * py;
            }
        }

        let Some(inv) = a.try_inverse() else {
            break;
        };
        let next = inv * b;
        let next = Point2::new(next[0], next[1]);
        let step = (next - cur).norm_squared();
        cur = next;
        if step < eps2 {
            break;
        }
    }

    let moved = cur - start;
    let limit = params.half_window as f32;
    if !cur.x.is_finite() || !cur.y.is_finite() || moved.x.abs() > limit || moved.y.abs() > limit {
        log::debug!(
            "sub-pixel refinement diverged at ({:.1}, {:.1}); keeping detection",
            start.x,
            start.y
        );
        return start;
    }
    cur
}

/// Refine corner positions in place against a grayscale image.
///
/// Corners whose estimate leaves the search window keep their original
/// position.
pub fn refine_corners_subpix(
    img: &GrayImageView<'_>,
    corners: &mut [Point2<f32>],
    params: &SubPixParams,
) {
    for p in corners.iter_mut() {
        *p = refine_one(img, *p, params);
    }
}
