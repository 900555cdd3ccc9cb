//! Core geometry and image primitives for planar workspace tracking.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector, marker decoder or capture backend:
//! frames enter as plain interleaved RGB buffers and leave as row-major
//! grayscale buffers.

mod corner;
mod homography;
mod image;
mod logger;
mod subpix;
mod warp;

pub use corner::Corner;
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{
    luma_bt601, sample_bilinear, sample_bilinear_rgb, GrayImage, GrayImageView, RgbImage,
    RgbImageView,
};
pub use subpix::{refine_corners_subpix, SubPixParams};
pub use warp::{gray_row, rgb_to_gray, warp_perspective_rgb, warp_rgb_row, WarpPlan};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
