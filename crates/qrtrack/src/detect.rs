//! `chess-corners` front end for checkerboard detection.

use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use nalgebra::Point2;
use qrtrack_chessboard::{ChessboardDetector, ChessboardError, ChessboardParams};
use qrtrack_core::{Corner, GrayImage};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::calibrate::CheckerboardFinder;

/// Default ChESS settings for printed calibration boards.
pub fn default_chess_config() -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = 0.2;
    cfg.params.nms_radius = 2;
    cfg
}

pub fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner::new(c.x, c.y, c.orientation, c.response)
}

/// Detect ChESS corners on an intensity image.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, cfg), fields(width = img.width, height = img.height))
)]
pub fn detect_corners(img: &GrayImage, cfg: &ChessConfig) -> Vec<Corner> {
    let Some(buf) =
        ::image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
    else {
        return Vec::new();
    };
    find_chess_corners_image(&buf, cfg)
        .iter()
        .map(adapt_chess_corner)
        .collect()
}

/// ChESS corners assembled into a grid by [`ChessboardDetector`].
pub struct ChessCheckerboardFinder {
    pub chess: ChessConfig,
    pub detector: ChessboardDetector,
}

impl ChessCheckerboardFinder {
    pub fn new(params: ChessboardParams) -> Self {
        Self {
            chess: default_chess_config(),
            detector: ChessboardDetector::new(params),
        }
    }
}

impl Default for ChessCheckerboardFinder {
    fn default() -> Self {
        Self::new(ChessboardParams::default())
    }
}

impl CheckerboardFinder for ChessCheckerboardFinder {
    fn find(
        &self,
        image: &GrayImage,
        rows: usize,
        cols: usize,
    ) -> Result<Vec<Point2<f32>>, ChessboardError> {
        let corners = detect_corners(image, &self.chess);
        log::debug!("{} ChESS corners", corners.len());
        Ok(self.detector.detect(&corners, rows, cols)?.corners)
    }
}
