use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Canonical 2D saddle-point corner used by the checkerboard grid assembly.
///
/// This is what you obtain by adapting the output of a ChESS detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Corner {
    /// Corner position in pixel coordinates.
    pub position: Point2<f32>,

    /// Dominant diagonal orientation at the corner, in radians.
    ///
    /// Defined modulo π: checkerboard diagonals are undirected. Two corners
    /// that are direct grid neighbours have orientations roughly π/2 apart.
    pub orientation: f32,

    /// Strength / response of the corner detector.
    pub strength: f32,
}

impl Corner {
    pub fn new(x: f32, y: f32, orientation: f32, strength: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            orientation,
            strength,
        }
    }
}
