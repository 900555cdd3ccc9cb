use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::observation::{MarkerId, MarkerObservation};

/// Which polygon corners define a marker's "north" side.
///
/// The heading points from the centroid to the midpoint of the two corners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingConvention {
    /// Corners 0 and 1.
    #[default]
    FirstSecond,
    /// Corners 0 and 3.
    FirstFourth,
}

impl HeadingConvention {
    pub fn north_indices(self) -> (usize, usize) {
        match self {
            Self::FirstSecond => (0, 1),
            Self::FirstFourth => (0, 3),
        }
    }
}

/// Mean of the polygon vertices; `None` for an empty polygon.
pub fn centroid(corners: &[Point2<f32>]) -> Option<Point2<f32>> {
    if corners.is_empty() {
        return None;
    }
    let sum = corners
        .iter()
        .fold(Vector2::zeros(), |acc: Vector2<f32>, p| acc + p.coords);
    let scale = if corners.len() == 4 {
        0.25
    } else {
        1.0 / corners.len() as f32
    };
    Some(Point2::from(sum * scale))
}

/// Heading in degrees, `atan2` convention: 0° along +x, in `(-180, 180]`.
///
/// `None` when the polygon lacks the corners the convention needs.
pub fn heading_deg(corners: &[Point2<f32>], convention: HeadingConvention) -> Option<f32> {
    let (a, b) = convention.north_indices();
    let (pa, pb) = (corners.get(a)?, corners.get(b)?);
    let center = centroid(corners)?;
    let north = Point2::from((pa.coords + pb.coords) * 0.5);
    let d = north - center;
    Some(d.y.atan2(d.x).to_degrees())
}

/// Planar pose of one marker in scene pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub id: MarkerId,
    pub x: f32,
    pub y: f32,
    /// Degrees.
    pub angle: f32,
}

impl PoseRecord {
    pub fn from_observation(
        obs: &MarkerObservation,
        convention: HeadingConvention,
    ) -> Option<Self> {
        let c = centroid(&obs.corners)?;
        let angle = heading_deg(&obs.corners, convention)?;
        Some(Self {
            id: obs.id.clone(),
            x: c.x,
            y: c.y,
            angle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square(corners: [(f32, f32); 4]) -> Vec<Point2<f32>> {
        corners.iter().map(|&(x, y)| Point2::new(x, y)).collect()
    }

    #[test]
    fn centroid_of_quad_and_triangle() {
        let quad = square([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert_eq!(centroid(&quad), Some(Point2::new(5.0, 5.0)));

        let tri = square([(0.0, 0.0), (3.0, 0.0), (0.0, 3.0), (0.0, 0.0)]);
        assert_eq!(centroid(&tri[..3]), Some(Point2::new(1.0, 1.0)));
        assert_eq!(centroid(&[]), None);
    }

    #[test]
    fn north_corners_on_positive_x_give_zero_heading() {
        let quad = square([(120.0, 90.0), (120.0, 110.0), (80.0, 110.0), (80.0, 90.0)]);
        let angle = heading_deg(&quad, HeadingConvention::FirstSecond).expect("heading");
        assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn heading_follows_convention() {
        // Axis-aligned square listed clockwise in image space from the top-left.
        let quad = square([(100.0, 100.0), (140.0, 100.0), (140.0, 140.0), (100.0, 140.0)]);

        // Corners 0,1 form the top edge: towards -y.
        let up = heading_deg(&quad, HeadingConvention::FirstSecond).expect("heading");
        assert_abs_diff_eq!(up, -90.0, epsilon = 1e-4);

        // Corners 0,3 form the left edge: towards -x.
        let left = heading_deg(&quad, HeadingConvention::FirstFourth).expect("heading");
        assert_abs_diff_eq!(left.abs(), 180.0, epsilon = 1e-4);
    }

    #[test]
    fn short_polygons_have_no_heading() {
        let tri = square([(0.0, 0.0), (3.0, 0.0), (0.0, 3.0), (0.0, 0.0)]);
        assert!(heading_deg(&tri[..3], HeadingConvention::FirstFourth).is_none());
        assert!(heading_deg(&tri[..3], HeadingConvention::FirstSecond).is_some());
    }

    #[test]
    fn pose_record_from_observation() {
        let obs = MarkerObservation::new(
            "3",
            square([(20.0, 10.0), (20.0, 30.0), (0.0, 30.0), (0.0, 10.0)]),
        );
        let pose = PoseRecord::from_observation(&obs, HeadingConvention::FirstSecond)
            .expect("pose");
        assert_eq!(pose.id.as_index(), Some(3));
        assert_abs_diff_eq!(pose.x, 10.0);
        assert_abs_diff_eq!(pose.y, 20.0);
        assert_abs_diff_eq!(pose.angle, 0.0, epsilon = 1e-5);
    }
}
