use std::fmt;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Decoded marker payload.
///
/// Payloads are kept verbatim; robots in the workspace usually carry a plain
/// integer, available through [`MarkerId::as_index`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(pub String);

impl MarkerId {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Integer view of the payload, ignoring surrounding whitespace.
    pub fn as_index(&self) -> Option<i64> {
        self.0.trim().parse().ok()
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarkerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One decoded marker in scene pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub id: MarkerId,
    /// Corner polygon in decoder order.
    pub corners: Vec<Point2<f32>>,
}

impl MarkerObservation {
    pub fn new(id: impl Into<MarkerId>, corners: Vec<Point2<f32>>) -> Self {
        Self {
            id: id.into(),
            corners,
        }
    }
}
