//! Marker observations and their planar pose.
//!
//! - [`MarkerObservation`]: decoded identity plus corner polygon in scene pixels.
//! - [`PoseRecord`]: centroid and heading derived from an observation.
//! - [`MarkerDecoder`]: seam for optical decoders, with [`QrDecoder`] built on `rqrr`.

mod decoder;
mod observation;
mod pose;

pub use decoder::{DecodeError, MarkerDecoder, QrDecoder};
pub use observation::{MarkerId, MarkerObservation};
pub use pose::{centroid, heading_deg, HeadingConvention, PoseRecord};
