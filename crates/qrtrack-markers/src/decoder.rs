use log::debug;
use nalgebra::Point2;
use qrtrack_core::GrayImageView;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::observation::{MarkerId, MarkerObservation};

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("intensity buffer is {got} bytes, expected {width}x{height}")]
    BufferSize {
        width: usize,
        height: usize,
        got: usize,
    },
    #[error("marker payload could not be decoded: {0}")]
    Payload(String),
}

/// Finds and decodes optical markers in a single-channel image.
pub trait MarkerDecoder {
    fn decode(&mut self, image: &GrayImageView<'_>) -> Result<Vec<MarkerObservation>, DecodeError>;
}

/// QR decoder backed by `rqrr`.
///
/// Corners are reported in `rqrr` order: top-left, top-right, bottom-right,
/// bottom-left in the code's own frame. Located codes whose payload fails
/// to decode are skipped unless `strict` is set.
#[derive(Clone, Debug, Default)]
pub struct QrDecoder {
    pub strict: bool,
}

impl QrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the whole pass on the first unreadable code.
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl MarkerDecoder for QrDecoder {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(w = image.width, h = image.height))
    )]
    fn decode(&mut self, image: &GrayImageView<'_>) -> Result<Vec<MarkerObservation>, DecodeError> {
        let (w, h) = (image.width, image.height);
        if image.data.len() != w * h {
            return Err(DecodeError::BufferSize {
                width: w,
                height: h,
                got: image.data.len(),
            });
        }
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        let data = image.data;
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| data[y * w + x]);
        let grids = prepared.detect_grids();

        let mut out = Vec::with_capacity(grids.len());
        for grid in grids {
            let corners = grid
                .bounds
                .iter()
                .map(|p| Point2::new(p.x as f32, p.y as f32))
                .collect();
            match grid.decode() {
                Ok((_meta, payload)) => out.push(MarkerObservation {
                    id: MarkerId(payload),
                    corners,
                }),
                Err(e) if self.strict => return Err(DecodeError::Payload(e.to_string())),
                Err(e) => debug!("skipping unreadable QR code: {e}"),
            }
        }
        Ok(out)
    }
}
