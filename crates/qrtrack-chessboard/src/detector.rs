use std::collections::HashMap;

use log::{debug, info};
use nalgebra::Point2;
use qrtrack_core::Corner;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::ChessboardParams;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChessboardError {
    #[error("expected a {cols}x{rows} inner-corner grid, got {found} usable corners")]
    NotEnoughCorners {
        found: usize,
        rows: usize,
        cols: usize,
    },
    #[error("no complete {cols}x{rows} inner-corner grid among the detected corners")]
    GridNotFound { rows: usize, cols: usize },
}

/// A complete inner-corner grid in image pixels.
#[derive(Clone, Debug)]
pub struct ChessboardDetection {
    pub rows: usize,
    pub cols: usize,
    /// `rows * cols` positions, row-major, top-left first.
    pub corners: Vec<Point2<f32>>,
}

impl ChessboardDetection {
    pub fn at(&self, i: usize, j: usize) -> Point2<f32> {
        self.corners[j * self.cols + i]
    }
}

/// Assembles ChESS corners into a fixed-size checkerboard grid.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Find a `cols x rows` inner-corner grid (`cols` horizontal).
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, corners), fields(corners = corners.len()))
    )]
    pub fn detect(
        &self,
        corners: &[Corner],
        rows: usize,
        cols: usize,
    ) -> Result<ChessboardDetection, ChessboardError> {
        let expected = rows * cols;
        let strong: Vec<Corner> = corners
            .iter()
            .filter(|c| c.strength >= self.params.min_strength)
            .cloned()
            .collect();

        debug!(
            "{} of {} ChESS corners pass the strength filter",
            strong.len(),
            corners.len()
        );

        if expected == 0 || strong.len() < expected {
            return Err(ChessboardError::NotEnoughCorners {
                found: strong.len(),
                rows,
                cols,
            });
        }

        let graph = GridGraph::new(&strong, &self.params.graph);
        let mut components = connected_components(&graph);
        components.retain(|c| c.len() == expected);
        debug!("{} components of size {expected}", components.len());

        for component in &components {
            let coords = assign_grid_coordinates(&graph, component);
            if let Some(cells) = fit_rectangle(&coords, rows, cols) {
                let corners = cells.into_iter().map(|idx| strong[idx].position).collect();
                info!("checkerboard found: {cols}x{rows} inner corners");
                return Ok(ChessboardDetection {
                    rows,
                    cols,
                    corners,
                });
            }
        }

        Err(ChessboardError::GridNotFound { rows, cols })
    }
}

/// Map BFS coordinates onto a full `cols x rows` rectangle.
///
/// Returns node indices row-major. A component laid out `rows x cols` in the
/// image (board rotated by a quarter turn) is rotated back.
fn fit_rectangle(coords: &[(usize, i32, i32)], rows: usize, cols: usize) -> Option<Vec<usize>> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let max_i = coords.iter().map(|c| c.1).max()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let max_j = coords.iter().map(|c| c.2).max()?;
    let width = (max_i - min_i + 1) as usize;
    let height = (max_j - min_j + 1) as usize;

    let mut cells: HashMap<(usize, usize), usize> = HashMap::with_capacity(coords.len());
    for &(node, i, j) in coords {
        let key = ((i - min_i) as usize, (j - min_j) as usize);
        if cells.insert(key, node).is_some() {
            // Two corners landed on the same cell: inconsistent linking.
            return None;
        }
    }

    let rotate = if width == cols && height == rows {
        false
    } else if width == rows && height == cols {
        true
    } else {
        return None;
    };

    let mut out = Vec::with_capacity(rows * cols);
    for j in 0..rows {
        for i in 0..cols {
            // Quarter turn: (i', j') = (height - 1 - j, i) in the source layout.
            let key = if rotate { (j, height - 1 - i) } else { (i, j) };
            out.push(*cells.get(&key)?);
        }
    }
    Some(out)
}
