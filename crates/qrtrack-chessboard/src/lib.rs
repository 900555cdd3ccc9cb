//! Checkerboard inner-corner assembly on top of ChESS corners.
//!
//! Pipeline:
//! 1. Drop corners below the strength threshold.
//! 2. Link every corner to at most one neighbour per image direction
//!    (right/left/up/down), using a KD-tree for candidates and the ChESS
//!    diagonal orientations to reject non-grid pairs.
//! 3. Keep only mutual links, split the graph into connected components.
//! 4. BFS each component into integer grid coordinates.
//! 5. Accept the component that fills exactly the expected rectangle and
//!    emit its corners row-major, top-left first.

mod detector;
mod geom;
mod gridgraph;
mod params;

pub use detector::{ChessboardDetection, ChessboardDetector, ChessboardError};
pub use gridgraph::{
    assign_grid_coordinates, connected_components, GridGraph, NeighborDirection, NodeNeighbor,
};
pub use params::{ChessboardParams, GridGraphParams};
