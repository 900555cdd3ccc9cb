use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_4;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use qrtrack_core::Corner;

use crate::geom::{axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Grid step `(di, dj)`; `i` grows to the right, `j` downwards.
    pub fn step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Right => 0,
            Self::Left => 1,
            Self::Up => 2,
            Self::Down => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

fn direction_quadrant(v: &Vector2<f32>) -> NeighborDirection {
    if v.x.abs() > v.y.abs() {
        if v.x >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if v.y >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

/// Check a candidate edge between two ChESS corners.
///
/// Direct grid neighbours have orthogonal diagonals, and the edge joining them
/// sits at ~45° to each diagonal.
fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let v = neighbor.position - corner.position;
    let distance = v.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    let edge_angle = v.y.atan2(v.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    Some(NodeNeighbor {
        direction: direction_quadrant(&v),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor,
    })
}

/// Keep the closest valid candidate per direction.
///
/// Distance wins over the angular score: a corner three squares away passes
/// the same orientation test as the adjacent one.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> [Option<NodeNeighbor>; 4] {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.distance < current.distance
                    || (candidate.distance == current.distance && candidate.score < current.score)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    best
}

/// Undirected 4-connected neighbourhood graph over a corner cloud.
pub struct GridGraph {
    /// For each node, its mutual neighbours (at most one per direction).
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        if corners.is_empty() {
            return Self {
                neighbors: Vec::new(),
            };
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();

        let slots: Vec<[Option<NodeNeighbor>; 4]> = corners
            .iter()
            .enumerate()
            .map(|(i, corner)| {
                let query = [corner.position.x, corner.position.y];
                let candidates = tree
                    .nearest_n::<SquaredEuclidean>(&query, params.k_neighbors)
                    .into_iter()
                    .filter_map(|nn| {
                        let j = nn.item as usize;
                        if j == i {
                            return None;
                        }
                        is_good_neighbor(corner, &corners[j], j, params)
                    })
                    .collect();
                select_neighbors(candidates)
            })
            .collect();

        // Keep an edge only when the other end points back with the opposite direction.
        let neighbors = slots
            .iter()
            .enumerate()
            .map(|(i, node)| {
                node.iter()
                    .flatten()
                    .filter(|n| {
                        slots[n.index][n.direction.opposite().slot()]
                            .as_ref()
                            .is_some_and(|back| back.index == i)
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Self { neighbors }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// BFS a component into `(node, i, j)` grid coordinates relative to its first node.
pub fn assign_grid_coordinates(graph: &GridGraph, component: &[usize]) -> Vec<(usize, i32, i32)> {
    let Some(&start) = component.first() else {
        return Vec::new();
    };

    let mut coords = Vec::with_capacity(component.len());
    let mut visited = vec![false; graph.neighbors.len()];
    let mut queue = VecDeque::from([(start, 0, 0)]);

    while let Some((node, i, j)) = queue.pop_front() {
        if visited[node] {
            continue;
        }
        visited[node] = true;
        coords.push((node, i, j));

        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.step();
            queue.push_back((neighbor.index, i + di, j + dj));
        }
    }

    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn grid(cols: usize, rows: usize, spacing: f32) -> Vec<Corner> {
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let orientation = if (i + j) % 2 == 0 {
                    FRAC_PI_4
                } else {
                    3.0 * FRAC_PI_4
                };
                corners.push(Corner::new(
                    i as f32 * spacing,
                    j as f32 * spacing,
                    orientation,
                    1.0,
                ));
            }
        }
        corners
    }

    fn neighbor_map(neighbors: &[NodeNeighbor]) -> HashMap<NeighborDirection, &NodeNeighbor> {
        neighbors.iter().map(|n| (n.direction, n)).collect()
    }

    #[test]
    fn finds_axis_neighbors_in_regular_grid() {
        let corners = grid(3, 3, 10.0);
        let params = GridGraphParams {
            max_spacing_pix: 40.0,
            ..Default::default()
        };
        let graph = GridGraph::new(&corners, &params);
        let idx = |i: usize, j: usize| j * 3 + i;

        let center = neighbor_map(&graph.neighbors[idx(1, 1)]);
        assert_eq!(4, center.len());
        assert_eq!(idx(0, 1), center[&NeighborDirection::Left].index);
        assert_eq!(idx(2, 1), center[&NeighborDirection::Right].index);
        assert_eq!(idx(1, 0), center[&NeighborDirection::Up].index);
        assert_eq!(idx(1, 2), center[&NeighborDirection::Down].index);

        let top_left = neighbor_map(&graph.neighbors[idx(0, 0)]);
        assert_eq!(2, top_left.len());
        assert!(top_left.contains_key(&NeighborDirection::Right));
        assert!(top_left.contains_key(&NeighborDirection::Down));
    }

    #[test]
    fn prefers_adjacent_corner_over_distant_one() {
        // Corners 0 and 3 squares apart pass the orientation test; the nearest must win.
        let corners = vec![
            Corner::new(0.0, 0.0, FRAC_PI_4, 1.0),
            Corner::new(30.0, 0.0, 3.0 * FRAC_PI_4, 1.0),
            Corner::new(10.0, 0.0, 3.0 * FRAC_PI_4, 1.0),
        ];
        let graph = GridGraph::new(&corners, &GridGraphParams::default());
        let map = neighbor_map(&graph.neighbors[0]);
        assert_eq!(2, map[&NeighborDirection::Right].index);
    }

    #[test]
    fn rejects_neighbors_with_parallel_diagonals() {
        let corners = vec![
            Corner::new(0.0, 0.0, FRAC_PI_4, 1.0),
            Corner::new(10.0, 0.0, FRAC_PI_4, 1.0),
        ];
        let graph = GridGraph::new(&corners, &GridGraphParams::default());
        assert!(graph.neighbors.iter().all(|n| n.is_empty()));
    }

    #[test]
    fn rejects_neighbors_outside_distance_window() {
        let corners = vec![
            Corner::new(0.0, 0.0, FRAC_PI_4, 1.0),
            Corner::new(30.0, 0.0, 3.0 * FRAC_PI_4, 1.0),
        ];
        let params = GridGraphParams {
            max_spacing_pix: 15.0,
            ..Default::default()
        };
        let graph = GridGraph::new(&corners, &params);
        assert!(graph.neighbors.iter().all(|n| n.is_empty()));
    }

    #[test]
    fn bfs_labels_full_grid() {
        let corners = grid(4, 3, 12.0);
        let graph = GridGraph::new(&corners, &GridGraphParams::default());
        let components = connected_components(&graph);
        assert_eq!(1, components.len());

        let coords = assign_grid_coordinates(&graph, &components[0]);
        assert_eq!(12, coords.len());
        for (node, i, j) in coords {
            // Start node is index 0 at the top-left.
            assert_eq!(node, j as usize * 4 + i as usize);
        }
    }
}
