//! A* path queries over a [`CompiledNavmesh`].
//!
//! A query only reads the navmesh and keeps its search state local to the call,
//! so any number of queries may run over the same navmesh in parallel.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use glam::Vec3A;
use tracing::warn;

use crate::{
    CompiledNavmesh, PolygonRef, TilePolygon,
    math::{height_on_triangle, point_in_convex_polygon_xz},
};

/// Read-only path queries over a [`CompiledNavmesh`].
#[derive(Debug, Clone, Copy)]
pub struct NavmeshQuery<'a> {
    navmesh: &'a CompiledNavmesh,
}

/// The result of [`NavmeshQuery::find_nearest_polygon`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPolygon {
    /// The polygon that was found.
    pub polygon: PolygonRef,
    /// The query point snapped onto the polygon's surface, or the polygon's centroid
    /// when no polygon contains the point.
    pub point: Vec3A,
    /// Whether the polygon contains the query point on the xz-plane.
    pub inside: bool,
}

/// How a path query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// The path connects the start and goal points.
    Success,
    /// The path connects the polygons nearest to the start and goal points, but at least one of
    /// the points lies outside of the navmesh.
    Partial,
    /// The goal cannot be reached. The path leads to the polygon closest to the goal instead.
    Failure,
}

/// A step of a path: a polygon and the point at which the path enters it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathNode {
    /// The polygon of this step.
    pub polygon: PolygonRef,
    /// The start point for the first node, the midpoint of the portal to the previous polygon otherwise.
    pub position: Vec3A,
    /// The length of the path from the start up to [`Self::position`].
    pub cost: f32,
}

/// The result of a path query.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    /// How the query ended.
    pub status: PathStatus,
    /// The polygons of the path from the start polygon onward. Empty if no start polygon exists.
    pub nodes: Vec<PathNode>,
    /// The length of [`Self::points`].
    pub cost: f32,
    /// The start point the search used.
    pub start: Vec3A,
    /// The goal point the search used.
    pub goal: Vec3A,
}

impl PathResult {
    fn failed(start: Vec3A, goal: Vec3A) -> Self {
        Self {
            status: PathStatus::Failure,
            nodes: Vec::new(),
            cost: 0.0,
            start,
            goal,
        }
    }

    /// Whether the path reaches the goal polygon.
    pub fn reaches_goal(&self) -> bool {
        self.status != PathStatus::Failure
    }

    /// The polygons of the path in order.
    pub fn polygons(&self) -> impl Iterator<Item = PolygonRef> + '_ {
        self.nodes.iter().map(|node| node.polygon)
    }

    /// The waypoints of the path: the start, every portal midpoint and, if reached, the goal.
    pub fn points(&self) -> Vec<Vec3A> {
        let mut points: Vec<Vec3A> = self.nodes.iter().map(|node| node.position).collect();
        if self.reaches_goal() && !self.nodes.is_empty() {
            points.push(self.goal);
        }
        points
    }
}

struct SearchNode {
    polygon: PolygonRef,
    parent: Option<usize>,
    position: Vec3A,
    cost: f32,
    total: f32,
    closed: bool,
}

/// Entry in the open set (min-heap via reversed ordering).
struct OpenEntry {
    node: usize,
    total: f32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap: smallest total is "greatest".
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl<'a> NavmeshQuery<'a> {
    /// Creates a query over `navmesh`.
    pub fn new(navmesh: &'a CompiledNavmesh) -> Self {
        Self { navmesh }
    }

    /// The navmesh this query runs on.
    pub fn navmesh(&self) -> &'a CompiledNavmesh {
        self.navmesh
    }

    /// Finds the polygon under or above `point`.
    ///
    /// Among the polygons containing `point` on the xz-plane, the one whose surface height is
    /// nearest to `point.y` wins. If no polygon contains it, the polygon with the nearest
    /// centroid is returned instead. Returns `None` only for an empty navmesh.
    pub fn find_nearest_polygon(&self, point: Vec3A) -> Option<NearestPolygon> {
        let mut nearest: Option<(NearestPolygon, f32)> = None;
        for (tile_index, tile) in self.navmesh.tiles.iter().enumerate() {
            for (polygon_index, polygon) in tile.polygons.iter().enumerate() {
                let vertices: Vec<Vec3A> = polygon
                    .vertices
                    .iter()
                    .map(|&v| tile.vertices[v as usize])
                    .collect();
                if !point_in_convex_polygon_xz(point, &vertices) {
                    continue;
                }
                let height = surface_height(polygon, &vertices, point);
                let distance = (height - point.y).abs();
                if nearest.is_none_or(|(_, best)| distance < best) {
                    nearest = Some((
                        NearestPolygon {
                            polygon: PolygonRef::new(tile_index as u32, polygon_index as u32),
                            point: Vec3A::new(point.x, height, point.z),
                            inside: true,
                        },
                        distance,
                    ));
                }
            }
        }
        if let Some((nearest, _)) = nearest {
            return Some(nearest);
        }

        self.navmesh
            .polygons()
            .map(|(polygon_ref, polygon)| (polygon_ref, polygon.centroid))
            .min_by(|(_, a), (_, b)| {
                a.distance_squared(point)
                    .total_cmp(&b.distance_squared(point))
            })
            .map(|(polygon, centroid)| NearestPolygon {
                polygon,
                point: centroid,
                inside: false,
            })
    }

    /// Finds a path between two world-space points.
    ///
    /// Both points are first resolved with [`Self::find_nearest_polygon`]. A point outside
    /// of the navmesh is replaced by the centroid of its nearest polygon, and a path found
    /// that way is [`PathStatus::Partial`].
    pub fn find_path(&self, start: Vec3A, goal: Vec3A) -> PathResult {
        let (Some(from), Some(to)) = (
            self.find_nearest_polygon(start),
            self.find_nearest_polygon(goal),
        ) else {
            return PathResult::failed(start, goal);
        };
        if !from.inside {
            warn!(?start, polygon = ?from.polygon, "Path start is off the navmesh, using the nearest polygon.");
        }
        if !to.inside {
            warn!(?goal, polygon = ?to.polygon, "Path goal is off the navmesh, using the nearest polygon.");
        }

        let mut path = self.find_path_between(from.point, to.point, from.polygon, to.polygon);
        if path.status == PathStatus::Success && !(from.inside && to.inside) {
            path.status = PathStatus::Partial;
        }
        path
    }

    /// Runs A* over the polygon adjacency from `start_polygon` to `goal_polygon`.
    ///
    /// `start` and `goal` are expected to lie on their polygons. Every node after the first is
    /// placed at the midpoint of the portal it was entered through, and the cost of a step is the
    /// straight-line distance between consecutive nodes. If the goal polygon is unreachable, the
    /// result leads to the polygon closest to `goal` and has [`PathStatus::Failure`].
    pub fn find_path_between(
        &self,
        start: Vec3A,
        goal: Vec3A,
        start_polygon: PolygonRef,
        goal_polygon: PolygonRef,
    ) -> PathResult {
        if self.navmesh.polygon(start_polygon).is_none()
            || self.navmesh.polygon(goal_polygon).is_none()
        {
            warn!(
                ?start_polygon,
                ?goal_polygon,
                "Path endpoints do not refer to polygons of the navmesh."
            );
            return PathResult::failed(start, goal);
        }

        let start_heuristic = start.distance(goal);
        let mut nodes = vec![SearchNode {
            polygon: start_polygon,
            parent: None,
            position: start,
            cost: 0.0,
            total: start_heuristic,
            closed: false,
        }];
        let mut lookup = HashMap::from([(start_polygon, 0)]);
        let mut open = BinaryHeap::from([OpenEntry {
            node: 0,
            total: start_heuristic,
        }]);
        let mut best = (0, start_heuristic);
        let mut found = None;

        while let Some(entry) = open.pop() {
            let current = entry.node;
            if nodes[current].closed || entry.total > nodes[current].total {
                // Stale entry.
                continue;
            }
            nodes[current].closed = true;
            let polygon_ref = nodes[current].polygon;
            if polygon_ref == goal_polygon {
                found = Some(current);
                break;
            }
            let Some(polygon) = self.navmesh.polygon(polygon_ref) else {
                continue;
            };

            let parent_ref = nodes[current].parent.map(|parent| nodes[parent].polygon);
            for neighbor in polygon.neighbors.iter().flatten() {
                let neighbor_ref = PolygonRef::new(polygon_ref.tile, *neighbor);
                if Some(neighbor_ref) == parent_ref {
                    continue;
                }
                let Some((a, b)) = self.navmesh.portal(polygon_ref, neighbor_ref) else {
                    continue;
                };
                let position = (a + b) * 0.5;
                let cost = nodes[current].cost + nodes[current].position.distance(position);
                let heuristic = position.distance(goal);
                let total = cost + heuristic;

                let index = match lookup.get(&neighbor_ref) {
                    Some(&index) => {
                        if total >= nodes[index].total || descends_from(&nodes, current, index) {
                            continue;
                        }
                        index
                    }
                    None => {
                        nodes.push(SearchNode {
                            polygon: neighbor_ref,
                            parent: None,
                            position,
                            cost,
                            total,
                            closed: false,
                        });
                        lookup.insert(neighbor_ref, nodes.len() - 1);
                        nodes.len() - 1
                    }
                };
                let node = &mut nodes[index];
                node.parent = Some(current);
                node.position = position;
                node.cost = cost;
                node.total = total;
                // A cheaper route reopens closed nodes.
                node.closed = false;
                open.push(OpenEntry { node: index, total });

                if heuristic < best.1 {
                    best = (index, heuristic);
                }
            }
        }

        let (last, status) = match found {
            Some(goal_node) => (goal_node, PathStatus::Success),
            None => (best.0, PathStatus::Failure),
        };
        let mut chain = Vec::new();
        let mut cursor = Some(last);
        while let Some(index) = cursor {
            let node = &nodes[index];
            chain.push(PathNode {
                polygon: node.polygon,
                position: node.position,
                cost: 0.0,
            });
            cursor = node.parent;
        }
        chain.reverse();

        // Reparented nodes leave stale costs behind in their old subtrees.
        let mut cost = 0.0;
        for i in 1..chain.len() {
            cost += chain[i - 1].position.distance(chain[i].position);
            chain[i].cost = cost;
        }
        if let Some(end) = chain.last().filter(|_| status != PathStatus::Failure) {
            cost += end.position.distance(goal);
        }
        PathResult {
            status,
            nodes: chain,
            cost,
            start,
            goal,
        }
    }
}

/// Whether `ancestor` lies on the parent chain of `node`, `node` itself included.
fn descends_from(nodes: &[SearchNode], node: usize, ancestor: usize) -> bool {
    let mut cursor = Some(node);
    while let Some(index) = cursor {
        if index == ancestor {
            return true;
        }
        cursor = nodes[index].parent;
    }
    false
}

/// Height of the polygon's surface at the xz-position of `point`.
fn surface_height(polygon: &TilePolygon, vertices: &[Vec3A], point: Vec3A) -> f32 {
    if let Some(height) = polygon.detail.height_at(point) {
        return height;
    }
    // Fan over the polygon itself.
    vertices
        .windows(2)
        .skip(1)
        .find_map(|pair| height_on_triangle(point, vertices[0], pair[0], pair[1]))
        .unwrap_or(polygon.centroid.y)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::U16Vec3;

    use super::*;
    use crate::{
        Aabb3d, AreaType, DetailNavmesh, DetailSubMesh, DetailTriangle, Polygon, PolygonMesh,
        RegionId,
    };

    /// Three unit quads in a row along x, plus an island at x in [5, 6].
    fn corridor() -> CompiledNavmesh {
        let mut vertices = Vec::new();
        for x in 0..4 {
            vertices.push(U16Vec3::new(x, 0, 0));
            vertices.push(U16Vec3::new(x, 0, 1));
        }
        vertices.extend([
            U16Vec3::new(5, 0, 0),
            U16Vec3::new(5, 0, 1),
            U16Vec3::new(6, 0, 1),
            U16Vec3::new(6, 0, 0),
        ]);
        let mut polygons: Vec<Polygon> = (0..3u32)
            .map(|i| Polygon {
                vertices: vec![2 * i, 2 * i + 1, 2 * i + 3, 2 * i + 2],
                neighbors: vec![
                    i.checked_sub(1),
                    None,
                    (i < 2).then_some(i + 1),
                    None,
                ],
                region: RegionId(1),
                area: AreaType::DEFAULT_WALKABLE,
            })
            .collect();
        polygons.push(Polygon {
            vertices: vec![8, 9, 10, 11],
            neighbors: vec![None; 4],
            region: RegionId(2),
            area: AreaType::DEFAULT_WALKABLE,
        });
        let mesh = PolygonMesh {
            vertices,
            polygons,
            max_vertices_per_polygon: 6,
            aabb: Aabb3d::new(Vec3A::ZERO, Vec3A::new(6.0, 1.0, 1.0)),
            cell_size: 1.0,
            cell_height: 1.0,
            max_edge_error: 1.0,
        };
        let detail = DetailNavmesh {
            meshes: mesh
                .polygons
                .iter()
                .map(|polygon| DetailSubMesh {
                    vertices: polygon
                        .vertices
                        .iter()
                        .map(|&v| Vec3A::from(mesh.vertices[v as usize].as_vec3()))
                        .collect(),
                    triangles: vec![
                        DetailTriangle {
                            vertices: [0, 1, 2],
                            on_hull: [true, true, false],
                        },
                        DetailTriangle {
                            vertices: [0, 2, 3],
                            on_hull: [false, true, true],
                        },
                    ],
                })
                .collect(),
        };
        CompiledNavmesh::compile(&mesh, &detail).unwrap()
    }

    /// An `n` by `n` grid of unit cells, each split into two triangles with alternating diagonals.
    fn triangle_grid(n: u16) -> CompiledNavmesh {
        let index = |x: u16, z: u16| (x * (n + 1) + z) as u32;
        let mut vertices = Vec::new();
        for x in 0..=n {
            for z in 0..=n {
                vertices.push(U16Vec3::new(x, 0, z));
            }
        }
        let mut polygons = Vec::new();
        for x in 0..n {
            for z in 0..n {
                let [a, b, c, d] = [
                    index(x, z),
                    index(x, z + 1),
                    index(x + 1, z + 1),
                    index(x + 1, z),
                ];
                let triangles = if (x + z) % 2 == 0 {
                    [[a, b, c], [a, c, d]]
                } else {
                    [[a, b, d], [b, c, d]]
                };
                for triangle in triangles {
                    polygons.push(Polygon {
                        vertices: triangle.to_vec(),
                        neighbors: vec![None; 3],
                        region: RegionId(1),
                        area: AreaType::DEFAULT_WALKABLE,
                    });
                }
            }
        }
        let mut mesh = PolygonMesh {
            vertices,
            polygons,
            max_vertices_per_polygon: 3,
            aabb: Aabb3d::new(Vec3A::ZERO, Vec3A::new(n as f32, 1.0, n as f32)),
            cell_size: 1.0,
            cell_height: 1.0,
            max_edge_error: 1.0,
        };
        crate::poly_mesh::build_mesh_adjacency(&mut mesh);
        mesh.validate_adjacency().unwrap();
        let detail = DetailNavmesh {
            meshes: mesh
                .polygons
                .iter()
                .map(|polygon| DetailSubMesh {
                    vertices: polygon
                        .vertices
                        .iter()
                        .map(|&v| Vec3A::from(mesh.vertices[v as usize].as_vec3()))
                        .collect(),
                    triangles: vec![DetailTriangle {
                        vertices: [0, 1, 2],
                        on_hull: [true; 3],
                    }],
                })
                .collect(),
        };
        CompiledNavmesh::compile(&mesh, &detail).unwrap()
    }

    fn assert_cost_matches_points(path: &PathResult) {
        let length: f32 = path
            .points()
            .windows(2)
            .map(|pair| pair[0].distance(pair[1]))
            .sum();
        assert_relative_eq!(path.cost, length, epsilon = 1e-5);
    }

    #[test]
    fn nearest_polygon_contains_the_point() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let nearest = query
            .find_nearest_polygon(Vec3A::new(1.5, 3.0, 0.5))
            .unwrap();
        assert_eq!(nearest.polygon, PolygonRef::new(0, 1));
        assert!(nearest.inside);
        assert_eq!(nearest.point, Vec3A::new(1.5, 0.0, 0.5));
    }

    #[test]
    fn nearest_polygon_falls_back_to_centroids() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let nearest = query
            .find_nearest_polygon(Vec3A::new(2.5, 0.0, 3.0))
            .unwrap();
        assert_eq!(nearest.polygon, PolygonRef::new(0, 2));
        assert!(!nearest.inside);
        assert_eq!(nearest.point, Vec3A::new(2.5, 0.0, 0.5));
    }

    #[test]
    fn centroids_find_their_own_polygon() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        for (polygon_ref, polygon) in navmesh.polygons() {
            let nearest = query.find_nearest_polygon(polygon.centroid).unwrap();
            assert_eq!(nearest.polygon, polygon_ref);
        }
    }

    #[test]
    fn path_walks_through_portal_midpoints() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let path = query.find_path(Vec3A::new(0.5, 0.0, 0.5), Vec3A::new(2.5, 0.0, 0.5));
        assert_eq!(path.status, PathStatus::Success);
        let polygons: Vec<_> = path.polygons().map(|p| p.polygon).collect();
        assert_eq!(polygons, vec![0, 1, 2]);
        assert_eq!(
            path.points(),
            vec![
                Vec3A::new(0.5, 0.0, 0.5),
                Vec3A::new(1.0, 0.0, 0.5),
                Vec3A::new(2.0, 0.0, 0.5),
                Vec3A::new(2.5, 0.0, 0.5),
            ]
        );
        assert_relative_eq!(path.cost, 2.0, epsilon = 1e-5);
        assert_cost_matches_points(&path);
    }

    #[test]
    fn paths_over_a_dense_mesh_stay_acyclic() {
        let navmesh = triangle_grid(6);
        let query = NavmeshQuery::new(&navmesh);
        let centroids: Vec<_> = navmesh
            .polygons()
            .map(|(polygon_ref, polygon)| (polygon_ref, polygon.centroid))
            .collect();
        for &(from, start) in &centroids {
            for &(to, goal) in &centroids {
                let path = query.find_path_between(start, goal, from, to);
                assert_eq!(path.status, PathStatus::Success);
                assert_eq!(path.nodes.first().unwrap().polygon, from);
                assert_eq!(path.nodes.last().unwrap().polygon, to);
                let unique: std::collections::HashSet<_> = path.polygons().collect();
                assert_eq!(unique.len(), path.nodes.len(), "path revisits a polygon");
                for pair in path.nodes.windows(2) {
                    assert!(navmesh.portal(pair[0].polygon, pair[1].polygon).is_some());
                }
                assert_cost_matches_points(&path);
            }
        }
    }

    #[test]
    fn path_within_one_polygon() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let path = query.find_path(Vec3A::new(0.2, 0.0, 0.2), Vec3A::new(0.8, 0.0, 0.2));
        assert_eq!(path.status, PathStatus::Success);
        assert_eq!(path.nodes.len(), 1);
        assert_relative_eq!(path.cost, 0.6, epsilon = 1e-5);
    }

    #[test]
    fn unreachable_goal_fails_towards_it() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let path = query.find_path(Vec3A::new(0.5, 0.0, 0.5), Vec3A::new(5.5, 0.0, 0.5));
        assert_eq!(path.status, PathStatus::Failure);
        assert_eq!(path.nodes.last().unwrap().polygon, PolygonRef::new(0, 2));
        assert_eq!(path.points().len(), 3);
        assert_cost_matches_points(&path);
    }

    #[test]
    fn goal_off_the_mesh_is_partial() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let path = query.find_path(Vec3A::new(0.5, 0.0, 0.5), Vec3A::new(2.5, 0.0, 3.0));
        assert_eq!(path.status, PathStatus::Partial);
        assert_eq!(path.goal, Vec3A::new(2.5, 0.0, 0.5));
        assert_cost_matches_points(&path);
    }

    #[test]
    fn empty_navmesh_fails() {
        let navmesh = CompiledNavmesh::default();
        let query = NavmeshQuery::new(&navmesh);
        let path = query.find_path(Vec3A::ZERO, Vec3A::ONE);
        assert_eq!(path.status, PathStatus::Failure);
        assert!(path.nodes.is_empty());
        assert!(path.points().is_empty());
    }

    #[test]
    fn dangling_polygon_refs_fail() {
        let navmesh = corridor();
        let query = NavmeshQuery::new(&navmesh);
        let path = query.find_path_between(
            Vec3A::ZERO,
            Vec3A::ONE,
            PolygonRef::new(0, 0),
            PolygonRef::new(3, 0),
        );
        assert_eq!(path.status, PathStatus::Failure);
    }
}
