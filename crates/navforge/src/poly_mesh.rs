use std::collections::HashMap;

use glam::U16Vec3;
use thiserror::Error;
use tracing::warn;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::ContourSet,
    math::{equal_xz, intersect, intersect_prop, left, left_on, next, prev},
};

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices in voxel coordinates relative to [`Self::aabb`].
    pub vertices: Vec<U16Vec3>,
    /// The convex polygons of the mesh.
    pub polygons: Vec<Polygon>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

/// A convex polygon of a [`PolygonMesh`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Polygon {
    /// Indices into [`PolygonMesh::vertices`], counter-clockwise when viewed from above.
    pub vertices: Vec<u32>,
    /// `neighbors[i]` is the polygon sharing the edge `vertices[i] -> vertices[i + 1]`,
    /// or `None` for edges on the hull of the mesh.
    pub neighbors: Vec<Option<u32>>,
    /// The region the polygon was built from.
    pub region: RegionId,
    /// The area type of the polygon.
    pub area: AreaType,
}

impl Polygon {
    /// Iterates over the edges of the polygon as pairs of vertex indices.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[next(i, n)]))
    }
}

impl PolygonMesh {
    /// Voxel vertices never exceed this count, so indices always fit in a `u16` lattice.
    pub const MAX_VERTICES: usize = u16::MAX as usize;

    /// Checks that every interior edge is referenced in the opposite direction by exactly the
    /// neighbor it names.
    pub fn validate_adjacency(&self) -> Result<(), PolygonMeshError> {
        for (polygon_index, polygon) in self.polygons.iter().enumerate() {
            for (edge, (a, b)) in polygon.edges().enumerate() {
                let Some(neighbor) = polygon.neighbors[edge] else {
                    continue;
                };
                let mismatch = PolygonMeshError::AdjacencyMismatch {
                    polygon: polygon_index,
                    edge,
                    neighbor: neighbor as usize,
                };
                let Some(other) = self.polygons.get(neighbor as usize) else {
                    return Err(mismatch);
                };
                let paired = other
                    .edges()
                    .zip(&other.neighbors)
                    .any(|((c, d), back)| c == b && d == a && *back == Some(polygon_index as u32));
                if !paired {
                    return Err(mismatch);
                }
            }
        }
        Ok(())
    }
}

/// Errors that can occur while building a [`PolygonMesh`].
#[derive(Error, Debug)]
pub enum PolygonMeshError {
    /// More vertices than a polygon mesh can address.
    #[error("too many vertices: {count} (max {max})", max = PolygonMesh::MAX_VERTICES)]
    TooManyVertices {
        /// The number of vertices that would have been created.
        count: usize,
    },
    /// A polygon's neighbor does not point back at it over the shared edge.
    #[error("polygon {polygon} edge {edge} names neighbor {neighbor}, which does not link back")]
    AdjacencyMismatch {
        /// The polygon whose edge is inconsistent.
        polygon: usize,
        /// The edge index within the polygon.
        edge: usize,
        /// The neighbor the edge names.
        neighbor: usize,
    },
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Every contour is triangulated by ear clipping, its triangles are merged into convex polygons
    /// of at most `max_vertices_per_polygon` vertices, and finally the adjacency between all
    /// polygons is computed.
    pub fn build_polygon_mesh(
        &self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon.max(3);
        let max_vertices: usize = self.contours.iter().map(|c| c.vertices.len()).sum();
        if max_vertices >= PolygonMesh::MAX_VERTICES {
            return Err(PolygonMeshError::TooManyVertices {
                count: max_vertices,
            });
        }

        let mut mesh = PolygonMesh {
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::new(),
            max_vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            max_edge_error: self.max_error,
        };
        let mut vertex_lookup = VertexLookup::default();

        for contour in &self.contours {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }
            let positions: Vec<U16Vec3> = contour.vertices.iter().map(|v| v.position).collect();

            // Triangulate contour
            let (triangles, complete) = triangulate(&positions);
            if !complete {
                // Bad triangulation, should not happen.
                warn!(
                    region = contour.region.0,
                    vertices = positions.len(),
                    "Bad triangulation of contour, some triangles are missing"
                );
            }
            if triangles.is_empty() {
                continue;
            }

            // Add and merge vertices.
            let indices: Vec<u32> = positions
                .iter()
                .map(|position| vertex_lookup.add(*position, &mut mesh.vertices))
                .collect();

            // Build initial polygons. Only triangles with their interior on the left survive,
            // which also drops the slivers ear clipping leaves along collinear contour runs.
            let mut polygons: Vec<Vec<u32>> = triangles
                .iter()
                .map(|&[a, b, c]| [indices[a], indices[b], indices[c]])
                .filter(|&[a, b, c]| {
                    let vertex = |i: u32| mesh.vertices[i as usize];
                    left(vertex(a), vertex(b), vertex(c))
                })
                .map(|triangle| triangle.to_vec())
                .collect();

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut polygons, &mesh.vertices, nvp);
            }

            // Store polygons.
            mesh.polygons
                .extend(polygons.into_iter().map(|vertices| Polygon {
                    neighbors: vec![None; vertices.len()],
                    vertices,
                    region: contour.region,
                    area: contour.area,
                }));
        }

        // Calculate adjacency.
        build_mesh_adjacency(&mut mesh);

        Ok(mesh)
    }
}

/// Deduplicates mesh vertices that share an XZ lattice position and lie within 2 voxels vertically.
#[derive(Default)]
struct VertexLookup {
    buckets: HashMap<(u16, u16), Vec<u32>>,
}

impl VertexLookup {
    fn add(&mut self, position: U16Vec3, vertices: &mut Vec<U16Vec3>) -> u32 {
        let bucket = self.buckets.entry((position.x, position.z)).or_default();
        if let Some(existing) = bucket
            .iter()
            .find(|i| (vertices[**i as usize].y as i32 - position.y as i32).abs() <= 2)
        {
            return *existing;
        }
        let index = vertices.len() as u32;
        vertices.push(position);
        bucket.push(index);
        index
    }
}

#[derive(Debug, Clone, Copy)]
struct EarCandidate {
    vertex: usize,
    is_ear: bool,
}

/// Triangulates a simple polygon by ear clipping, always cutting the ear with the shortest diagonal.
///
/// Returns the triangles as indices into `vertices` and whether the triangulation covered the whole polygon.
fn triangulate(vertices: &[U16Vec3]) -> (Vec<[usize; 3]>, bool) {
    let mut triangles = Vec::with_capacity(vertices.len().saturating_sub(2));
    let mut n = vertices.len();
    let mut candidates: Vec<EarCandidate> = (0..n)
        .map(|vertex| EarCandidate {
            vertex,
            is_ear: false,
        })
        .collect();

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        candidates[i1].is_ear = diagonal(i, i2, vertices, &candidates, DiagonalTest::Strict);
    }

    while n > 3 {
        let shortest_ear = |test: DiagonalTest| {
            let mut min_len = None;
            let mut min_i = None;
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                let is_ear = match test {
                    DiagonalTest::Strict => candidates[i1].is_ear,
                    DiagonalTest::Loose => diagonal(i, i2, vertices, &candidates, test),
                };
                if !is_ear {
                    continue;
                }
                let p0 = vertices[candidates[i].vertex];
                let p2 = vertices[candidates[i2].vertex];
                let dx = p2.x as i64 - p0.x as i64;
                let dz = p2.z as i64 - p0.z as i64;
                let len = dx * dx + dz * dz;
                if min_len.is_none_or(|min| len < min) {
                    min_len = Some(len);
                    min_i = Some(i);
                }
            }
            min_i
        };

        // We might get here because the contour has overlapping segments, like this:
        //
        //  A o-o=====o---o B
        //   /  |C   D|    \.
        //  o   o     o     o
        //  :   :     :     :
        // We'll try to recover by loosing up the inCone test a bit so that a diagonal
        // like A-B or C-D can be found and we can continue.
        let Some(i) = shortest_ear(DiagonalTest::Strict).or_else(|| shortest_ear(DiagonalTest::Loose))
        else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return (triangles, false);
        };

        let mut i = i;
        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([
            candidates[i].vertex,
            candidates[i1].vertex,
            candidates[i2].vertex,
        ]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        candidates.remove(i1);
        n -= 1;
        if i1 >= n {
            i1 = 0;
        }
        i = prev(i1, n);

        // Update diagonal flags.
        candidates[i].is_ear = diagonal(prev(i, n), i1, vertices, &candidates, DiagonalTest::Strict);
        candidates[i1].is_ear = diagonal(i, next(i1, n), vertices, &candidates, DiagonalTest::Strict);
    }

    // Append the remaining triangle.
    if n == 3 {
        triangles.push([
            candidates[0].vertex,
            candidates[1].vertex,
            candidates[2].vertex,
        ]);
    }
    (triangles, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiagonalTest {
    /// The diagonal must not touch any other edge.
    Strict,
    /// Collinear and touching edges are tolerated.
    Loose,
}

/// Returns true iff `(v_i, v_j)` is a proper internal diagonal of the polygon.
fn diagonal(
    i: usize,
    j: usize,
    vertices: &[U16Vec3],
    candidates: &[EarCandidate],
    test: DiagonalTest,
) -> bool {
    in_cone(i, j, vertices, candidates, test) && diagonalie(i, j, vertices, candidates, test)
}

/// Returns true iff the diagonal `(i, j)` is strictly internal to the polygon in the
/// neighborhood of the `i` endpoint.
fn in_cone(
    i: usize,
    j: usize,
    vertices: &[U16Vec3],
    candidates: &[EarCandidate],
    test: DiagonalTest,
) -> bool {
    let n = candidates.len();
    let pi = vertices[candidates[i].vertex];
    let pj = vertices[candidates[j].vertex];
    let pi1 = vertices[candidates[next(i, n)].vertex];
    let pin1 = vertices[candidates[prev(i, n)].vertex];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return match test {
            DiagonalTest::Strict => left(pi, pj, pin1) && left(pj, pi, pi1),
            DiagonalTest::Loose => left_on(pi, pj, pin1) && left_on(pj, pi, pi1),
        };
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff `(v_i, v_j)` is a proper internal *or* external diagonal of the polygon,
/// ignoring edges incident to `v_i` and `v_j`.
fn diagonalie(
    i: usize,
    j: usize,
    vertices: &[U16Vec3],
    candidates: &[EarCandidate],
    test: DiagonalTest,
) -> bool {
    let n = candidates.len();
    let d0 = vertices[candidates[i].vertex];
    let d1 = vertices[candidates[j].vertex];

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertices[candidates[k].vertex];
        let p1 = vertices[candidates[k1].vertex];
        if equal_xz(d0, p0) || equal_xz(d1, p0) || equal_xz(d0, p1) || equal_xz(d1, p1) {
            continue;
        }
        let crosses = match test {
            DiagonalTest::Strict => intersect(d0, d1, p0, p1),
            DiagonalTest::Loose => intersect_prop(d0, d1, p0, p1),
        };
        if crosses {
            return false;
        }
    }
    true
}

/// A candidate merge of two polygons over a shared edge.
#[derive(Debug, Clone, Copy)]
struct PolygonMerge {
    /// Squared length of the shared edge.
    value: i64,
    /// Index of the shared edge in the first polygon.
    edge_a: usize,
    /// Index of the shared edge in the second polygon.
    edge_b: usize,
}

/// Greedily merges polygons, always removing the longest shared edge whose removal keeps the
/// result convex and within `nvp` vertices.
fn merge_polygons(polygons: &mut Vec<Vec<u32>>, vertices: &[U16Vec3], nvp: usize) {
    loop {
        // Find best polygons to merge.
        let mut best: Option<(usize, usize, PolygonMerge)> = None;
        for j in 0..polygons.len().saturating_sub(1) {
            for k in j + 1..polygons.len() {
                let Some(merge) = poly_merge_value(&polygons[j], &polygons[k], vertices, nvp)
                else {
                    continue;
                };
                if best.is_none_or(|(_, _, current)| merge.value > current.value) {
                    best = Some((j, k, merge));
                }
            }
        }

        let Some((a, b, merge)) = best else {
            // Could not merge any polygons, stop.
            break;
        };
        // Found best, merge.
        let merged = merge_polygon_vertices(&polygons[a], &polygons[b], merge);
        polygons[a] = merged;
        polygons.swap_remove(b);
    }
}

fn poly_merge_value(
    polygon_a: &[u32],
    polygon_b: &[u32],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<PolygonMerge> {
    let na = polygon_a.len();
    let nb = polygon_b.len();

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted = |a: u32, b: u32| if a > b { (b, a) } else { (a, b) };
    let (edge_a, edge_b) = (0..na).find_map(|i| {
        let edge = sorted(polygon_a[i], polygon_a[next(i, na)]);
        (0..nb)
            .find(|&j| sorted(polygon_b[j], polygon_b[next(j, nb)]) == edge)
            .map(|j| (i, j))
    })?;

    // Check to see if the merged polygon would be convex.
    let vertex = |i: u32| vertices[i as usize];
    let va = vertex(polygon_a[(edge_a + na - 1) % na]);
    let vb = vertex(polygon_a[edge_a]);
    let vc = vertex(polygon_b[(edge_b + 2) % nb]);
    if !left(va, vb, vc) {
        return None;
    }

    let va = vertex(polygon_b[(edge_b + nb - 1) % nb]);
    let vb = vertex(polygon_b[edge_b]);
    let vc = vertex(polygon_a[(edge_a + 2) % na]);
    if !left(va, vb, vc) {
        return None;
    }

    let va = vertex(polygon_a[edge_a]);
    let vb = vertex(polygon_a[next(edge_a, na)]);
    let dx = va.x as i64 - vb.x as i64;
    let dz = va.z as i64 - vb.z as i64;
    Some(PolygonMerge {
        value: dx * dx + dz * dz,
        edge_a,
        edge_b,
    })
}

fn merge_polygon_vertices(polygon_a: &[u32], polygon_b: &[u32], merge: PolygonMerge) -> Vec<u32> {
    let na = polygon_a.len();
    let nb = polygon_b.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    // Add pa
    merged.extend((0..na - 1).map(|i| polygon_a[(merge.edge_a + 1 + i) % na]));
    // Add pb
    merged.extend((0..nb - 1).map(|i| polygon_b[(merge.edge_b + 1 + i) % nb]));
    merged
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    vertices: [u32; 2],
    polygons: [usize; 2],
    polygon_edges: [usize; 2],
}

/// Links every pair of polygons that traverse the same edge in opposite directions.
pub(crate) fn build_mesh_adjacency(mesh: &mut PolygonMesh) {
    let mut edges: Vec<Edge> = Vec::new();
    let mut edges_by_vertex: HashMap<u32, Vec<usize>> = HashMap::new();

    for (i, polygon) in mesh.polygons.iter().enumerate() {
        for (j, (v0, v1)) in polygon.edges().enumerate() {
            if v0 < v1 {
                edges_by_vertex.entry(v0).or_default().push(edges.len());
                edges.push(Edge {
                    vertices: [v0, v1],
                    polygons: [i, i],
                    polygon_edges: [j, 0],
                });
            }
        }
    }

    for (i, polygon) in mesh.polygons.iter().enumerate() {
        for (j, (v0, v1)) in polygon.edges().enumerate() {
            if v0 <= v1 {
                continue;
            }
            let Some(candidates) = edges_by_vertex.get(&v1) else {
                continue;
            };
            let Some(e) = candidates.iter().copied().find(|&e| {
                edges[e].vertices[1] == v0 && edges[e].polygons[0] == edges[e].polygons[1]
            }) else {
                continue;
            };
            let edge = &mut edges[e];
            edge.polygons[1] = i;
            edge.polygon_edges[1] = j;
        }
    }

    // Store adjacency
    for edge in &edges {
        if edge.polygons[0] == edge.polygons[1] {
            continue;
        }
        let [p0, p1] = edge.polygons;
        let [e0, e1] = edge.polygon_edges;
        mesh.polygons[p0].neighbors[e0] = Some(p1 as u32);
        mesh.polygons[p1].neighbors[e1] = Some(p0 as u32);
    }
}

#[cfg(test)]
mod tests {
    use glam::u16vec3;

    use crate::{Contour, ContourVertex, ContourVertexFlags, math::area2};

    use super::*;

    fn contour(points: &[(u16, u16)], region: u16) -> Contour {
        let vertices: Vec<ContourVertex> = points
            .iter()
            .map(|&(x, z)| ContourVertex {
                position: u16vec3(x, 1, z),
                flags: ContourVertexFlags::empty(),
            })
            .collect();
        Contour {
            raw_vertices: vertices.clone(),
            vertices,
            region: RegionId(region),
            area: AreaType::DEFAULT_WALKABLE,
        }
    }

    fn contour_set(contours: Vec<Contour>) -> ContourSet {
        ContourSet {
            contours,
            aabb: Aabb3d::new([0.0, 0.0, 0.0], [16.0, 4.0, 16.0]),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 16,
            depth: 16,
            max_error: 1.3,
        }
    }

    // Counter-clockwise from above: interior on the left of every edge.
    const SQUARE: [(u16, u16); 4] = [(0, 0), (0, 4), (4, 4), (4, 0)];

    fn assert_convex(mesh: &PolygonMesh, polygon: &Polygon) {
        let n = polygon.vertices.len();
        for i in 0..n {
            let a = mesh.vertices[polygon.vertices[i] as usize];
            let b = mesh.vertices[polygon.vertices[next(i, n)] as usize];
            let c = mesh.vertices[polygon.vertices[next(next(i, n), n)] as usize];
            assert!(area2(a, b, c) <= 0.0, "reflex corner at {b}");
        }
    }

    #[test]
    fn square_becomes_a_single_quad() {
        let mesh = contour_set(vec![contour(&SQUARE, 1)])
            .build_polygon_mesh(6)
            .unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygons.len(), 1);
        assert_eq!(mesh.polygons[0].vertices.len(), 4);
        assert_eq!(mesh.polygons[0].neighbors, vec![None; 4]);
    }

    #[test]
    fn triangles_only_when_nvp_is_three() {
        let mesh = contour_set(vec![contour(&SQUARE, 1)])
            .build_polygon_mesh(3)
            .unwrap();
        assert_eq!(mesh.polygons.len(), 2);
        let linked = mesh.polygons[0].neighbors.iter().flatten().count();
        assert_eq!(linked, 1);
        mesh.validate_adjacency().unwrap();
    }

    #[test]
    fn l_shape_stays_convex() {
        let l_shape = [(0, 0), (0, 6), (2, 6), (2, 2), (6, 2), (6, 0)];
        let mesh = contour_set(vec![contour(&l_shape, 1)])
            .build_polygon_mesh(6)
            .unwrap();
        assert!(mesh.polygons.len() >= 2);
        for polygon in &mesh.polygons {
            assert!(polygon.vertices.len() <= 6);
            assert_convex(&mesh, polygon);
        }
        mesh.validate_adjacency().unwrap();
    }

    fn signed_area2(mesh: &PolygonMesh, polygon: &Polygon) -> f64 {
        let vertex = |i: u32| mesh.vertices[i as usize];
        let first = vertex(polygon.vertices[0]);
        polygon
            .vertices
            .windows(2)
            .skip(1)
            .map(|pair| area2(first, vertex(pair[0]), vertex(pair[1])))
            .sum()
    }

    #[test]
    fn collinear_contour_runs_leave_no_slivers() {
        let notch = [(0, 15), (4, 15), (2, 13), (2, 15)];
        for nvp in [3, 6] {
            let mesh = contour_set(vec![contour(&notch, 1)])
                .build_polygon_mesh(nvp)
                .unwrap();
            assert!(!mesh.polygons.is_empty());
            for polygon in &mesh.polygons {
                assert!(signed_area2(&mesh, polygon) < 0.0, "{polygon:?} has no area");
                assert_convex(&mesh, polygon);
            }
            mesh.validate_adjacency().unwrap();
        }
    }

    #[test]
    fn neighboring_regions_share_vertices_and_link() {
        let left_square = [(0, 0), (0, 4), (4, 4), (4, 0)];
        let right_square = [(4, 0), (4, 4), (8, 4), (8, 0)];
        let mesh = contour_set(vec![contour(&left_square, 1), contour(&right_square, 2)])
            .build_polygon_mesh(6)
            .unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.polygons.len(), 2);
        assert!(mesh.polygons[0].neighbors.contains(&Some(1)));
        assert!(mesh.polygons[1].neighbors.contains(&Some(0)));
        mesh.validate_adjacency().unwrap();
    }

    #[test]
    fn broken_adjacency_is_reported() {
        let mut mesh = contour_set(vec![contour(&SQUARE, 1)])
            .build_polygon_mesh(3)
            .unwrap();
        let edge = mesh.polygons[1]
            .neighbors
            .iter()
            .position(Option::is_some)
            .unwrap();
        mesh.polygons[1].neighbors[edge] = None;
        assert!(matches!(
            mesh.validate_adjacency(),
            Err(PolygonMeshError::AdjacencyMismatch { polygon: 0, .. })
        ));
    }

    #[test]
    fn near_vertices_are_welded() {
        let mut lookup = VertexLookup::default();
        let mut vertices = Vec::new();
        let a = lookup.add(u16vec3(1, 3, 1), &mut vertices);
        let b = lookup.add(u16vec3(1, 5, 1), &mut vertices);
        let c = lookup.add(u16vec3(1, 6, 1), &mut vertices);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(vertices.len(), 2);
    }
}
