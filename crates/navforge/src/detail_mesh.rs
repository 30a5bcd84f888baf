use std::collections::VecDeque;

use glam::{DVec2, U16Vec3, Vec3A, Vec3Swizzles as _};
use thiserror::Error;
use tracing::warn;

use crate::{
    Aabb3d, CompactHeightfield, PolygonMesh, RegionId,
    math::{
        cross_xz, dir_for_offset, dir_offset_x, dir_offset_z,
        distance_squared_between_point_and_line_vec2,
        distance_squared_between_point_and_line_vec3, height_on_triangle, next, point_in_polygon_xz,
        prev,
    },
};

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// One sub-mesh per polygon of the source [`PolygonMesh`], in the same order.
    pub meshes: Vec<DetailSubMesh>,
}

/// The height detail of a single polygon.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailSubMesh {
    /// World-space vertices. The polygon's own vertices come first, in polygon order,
    /// followed by the samples added along its edges and inside it.
    pub vertices: Vec<Vec3A>,
    /// Triangles over [`Self::vertices`], wound like the polygon.
    pub triangles: Vec<DetailTriangle>,
}

/// A triangle of a [`DetailSubMesh`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailTriangle {
    /// Indices into [`DetailSubMesh::vertices`].
    pub vertices: [u32; 3],
    /// `on_hull[i]` is set when the edge `vertices[i] -> vertices[i + 1]` lies on the polygon's boundary.
    pub on_hull: [bool; 3],
}

impl DetailSubMesh {
    /// The world-space corners of `triangle`.
    #[inline]
    pub fn triangle_vertices(&self, triangle: &DetailTriangle) -> [Vec3A; 3] {
        triangle.vertices.map(|i| self.vertices[i as usize])
    }

    /// Height of the detail surface at the XZ position of `point`, if any triangle covers it.
    pub fn height_at(&self, point: Vec3A) -> Option<f32> {
        self.triangles.iter().find_map(|triangle| {
            let [a, b, c] = self.triangle_vertices(triangle);
            height_on_triangle(point, a, b, c)
        })
    }
}

/// Interior samples stop once a detail sub-mesh has this many vertices.
const MAX_VERTS: usize = 127;
const MAX_VERTS_PER_EDGE: usize = 32;

impl DetailNavmesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// # Arguments
    ///
    /// - `mesh` - The polygon mesh to build the detail mesh for.
    /// - `heightfield` - The compact heightfield the polygon mesh was built from, used to sample heights.
    /// - `sample_distance` - Sets the distance to use when sampling the heightfield. Zero disables edge and interior sampling. [Limit: >=0] [Units: wu]
    /// - `sample_max_error` - The maximum distance the detail mesh surface should deviate from heightfield data. [Limit: >=0] [Units: wu]
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let mut detail = DetailNavmesh {
            meshes: Vec::with_capacity(mesh.polygons.len()),
        };
        if mesh.vertices.is_empty() || mesh.polygons.is_empty() {
            return Ok(detail);
        }
        let cell_size = mesh.cell_size;
        let cell_height = mesh.cell_height;
        let origin = mesh.aabb.min;

        let mut builder = DetailBuilder {
            heightfield,
            sample_distance,
            sample_max_error,
            height_search_radius: 1.max(mesh.max_edge_error.ceil() as u32),
            patch: HeightPatch::default(),
            queue: VecDeque::with_capacity(512),
        };

        for (polygon_index, polygon) in mesh.polygons.iter().enumerate() {
            let lattice: Vec<U16Vec3> = polygon
                .vertices
                .iter()
                .map(|i| mesh.vertices[*i as usize])
                .collect();
            // Store polygon vertices for processing.
            let local: Vec<Vec3A> = lattice
                .iter()
                .map(|v| {
                    Vec3A::new(
                        v.x as f32 * cell_size,
                        v.y as f32 * cell_height,
                        v.z as f32 * cell_size,
                    )
                })
                .collect();

            // Get the height data from the area of the polygon.
            builder
                .patch
                .reset(&lattice, heightfield.width, heightfield.depth);
            builder
                .patch
                .fill(heightfield, &lattice, polygon.region, &mut builder.queue);

            // Build detail mesh.
            let (vertices, triangles) = builder.build_polygon(&local);
            let mut sub_mesh = DetailSubMesh {
                vertices,
                triangles: triangles
                    .into_iter()
                    .map(|triangle| DetailTriangle {
                        vertices: triangle.map(|i| i as u32),
                        on_hull: [false; 3],
                    })
                    .collect(),
            };
            sub_mesh.validate(polygon_index)?;
            sub_mesh.set_triangle_flags(&local);

            // Move detail verts to world space.
            for vertex in &mut sub_mesh.vertices {
                *vertex += origin;
            }
            detail.meshes.push(sub_mesh);
        }

        Ok(detail)
    }
}

impl DetailSubMesh {
    fn validate(&self, polygon: usize) -> Result<(), DetailNavmeshError> {
        for (triangle_index, triangle) in self.triangles.iter().enumerate() {
            if let Some(vertex) = triangle
                .vertices
                .iter()
                .find(|v| **v as usize >= self.vertices.len())
            {
                return Err(DetailNavmeshError::UnboundVertex {
                    polygon,
                    triangle: triangle_index,
                    vertex: *vertex,
                    vertex_count: self.vertices.len(),
                });
            }
        }
        Ok(())
    }

    /// Winds every triangle like the polygon and marks the edges that lie on its outline.
    /// Expects vertices in the same space as `polygon`.
    fn set_triangle_flags(&mut self, polygon: &[Vec3A]) {
        for triangle in &mut self.triangles {
            let [a, b, c] = triangle.vertices.map(|i| i as usize);
            let [a, b, c] = if cross_xz(self.vertices[a], self.vertices[b], self.vertices[c]) > 0.0 {
                [a, c, b]
            } else {
                [a, b, c]
            };
            triangle.vertices = [a as u32, b as u32, c as u32];
            triangle.on_hull =
                [(a, b), (b, c), (c, a)].map(|(p, q)| edge_on_hull(&self.vertices, p, q, polygon));
        }
    }
}

/// Errors that can occur while building a [`DetailNavmesh`].
#[derive(Error, Debug)]
pub enum DetailNavmeshError {
    /// A triangle refers to a vertex the sub-mesh does not have.
    #[error(
        "triangle {triangle} of polygon {polygon} references vertex {vertex}, but the sub-mesh only has {vertex_count} vertices"
    )]
    UnboundVertex {
        /// The polygon whose sub-mesh is broken.
        polygon: usize,
        /// The triangle index within the sub-mesh.
        triangle: usize,
        /// The out-of-range vertex index.
        vertex: u32,
        /// The number of vertices of the sub-mesh.
        vertex_count: usize,
    },
}

/// Per-build scratch state that is reused across polygons.
struct DetailBuilder<'a> {
    heightfield: &'a CompactHeightfield,
    sample_distance: f32,
    sample_max_error: f32,
    height_search_radius: u32,
    patch: HeightPatch,
    queue: VecDeque<(i32, i32, usize)>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: i32,
    y: f32,
    z: i32,
    added: bool,
}

impl DetailBuilder<'_> {
    /// Height of the heightfield surface below `position` in local world units.
    fn sample_height(&self, position: Vec3A) -> Option<f32> {
        let heightfield = self.heightfield;
        self.patch
            .height_at(
                position,
                1.0 / heightfield.cell_size,
                heightfield.cell_height,
                self.height_search_radius,
            )
            .map(|h| h as f32 * heightfield.cell_height)
    }

    /// Height of the walkable span closest to `position` on a polygon edge, in local world units.
    ///
    /// Reads the compact heightfield regardless of region, so both polygons sharing an edge
    /// sample the same heights. Searches outwards ring by ring and settles on the first ring that
    /// holds a span, preferring the span closest to `position.y`.
    fn sample_edge_height(&self, position: Vec3A) -> Option<f32> {
        let heightfield = self.heightfield;
        let ix = (position.x / heightfield.cell_size + 0.01).floor() as i32;
        let iz = (position.z / heightfield.cell_size + 0.01).floor() as i32;
        let radius = self.height_search_radius as i32;
        for ring in 0..=radius {
            let mut best: Option<(f32, f32)> = None;
            for dz in -ring..=ring {
                for dx in -ring..=ring {
                    if dx.abs() != ring && dz.abs() != ring {
                        continue;
                    }
                    let (x, z) = (ix + dx, iz + dz);
                    if x < 0
                        || z < 0
                        || x >= heightfield.width as i32
                        || z >= heightfield.depth as i32
                    {
                        continue;
                    }
                    for i in heightfield.cell_at(x as u16, z as u16).span_indices() {
                        if !heightfield.areas[i].is_walkable() {
                            continue;
                        }
                        let y = heightfield.spans[i].y as f32 * heightfield.cell_height;
                        let d = (y - position.y).abs();
                        if best.is_none_or(|(_, d_min)| d < d_min) {
                            best = Some((y, d));
                        }
                    }
                }
            }
            if let Some((y, _)) = best {
                return Some(y);
            }
        }
        None
    }

    /// Triangulates one polygon given in local world units.
    fn build_polygon(&self, polygon: &[Vec3A]) -> (Vec<Vec3A>, Vec<[usize; 3]>) {
        let nin = polygon.len();
        let mut vertices = polygon.to_vec();
        let mut hull = Vec::with_capacity(nin * MAX_VERTS_PER_EDGE);

        // Calculate minimum extents of the polygon based on input data.
        let min_extent_squared = polygon_min_extent_squared(polygon);

        // Tessellate outlines.
        // This is done in separate pass in order to ensure
        // seamless height values across the ply boundaries.
        if self.sample_distance > 0.0 {
            let mut j = nin - 1;
            for i in 0..nin {
                hull.push(j);
                for vertex in self.tessellate_edge(polygon[j], polygon[i]) {
                    hull.push(vertices.len());
                    vertices.push(vertex);
                }
                j = i;
            }
        } else {
            hull.extend(0..nin);
        }

        // Tessellate the base mesh.
        // We're using the triangulate_hull instead of delaunay_hull as it tends to
        // create a bit better triangulation for long thin triangles when there
        // are no internal points.
        let mut triangles = triangulate_hull(&vertices, &hull, nin);

        // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
        let min_extent = self.sample_distance * 2.0;
        if self.sample_distance <= 0.0 || min_extent_squared < min_extent * min_extent {
            return (vertices, triangles);
        }

        if triangles.is_empty() {
            // Could not triangulate the poly, make sure there is some valid data there.
            warn!(vertices = vertices.len(), "Could not triangulate polygon");
            return (vertices, triangles);
        }

        self.add_interior_samples(polygon, &mut vertices, &hull, &mut triangles);
        (vertices, triangles)
    }

    /// Samples heights along the edge `from -> to` and returns the samples that survive simplification,
    /// in `from -> to` order and excluding both endpoints.
    fn tessellate_edge(&self, from: Vec3A, to: Vec3A) -> Vec<Vec3A> {
        // Make sure the segments are always handled in same order
        // using lexological sort or else there will be seams.
        let swapped = if (from.x - to.x).abs() < 1.0e-6 {
            from.z > to.z
        } else {
            from.x > to.x
        };
        let (vj, vi) = if swapped { (to, from) } else { (from, to) };

        // Create samples along the edge.
        let dij = vi - vj;
        let d = dij.xz().length();
        // The sample count depends on the edge alone, never on the polygon.
        let nn = (1 + (d / self.sample_distance).floor() as usize).min(MAX_VERTS_PER_EDGE - 1);
        if nn < 2 {
            return Vec::new();
        }
        let edge: Vec<Vec3A> = (0..=nn)
            .map(|k| {
                let u = k as f32 / nn as f32;
                let mut position = vj + dij * u;
                if let Some(y) = self.sample_edge_height(position) {
                    position.y = y;
                }
                position
            })
            .collect();

        // Simplify samples.
        let max_error_squared = self.sample_max_error * self.sample_max_error;
        let mut indices = vec![0, nn];
        let mut k = 0;
        while k + 1 < indices.len() {
            let a = indices[k];
            let b = indices[k + 1];
            let segment = (edge[a], edge[b]);
            // Find maximum deviation along the segment.
            let mut max_d = 0.0;
            let mut max_i = None;
            for (m, sample) in edge.iter().enumerate().take(b).skip(a + 1) {
                let deviation = distance_squared_between_point_and_line_vec3(*sample, segment);
                if deviation > max_d {
                    max_d = deviation;
                    max_i = Some(m);
                }
            }
            // If the max deviation is larger than accepted error,
            // add new point, else continue to next segment.
            match max_i {
                Some(max_i) if max_d > max_error_squared => indices.insert(k + 1, max_i),
                _ => k += 1,
            }
        }

        let inner = indices[1..indices.len() - 1].iter().map(|i| edge[*i]);
        if swapped {
            inner.rev().collect()
        } else {
            inner.collect()
        }
    }

    fn add_interior_samples(
        &self,
        polygon: &[Vec3A],
        vertices: &mut Vec<Vec3A>,
        hull: &[usize],
        triangles: &mut Vec<[usize; 3]>,
    ) {
        let Some(aabb) = Aabb3d::from_verts(polygon) else {
            return;
        };
        let sample_distance = self.sample_distance;
        let cell_size = self.heightfield.cell_size;

        // Create sample locations in a grid.
        let x0 = (aabb.min.x / sample_distance).floor() as i32;
        let x1 = (aabb.max.x / sample_distance).ceil() as i32;
        let z0 = (aabb.min.z / sample_distance).floor() as i32;
        let z1 = (aabb.max.z / sample_distance).ceil() as i32;
        let mut samples = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                let point = Vec3A::new(
                    x as f32 * sample_distance,
                    (aabb.max.y + aabb.min.y) * 0.5,
                    z as f32 * sample_distance,
                );
                // Make sure the samples are not too close to the edges.
                if signed_distance_to_polygon(polygon, point) > -sample_distance / 2.0 {
                    continue;
                }
                let Some(y) = self.sample_height(point) else {
                    continue;
                };
                samples.push(Sample {
                    x,
                    y,
                    z,
                    added: false,
                });
            }
        }

        // Add the samples starting from the one that has the most
        // error. The procedure stops when all samples are added
        // or when the max error is within treshold.
        for _ in 0..samples.len() {
            if vertices.len() >= MAX_VERTS {
                break;
            }

            // Find sample with most error.
            let mut best: Option<(usize, Vec3A, f32)> = None;
            for (i, sample) in samples.iter().enumerate() {
                if sample.added {
                    continue;
                }
                // The sample location is jittered to get rid of some bad triangulations
                // which are cause by symmetrical data from the grid structure.
                let point = Vec3A::new(
                    sample.x as f32 * sample_distance + jitter_x(i) * cell_size * 0.1,
                    sample.y,
                    sample.z as f32 * sample_distance + jitter_z(i) * cell_size * 0.1,
                );
                let Some(d) = distance_to_triangle_mesh(point, vertices, triangles) else {
                    // did not hit the mesh.
                    continue;
                };
                if best.is_none_or(|(_, _, best_d)| d > best_d) {
                    best = Some((i, point, d));
                }
            }
            // If the max error is within accepted threshold, stop tesselating.
            let Some((best_i, best_point, best_d)) = best else {
                break;
            };
            if best_d <= self.sample_max_error {
                break;
            }
            // Mark sample as added.
            samples[best_i].added = true;
            // Add the new sample point.
            vertices.push(best_point);

            // Create new triangulation.
            *triangles = delaunay_hull(vertices, hull);
        }
    }
}

#[inline]
fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

#[inline]
fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Vertical distance from `point` to the triangle mesh, or `None` if no triangle covers it.
fn distance_to_triangle_mesh(
    point: Vec3A,
    vertices: &[Vec3A],
    triangles: &[[usize; 3]],
) -> Option<f32> {
    triangles
        .iter()
        .filter_map(|[a, b, c]| height_on_triangle(point, vertices[*a], vertices[*b], vertices[*c]))
        .map(|y| (y - point.y).abs())
        .min_by(f32::total_cmp)
}

/// XZ distance from `point` to the polygon outline, negative inside.
fn signed_distance_to_polygon(polygon: &[Vec3A], point: Vec3A) -> f32 {
    let mut min_distance_squared = f32::MAX;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        min_distance_squared = min_distance_squared.min(distance_squared_between_point_and_line_vec2(
            point.xz(),
            (polygon[j].xz(), polygon[i].xz()),
        ));
        j = i;
    }
    let distance = min_distance_squared.sqrt();
    if point_in_polygon_xz(point, polygon) {
        -distance
    } else {
        distance
    }
}

/// Whether the edge `a -> b` lies along the outline of `polygon`.
fn edge_on_hull(vertices: &[Vec3A], a: usize, b: usize, polygon: &[Vec3A]) -> bool {
    const THRESHOLD_SQUARED: f32 = 0.001 * 0.001;
    let (va, vb) = (vertices[a].xz(), vertices[b].xz());
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let segment = (polygon[j].xz(), polygon[i].xz());
        if distance_squared_between_point_and_line_vec2(va, segment) < THRESHOLD_SQUARED
            && distance_squared_between_point_and_line_vec2(vb, segment) < THRESHOLD_SQUARED
        {
            return true;
        }
        j = i;
    }
    false
}

/// Calculate minimum extend of the polygon.
fn polygon_min_extent_squared(polygon: &[Vec3A]) -> f32 {
    let n = polygon.len();
    let mut min_distance = f32::MAX;
    for i in 0..n {
        let ni = next(i, n);
        let segment = (polygon[i].xz(), polygon[ni].xz());
        let max_edge_distance = (0..n)
            .filter(|j| *j != i && *j != ni)
            .map(|j| distance_squared_between_point_and_line_vec2(polygon[j].xz(), segment))
            .fold(0.0_f32, f32::max);
        min_distance = min_distance.min(max_edge_distance);
    }
    min_distance
}

/// Fan-like triangulation of the hull that starts from the ear with the shortest perimeter and then
/// advances whichever side yields the shorter new edge.
fn triangulate_hull(vertices: &[Vec3A], hull: &[usize], nin: usize) -> Vec<[usize; 3]> {
    let nhull = hull.len();
    if nhull < 3 {
        return Vec::new();
    }
    let mut triangles = Vec::with_capacity(nhull - 2);
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut d_min = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = vertices[hull[pi]].xz();
        let cv = vertices[hull[i]].xz();
        let nv = vertices[hull[ni]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < d_min {
            start = i;
            left = ni;
            right = pi;
            d_min = d;
        }
    }

    // Add first triangle
    triangles.push([hull[start], hull[left], hull[right]]);

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    // This heuristic was chose empirically, since it seems
    // handle tessellated straight edges well.
    while next(left, nhull) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cv_left = vertices[hull[left]].xz();
        let nv_left = vertices[hull[nleft]].xz();
        let cv_right = vertices[hull[right]].xz();
        let nv_right = vertices[hull[nright]].xz();
        let d_left = cv_left.distance(nv_left) + nv_left.distance(cv_right);
        let d_right = cv_right.distance(nv_right) + cv_left.distance(nv_right);

        if d_left < d_right {
            triangles.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            triangles.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
    triangles
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Undefined,
    Hull,
    Triangle(usize),
}

#[derive(Debug, Clone, Copy)]
struct DelaunayEdge {
    vertices: [usize; 2],
    /// `faces[0]` lies on the left of `vertices[0] -> vertices[1]`, `faces[1]` on the left of the reverse.
    faces: [Face; 2],
}

/// Delaunay triangulation of `vertices` constrained to the given hull.
fn delaunay_hull(vertices: &[Vec3A], hull: &[usize]) -> Vec<[usize; 3]> {
    let points: Vec<DVec2> = vertices.iter().map(|v| v.xz().as_dvec2()).collect();
    let max_edges = points.len() * 10;
    let mut edges: Vec<DelaunayEdge> = Vec::with_capacity(max_edges);
    let mut face_count = 0;

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(&mut edges, max_edges, hull[j], hull[i], Face::Hull, Face::Undefined);
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].faces[0] == Face::Undefined {
            complete_facet(&points, &mut edges, max_edges, &mut face_count, current_edge);
        }
        if edges[current_edge].faces[1] == Face::Undefined {
            complete_facet(&points, &mut edges, max_edges, &mut face_count, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut triangles = vec![[None::<usize>; 3]; face_count];
    for edge in &edges {
        let [e0, e1] = edge.vertices;
        if let Face::Triangle(face) = edge.faces[1] {
            // Left face
            let t = &mut triangles[face];
            if t[0].is_none() {
                t[0] = Some(e0);
                t[1] = Some(e1);
            } else if t[0] == Some(e1) {
                t[2] = Some(e0);
            } else if t[1] == Some(e0) {
                t[2] = Some(e1);
            }
        }
        if let Face::Triangle(face) = edge.faces[0] {
            // Right
            let t = &mut triangles[face];
            if t[0].is_none() {
                t[0] = Some(e1);
                t[1] = Some(e0);
            } else if t[0] == Some(e0) {
                t[2] = Some(e1);
            } else if t[1] == Some(e1) {
                t[2] = Some(e0);
            }
        }
    }

    triangles
        .into_iter()
        .enumerate()
        .filter_map(|(face, triangle)| match triangle {
            [Some(a), Some(b), Some(c)] => Some([a, b, c]),
            _ => {
                warn!(face, ?triangle, "Removing dangling face");
                None
            }
        })
        .collect()
}

fn complete_facet(
    points: &[DVec2],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    face_count: &mut usize,
    e: usize,
) {
    const EPS: f64 = 1.0e-5;
    const TOLERANCE: f64 = 1.0e-3;

    let edge = edges[e];
    // Cache s and t.
    let (s, t) = if edge.faces[0] == Face::Undefined {
        (edge.vertices[0], edge.vertices[1])
    } else if edge.faces[1] == Face::Undefined {
        (edge.vertices[1], edge.vertices[0])
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let mut best = None;
    let mut center = DVec2::ZERO;
    let mut radius = -1.0;
    for u in 0..points.len() {
        if u == s || u == t {
            continue;
        }
        if cross2(points[s], points[t], points[u]) <= EPS {
            continue;
        }
        if radius < 0.0 {
            // The circle is not updated yet, do it now.
            best = Some(u);
            (center, radius) = circumcircle(points[s], points[t], points[u]);
            continue;
        }
        let d = center.distance(points[u]);
        if d > radius * (1.0 + TOLERANCE) {
            // Outside current circumcircle, skip.
            continue;
        }
        if d >= radius * (1.0 - TOLERANCE) {
            // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
            // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
            if overlaps_edges(points, edges, s, u) || overlaps_edges(points, edges, t, u) {
                continue;
            }
        }
        // Edge is valid.
        best = Some(u);
        (center, radius) = circumcircle(points[s], points[t], points[u]);
    }

    // Add new triangle or update edge info if s-t is on hull.
    let Some(pt) = best else {
        update_left_face(&mut edges[e], s, t, Face::Hull);
        return;
    };
    let face = Face::Triangle(*face_count);
    // Update face information of edge being completed.
    update_left_face(&mut edges[e], s, t, face);

    // Add new edge or update face info of old edge.
    for (from, to) in [(pt, s), (t, pt)] {
        match find_edge(edges, from, to) {
            Some(existing) => update_left_face(&mut edges[existing], from, to, face),
            None => add_edge(edges, max_edges, from, to, face, Face::Undefined),
        }
    }
    *face_count += 1;
}

fn add_edge(
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    s: usize,
    t: usize,
    left: Face,
    right: Face,
) {
    if edges.len() >= max_edges {
        warn!(max_edges, "Too many edges in detail triangulation");
        return;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_none() {
        edges.push(DelaunayEdge {
            vertices: [s, t],
            faces: [left, right],
        });
    }
}

fn find_edge(edges: &[DelaunayEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|edge| edge.vertices == [s, t] || edge.vertices == [t, s])
}

fn update_left_face(edge: &mut DelaunayEdge, s: usize, t: usize, face: Face) {
    if edge.vertices == [s, t] && edge.faces[0] == Face::Undefined {
        edge.faces[0] = face;
    } else if edge.vertices == [t, s] && edge.faces[1] == Face::Undefined {
        edge.faces[1] = face;
    }
}

fn overlaps_edges(points: &[DVec2], edges: &[DelaunayEdge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|edge| {
        let [s0, t0] = edge.vertices;
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_segments(points[s0], points[t0], points[s1], points[t1])
    })
}

#[inline]
fn cross2(p1: DVec2, p2: DVec2, p3: DVec2) -> f64 {
    (p2 - p1).perp_dot(p3 - p1)
}

fn overlap_segments(a: DVec2, b: DVec2, c: DVec2, d: DVec2) -> bool {
    let a1 = cross2(a, b, d);
    let a2 = cross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = cross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

/// Center and radius of the circle through the three points.
/// Degenerate triangles yield `p1` with a zero radius.
fn circumcircle(p1: DVec2, p2: DVec2, p3: DVec2) -> (DVec2, f64) {
    const EPS: f64 = 1.0e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v2 = p2 - p1;
    let v3 = p3 - p1;
    let cp = v2.perp_dot(v3);
    if cp.abs() <= EPS {
        return (p1, 0.0);
    }
    let v2_sq = v2.length_squared();
    let v3_sq = v3.length_squared();
    let center = DVec2::new(
        (v2_sq * v3.y - v3_sq * v2.y) / (2.0 * cp),
        (v3_sq * v2.x - v2_sq * v3.x) / (2.0 * cp),
    );
    (center + p1, center.length())
}

/// Heights of the compact heightfield around a single polygon, in voxels.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<Option<u16>>,
    xmin: i32,
    zmin: i32,
    width: i32,
    depth: i32,
}

impl HeightPatch {
    /// Resizes the patch to the bounds of `polygon` plus one cell of padding.
    fn reset(&mut self, polygon: &[U16Vec3], field_width: u16, field_depth: u16) {
        let (mut xmin, mut xmax) = (field_width as i32, 0);
        let (mut zmin, mut zmax) = (field_depth as i32, 0);
        for v in polygon {
            xmin = xmin.min(v.x as i32);
            xmax = xmax.max(v.x as i32);
            zmin = zmin.min(v.z as i32);
            zmax = zmax.max(v.z as i32);
        }
        xmin = (xmin - 1).max(0);
        xmax = (xmax + 1).min(field_width as i32);
        zmin = (zmin - 1).max(0);
        zmax = (zmax + 1).min(field_depth as i32);

        self.xmin = xmin;
        self.zmin = zmin;
        self.width = (xmax - xmin).max(0);
        self.depth = (zmax - zmin).max(0);
        self.data.clear();
        self.data.resize(self.width as usize * self.depth as usize, None);
    }

    #[inline]
    fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width && z < self.depth
    }

    #[inline]
    fn get(&self, x: i32, z: i32) -> Option<u16> {
        if !self.contains(x, z) {
            return None;
        }
        self.data[(x + z * self.width) as usize]
    }

    #[inline]
    fn set(&mut self, x: i32, z: i32, height: u16) {
        self.data[(x + z * self.width) as usize] = Some(height);
    }

    /// Copies the heights of the polygon's region and flood fills the rest of the patch from there.
    fn fill(
        &mut self,
        heightfield: &CompactHeightfield,
        polygon: &[U16Vec3],
        region: RegionId,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) {
        queue.clear();
        let mut empty = true;

        // Copy the height from the same region, and mark region borders
        // as seed points to fill the rest.
        if region.is_region() {
            for hz in 0..self.depth {
                let z = self.zmin + hz;
                for hx in 0..self.width {
                    let x = self.xmin + hx;
                    let cell = heightfield.cell_at(x as u16, z as u16);
                    let Some(i) = cell
                        .span_indices()
                        .find(|i| heightfield.spans[*i].region == region)
                    else {
                        continue;
                    };
                    let span = &heightfield.spans[i];
                    // Store height
                    self.set(hx, hz, span.y);
                    empty = false;

                    // If any of the neighbours is not in same region,
                    // add the current location as flood fill start
                    let border = (0..4)
                        .filter_map(|dir| span.neighbor(dir))
                        .any(|neighbor| heightfield.spans[neighbor].region != region);
                    if border {
                        queue.push_back((x, z, i));
                    }
                }
            }
        }

        // if the polygon does not contain any points from the current region (rare, but happens)
        // then use the center as the seed point.
        if empty {
            self.seed_with_polygon_center(heightfield, polygon, queue);
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            let span = &heightfield.spans[ci];
            for dir in 0..4 {
                let Some(ai) = span.neighbor(dir) else {
                    continue;
                };
                let ax = cx + dir_offset_x(dir) as i32;
                let az = cz + dir_offset_z(dir) as i32;
                let hx = ax - self.xmin;
                let hz = az - self.zmin;
                if !self.contains(hx, hz) || self.get(hx, hz).is_some() {
                    continue;
                }
                self.set(hx, hz, heightfield.spans[ai].y);
                queue.push_back((ax, az, ai));
            }
        }
    }

    /// Finds the span closest to a polygon vertex and walks from it to the polygon's center,
    /// which becomes the single flood fill seed.
    fn seed_with_polygon_center(
        &mut self,
        heightfield: &CompactHeightfield,
        polygon: &[U16Vec3],
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) {
        const OFFSETS: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];

        // Find cell closest to a poly vertex
        let mut start = None;
        let mut d_min = i32::MAX;
        'search: for vertex in polygon {
            for (offset_x, offset_z) in OFFSETS {
                let ax = vertex.x as i32 + offset_x;
                let az = vertex.z as i32 + offset_z;
                if !self.contains(ax - self.xmin, az - self.zmin) {
                    continue;
                }
                for i in heightfield.cell_at(ax as u16, az as u16).span_indices() {
                    let d = (vertex.y as i32 - heightfield.spans[i].y as i32).abs();
                    if d < d_min {
                        start = Some((ax, az, i));
                        d_min = d;
                    }
                }
                if d_min == 0 {
                    break 'search;
                }
            }
        }
        let Some(start) = start else {
            warn!(
                vertices = polygon.len(),
                "Polygon has no spans to sample heights from"
            );
            return;
        };

        // Find center of the polygon
        let n = polygon.len() as i32;
        let pcx = polygon.iter().map(|v| v.x as i32).sum::<i32>() / n;
        let pcz = polygon.iter().map(|v| v.z as i32).sum::<i32>() / n;

        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the polygons
        // are convex. In very rare we can get stuck due to contour simplification if we do not
        // record nodes.
        let mut visited = vec![false; self.data.len()];
        let mut stack = vec![start];
        let mut current = start;
        let mut reached_center = false;
        let mut dirs = [0_u8, 1, 2, 3];
        while let Some(cell) = stack.pop() {
            current = cell;
            let (cx, cz, ci) = cell;
            if cx == pcx && cz == pcz {
                reached_center = true;
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Z-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir = if cx == pcx {
                dir_for_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);
            let span = &heightfield.spans[ci];
            for dir in dirs {
                let Some(ni) = span.neighbor(dir) else {
                    continue;
                };
                let nx = cx + dir_offset_x(dir) as i32;
                let nz = cz + dir_offset_z(dir) as i32;
                let hx = nx - self.xmin;
                let hz = nz - self.zmin;
                if !self.contains(hx, hz) {
                    continue;
                }
                let seen = &mut visited[(hx + hz * self.width) as usize];
                if *seen {
                    continue;
                }
                *seen = true;
                stack.push((nx, nz, ni));
            }
            dirs.swap(direct_dir, 3);
        }
        if !reached_center {
            warn!("Walk towards polygon center failed to reach center");
        }

        let (cx, cz, ci) = current;
        queue.clear();
        queue.push_back(current);
        self.data.fill(None);
        self.set(cx - self.xmin, cz - self.zmin, heightfield.spans[ci].y);
    }

    /// The sampled height under `position`, falling back to the closest sampled ring of cells
    /// within `radius` when the cell itself has no height.
    fn height_at(
        &self,
        position: Vec3A,
        inverse_cell_size: f32,
        cell_height: f32,
        radius: u32,
    ) -> Option<u16> {
        if self.width == 0 || self.depth == 0 {
            return None;
        }
        let ix = (((position.x * inverse_cell_size + 0.01).floor() as i32) - self.xmin)
            .clamp(0, self.width - 1);
        let iz = (((position.z * inverse_cell_size + 0.01).floor() as i32) - self.zmin)
            .clamp(0, self.depth - 1);
        if let Some(height) = self.get(ix, iz) {
            return Some(height);
        }

        // Special case when data might be bad.
        // Walk adjacent cells in a spiral up to 'radius', and look
        // for a pixel which has a valid height.
        let (mut x, mut z, mut dx, mut dz) = (1, 0, 1, 0);
        let max_size = radius as i32 * 2 + 1;
        let max_iter = max_size * max_size - 1;

        let mut next_ring_iter_start = 8;
        let mut next_ring_iters = 16;

        let mut best: Option<(u16, f32)> = None;
        for i in 0..max_iter {
            if let Some(height) = self.get(ix + x, iz + z) {
                let d = (height as f32 * cell_height - position.y).abs();
                if best.is_none_or(|(_, d_min)| d < d_min) {
                    best = Some((height, d));
                }
            }
            // We want to find the best height as close to the center cell as possible. This means that
            // if we find a height in one of the neighbor cells to the center, we don't want to
            // expand further out than the 8 neighbors - we want to limit our search to the closest
            // of these "rings", but the best height in the ring.
            if i + 1 == next_ring_iter_start {
                if best.is_some() {
                    break;
                }
                next_ring_iter_start += next_ring_iters;
                next_ring_iters += 8;
            }

            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                (dx, dz) = (-dz, dx);
            }
            x += dx;
            z += dz;
        }
        best.map(|(height, _)| height)
    }
}

#[cfg(test)]
mod tests {
    use glam::u16vec3;

    use crate::{AreaType, BuildContoursFlags, HeightfieldBuilder};

    use super::*;

    fn flat_floor(size: f32) -> (CompactHeightfield, PolygonMesh) {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [size, 4.0, size]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        let a = Vec3A::new(0.0, 0.0, 0.0);
        let b = Vec3A::new(size, 0.0, 0.0);
        let c = Vec3A::new(size, 0.0, size);
        let d = Vec3A::new(0.0, 0.0, size);
        for triangle in [[a, c, b], [a, d, c]] {
            heightfield
                .rasterize_triangle(triangle, AreaType::DEFAULT_WALKABLE, 1)
                .unwrap();
        }
        let mut compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        compact.build_distance_field();
        compact.build_regions(1).unwrap();
        let mesh = compact
            .build_contours(1.3, 0, BuildContoursFlags::default())
            .build_polygon_mesh(6)
            .unwrap();
        (compact, mesh)
    }

    #[test]
    fn unsampled_detail_mesh_is_the_polygon() {
        let (compact, mesh) = flat_floor(4.0);
        let detail = DetailNavmesh::new(&mesh, &compact, 0.0, 1.0).unwrap();
        assert_eq!(detail.meshes.len(), mesh.polygons.len());
        let sub_mesh = &detail.meshes[0];
        assert_eq!(sub_mesh.vertices.len(), mesh.polygons[0].vertices.len());
        assert_eq!(sub_mesh.triangles.len(), sub_mesh.vertices.len() - 2);
        for triangle in &sub_mesh.triangles {
            // A fan over a quad has two hull edges and one diagonal.
            assert_eq!(triangle.on_hull.iter().filter(|h| **h).count(), 2);
        }
    }

    #[test]
    fn polygon_vertices_come_first() {
        let (compact, mesh) = flat_floor(8.0);
        let detail = DetailNavmesh::new(&mesh, &compact, 1.0, 0.1).unwrap();
        for (polygon, sub_mesh) in mesh.polygons.iter().zip(&detail.meshes) {
            for (i, vertex) in polygon.vertices.iter().enumerate() {
                let v = mesh.vertices[*vertex as usize];
                let expected = Vec3A::new(v.x as f32, v.y as f32, v.z as f32);
                assert_eq!(sub_mesh.vertices[i], expected);
            }
        }
    }

    #[test]
    fn flat_floor_stays_flat() {
        let (compact, mesh) = flat_floor(8.0);
        let detail = DetailNavmesh::new(&mesh, &compact, 1.0, 0.1).unwrap();
        for sub_mesh in &detail.meshes {
            assert!(!sub_mesh.triangles.is_empty());
            for vertex in &sub_mesh.vertices {
                approx::assert_relative_eq!(vertex.y, 1.0);
            }
            let height = sub_mesh.height_at(Vec3A::new(4.0, 0.0, 4.0));
            assert!(height.is_none_or(|h| (h - 1.0).abs() < 1.0e-4));
        }
    }

    #[test]
    fn edge_samples_do_not_depend_on_direction() {
        let (mut compact, _) = flat_floor(8.0);
        // A bump under the middle of the edge.
        let bump = compact.cell_at(2, 1).index() as usize;
        compact.spans[bump].y = 4;
        let builder = DetailBuilder {
            heightfield: &compact,
            sample_distance: 1.0,
            sample_max_error: 0.5,
            height_search_radius: 1,
            patch: HeightPatch::default(),
            queue: VecDeque::new(),
        };

        let a = Vec3A::new(0.0, 1.0, 0.0);
        let b = Vec3A::new(5.0, 1.0, 3.0);
        let forward = builder.tessellate_edge(a, b);
        let mut backward = builder.tessellate_edge(b, a);
        backward.reverse();
        assert!(forward.iter().any(|v| v.y == 4.0));
        assert_eq!(forward, backward);
    }

    #[test]
    fn edge_heights_ignore_regions() {
        let (mut compact, _) = flat_floor(4.0);
        let builder = |compact: &CompactHeightfield| {
            let edge = DetailBuilder {
                heightfield: compact,
                sample_distance: 1.0,
                sample_max_error: 0.0,
                height_search_radius: 1,
                patch: HeightPatch::default(),
                queue: VecDeque::new(),
            };
            edge.tessellate_edge(Vec3A::new(2.0, 1.0, 0.0), Vec3A::new(2.0, 1.0, 4.0))
        };
        let bump = compact.cell_at(2, 2).index() as usize;
        compact.spans[bump].y = 3;
        let before = builder(&compact);
        assert!(before.iter().any(|v| v.x == 2.0 && v.y == 3.0));
        for span in &mut compact.spans {
            span.region = RegionId(7);
        }
        assert_eq!(builder(&compact), before);
    }

    #[test]
    fn delaunay_fills_a_square_with_a_center() {
        let vertices = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 2.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(1.0, 0.0, 1.0),
        ];
        let triangles = delaunay_hull(&vertices, &[0, 1, 2, 3]);
        assert_eq!(triangles.len(), 4);
        for triangle in &triangles {
            assert!(triangle.contains(&4));
        }
    }

    #[test]
    fn spiral_finds_nearest_ring() {
        let mut patch = HeightPatch::default();
        patch.reset(&[u16vec3(1, 0, 1), u16vec3(3, 0, 3)], 8, 8);
        // The patch spans cells 0..4 on both axes.
        patch.set(3, 2, 7);
        patch.set(0, 0, 1);
        let height = patch.height_at(Vec3A::new(2.5, 7.0, 2.5), 1.0, 1.0, 2);
        assert_eq!(height, Some(7));
        assert_eq!(patch.height_at(Vec3A::new(2.5, 7.0, 2.5), 1.0, 1.0, 0), None);
    }

    #[test]
    fn jitter_is_bounded() {
        for i in 0..1000 {
            assert!((-1.0..=1.0).contains(&jitter_x(i)));
            assert!((-1.0..=1.0).contains(&jitter_z(i)));
        }
        assert_eq!(jitter_x(17), jitter_x(17));
    }

    #[test]
    fn out_of_range_vertices_are_reported() {
        let sub_mesh = DetailSubMesh {
            vertices: vec![Vec3A::ZERO; 3],
            triangles: vec![DetailTriangle {
                vertices: [0, 1, 3],
                on_hull: [false; 3],
            }],
        };
        assert!(matches!(
            sub_mesh.validate(5),
            Err(DetailNavmeshError::UnboundVertex {
                polygon: 5,
                vertex: 3,
                ..
            })
        ));
    }
}
