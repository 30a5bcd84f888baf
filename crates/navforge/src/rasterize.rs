//! Scan conversion of triangles into the solid spans of a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, Span, SpanBuilder},
    trimesh::{TriMesh, Triangle},
};

impl Heightfield {
    /// Rasterizes a single triangle into the heightfield.
    ///
    /// Triangles outside the heightfield volume are ignored. Spans that end up overlapping or touching
    /// existing spans are merged with them.
    ///
    /// # Arguments
    ///
    /// - `triangle` - The world-space vertices of the triangle.
    /// - `area_type` - The area type stamped on every span this triangle produces.
    /// - `flag_merge_threshold` - The distance in voxels within which two span tops let the higher
    ///   area type win a merge. In practice the same as the climbable height.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let triangle_aabb = triangle.aabb();
        if !self.aabb.intersects(&triangle_aabb) {
            return Ok(());
        }

        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let volume_height = self.aabb.max.y - self.aabb.min.y;

        // Calculate the footprint of the triangle on the grid's z-axis.
        // Use -1 rather than 0 to cut the polygon properly at the start of the volume.
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size).floor() as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size).floor() as i32;
        let z0 = z0.clamp(-1, self.depth as i32 - 1);
        let z1 = z1.clamp(0, self.depth as i32 - 1);

        let mut remainder = ClipPolygon::from_triangle(triangle);
        for z in z0..=z1 {
            let row_z_max = self.aabb.min.z + (z + 1) as f32 * self.cell_size;
            let (row, rest) = remainder.divide(row_z_max, Axis::Z)?;
            remainder = rest;
            if row.len() < 3 || z < 0 {
                continue;
            }

            // Find the x-axis bounds of the row.
            let (min_x, max_x) = row
                .vertices()
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
                    (min.min(v.x), max.max(v.x))
                });
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size).floor() as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size).floor() as i32;
            if x1 < 0 || x0 >= self.width as i32 {
                continue;
            }
            let x0 = x0.clamp(-1, self.width as i32 - 1);
            let x1 = x1.clamp(0, self.width as i32 - 1);

            let mut row_remainder = row;
            for x in x0..=x1 {
                let cell_x_max = self.aabb.min.x + (x + 1) as f32 * self.cell_size;
                let (cell, rest) = row_remainder.divide(cell_x_max, Axis::X)?;
                row_remainder = rest;
                if cell.len() < 3 || x < 0 {
                    continue;
                }

                // Calculate the vertical extent of the span.
                let (span_min, span_max) = cell
                    .vertices()
                    .iter()
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
                        (min.min(v.y), max.max(v.y))
                    });
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box.
                if span_max < 0.0 || span_min > volume_height {
                    continue;
                }
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(volume_height);

                let span_min_cell = ((span_min * inverse_cell_height).floor() as i32)
                    .clamp(0, Span::MAX_HEIGHT as i32);
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell + 1, Span::MAX_HEIGHT as i32);
                if span_min_cell >= span_max_cell {
                    // Only reachable at the very top of the representable range.
                    continue;
                }

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell as u16,
                        max: span_max_cell as u16,
                        area: area_type,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }

    /// Rasterizes the triangles of a [`TriMesh`], using its per-triangle area types.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if trimesh.area_types.len() != trimesh.indices.len() {
            return Err(RasterizationError::AreaTypeCountMismatch {
                triangles: trimesh.indices.len(),
                area_types: trimesh.area_types.len(),
            });
        }
        for triangle in trimesh.triangles() {
            self.rasterize(triangle, flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes one [`Triangle`] of a triangle stream.
    pub fn rasterize(
        &mut self,
        triangle: Triangle,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        self.rasterize_triangle(triangle.vertices, triangle.area, flag_merge_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, vertex: Vec3A) -> f32 {
        match self {
            Axis::X => vertex.x,
            Axis::Z => vertex.z,
        }
    }
}

/// A convex polygon produced by clipping a triangle against grid planes.
///
/// Each axis-aligned cut adds at most one vertex, so a triangle clipped against
/// the four planes of one cell never exceeds [`ClipPolygon::MAX_VERTICES`].
#[derive(Debug, Clone, Copy)]
struct ClipPolygon {
    vertices: [Vec3A; Self::MAX_VERTICES],
    len: usize,
}

impl ClipPolygon {
    const MAX_VERTICES: usize = 7;

    fn from_triangle(triangle: [Vec3A; 3]) -> Self {
        let mut polygon = Self::empty();
        polygon.vertices[..3].copy_from_slice(&triangle);
        polygon.len = 3;
        polygon
    }

    fn empty() -> Self {
        Self {
            vertices: [Vec3A::ZERO; Self::MAX_VERTICES],
            len: 0,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn vertices(&self) -> &[Vec3A] {
        &self.vertices[..self.len]
    }

    fn push(&mut self, vertex: Vec3A) -> Result<(), RasterizationError> {
        let slot = self
            .vertices
            .get_mut(self.len)
            .ok_or(RasterizationError::ClipOverflow {
                max: Self::MAX_VERTICES,
            })?;
        *slot = vertex;
        self.len += 1;
        Ok(())
    }

    /// Divides the polygon along the plane `axis = offset`.
    ///
    /// Returns `(below, above)`. Vertices lying on the plane go to both halves.
    fn divide(&self, offset: f32, axis: Axis) -> Result<(Self, Self), RasterizationError> {
        let mut below = Self::empty();
        let mut above = Self::empty();
        if self.len == 0 {
            return Ok((below, above));
        }
        let mut deltas = [0.0_f32; Self::MAX_VERTICES];
        for (delta, vertex) in deltas.iter_mut().zip(self.vertices()) {
            *delta = offset - axis.of(*vertex);
        }

        let mut b = self.len - 1;
        for a in 0..self.len {
            let va = self.vertices[a];
            let vb = self.vertices[b];
            let same_side = (deltas[a] >= 0.0) == (deltas[b] >= 0.0);
            if !same_side {
                let t = deltas[b] / (deltas[b] - deltas[a]);
                let intersection = vb + (va - vb) * t;
                below.push(intersection)?;
                above.push(intersection)?;
            }
            if deltas[a] >= 0.0 {
                below.push(va)?;
                if deltas[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(va)?;
            b = a;
        }
        Ok((below, above))
    }
}

/// Errors that can occur when rasterizing triangles into a [`Heightfield`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted into its column.
    #[error("failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
    /// A clipped polygon grew beyond the vertex bound of a single grid cell.
    #[error("clipped polygon exceeded {max} vertices")]
    ClipOverflow {
        /// The vertex bound that was exceeded.
        max: usize,
    },
    /// The trimesh does not carry exactly one area type per triangle.
    #[error("trimesh has {triangles} triangles but {area_types} area types")]
    AreaTypeCountMismatch {
        /// Number of triangles in the trimesh.
        triangles: usize,
        /// Number of area types in the trimesh.
        area_types: usize,
    },
}
