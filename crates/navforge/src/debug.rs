//! Read-only views of intermediate build results, for drawing them.

use glam::Vec3A;

use crate::{
    AreaType, CompactHeightfield, ContourSet, DetailNavmesh, Heightfield, PolygonMesh, RegionId,
};

/// Borrowed outputs of the stages of a navmesh build. Stages that did not run are `None`.
///
/// Returned by [`NavmeshBuilder::overlays`](crate::NavmeshBuilder::overlays).
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOverlays<'a> {
    /// The filtered heightfield.
    pub heightfield: Option<&'a Heightfield>,
    /// The compact heightfield with distances and regions.
    pub compact_heightfield: Option<&'a CompactHeightfield>,
    /// The simplified region contours.
    pub contours: Option<&'a ContourSet>,
    /// The polygon mesh.
    pub polygon_mesh: Option<&'a PolygonMesh>,
    /// The detail mesh.
    pub detail_navmesh: Option<&'a DetailNavmesh>,
}

/// A solid span of the heightfield as a world-space box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanBox {
    /// The lower corner.
    pub min: Vec3A,
    /// The upper corner.
    pub max: Vec3A,
    /// The area type of the span.
    pub area: AreaType,
}

/// The floor of a compact span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactSpanView {
    /// The world-space center of the span's floor.
    pub center: Vec3A,
    /// The distance to the border of the walkable area, if the distance field was built.
    pub distance: Option<u16>,
    /// The region of the span.
    pub region: RegionId,
    /// The area type of the span.
    pub area: AreaType,
}

/// A closed world-space polyline around a region.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourLine {
    /// The region the contour bounds.
    pub region: RegionId,
    /// The vertices of the loop. The last one connects back to the first.
    pub points: Vec<Vec3A>,
}

/// A world-space triangle of the detail mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetailTriangleView {
    /// The polygon the triangle belongs to.
    pub polygon: usize,
    /// The corners of the triangle.
    pub vertices: [Vec3A; 3],
    /// Which edges lie on the polygon's boundary.
    pub on_hull: [bool; 3],
}

impl<'a> DebugOverlays<'a> {
    /// The solid spans of the heightfield.
    pub fn spans(&self) -> impl Iterator<Item = SpanBox> + 'a {
        self.heightfield.into_iter().flat_map(|heightfield| {
            heightfield.iter_spans().map(move |(x, z, span)| {
                let corner = |y: u16| {
                    heightfield.aabb.min
                        + Vec3A::new(
                            x as f32 * heightfield.cell_size,
                            y as f32 * heightfield.cell_height,
                            z as f32 * heightfield.cell_size,
                        )
                };
                SpanBox {
                    min: corner(span.min()),
                    max: corner(span.max())
                        + Vec3A::new(heightfield.cell_size, 0.0, heightfield.cell_size),
                    area: span.area(),
                }
            })
        })
    }

    /// The floors of the compact spans.
    pub fn compact_spans(&self) -> impl Iterator<Item = CompactSpanView> + 'a {
        self.compact_heightfield.into_iter().flat_map(|field| {
            field.iter_span_indices().map(move |(x, z, index)| {
                let span = &field.spans[index];
                let half_cell = Vec3A::new(field.cell_size, 0.0, field.cell_size) * 0.5;
                CompactSpanView {
                    center: field.world_position(x, span.y, z) + half_cell,
                    distance: field.dist.get(index).copied(),
                    region: span.region,
                    area: field.areas[index],
                }
            })
        })
    }

    /// The simplified contours as world-space loops.
    pub fn contour_lines(&self) -> impl Iterator<Item = ContourLine> + 'a {
        self.contours.into_iter().flat_map(|contours| {
            let scale = Vec3A::new(contours.cell_size, contours.cell_height, contours.cell_size);
            contours.contours.iter().map(move |contour| ContourLine {
                region: contour.region,
                points: contour
                    .vertices
                    .iter()
                    .map(|v| contours.aabb.min + Vec3A::from(v.position.as_vec3()) * scale)
                    .collect(),
            })
        })
    }

    /// The triangles of the detail mesh.
    pub fn detail_triangles(&self) -> impl Iterator<Item = DetailTriangleView> + 'a {
        self.detail_navmesh.into_iter().flat_map(|detail| {
            detail
                .meshes
                .iter()
                .enumerate()
                .flat_map(|(polygon, mesh)| {
                    mesh.triangles.iter().map(move |triangle| DetailTriangleView {
                        polygon,
                        vertices: mesh.triangle_vertices(triangle),
                        on_hull: triangle.on_hull,
                    })
                })
        })
    }
}
