//! Input geometry: indexed triangle meshes and loose triangle streams.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The world-space vertices of the mesh.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if `self` holds more than `u32::MAX` vertices.
    pub fn extend(&mut self, other: TriMesh) {
        if self.vertices.len() > u32::MAX as usize {
            panic!("Cannot extend a trimesh with more than 2^32 vertices");
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Appends one triangle, adding its three vertices.
    pub fn push_triangle(&mut self, triangle: Triangle) {
        let first = self.vertices.len() as u32;
        self.vertices.extend(triangle.vertices);
        self.indices.push(UVec3::new(first, first + 1, first + 2));
        self.area_types.push(triangle.area);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// A triangle is walkable if the angle between its normal and the up axis is below the threshold.
    /// Triangles that fail the test are left untouched, so previously assigned area types survive.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        self.area_types
            .resize(self.indices.len(), AreaType::NOT_WALKABLE);
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y > threshold_cos {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Iterates over the triangles of the mesh with their area types.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.indices
            .iter()
            .zip(&self.area_types)
            .map(|(indices, area)| Triangle {
                vertices: [
                    self.vertices[indices.x as usize],
                    self.vertices[indices.y as usize],
                    self.vertices[indices.z as usize],
                ],
                area: *area,
            })
    }
}

impl FromIterator<Triangle> for TriMesh {
    fn from_iter<T: IntoIterator<Item = Triangle>>(iter: T) -> Self {
        let mut trimesh = TriMesh::default();
        for triangle in iter {
            trimesh.push_triangle(triangle);
        }
        trimesh
    }
}

/// One world-space input triangle with its area type.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Triangle {
    /// The corners of the triangle.
    pub vertices: [Vec3A; 3],
    /// The area type of the triangle. [`AreaType::NOT_WALKABLE`] triangles still block space.
    pub area: AreaType,
}

impl Triangle {
    /// Creates a triangle that is either walkable with [`AreaType::DEFAULT_WALKABLE`] or not walkable.
    pub fn new(
        a: impl Into<Vec3A>,
        b: impl Into<Vec3A>,
        c: impl Into<Vec3A>,
        walkable: bool,
    ) -> Self {
        Self {
            vertices: [a.into(), b.into(), c.into()],
            area: walkable.into(),
        }
    }

    /// Creates a triangle with an explicit area type.
    pub fn with_area(
        a: impl Into<Vec3A>,
        b: impl Into<Vec3A>,
        c: impl Into<Vec3A>,
        area: impl Into<AreaType>,
    ) -> Self {
        Self {
            vertices: [a.into(), b.into(), c.into()],
            area: area.into(),
        }
    }
}
