//! The query-ready form of a navmesh: world-space polygons with adjacency and height detail.

use glam::Vec3A;
use thiserror::Error;

use crate::{Aabb3d, AreaType, DetailNavmesh, DetailSubMesh, PolygonMesh, RegionId};

/// A navmesh compiled for path queries. Shared read-only between any number of queries.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompiledNavmesh {
    /// The tiles of the navmesh. A single build produces at most one tile.
    pub tiles: Vec<Tile>,
}

/// A world-space polygon soup with adjacency.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Tile {
    /// World-space vertices shared by the polygons of the tile.
    pub vertices: Vec<Vec3A>,
    /// The convex polygons of the tile.
    pub polygons: Vec<TilePolygon>,
    /// The bounds of [`Self::vertices`] and of the detail vertices.
    pub aabb: Aabb3d,
}

/// A convex polygon of a [`Tile`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TilePolygon {
    /// Indices into [`Tile::vertices`], with the interior on the left of every edge.
    pub vertices: Vec<u32>,
    /// `neighbors[i]` is the polygon of the same tile across the edge `vertices[i] -> vertices[i + 1]`.
    pub neighbors: Vec<Option<u32>>,
    /// The region the polygon was built from.
    pub region: RegionId,
    /// The area type of the polygon.
    pub area: AreaType,
    /// The height detail of the polygon.
    pub detail: DetailSubMesh,
    /// The average of the polygon's vertices.
    pub centroid: Vec3A,
}

/// Addresses a polygon within a [`CompiledNavmesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonRef {
    /// Index into [`CompiledNavmesh::tiles`].
    pub tile: u32,
    /// Index into [`Tile::polygons`].
    pub polygon: u32,
}

impl PolygonRef {
    /// Creates a reference to `polygon` of `tile`.
    #[inline]
    pub const fn new(tile: u32, polygon: u32) -> Self {
        Self { tile, polygon }
    }
}

impl CompiledNavmesh {
    /// Converts a polygon mesh and its detail mesh into a single world-space tile.
    ///
    /// A mesh without polygons compiles to a navmesh without tiles.
    pub fn compile(mesh: &PolygonMesh, detail: &DetailNavmesh) -> Result<Self, CompileError> {
        if mesh.polygons.len() != detail.meshes.len() {
            return Err(CompileError::DetailCountMismatch {
                polygons: mesh.polygons.len(),
                detail_meshes: detail.meshes.len(),
            });
        }
        if mesh.polygons.is_empty() {
            return Ok(Self::default());
        }

        let origin = mesh.aabb.min;
        let scale = Vec3A::new(mesh.cell_size, mesh.cell_height, mesh.cell_size);
        let vertices: Vec<Vec3A> = mesh
            .vertices
            .iter()
            .map(|v| origin + Vec3A::from(v.as_vec3()) * scale)
            .collect();

        let mut polygons = Vec::with_capacity(mesh.polygons.len());
        for (polygon, detail) in mesh.polygons.iter().zip(&detail.meshes) {
            if let Some(&vertex) = polygon
                .vertices
                .iter()
                .find(|&&v| v as usize >= vertices.len())
            {
                return Err(CompileError::VertexOutOfRange {
                    polygon: polygons.len(),
                    vertex,
                });
            }
            let centroid = polygon
                .vertices
                .iter()
                .map(|&v| vertices[v as usize])
                .sum::<Vec3A>()
                / polygon.vertices.len().max(1) as f32;
            polygons.push(TilePolygon {
                vertices: polygon.vertices.clone(),
                neighbors: polygon.neighbors.clone(),
                region: polygon.region,
                area: polygon.area,
                detail: detail.clone(),
                centroid,
            });
        }

        let aabb = Aabb3d::from_verts(&vertices)
            .map(|aabb| {
                polygons
                    .iter()
                    .flat_map(|p| &p.detail.vertices)
                    .fold(aabb, |aabb, v| Aabb3d::new(aabb.min.min(*v), aabb.max.max(*v)))
            })
            .unwrap_or_default();

        Ok(Self {
            tiles: vec![Tile {
                vertices,
                polygons,
                aabb,
            }],
        })
    }

    /// Whether the navmesh contains no polygons at all.
    pub fn is_empty(&self) -> bool {
        self.tiles.iter().all(|tile| tile.polygons.is_empty())
    }

    /// The total number of polygons over all tiles.
    pub fn polygon_count(&self) -> usize {
        self.tiles.iter().map(|tile| tile.polygons.len()).sum()
    }

    /// Iterates over every polygon together with its reference.
    pub fn polygons(&self) -> impl Iterator<Item = (PolygonRef, &TilePolygon)> + '_ {
        self.tiles.iter().enumerate().flat_map(|(t, tile)| {
            tile.polygons
                .iter()
                .enumerate()
                .map(move |(p, polygon)| (PolygonRef::new(t as u32, p as u32), polygon))
        })
    }

    /// Looks up a polygon, returning `None` for dangling references.
    pub fn polygon(&self, polygon: PolygonRef) -> Option<&TilePolygon> {
        self.tiles
            .get(polygon.tile as usize)?
            .polygons
            .get(polygon.polygon as usize)
    }

    /// The world-space corners of a polygon, in polygon order.
    pub fn polygon_vertices(&self, polygon: PolygonRef) -> Option<Vec<Vec3A>> {
        let tile = self.tiles.get(polygon.tile as usize)?;
        let poly = tile.polygons.get(polygon.polygon as usize)?;
        Some(
            poly.vertices
                .iter()
                .map(|&v| tile.vertices[v as usize])
                .collect(),
        )
    }

    /// The shared edge between `from` and its neighbor `to`, as world-space endpoints.
    pub fn portal(&self, from: PolygonRef, to: PolygonRef) -> Option<(Vec3A, Vec3A)> {
        if from.tile != to.tile {
            return None;
        }
        let tile = self.tiles.get(from.tile as usize)?;
        let poly = tile.polygons.get(from.polygon as usize)?;
        let n = poly.vertices.len();
        let edge = poly
            .neighbors
            .iter()
            .position(|&neighbor| neighbor == Some(to.polygon))?;
        Some((
            tile.vertices[poly.vertices[edge] as usize],
            tile.vertices[poly.vertices[(edge + 1) % n] as usize],
        ))
    }
}

/// Errors that can occur in [`CompiledNavmesh::compile`].
#[derive(Error, Debug)]
pub enum CompileError {
    /// The detail mesh does not belong to the polygon mesh.
    #[error("{polygons} polygons but {detail_meshes} detail meshes")]
    DetailCountMismatch {
        /// The number of polygons in the polygon mesh
        polygons: usize,
        /// The number of sub-meshes in the detail mesh
        detail_meshes: usize,
    },
    /// A polygon refers to a vertex the mesh does not have.
    #[error("polygon {polygon} refers to missing vertex {vertex}")]
    VertexOutOfRange {
        /// The offending polygon
        polygon: usize,
        /// The missing vertex index
        vertex: u32,
    },
}

#[cfg(test)]
mod tests {
    use glam::U16Vec3;

    use super::*;
    use crate::{DetailTriangle, Polygon};

    fn two_quads() -> (PolygonMesh, DetailNavmesh) {
        // Two unit squares side by side along x, sharing the edge x = 1.
        let vertices = vec![
            U16Vec3::new(0, 0, 0),
            U16Vec3::new(0, 0, 1),
            U16Vec3::new(1, 0, 1),
            U16Vec3::new(1, 0, 0),
            U16Vec3::new(2, 0, 1),
            U16Vec3::new(2, 0, 0),
        ];
        let polygons = vec![
            Polygon {
                vertices: vec![0, 1, 2, 3],
                neighbors: vec![None, None, Some(1), None],
                region: RegionId(1),
                area: AreaType::DEFAULT_WALKABLE,
            },
            Polygon {
                vertices: vec![3, 2, 4, 5],
                neighbors: vec![Some(0), None, None, None],
                region: RegionId(1),
                area: AreaType::DEFAULT_WALKABLE,
            },
        ];
        let mesh = PolygonMesh {
            vertices,
            polygons,
            max_vertices_per_polygon: 6,
            aabb: Aabb3d::new(Vec3A::new(10.0, 1.0, 20.0), Vec3A::new(14.0, 3.0, 22.0)),
            cell_size: 2.0,
            cell_height: 0.5,
            max_edge_error: 1.0,
        };
        let detail = DetailNavmesh {
            meshes: vec![DetailSubMesh::default(); 2],
        };
        (mesh, detail)
    }

    #[test]
    fn vertices_move_to_world_space() {
        let (mesh, detail) = two_quads();
        let compiled = CompiledNavmesh::compile(&mesh, &detail).unwrap();
        assert_eq!(compiled.tiles.len(), 1);
        let tile = &compiled.tiles[0];
        assert_eq!(tile.vertices[4], Vec3A::new(14.0, 1.0, 22.0));
        assert_eq!(tile.polygons[0].centroid, Vec3A::new(11.0, 1.0, 21.0));
    }

    #[test]
    fn portal_is_the_shared_edge() {
        let (mesh, detail) = two_quads();
        let compiled = CompiledNavmesh::compile(&mesh, &detail).unwrap();
        let (a, b) = compiled
            .portal(PolygonRef::new(0, 0), PolygonRef::new(0, 1))
            .unwrap();
        assert_eq!(a, Vec3A::new(12.0, 1.0, 22.0));
        assert_eq!(b, Vec3A::new(12.0, 1.0, 20.0));
        assert!(
            compiled
                .portal(PolygonRef::new(0, 1), PolygonRef::new(0, 1))
                .is_none()
        );
    }

    #[test]
    fn empty_mesh_compiles_to_no_tiles() {
        let (mut mesh, _) = two_quads();
        mesh.polygons.clear();
        let compiled = CompiledNavmesh::compile(&mesh, &DetailNavmesh::default()).unwrap();
        assert!(compiled.is_empty());
        assert!(compiled.tiles.is_empty());
    }

    #[test]
    fn detail_mismatch_is_rejected() {
        let (mesh, mut detail) = two_quads();
        detail.meshes.pop();
        assert!(matches!(
            CompiledNavmesh::compile(&mesh, &detail),
            Err(CompileError::DetailCountMismatch {
                polygons: 2,
                detail_meshes: 1
            })
        ));
    }

    #[test]
    fn aabb_covers_detail_vertices() {
        let (mesh, mut detail) = two_quads();
        detail.meshes[0] = DetailSubMesh {
            vertices: vec![Vec3A::new(11.0, 5.0, 21.0)],
            triangles: vec![DetailTriangle::default()],
        };
        let compiled = CompiledNavmesh::compile(&mesh, &detail).unwrap();
        assert_eq!(compiled.tiles[0].aabb.max.y, 5.0);
    }
}
