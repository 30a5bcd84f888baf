#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod compiled;
mod config;
mod contours;
mod debug;
mod detail_mesh;
mod erosion;
mod heightfield;
mod main_api;
mod mark_convex_poly_area;
pub(crate) mod math;
mod poly_mesh;
mod pre_filter;
mod query;
mod rasterize;
mod region;
mod span;
mod trimesh;
mod watershed_build_regions;
mod watershed_distance_field;

pub use compact_cell::CompactCell;
pub use compact_heightfield::CompactHeightfield;
pub use compact_span::CompactSpan;
pub use compiled::{CompileError, CompiledNavmesh, PolygonRef, Tile, TilePolygon};
pub use config::{ConfigError, NavmeshConfig, NavmeshConfigBuilder};
pub use contours::{
    BuildContoursFlags, Contour, ContourSet, ContourVertex, ContourVertexFlags,
};
pub use debug::{CompactSpanView, ContourLine, DebugOverlays, DetailTriangleView, SpanBox};
pub use detail_mesh::{DetailNavmesh, DetailNavmeshError, DetailSubMesh, DetailTriangle};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use main_api::{
    BuildError, BuildErrorKind, BuildInputs, BuildStage, NavmeshBuilder, build_navmesh,
};
pub use mark_convex_poly_area::ConvexVolume;
pub use math::Aabb3d;
pub use poly_mesh::{Polygon, PolygonMesh, PolygonMeshError};
pub use query::{NavmeshQuery, NearestPolygon, PathNode, PathResult, PathStatus};
pub use rasterize::RasterizationError;
pub use region::RegionId;
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::{TriMesh, Triangle};
pub use watershed_build_regions::RegionBuildError;
