use std::fmt;

use anyhow::Context as _;
use thiserror::Error;
use tracing::{debug, debug_span, info_span};

use crate::{
    Aabb3d, CompactHeightfield, CompiledNavmesh, ConfigError, ContourSet, DebugOverlays,
    DetailNavmesh, Heightfield, HeightfieldBuilder, NavmeshConfig, PolygonMesh, RegionId,
    trimesh::Triangle,
};

/// Builds a navmesh from a stream of world-space triangles in one go.
///
/// Use a [`NavmeshBuilder`] instead to keep the intermediate results for debugging.
pub fn build_navmesh(
    config: NavmeshConfig,
    triangles: impl IntoIterator<Item = Triangle>,
) -> Result<CompiledNavmesh, BuildError> {
    NavmeshBuilder::new(config).build(triangles)
}

/// Owns the working memory of a single navmesh build.
///
/// Every stage that completes leaves its output in the builder, so [`Self::overlays`] shows how
/// far a build got even when it failed.
#[derive(Debug, Clone)]
pub struct NavmeshBuilder {
    config: NavmeshConfig,
    heightfield: Option<Heightfield>,
    compact_heightfield: Option<CompactHeightfield>,
    contours: Option<ContourSet>,
    polygon_mesh: Option<PolygonMesh>,
    detail_navmesh: Option<DetailNavmesh>,
}

impl NavmeshBuilder {
    /// Creates a builder for `config`.
    pub fn new(config: NavmeshConfig) -> Self {
        Self {
            config,
            heightfield: None,
            compact_heightfield: None,
            contours: None,
            polygon_mesh: None,
            detail_navmesh: None,
        }
    }

    /// The configuration this builder builds with.
    pub fn config(&self) -> &NavmeshConfig {
        &self.config
    }

    /// Borrow-only views of the outputs of the stages that completed during the last build.
    pub fn overlays(&self) -> DebugOverlays<'_> {
        DebugOverlays {
            heightfield: self.heightfield.as_ref(),
            compact_heightfield: self.compact_heightfield.as_ref(),
            contours: self.contours.as_ref(),
            polygon_mesh: self.polygon_mesh.as_ref(),
            detail_navmesh: self.detail_navmesh.as_ref(),
        }
    }

    /// Runs the whole pipeline on `triangles`.
    ///
    /// Triangles outside of the configured volume are clipped away. No input at all yields an
    /// empty navmesh. The outputs of a previous build are discarded first.
    pub fn build(
        &mut self,
        triangles: impl IntoIterator<Item = Triangle>,
    ) -> Result<CompiledNavmesh, BuildError> {
        self.heightfield = None;
        self.compact_heightfield = None;
        self.contours = None;
        self.polygon_mesh = None;
        self.detail_navmesh = None;

        let span = info_span!("build_navmesh", aabb = ?self.config.aabb);
        let _enter = span.enter();
        let mut inputs = BuildInputs {
            triangles: 0,
            aabb: self.config.aabb,
            grid: (0, 0),
        };

        self.config
            .validate()
            .map_err(|error| BuildError::config(&inputs, error))?;
        let config = &self.config;

        let heightfield = {
            let _stage = debug_span!("rasterize").entered();
            let mut heightfield = HeightfieldBuilder {
                aabb: config.aabb,
                cell_size: config.cell_size,
                cell_height: config.cell_height,
            }
            .build()
            .context("failed to allocate the heightfield")
            .map_err(|error| BuildError::internal(BuildStage::Rasterize, &inputs, error))?;
            inputs.grid = (heightfield.width, heightfield.depth);

            for triangle in triangles {
                inputs.triangles += 1;
                let index = inputs.triangles - 1;
                heightfield
                    .rasterize(triangle, config.walkable_climb)
                    .with_context(|| format!("failed to rasterize triangle {index}"))
                    .map_err(|error| BuildError::internal(BuildStage::Rasterize, &inputs, error))?;
            }
            debug!(
                triangles = inputs.triangles,
                spans = heightfield.span_count(),
                "Rasterized input geometry."
            );
            heightfield
        };

        let heightfield = self.heightfield.insert(heightfield);
        {
            let _stage = debug_span!("filter").entered();
            if config.filter_low_hanging_obstacles {
                heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
            }
            if config.filter_ledge_spans {
                heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
            }
            if config.filter_low_height_spans {
                heightfield.filter_walkable_low_height_spans(config.walkable_height);
            }
        }

        let mut compact_heightfield = {
            let _stage = debug_span!("compact").entered();
            let mut compact_heightfield = CompactHeightfield::from_heightfield(
                heightfield,
                config.walkable_height,
                config.walkable_climb,
            );
            compact_heightfield.erode_walkable_area(config.walkable_radius);
            for volume in &config.area_volumes {
                compact_heightfield.mark_convex_poly_area(volume);
            }
            debug!(
                spans = compact_heightfield.spans.len(),
                "Compacted walkable spans."
            );
            compact_heightfield
        };

        {
            let _stage = debug_span!("distance_field").entered();
            compact_heightfield.build_distance_field();
            debug!(
                max_distance = compact_heightfield.max_distance,
                "Built distance field."
            );
        }

        let regions = {
            let _stage = debug_span!("regions").entered();
            let regions = compact_heightfield.build_regions(config.min_region_area);
            debug!(
                regions = *compact_heightfield.max_region,
                "Partitioned walkable area into regions."
            );
            regions
        };
        let compact_heightfield = self.compact_heightfield.insert(compact_heightfield);
        regions
            .context("failed to partition the walkable area")
            .map_err(|error| BuildError::internal(BuildStage::Regions, &inputs, error))?;

        if compact_heightfield.max_region == RegionId::NONE {
            debug!("No walkable regions, the navmesh is empty.");
            return Ok(CompiledNavmesh::default());
        }

        let contours = {
            let _stage = debug_span!("contours").entered();
            let contours = compact_heightfield.build_contours(
                config.max_simplification_error,
                config.max_edge_len,
                config.contour_flags,
            );
            debug!(contours = contours.contours.len(), "Traced region contours.");
            contours
        };
        let contours = self.contours.insert(contours);

        let polygon_mesh = {
            let _stage = debug_span!("polygon_mesh").entered();
            let polygon_mesh = contours
                .build_polygon_mesh(config.max_vertices_per_polygon as usize)
                .context("failed to build the polygon mesh")
                .map_err(|error| BuildError::internal(BuildStage::PolygonMesh, &inputs, error))?;
            polygon_mesh
                .validate_adjacency()
                .context("polygon mesh adjacency is inconsistent")
                .map_err(|error| BuildError::internal(BuildStage::PolygonMesh, &inputs, error))?;
            debug!(
                vertices = polygon_mesh.vertices.len(),
                polygons = polygon_mesh.polygons.len(),
                "Built polygon mesh."
            );
            polygon_mesh
        };
        let polygon_mesh = self.polygon_mesh.insert(polygon_mesh);

        let detail_navmesh = {
            let _stage = debug_span!("detail_mesh").entered();
            let detail_navmesh = DetailNavmesh::new(
                polygon_mesh,
                compact_heightfield,
                config.detail_sample_dist,
                config.detail_sample_max_error,
            )
            .context("failed to build the detail mesh")
            .map_err(|error| BuildError::internal(BuildStage::DetailMesh, &inputs, error))?;
            debug!(
                triangles = detail_navmesh
                    .meshes
                    .iter()
                    .map(|mesh| mesh.triangles.len())
                    .sum::<usize>(),
                "Built detail mesh."
            );
            detail_navmesh
        };
        let detail_navmesh = self.detail_navmesh.insert(detail_navmesh);

        let _stage = debug_span!("compile").entered();
        CompiledNavmesh::compile(polygon_mesh, detail_navmesh)
            .context("failed to compile the navmesh")
            .map_err(|error| BuildError::internal(BuildStage::Compile, &inputs, error))
    }
}

/// The stages of a navmesh build, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildStage {
    /// Validation of the [`NavmeshConfig`].
    Config,
    /// Rasterization of the input triangles into a [`Heightfield`].
    Rasterize,
    /// Partitioning of the walkable area into regions.
    Regions,
    /// Triangulation of the region contours into a [`PolygonMesh`].
    PolygonMesh,
    /// Height sampling of the polygons into a [`DetailNavmesh`].
    DetailMesh,
    /// Conversion into a [`CompiledNavmesh`].
    Compile,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Config => "config",
            BuildStage::Rasterize => "rasterize",
            BuildStage::Regions => "regions",
            BuildStage::PolygonMesh => "polygon mesh",
            BuildStage::DetailMesh => "detail mesh",
            BuildStage::Compile => "compile",
        })
    }
}

/// What a failed build was working on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildInputs {
    /// The number of triangles consumed so far.
    pub triangles: usize,
    /// The build volume.
    pub aabb: Aabb3d,
    /// The size of the heightfield grid in columns, once allocated.
    pub grid: (u16, u16),
}

impl fmt::Display for BuildInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} triangles, bounds {}..{}, grid {}x{}",
            self.triangles, self.aabb.min, self.aabb.max, self.grid.0, self.grid.1
        )
    }
}

/// The error returned by a failed navmesh build.
#[derive(Error, Debug)]
#[error("navmesh build failed: {kind} (stage {stage}, {inputs})")]
pub struct BuildError {
    /// The stage that failed.
    pub stage: BuildStage,
    /// What the build was working on.
    pub inputs: BuildInputs,
    /// Why it failed.
    #[source]
    pub kind: BuildErrorKind,
}

impl BuildError {
    fn config(inputs: &BuildInputs, error: ConfigError) -> Self {
        Self {
            stage: BuildStage::Config,
            inputs: *inputs,
            kind: BuildErrorKind::ConfigInvalid(error),
        }
    }

    fn internal(stage: BuildStage, inputs: &BuildInputs, error: anyhow::Error) -> Self {
        Self {
            stage,
            inputs: *inputs,
            kind: BuildErrorKind::InternalInvariant(error),
        }
    }
}

/// The kinds of [`BuildError`].
#[derive(Error, Debug)]
pub enum BuildErrorKind {
    /// The configuration does not pass [`NavmeshConfig::validate`].
    #[error("invalid config: {0}")]
    ConfigInvalid(ConfigError),
    /// A stage produced inconsistent data. This is a bug in the builder.
    #[error("internal invariant violated: {0:#}")]
    InternalInvariant(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;
    use crate::{NavmeshConfigBuilder, PathStatus};

    fn config() -> NavmeshConfig {
        NavmeshConfig {
            walkable_height: 2,
            walkable_climb: 1,
            walkable_radius: 0,
            min_region_area: 1,
            max_edge_len: 0,
            detail_sample_dist: 0.0,
            ..NavmeshConfigBuilder {
                cell_size: 1.0,
                cell_height: 1.0,
                aabb: Aabb3d::new(Vec3A::new(0.0, -1.0, 0.0), Vec3A::new(8.0, 8.0, 8.0)),
                ..Default::default()
            }
            .build()
        }
    }

    fn floor(size: f32) -> [Triangle; 2] {
        let a = Vec3A::new(0.0, 0.0, 0.0);
        let b = Vec3A::new(size, 0.0, 0.0);
        let c = Vec3A::new(size, 0.0, size);
        let d = Vec3A::new(0.0, 0.0, size);
        [Triangle::new(a, b, c, true), Triangle::new(a, c, d, true)]
    }

    #[test]
    fn invalid_config_fails_before_rasterizing() {
        let mut config = config();
        config.cell_size = 0.0;
        let mut builder = NavmeshBuilder::new(config);
        let error = builder.build(floor(4.0)).unwrap_err();
        assert_eq!(error.stage, BuildStage::Config);
        assert!(matches!(error.kind, BuildErrorKind::ConfigInvalid(_)));
        assert!(error.to_string().starts_with("navmesh build failed: "));
        assert!(builder.overlays().heightfield.is_none());
    }

    #[test]
    fn no_triangles_build_an_empty_navmesh() {
        let mut builder = NavmeshBuilder::new(config());
        let navmesh = builder.build([]).unwrap();
        assert!(navmesh.is_empty());
        let overlays = builder.overlays();
        assert!(overlays.heightfield.is_some());
        assert!(overlays.compact_heightfield.is_some());
        assert!(overlays.polygon_mesh.is_none());
    }

    #[test]
    fn floor_builds_and_keeps_every_stage() {
        let mut builder = NavmeshBuilder::new(config());
        let navmesh = builder.build(floor(4.0)).unwrap();
        assert!(!navmesh.is_empty());
        let overlays = builder.overlays();
        assert!(overlays.contours.is_some());
        assert!(overlays.polygon_mesh.is_some());
        assert!(overlays.detail_navmesh.is_some());
        let path = crate::NavmeshQuery::new(&navmesh)
            .find_path(Vec3A::new(1.0, 0.0, 1.0), Vec3A::new(3.0, 0.0, 3.0));
        assert_eq!(path.status, PathStatus::Success);
    }

    #[test]
    fn rebuilding_discards_old_outputs() {
        let mut builder = NavmeshBuilder::new(config());
        builder.build(floor(4.0)).unwrap();
        builder.build([]).unwrap();
        assert!(builder.overlays().contours.is_none());
    }
}
