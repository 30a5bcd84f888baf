use thiserror::Error;

use crate::{Aabb3d, BuildContoursFlags, ConvexVolume};

/// The parameters of a single navmesh build. Usually created with [`NavmeshConfigBuilder`].
///
/// Lengths are given either in voxels (vx) or in world units (wu). Voxel sizes follow from
/// [`Self::cell_size`] on the xz-plane and [`Self::cell_height`] along the y-axis, so changing
/// either of them changes the meaning of every voxel-unit field.
///
/// > Note:
/// >
/// > Start from the size of the agent's logical cylinder. With meters as world units, a radius
/// > of 0.4 and a height of 2.0 are reasonable for a human-sized agent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The world-space volume to build the navmesh in. Geometry outside of it is clipped. [Units: wu]
    pub aabb: Aabb3d,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// A good starting point is a half or a third of the agent radius. Smaller cells give a more
    /// detailed navmesh, but the build time grows quadratically with the number of columns.
    /// Use the largest value that still resolves the gaps the agent has to walk through.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// A good starting point is half of [`Self::cell_size`]. If the navmesh shows holes around
    /// stairs or curbs, a smaller value usually connects them.
    pub cell_height: f32,

    /// Minimum floor to ceiling clearance that still lets the floor be walkable. `[Limit: >= 1] [Units: vx]`
    ///
    /// Usually `(agent_height / cell_height).ceil()`.
    pub walkable_height: u16,

    /// Maximum step height that is still traversable. `[Limit: >= 0] [Units: vx]`
    ///
    /// Usually `(agent_max_climb / cell_height).floor()`. Lets the mesh flow over curbs and stairs.
    pub walkable_climb: u16,

    /// The distance to erode the walkable area away from obstructions. `[Limit: >= 0] [Units: vx]`
    ///
    /// Usually `(agent_radius / cell_size).ceil()`. With a non-zero radius, an agent whose center
    /// stays on the navmesh never clips into walls.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >= 0] [Units: vx]`
    ///
    /// Long border edges produce long thin triangles. Edges longer than this are split.
    /// Zero disables splitting.
    pub max_edge_len: u16,

    /// How far a simplified contour may deviate from the raw contour. `[Limit: >= 0] [Units: vx]`
    ///
    /// Values in `[1.1, 1.5]` work well. Lower values leave sawtooth edges, higher values start
    /// to cut corners. Only the xz-plane is affected.
    pub max_simplification_error: f32,

    /// The minimum number of spans a region must cover to survive. `[Limit: >= 0] [Units: vx]`
    ///
    /// Smaller regions are merged into a neighboring region of the same area type, or removed
    /// when they have none. This cleans up islands on table tops and box tops.
    pub min_region_area: u32,

    /// The maximum number of vertices of the polygons of the polygon mesh. `[Limit: 3..=12]`
    pub max_vertices_per_polygon: u16,

    /// The sampling distance used for the detail mesh. `[Limits: 0 or >= 0.9 * cell_size] [Units: wu]`
    ///
    /// Zero disables height sampling, the detail mesh then triangulates the polygons as they are.
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh may deviate from the heightfield. `[Limit: >= 0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Marks walkable spans on top of a walkable span within [`Self::walkable_climb`] as walkable.
    pub filter_low_hanging_obstacles: bool,

    /// Removes spans whose drop to a neighbor exceeds [`Self::walkable_climb`].
    pub filter_ledge_spans: bool,

    /// Removes spans with less than [`Self::walkable_height`] of clearance.
    pub filter_low_height_spans: bool,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,

    /// Volumes that assign their area type to the spans inside them.
    pub area_volumes: Vec<ConvexVolume>,
}

impl NavmeshConfig {
    /// The largest supported value for [`Self::max_vertices_per_polygon`].
    pub const MAX_VERTICES_PER_POLYGON: u16 = 12;

    /// The number of columns of the grid along the x- and z-axis.
    pub fn grid_size(&self) -> (f32, f32) {
        let size = self.aabb.size();
        (
            (size.x / self.cell_size).floor(),
            (size.z / self.cell_size).floor(),
        )
    }

    /// Checks that every value is finite and within its limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("cell_size", self.cell_size)?;
        positive("cell_height", self.cell_height)?;
        non_negative("max_simplification_error", self.max_simplification_error)?;
        non_negative("detail_sample_dist", self.detail_sample_dist)?;
        non_negative("detail_sample_max_error", self.detail_sample_max_error)?;

        let Aabb3d { min, max } = self.aabb;
        if !(min.is_finite() && max.is_finite())
            || min.x >= max.x
            || min.z >= max.z
            || min.y > max.y
        {
            return Err(ConfigError::InvalidVolume { aabb: self.aabb });
        }
        let (width, depth) = self.grid_size();
        if width > u16::MAX as f32 || depth > u16::MAX as f32 {
            return Err(ConfigError::GridTooLarge { width, depth });
        }
        let layers = (max.y - min.y) / self.cell_height + self.walkable_height as f32;
        if layers > u16::MAX as f32 {
            return Err(ConfigError::VolumeTooTall { layers });
        }

        if self.walkable_height == 0 {
            return Err(ConfigError::WalkableHeightTooSmall);
        }
        if !(3..=Self::MAX_VERTICES_PER_POLYGON).contains(&self.max_vertices_per_polygon) {
            return Err(ConfigError::VerticesPerPolygonOutOfRange {
                value: self.max_vertices_per_polygon,
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { name, value })
    }
}

/// Errors returned by [`NavmeshConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value that must be strictly positive is not.
    #[error("{name} must be finite and > 0, got {value}")]
    NotPositive {
        /// The name of the offending field
        name: &'static str,
        /// The rejected value
        value: f32,
    },
    /// A value that must not be negative is.
    #[error("{name} must be finite and >= 0, got {value}")]
    Negative {
        /// The name of the offending field
        name: &'static str,
        /// The rejected value
        value: f32,
    },
    /// The build volume is empty on the xz-plane, inverted or not finite.
    #[error("build volume {aabb:?} is empty or not finite")]
    InvalidVolume {
        /// The rejected volume
        aabb: Aabb3d,
    },
    /// The volume covers more columns than the lattice can address.
    #[error("grid size {width}x{depth} exceeds {max} columns per axis", max = u16::MAX)]
    GridTooLarge {
        /// The number of columns along the x-axis
        width: f32,
        /// The number of columns along the z-axis
        depth: f32,
    },
    /// The volume covers more layers than the lattice can address.
    #[error("volume spans {layers} layers, exceeding {max}", max = u16::MAX)]
    VolumeTooTall {
        /// The number of cells along the y-axis
        layers: f32,
    },
    /// The walkable height is zero.
    #[error("walkable_height must be at least 1 voxel")]
    WalkableHeightTooSmall,
    /// The polygon vertex limit is outside of `3..=12`.
    #[error("max_vertices_per_polygon must be in [3, {max}], got {value}", max = NavmeshConfig::MAX_VERTICES_PER_POLYGON)]
    VerticesPerPolygonOutOfRange {
        /// The rejected value
        value: u16,
    },
}

/// A builder for [`NavmeshConfig`] that takes the agent's dimensions in world units.
///
/// The default values suit an agent resembling an adult human in a world measured in meters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// Add a little padding. An agent that is 1.8 units tall might use 2.0.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: >= 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// Regions whose side is shorter than this are merged or removed. `[Units: vx]`
    pub region_min_size: f32,
    /// The maximum length of border edges. `[Units: wu]`
    pub edge_max_len: f32,
    /// The maximum contour simplification error. `[Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon.
    pub verts_per_poly: u16,
    /// The detail sampling distance in cells. Values below 0.9 disable sampling.
    pub detail_sample_dist: f32,
    /// The maximum detail error in cell heights.
    pub detail_sample_max_error: f32,
    /// The world-space volume to build the navmesh in.
    pub aabb: Aabb3d,
    /// See [`NavmeshConfig::filter_low_hanging_obstacles`].
    pub filter_low_hanging_obstacles: bool,
    /// See [`NavmeshConfig::filter_ledge_spans`].
    pub filter_ledge_spans: bool,
    /// See [`NavmeshConfig::filter_low_height_spans`].
    pub filter_low_height_spans: bool,
    /// Flags controlling contour generation.
    pub contour_flags: BuildContoursFlags,
    /// Volumes that assign their area type to the spans inside them.
    pub area_volumes: Vec<ConvexVolume>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            region_min_size: 8.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            aabb: Aabb3d::default(),
            filter_low_hanging_obstacles: true,
            filter_ledge_spans: true,
            filter_low_height_spans: true,
            contour_flags: BuildContoursFlags::default(),
            area_volumes: Vec::new(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Converts the world-unit agent dimensions to voxel units and builds a [`NavmeshConfig`].
    ///
    /// The result is not validated, see [`NavmeshConfig::validate`].
    pub fn build(self) -> NavmeshConfig {
        NavmeshConfig {
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius: (self.agent_radius / self.cell_size).ceil() as u16,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u32,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            filter_low_hanging_obstacles: self.filter_low_hanging_obstacles,
            filter_ledge_spans: self.filter_ledge_spans,
            filter_low_height_spans: self.filter_low_height_spans,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
        }
    }
}
