use glam::{IVec3, Vec3A};

use crate::{Aabb3d, AreaType, CompactHeightfield, math::point_in_polygon_xz};

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans within the given convex volume.
    ///
    /// A span is inside when the center of its column lies inside the volume's outline on the
    /// xz-plane and its floor lies within `[min_y, max_y]`. Spans that are not walkable stay untouched.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        // Compute the bounding box of the polygon
        let Some(mut aabb) = Aabb3d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };
        aabb.min.y = volume.min_y;
        aabb.max.y = volume.max_y;

        // Compute the grid footprint of the polygon
        let scale = Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        let min = ((aabb.min - self.aabb.min) / scale).floor();
        let max = ((aabb.max - self.aabb.min) / scale).floor();
        let mut min = IVec3::new(min.x as i32, min.y as i32, min.z as i32);
        let mut max = IVec3::new(max.x as i32, max.y as i32, max.z as i32);

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.depth as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.depth as i32 - 1);

        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let center = Vec3A::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    0.0,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                if !point_in_polygon_xz(center, &volume.vertices) {
                    continue;
                }
                for i in self.cell_at(x as u16, z as u16).span_indices() {
                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    // Skip if y extents don't overlap.
                    let y = self.spans[i].y as i32;
                    if y < min.y || y > max.y {
                        continue;
                    }
                    self.areas[i] = volume.area;
                }
            }
        }
    }
}

/// A vertical prism that assigns an [`AreaType`] to every walkable span inside it.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The outline of the volume on the xz-plane. The y components are ignored.
    pub vertices: Vec<Vec3A>,
    /// The lower bound of the volume in world space.
    pub min_y: f32,
    /// The upper bound of the volume in world space.
    pub max_y: f32,
    /// The area type assigned to the spans inside the volume.
    pub area: AreaType,
}
