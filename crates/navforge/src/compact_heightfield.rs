use tracing::warn;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z, opposite},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the walkable surface of a [`Heightfield`].
///
/// Only walkable spans survive compaction. Each span records its floor, its clearance and
/// the index of its connected neighbor in each of the four cardinal directions.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The depth of the heightfield along the z-axis in cell units
    pub depth: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * depth`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`] once the distance field is built.
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl CompactHeightfield {
    /// Neighbors beyond this many layers up a column are never linked.
    pub const MAX_LAYERS: usize = 63;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// Two spans in adjacent columns are linked when the open corridor between them is at least
    /// `walkable_height` tall and their floors differ by at most `walkable_climb`.
    /// Links are always reciprocal.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Self {
        let walkable_span_count = heightfield
            .allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();

        let mut compact_heightfield = Self {
            width: heightfield.width,
            depth: heightfield.depth,
            walkable_height,
            walkable_climb,
            aabb: heightfield.aabb,
            max_distance: 0,
            max_region: RegionId::NONE,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![CompactCell::default(); heightfield.columns.len()],
            spans: Vec::with_capacity(walkable_span_count),
            dist: vec![],
            areas: Vec::with_capacity(walkable_span_count),
        };
        compact_heightfield.aabb.max.y += walkable_height as f32 * compact_heightfield.cell_height;

        // Fill in cells and spans
        for z in 0..heightfield.depth {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let cell = &mut compact_heightfield.cells[column_index];
                cell.set_index(compact_heightfield.spans.len() as u32);

                for (_, span) in heightfield.column(x, z) {
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = heightfield.ceiling_of(span);
                    let height = (top - bot as i32).clamp(0, CompactSpan::MAX_HEIGHT as i32);
                    compact_heightfield
                        .spans
                        .push(CompactSpan::new(bot, height as u16));
                    compact_heightfield.areas.push(span.area());
                    cell.inc_count();
                }
            }
        }

        compact_heightfield.link_neighbors();
        compact_heightfield.drop_one_way_links();
        compact_heightfield
    }

    fn link_neighbors(&mut self) {
        let mut max_layer_index = 0;
        for z in 0..self.depth {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_indices() {
                    for dir in 0..4_u8 {
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // First check that the neighbour cell is in bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            continue;
                        }
                        let neighbor_cell = *self.cell_at(neighbor_x as u16, neighbor_z as u16);

                        // Iterate over all neighbour spans and check if any of them is
                        // accessible from current cell.
                        let span = &self.spans[i];
                        let mut link = None;
                        for (layer_index, k) in neighbor_cell.span_indices().enumerate() {
                            let neighbor_span = &self.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i64;
                            let top = span.top().min(neighbor_span.top()) as i64;

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = top - bot >= self.walkable_height as i64;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= self.walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            if layer_index >= Self::MAX_LAYERS {
                                max_layer_index = max_layer_index.max(layer_index);
                                continue;
                            }
                            link = Some(k);
                            break;
                        }
                        self.spans[i].set_neighbor(dir, link);
                    }
                }
            }
        }
        if max_layer_index > 0 {
            warn!(
                max_layer_index,
                max_layers = Self::MAX_LAYERS,
                "Heightfield has too many layers, some neighbor links were skipped"
            );
        }
    }

    /// Removes links whose target does not point back at the source.
    fn drop_one_way_links(&mut self) {
        for i in 0..self.spans.len() {
            for dir in 0..4 {
                let Some(neighbor) = self.spans[i].neighbor(dir) else {
                    continue;
                };
                if self.spans[neighbor].neighbor(opposite(dir)) != Some(i) {
                    self.spans[i].set_neighbor(dir, None);
                }
            }
        }
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.depth as i32
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Iterates over every span index together with its column coordinates.
    pub fn iter_span_indices(&self) -> impl Iterator<Item = (u16, u16, usize)> + '_ {
        (0..self.depth).flat_map(move |z| {
            (0..self.width).flat_map(move |x| {
                self.cell_at(x, z)
                    .span_indices()
                    .map(move |index| (x, z, index))
            })
        })
    }

    /// The neighbor of span `index` in `direction`, if connected.
    #[inline]
    pub fn neighbor_of(&self, index: usize, direction: u8) -> Option<usize> {
        self.spans[index].neighbor(direction)
    }

    /// World-space position of the floor of the column at `(x, z)` at voxel height `y`.
    #[inline]
    pub fn world_position(&self, x: u16, y: u16, z: u16) -> glam::Vec3A {
        self.aabb.min
            + glam::Vec3A::new(
                x as f32 * self.cell_size,
                y as f32 * self.cell_height,
                z as f32 * self.cell_size,
            )
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{HeightfieldBuilder, heightfield::SpanInsertion, span::SpanBuilder};

    use super::*;

    fn heightfield(columns: &[&[(u16, u16)]]) -> Heightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [columns.len() as f32, 32.0, 1.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for (x, column) in columns.iter().enumerate() {
            for &(min, max) in *column {
                heightfield
                    .add_span(SpanInsertion {
                        x: x as u16,
                        z: 0,
                        flag_merge_threshold: 0,
                        span: SpanBuilder {
                            min,
                            max,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        heightfield
    }

    #[test]
    fn keeps_walkable_spans_with_clearance() {
        let heightfield = heightfield(&[&[(0, 1), (5, 6)]]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        assert_eq!(compact.spans.len(), 2);
        assert_eq!(compact.spans[0].y, 1);
        assert_eq!(compact.spans[0].height, 4);
        assert_eq!(compact.spans[1].height, CompactSpan::MAX_HEIGHT - 6);
        assert_eq!(compact.cell_at(0, 0).count(), 2);
    }

    #[test]
    fn links_climbable_neighbors_only() {
        let heightfield = heightfield(&[&[(0, 1)], &[(0, 2)], &[(0, 5)]]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        // +x is direction 2, -x is direction 0.
        assert_eq!(compact.neighbor_of(0, 2), Some(1));
        assert_eq!(compact.neighbor_of(1, 0), Some(0));
        assert_eq!(compact.neighbor_of(1, 2), None);
        assert_eq!(compact.neighbor_of(2, 0), None);
    }

    #[test]
    fn links_are_symmetric() {
        let heightfield = heightfield(&[
            &[(0, 1), (4, 5)],
            &[(0, 2), (3, 4), (8, 9)],
            &[(0, 1), (4, 5)],
        ]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        for i in 0..compact.spans.len() {
            for dir in 0..4 {
                if let Some(j) = compact.neighbor_of(i, dir) {
                    assert_eq!(compact.neighbor_of(j, opposite(dir)), Some(i));
                }
            }
        }
    }

    #[test]
    fn low_corridor_blocks_link() {
        let heightfield = heightfield(&[&[(0, 1), (3, 4)], &[(0, 1)]]);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 3, 1);
        // The first column's floor only has 2 voxels of clearance.
        assert_eq!(compact.neighbor_of(0, 2), None);
        let compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        assert_eq!(compact.neighbor_of(0, 2), Some(2));
    }
}
