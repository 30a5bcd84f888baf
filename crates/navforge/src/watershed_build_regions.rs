//! Watershed partitioning
//!   - floods the distance field from its ridges downward
//!   - creates the nicest tessellation
//!   - partitions the heightfield into regions without holes or overlaps
//!   - narrow spiral corridors can still produce overlapping regions, which triangulation may fail on

use std::collections::BTreeSet;

use thiserror::Error;

use crate::{CompactHeightfield, region::RegionId, span::AreaType};

const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;
const EXPAND_ITERS: u16 = 8;

impl CompactHeightfield {
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// Connected groups of regions whose total area is smaller than `min_region_area` are discarded:
    /// their spans are re-assigned to [`AreaType::NOT_WALKABLE`].
    /// A surviving region smaller than `min_region_area` that borders exactly one other region of the
    /// same area type is merged into that neighbor.
    ///
    /// The region data will be available via [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region).
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before attempting to build regions.
    pub fn build_regions(&mut self, min_region_area: u32) -> Result<(), RegionBuildError> {
        if self.dist.len() != self.spans.len() {
            return Err(RegionBuildError::MissingDistanceField);
        }
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut watershed = Watershed::new(self);
        let mut level = self.max_distance.saturating_add(1) & !1;

        let mut s_id = usize::MAX;
        loop {
            level = level.saturating_sub(2);
            s_id = s_id.wrapping_add(1) & (NB_STACKS - 1);

            if s_id == 0 {
                watershed.sort_cells_by_level(level, &mut level_stacks, 1);
            } else {
                // copy left overs from last level
                let (src, dst) = level_stacks.split_at_mut(s_id);
                watershed.append_stacks(&src[s_id - 1], &mut dst[0]);
            }

            watershed.expand_regions(EXPAND_ITERS, level, &mut level_stacks[s_id], false);

            // Mark new regions with IDs.
            for entry_index in 0..level_stacks[s_id].len() {
                let Some(i) = level_stacks[s_id][entry_index].index else {
                    continue;
                };
                if watershed.regions[i].is_region() {
                    continue;
                }
                let region = watershed.next_region()?;
                if watershed.flood_region(i, level, region, &mut stack) {
                    watershed.claim_region();
                }
            }

            if level == 0 {
                break;
            }
        }

        // Expand current regions until no empty connected cells found.
        watershed.expand_regions(EXPAND_ITERS * 8, 0, &mut stack, true);

        let regions = watershed.merge_and_filter_regions(min_region_area);

        let mut max_region = RegionId::NONE;
        for (i, region) in regions.into_iter().enumerate() {
            self.spans[i].region = region;
            if region.is_region() {
                max_region = max_region.max(region);
            } else {
                self.areas[i] = AreaType::NOT_WALKABLE;
            }
        }
        self.max_region = max_region;
        Ok(())
    }
}

/// Working memory of one watershed run.
struct Watershed<'a> {
    field: &'a CompactHeightfield,
    regions: Vec<RegionId>,
    distances: Vec<u16>,
    /// The id the next flooded region will receive.
    next_region_id: u16,
}

impl<'a> Watershed<'a> {
    fn new(field: &'a CompactHeightfield) -> Self {
        Self {
            field,
            regions: vec![RegionId::NONE; field.spans.len()],
            distances: vec![0; field.spans.len()],
            next_region_id: 1,
        }
    }

    fn next_region(&self) -> Result<RegionId, RegionBuildError> {
        if self.next_region_id == u16::MAX {
            return Err(RegionBuildError::RegionIdOverflow);
        }
        Ok(RegionId(self.next_region_id))
    }

    fn claim_region(&mut self) {
        self.next_region_id += 1;
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for (_, _, i) in self.field.iter_span_indices() {
            if !self.field.areas[i].is_walkable() || self.regions[i].is_region() {
                continue;
            }
            let level = self.field.dist[i] >> log_levels_per_stack;
            let s_id = start_level.saturating_sub(level) as usize;
            if s_id >= stacks.len() {
                continue;
            }
            stacks[s_id].push(LevelStackEntry { index: Some(i) });
        }
    }

    fn append_stacks(&self, src_stack: &[LevelStackEntry], dst_stack: &mut Vec<LevelStackEntry>) {
        for entry in src_stack {
            let Some(i) = entry.index else {
                continue;
            };
            if self.regions[i].is_region() {
                continue;
            }
            dst_stack.push(entry.clone());
        }
    }

    /// Grows existing regions into the unassigned spans of `stack`, one ring per iteration.
    fn expand_regions(
        &mut self,
        max_iter: u16,
        level: u16,
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        let field = self.field;
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for (_, _, i) in field.iter_span_indices() {
                if field.dist[i] >= level
                    && !self.regions[i].is_region()
                    && field.areas[i].is_walkable()
                {
                    stack.push(LevelStackEntry { index: Some(i) });
                }
            }
        } else {
            // use cells in the input stack
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| self.regions[i].is_region()) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = self.regions[i];
                let mut best_distance = u16::MAX;
                let area = field.areas[i];
                for dir in 0..4 {
                    let Some(a_index) = field.spans[i].neighbor(dir) else {
                        continue;
                    };
                    if field.areas[a_index] != area {
                        continue;
                    }
                    let a_region = self.regions[a_index];
                    let a_distance = self.distances[a_index].saturating_add(2);
                    if a_region.is_region() && a_distance < best_distance {
                        region = a_region;
                        best_distance = a_distance;
                    }
                }
                if region.is_region() {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance: best_distance,
                    });
                } else {
                    failed += 1;
                }
            }
            // Apply the ring only after the whole pass so it grows uniformly.
            for dirty_entry in &dirty_entries {
                self.regions[dirty_entry.index] = dirty_entry.region;
                self.distances[dirty_entry.index] = dirty_entry.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Floods a new region from span `start` over same-area spans at or above `level - 2`.
    ///
    /// Spans touching another region are left unassigned.
    /// Returns whether at least one span was claimed.
    fn flood_region(
        &mut self,
        start: usize,
        level: u16,
        region: RegionId,
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let field = self.field;
        let area = field.areas[start];

        // Flood fill mark region.
        stack.clear();
        stack.push(LevelStackEntry { index: Some(start) });
        self.regions[start] = region;
        self.distances[start] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(entry) = stack.pop() {
            let Some(current) = entry.index else {
                continue;
            };
            let span = &field.spans[current];

            // Check if any of the neighbours already have a valid region set.
            let mut touches_other_region = false;
            'directions: for dir in 0..4 {
                let Some(a_index) = span.neighbor(dir) else {
                    continue;
                };
                if field.areas[a_index] != area {
                    continue;
                }
                let neighbor_region = self.regions[a_index];
                if neighbor_region.is_region() && neighbor_region != region {
                    touches_other_region = true;
                    break;
                }
                let diagonal_dir = (dir + 1) & 0x3;
                if let Some(diagonal_index) = field.spans[a_index].neighbor(diagonal_dir) {
                    if field.areas[diagonal_index] != area {
                        continue;
                    }
                    let diagonal_region = self.regions[diagonal_index];
                    if diagonal_region.is_region() && diagonal_region != region {
                        touches_other_region = true;
                        break 'directions;
                    }
                }
            }
            if touches_other_region {
                self.regions[current] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some(a_index) = span.neighbor(dir) else {
                    continue;
                };
                if field.areas[a_index] != area {
                    continue;
                }
                if field.dist[a_index] >= lev && !self.regions[a_index].is_region() {
                    self.regions[a_index] = region;
                    self.distances[a_index] = 0;
                    stack.push(LevelStackEntry {
                        index: Some(a_index),
                    });
                }
            }
        }

        count > 0
    }

    /// Drops undersized islands, folds small regions into their only neighbor and renumbers
    /// the survivors densely from 1.
    fn merge_and_filter_regions(self, min_region_area: u32) -> Vec<RegionId> {
        let field = self.field;
        let region_count = self.next_region_id as usize;
        let mut regions: Vec<RegionSummary> = (0..region_count)
            .map(|_| RegionSummary::default())
            .collect();

        for (i, region) in self.regions.iter().enumerate() {
            if !region.is_region() {
                continue;
            }
            let summary = &mut regions[region.0 as usize];
            summary.span_count += 1;
            summary.area = field.areas[i];
            for dir in 0..4 {
                let Some(a_index) = field.spans[i].neighbor(dir) else {
                    continue;
                };
                let neighbor_region = self.regions[a_index];
                if neighbor_region.is_region() && neighbor_region != *region {
                    summary.neighbors.insert(neighbor_region.0);
                }
            }
        }

        // Remove connected groups of regions that are too small to matter.
        let mut visited = vec![false; region_count];
        let mut trace = Vec::new();
        let mut pending = Vec::new();
        for start in 1..region_count {
            if visited[start] || regions[start].span_count == 0 {
                continue;
            }
            trace.clear();
            pending.clear();
            pending.push(start);
            visited[start] = true;
            let mut span_count = 0_u32;
            while let Some(current) = pending.pop() {
                trace.push(current);
                span_count += regions[current].span_count;
                for &neighbor in &regions[current].neighbors {
                    let neighbor = neighbor as usize;
                    if !visited[neighbor] {
                        visited[neighbor] = true;
                        pending.push(neighbor);
                    }
                }
            }
            if span_count < min_region_area {
                for &id in &trace {
                    regions[id].removed = true;
                }
            }
        }

        // Merge too small regions into their only neighbor.
        let mut merged_into: Vec<u16> = (0..region_count as u16).collect();
        loop {
            let mut merged_any = false;
            for id in 1..region_count {
                let summary = &regions[id];
                if summary.removed || summary.span_count == 0 || summary.span_count >= min_region_area
                {
                    continue;
                }
                let mut live_neighbors = summary
                    .neighbors
                    .iter()
                    .copied()
                    .filter(|n| !regions[*n as usize].removed);
                let (Some(target), None) = (live_neighbors.next(), live_neighbors.next()) else {
                    continue;
                };
                if regions[target as usize].area != summary.area {
                    continue;
                }

                let source = std::mem::take(&mut regions[id]);
                let target_summary = &mut regions[target as usize];
                target_summary.span_count += source.span_count;
                target_summary.neighbors.remove(&(id as u16));
                target_summary
                    .neighbors
                    .extend(source.neighbors.iter().filter(|n| **n != target));
                for &other in &source.neighbors {
                    if other == target {
                        continue;
                    }
                    let other_neighbors = &mut regions[other as usize].neighbors;
                    other_neighbors.remove(&(id as u16));
                    other_neighbors.insert(target);
                }
                merged_into[id] = target;
                merged_any = true;
            }
            if !merged_any {
                break;
            }
        }

        // Compress region ids.
        let mut remap = vec![RegionId::NONE; region_count];
        let mut next_id = 1_u16;
        for id in 1..region_count {
            if regions[id].removed || regions[id].span_count == 0 {
                continue;
            }
            remap[id] = RegionId(next_id);
            next_id += 1;
        }
        let resolve = |mut id: u16| {
            while merged_into[id as usize] != id {
                id = merged_into[id as usize];
            }
            remap[id as usize]
        };

        self.regions
            .iter()
            .map(|region| {
                if region.is_region() {
                    resolve(region.0)
                } else {
                    RegionId::NONE
                }
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct RegionSummary {
    span_count: u32,
    area: AreaType,
    neighbors: BTreeSet<u16>,
    removed: bool,
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

/// Errors that can occur when partitioning a [`CompactHeightfield`] into regions.
#[derive(Error, Debug)]
pub enum RegionBuildError {
    /// [`CompactHeightfield::build_distance_field`] was not run first.
    #[error("the distance field must be built before regions")]
    MissingDistanceField,
    /// More regions were seeded than a [`RegionId`] can number.
    #[error("region id overflow, more than {} regions", u16::MAX - 1)]
    RegionIdOverflow,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{Aabb3d, HeightfieldBuilder, heightfield::Heightfield};

    use super::*;

    fn heightfield(width: f32, depth: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [width, 4.0, depth]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn add_rect(heightfield: &mut Heightfield, min: [f32; 2], max: [f32; 2], area: AreaType) {
        let a = Vec3A::new(min[0], 0.0, min[1]);
        let b = Vec3A::new(max[0], 0.0, min[1]);
        let c = Vec3A::new(max[0], 0.0, max[1]);
        let d = Vec3A::new(min[0], 0.0, max[1]);
        heightfield.rasterize_triangle([a, c, b], area, 1).unwrap();
        heightfield.rasterize_triangle([a, d, c], area, 1).unwrap();
    }

    fn regions(heightfield: &Heightfield, min_region_area: u32) -> CompactHeightfield {
        let mut compact = CompactHeightfield::from_heightfield(heightfield, 2, 1);
        compact.build_distance_field();
        compact.build_regions(min_region_area).unwrap();
        compact
    }

    #[test]
    fn flat_floor_is_one_region() {
        let mut heightfield = heightfield(8.0, 8.0);
        add_rect(&mut heightfield, [0.0, 0.0], [8.0, 8.0], AreaType::DEFAULT_WALKABLE);
        let compact = regions(&heightfield, 1);
        assert_eq!(compact.max_region, RegionId(1));
        assert!(compact.spans.iter().all(|span| span.region == RegionId(1)));
    }

    #[test]
    fn single_span_gets_a_region() {
        let mut heightfield = heightfield(1.0, 1.0);
        add_rect(&mut heightfield, [0.0, 0.0], [1.0, 1.0], AreaType::DEFAULT_WALKABLE);
        let compact = regions(&heightfield, 1);
        assert_eq!(compact.spans.len(), 1);
        assert_eq!(compact.spans[0].region, RegionId(1));
    }

    #[test]
    fn regions_never_cross_area_types() {
        let mut heightfield = heightfield(8.0, 4.0);
        add_rect(&mut heightfield, [0.0, 0.0], [4.0, 4.0], AreaType(1));
        add_rect(&mut heightfield, [4.0, 0.0], [8.0, 4.0], AreaType(2));
        let compact = regions(&heightfield, 1);
        assert_eq!(compact.max_region, RegionId(2));
        let left = compact.spans[compact.cell_at(0, 0).index() as usize].region;
        let right = compact.spans[compact.cell_at(7, 3).index() as usize].region;
        assert!(left.is_region() && right.is_region());
        assert_ne!(left, right);
        for (_, _, i) in compact.iter_span_indices() {
            let same_area = compact.areas[i];
            for dir in 0..4 {
                if let Some(j) = compact.neighbor_of(i, dir) {
                    if compact.areas[j] == same_area {
                        continue;
                    }
                    assert_ne!(compact.spans[i].region, compact.spans[j].region);
                }
            }
        }
    }

    #[test]
    fn small_islands_are_discarded() {
        let mut heightfield = heightfield(16.0, 8.0);
        add_rect(&mut heightfield, [0.0, 0.0], [8.0, 8.0], AreaType::DEFAULT_WALKABLE);
        add_rect(&mut heightfield, [12.0, 2.0], [14.0, 4.0], AreaType::DEFAULT_WALKABLE);
        let compact = regions(&heightfield, 5);
        assert_eq!(compact.max_region, RegionId(1));
        let island = compact.cell_at(12, 2).index() as usize;
        assert_eq!(compact.spans[island].region, RegionId::NONE);
        assert!(!compact.areas[island].is_walkable());
    }

    #[test]
    fn requires_distance_field() {
        let mut heightfield = heightfield(2.0, 2.0);
        add_rect(&mut heightfield, [0.0, 0.0], [2.0, 2.0], AreaType::DEFAULT_WALKABLE);
        let mut compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        assert!(matches!(
            compact.build_regions(1),
            Err(RegionBuildError::MissingDistanceField)
        ));
    }
}
