use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erode the walkable area by agent radius.
    ///
    /// Every walkable span closer than `walkable_radius` cells to a non-walkable span or to the edge
    /// of the walkable surface is marked as [`AreaType::NOT_WALKABLE`].
    /// A radius of zero leaves the field untouched.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        if walkable_radius == 0 {
            return;
        }
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for (span_index, span) in self.spans.iter().enumerate() {
            if !self.areas[span_index].is_walkable() {
                distance_to_boundary[span_index] = 0;
                continue;
            }
            // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
            let neighbor_count = (0..4)
                .filter_map(|direction| span.neighbor(direction))
                .filter(|neighbor| self.areas[*neighbor].is_walkable())
                .count();

            // At least one missing neighbour, so this is a boundary cell.
            if neighbor_count != 4 {
                distance_to_boundary[span_index] = 0;
            }
        }

        // Pass 1: propagate from the -x and -z sides.
        self.chamfer(&mut distance_to_boundary, ChamferPass::Forward);
        // Pass 2: propagate from the +x and +z sides.
        self.chamfer(&mut distance_to_boundary, ChamferPass::Backward);

        let min_boundary_distance = (walkable_radius as u32 * 2).min(u8::MAX as u32) as u8;
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            if *distance < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

/// Which half of a two-pass chamfer distance transform to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChamferPass {
    /// Raster order, reading the `-x` and `-z` neighbors and their diagonals.
    Forward,
    /// Reverse raster order, reading the `+x` and `+z` neighbors and their diagonals.
    Backward,
}

/// A distance value that a chamfer pass can relax.
pub(crate) trait ChamferDistance: Copy + Ord {
    fn add_saturating(self, cost: u8) -> Self;
}

impl ChamferDistance for u8 {
    #[inline]
    fn add_saturating(self, cost: u8) -> Self {
        self.saturating_add(cost)
    }
}

impl ChamferDistance for u16 {
    #[inline]
    fn add_saturating(self, cost: u8) -> Self {
        self.saturating_add(cost as u16)
    }
}

impl CompactHeightfield {
    /// One sweep of the chamfer distance transform with cardinal cost 2 and diagonal cost 3.
    pub(crate) fn chamfer<T: ChamferDistance>(&self, distance: &mut [T], pass: ChamferPass) {
        // Each entry is (cardinal direction, direction from the cardinal neighbor to the diagonal).
        let steps: [(u8, u8); 2] = match pass {
            ChamferPass::Forward => [(0, 3), (3, 2)],
            ChamferPass::Backward => [(2, 1), (1, 0)],
        };
        let mut relax = |i: usize| {
            let span = &self.spans[i];
            for (direction, diagonal) in steps {
                let Some(neighbor) = span.neighbor(direction) else {
                    continue;
                };
                let candidate = distance[neighbor].add_saturating(2);
                if candidate < distance[i] {
                    distance[i] = candidate;
                }
                if let Some(corner) = self.spans[neighbor].neighbor(diagonal) {
                    let candidate = distance[corner].add_saturating(3);
                    if candidate < distance[i] {
                        distance[i] = candidate;
                    }
                }
            }
        };
        match pass {
            ChamferPass::Forward => {
                for z in 0..self.depth {
                    for x in 0..self.width {
                        self.cell_at(x, z).span_indices().for_each(&mut relax);
                    }
                }
            }
            ChamferPass::Backward => {
                for z in (0..self.depth).rev() {
                    for x in (0..self.width).rev() {
                        self.cell_at(x, z).span_indices().for_each(&mut relax);
                    }
                }
            }
        }
    }
}
