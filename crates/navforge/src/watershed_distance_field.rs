//! Distance field for watershed partitioning.
//!
//! Every walkable span gets its chamfer distance to the nearest boundary span, in half-cell units.
//! Boundary spans are spans that lack a connection to a span of the same area in any cardinal direction.

use crate::{CompactHeightfield, erosion::ChamferPass};

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating distance field along the walkable surface.
    ///
    /// The result is stored in [`CompactHeightfield::dist`] and its maximum in
    /// [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let distance = self.calculate_distance_field();
        self.dist = self.box_blur(1, &distance);
        self.max_distance = self.dist.iter().copied().max().unwrap_or_default();
    }

    fn calculate_distance_field(&self) -> Vec<u16> {
        let mut distance = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for (i, span) in self.spans.iter().enumerate() {
            let area = self.areas[i];
            let same_area_neighbors = (0..4)
                .filter_map(|direction| span.neighbor(direction))
                .filter(|neighbor| self.areas[*neighbor] == area)
                .count();
            if same_area_neighbors != 4 {
                distance[i] = 0;
            }
        }

        self.chamfer(&mut distance, ChamferPass::Forward);
        self.chamfer(&mut distance, ChamferPass::Backward);
        distance
    }

    /// Averages each span's distance with its 3x3 neighborhood.
    ///
    /// Spans within `threshold` cells of the boundary keep their value.
    /// A missing neighbor contributes the center span's own distance.
    fn box_blur(&self, threshold: u16, source: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut blurred = vec![0_u16; source.len()];
        for (i, span) in self.spans.iter().enumerate() {
            let center = source[i];
            if center <= threshold {
                blurred[i] = center;
                continue;
            }

            let mut sum = center as u32;
            for direction in 0..4 {
                let Some(neighbor) = span.neighbor(direction) else {
                    sum += center as u32 * 2;
                    continue;
                };
                sum += source[neighbor] as u32;
                let diagonal_direction = (direction + 1) & 0x3;
                match self.spans[neighbor].neighbor(diagonal_direction) {
                    Some(corner) => sum += source[corner] as u32,
                    None => sum += center as u32,
                }
            }
            blurred[i] = ((sum + 5) / 9) as u16;
        }
        blurred
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{Aabb3d, HeightfieldBuilder, span::AreaType};

    use super::*;

    fn floor(size: u16) -> CompactHeightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [size as f32, 4.0, size as f32]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        let s = size as f32;
        heightfield
            .rasterize_triangle(
                [
                    Vec3A::new(0.0, 0.0, 0.0),
                    Vec3A::new(s, 0.0, s),
                    Vec3A::new(s, 0.0, 0.0),
                ],
                AreaType::DEFAULT_WALKABLE,
                1,
            )
            .unwrap();
        heightfield
            .rasterize_triangle(
                [
                    Vec3A::new(0.0, 0.0, 0.0),
                    Vec3A::new(0.0, 0.0, s),
                    Vec3A::new(s, 0.0, s),
                ],
                AreaType::DEFAULT_WALKABLE,
                1,
            )
            .unwrap();
        CompactHeightfield::from_heightfield(&heightfield, 2, 1)
    }

    #[test]
    fn boundary_spans_have_zero_distance() {
        let mut compact = floor(5);
        compact.build_distance_field();
        for (i, span) in compact.spans.iter().enumerate() {
            if span.neighbor_count() < 4 {
                assert_eq!(compact.dist[i], 0);
            } else {
                assert!(compact.dist[i] > 0);
            }
        }
    }

    #[test]
    fn blur_smooths_the_peak() {
        let mut compact = floor(5);
        compact.build_distance_field();
        let center = compact.cell_at(2, 2).index() as usize;
        // The raw chamfer peak of 4 is averaged with its ring of 2s.
        assert_eq!(compact.dist[center], 2);
        assert_eq!(compact.max_distance, 2);

        let mut compact = floor(9);
        compact.build_distance_field();
        let center = compact.cell_at(4, 4).index() as usize;
        assert_eq!(compact.dist[center], compact.max_distance);
    }

    #[test]
    fn area_change_is_a_boundary() {
        let mut compact = floor(5);
        let split = compact.cell_at(2, 2).index() as usize;
        compact.areas[split] = AreaType(3);
        compact.build_distance_field();
        assert_eq!(compact.dist[split], 0);
    }
}
