//! Walkability filters that run on the [`Heightfield`] right after rasterization.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, Span, SpanKey},
};

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb_height` of the span below them.
    ///
    /// This removes small obstacles that the agent would be able to walk over such as curbs,
    /// and also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle.max - walkable.max < walkable_climb_height`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb_height: u16) {
        for z in 0..self.depth {
            for x in 0..self.width {
                let mut previous_max: Option<u16> = None;
                let mut previous_was_walkable = false;
                let mut previous_area_id = AreaType::NOT_WALKABLE;

                // For each span in the column...
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span_mut(key);
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some(previous_max) = previous_max {
                        if !walkable
                            && previous_was_walkable
                            && span.max() as i32 - previous_max as i32
                                <= walkable_climb_height as i32
                        {
                            span.set_area(previous_area_id);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous_max = Some(span.max());
                    previous_was_walkable = walkable;
                    previous_area_id = span.area();
                    span_key = span.next();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb_height`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// A span is also nulled when the floors it can step onto differ among themselves by more than
    /// `walkable_climb_height`, which marks steep slopes.
    ///
    /// Neighbor columns outside the grid and neighbor columns without any spans are not
    /// considered, so the outline of a floor with nothing around it is no ledge.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb_height: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb_height = walkable_climb_height as i32;
        for z in 0..self.depth {
            for x in 0..self.width {
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span(key);
                    span_key = span.next();
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if self.is_ledge(x, z, key, walkable_height, walkable_climb_height) {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    fn is_ledge(
        &self,
        x: u16,
        z: u16,
        key: SpanKey,
        walkable_height: i32,
        walkable_climb_height: i32,
    ) -> bool {
        let span = self.span(key);
        let floor = span.max() as i32;
        let ceiling = self.ceiling_of(span);

        // The difference between this walkable area and the lowest neighbor walkable area.
        // This is the difference between the current span and all neighbor spans that have
        // enough space for an agent to move between, but not accounting at all for surface slope.
        let mut lowest_neighbor_floor_difference = Span::MAX_HEIGHT as i32;

        // Min and max height of accessible neighbours.
        let mut lowest_traversable_neighbor_floor = floor;
        let mut highest_traversable_neighbor_floor = floor;

        for direction in 0..4 {
            let neighbor_x = x as i32 + dir_offset_x(direction) as i32;
            let neighbor_z = z as i32 + dir_offset_z(direction) as i32;
            if !self.contains(neighbor_x, neighbor_z) {
                continue;
            }
            let (neighbor_x, neighbor_z) = (neighbor_x as u16, neighbor_z as u16);

            let Some(lowest) = self.span_at(neighbor_x, neighbor_z) else {
                continue;
            };

            // The space below the lowest span of the neighbor column counts as a floor far below.
            let neighbor_floor = -walkable_climb_height;
            let neighbor_ceiling = lowest.min() as i32;
            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor) >= walkable_height {
                lowest_neighbor_floor_difference =
                    lowest_neighbor_floor_difference.min(neighbor_floor - floor);
            }

            for (_, neighbor_span) in self.column(neighbor_x, neighbor_z) {
                let neighbor_floor = neighbor_span.max() as i32;
                let neighbor_ceiling = self.ceiling_of(neighbor_span);

                // Only consider neighboring areas that have enough overlap to be potentially traversable.
                if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor) < walkable_height {
                    // No space to traverse between them.
                    continue;
                }

                let neighbor_difference = neighbor_floor - floor;
                lowest_neighbor_floor_difference =
                    lowest_neighbor_floor_difference.min(neighbor_difference);

                // Find min/max accessible neighbor height.
                // Only consider neighbors that are at most walkable_climb_height away.
                if neighbor_difference.abs() <= walkable_climb_height {
                    // There is space to move to the neighbor cell and the slope isn't too much.
                    lowest_traversable_neighbor_floor =
                        lowest_traversable_neighbor_floor.min(neighbor_floor);
                    highest_traversable_neighbor_floor =
                        highest_traversable_neighbor_floor.max(neighbor_floor);
                } else if neighbor_difference < -walkable_climb_height {
                    // We already know this will be considered a ledge span so we can early-out
                    return true;
                }
            }
            if lowest_neighbor_floor_difference < -walkable_climb_height {
                return true;
            }
        }

        // If the difference between all neighbor floors is too large, this is a steep slope.
        highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
            > walkable_climb_height
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is unbounded.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.depth {
            for x in 0..self.width {
                let mut span_key = self.span_key_at(x, z);
                while let Some(key) = span_key {
                    let span = self.span(key);
                    span_key = span.next();
                    let clearance = self.ceiling_of(span) - span.max() as i32;
                    if clearance < walkable_height as i32 {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// The minimum of the next span up the column, or [`Span::MAX_HEIGHT`] for open sky.
    #[inline]
    pub(crate) fn ceiling_of(&self, span: &Span) -> i32 {
        span.next()
            .map_or(Span::MAX_HEIGHT as i32, |next| self.span(next).min() as i32)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{Aabb3d, HeightfieldBuilder, heightfield::SpanInsertion, span::SpanBuilder};

    use super::*;

    fn heightfield(width: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [width, 20.0, 1.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z: 0,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    fn areas(heightfield: &Heightfield, x: u16) -> Vec<AreaType> {
        heightfield
            .column(x, 0)
            .map(|(_, span)| span.area())
            .collect()
    }

    #[test]
    fn low_hanging_obstacle_becomes_walkable() {
        let mut heightfield = heightfield(1.0);
        insert(&mut heightfield, 0, 0, 2, AreaType(7));
        insert(&mut heightfield, 0, 3, 3 + 1, AreaType::NOT_WALKABLE);
        insert(&mut heightfield, 0, 5, 6, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        assert_eq!(
            areas(&heightfield, 0),
            vec![AreaType(7), AreaType(7), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn low_ceiling_nulls_floor() {
        let mut heightfield = heightfield(1.0);
        insert(&mut heightfield, 0, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 0, 2, 3, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_walkable_low_height_spans(2);
        assert_eq!(
            areas(&heightfield, 0),
            vec![AreaType::NOT_WALKABLE, AreaType::DEFAULT_WALKABLE]
        );
    }

    #[test]
    fn drop_off_is_a_ledge() {
        let mut heightfield = heightfield(3.0);
        insert(&mut heightfield, 0, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 2, 4, 5, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_ledge_spans(2, 1);
        assert_eq!(areas(&heightfield, 0), vec![AreaType::DEFAULT_WALKABLE]);
        assert_eq!(areas(&heightfield, 1), vec![AreaType::NOT_WALKABLE]);
        assert_eq!(areas(&heightfield, 2), vec![AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn empty_columns_count_like_the_grid_border() {
        let mut heightfield = heightfield(4.0);
        insert(&mut heightfield, 0, 2, 3, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 2, 2, 3, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_ledge_spans(2, 1);
        // Column 0 borders the grid edge and an empty column, column 2 only empty columns.
        assert_eq!(areas(&heightfield, 0), vec![AreaType::DEFAULT_WALKABLE]);
        assert_eq!(areas(&heightfield, 2), vec![AreaType::DEFAULT_WALKABLE]);
    }

    #[test]
    fn climbable_step_is_not_a_ledge() {
        let mut heightfield = heightfield(2.0);
        insert(&mut heightfield, 0, 0, 1, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_ledge_spans(2, 1);
        assert_eq!(areas(&heightfield, 0), vec![AreaType::DEFAULT_WALKABLE]);
        assert_eq!(areas(&heightfield, 1), vec![AreaType::DEFAULT_WALKABLE]);
    }
}
