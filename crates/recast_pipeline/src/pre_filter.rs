//! Filters that run on the [`Heightfield`] after rasterization, removing spans
//! an agent could never stand on.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

impl Heightfield {
    const MAX_HEIGHT: i32 = 0xffff;

    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_max = None;
                let mut previous_was_walkable = false;
                let mut previous_area = AreaType::NOT_WALKABLE;

                // For each span in the column...
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span_mut(span_key);
                    span_key_iter = span.next();
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some(previous_max) = previous_max {
                        if !walkable
                            && previous_was_walkable
                            && span.max() as i32 - previous_max <= walkable_climb as i32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous_was_walkable = walkable;
                    previous_area = span.area();
                    previous_max = Some(span.max() as i32);
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    /// Columns on the edge of the heightfield count as ledges.
    ///
    /// A span is a ledge if: `abs(current_span.max - neighbor_span.max) > walkable_climb`
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();

                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(Self::MAX_HEIGHT);

                    // The difference between this walkable area and the lowest neighbor walkable area.
                    // This is the difference between the current span and all neighbor spans that have
                    // enough space for an agent to move between, but not accounting at all for surface slope.
                    let mut lowest_neighbor_floor_difference = Self::MAX_HEIGHT;

                    // Min and max height of accessible neighbours.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for dir in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(dir);
                        let neighbor_z = z as i32 + dir_offset_z(dir);

                        // Skip neighbours which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }
                        let neighbor_x = neighbor_x as u16;
                        let neighbor_z = neighbor_z as u16;

                        // The most we can step down to the neighbor is the walkable climb distance.
                        // Start with the area under the neighbor span
                        let neighbor_ceiling = self
                            .span_at(neighbor_x, neighbor_z)
                            .map(|span| span.min() as i32)
                            .unwrap_or(Self::MAX_HEIGHT);

                        // Skip neighbour if the gap between the spans is too small.
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        // For each span in the neighboring column...
                        for neighbor_key in self.column_span_keys(neighbor_x, neighbor_z) {
                            let neighbor_span = self.span(neighbor_key);
                            let neighbor_floor = neighbor_span.max() as i32;
                            let neighbor_ceiling = neighbor_span
                                .next()
                                .map(|next| self.span(next).min() as i32)
                                .unwrap_or(Self::MAX_HEIGHT);

                            // Only consider neighboring areas that have enough overlap to be potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if neighbor_floor_difference.abs() <= walkable_climb {
                                // There is space to move to the neighbor cell and the slope isn't too much.
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_floor);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_floor);
                            } else if neighbor_floor_difference < -walkable_climb {
                                // We already know this will be considered a ledge span so we can early-out
                                break;
                            }
                        }
                    }

                    // The current span is close to a ledge if the magnitude of the drop to any neighbour span
                    // exceeds the walkable_climb distance.
                    let is_ledge = lowest_neighbor_floor_difference < -walkable_climb;
                    // If the difference between all neighbor floors is too large, this is a steep slope,
                    // so mark the span as an unwalkable ledge.
                    let is_steep = highest_traversable_neighbor_floor
                        - lowest_traversable_neighbor_floor
                        > walkable_climb;
                    if is_ledge || is_steep {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(Self::MAX_HEIGHT);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Runs the three span filters in the order the build pipeline expects.
    pub fn filter_all(&mut self, walkable_height: u16, walkable_climb: u16) {
        self.filter_low_hanging_walkable_obstacles(walkable_climb);
        self.filter_ledge_spans(walkable_height, walkable_climb);
        self.filter_walkable_low_height_spans(walkable_height);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(5.0, 10.0, 5.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn add(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
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

    fn floor_with_height(heightfield: &mut Heightfield, max: u16) {
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                add(heightfield, x, z, 0, max, AreaType::DEFAULT_WALKABLE);
            }
        }
    }

    fn areas_in_column(heightfield: &Heightfield, x: u16, z: u16) -> Vec<AreaType> {
        heightfield
            .column_span_keys(x, z)
            .map(|key| heightfield.span(key).area())
            .collect()
    }

    #[test]
    fn low_obstacle_on_walkable_floor_becomes_walkable() {
        let mut heightfield = heightfield();
        add(&mut heightfield, 2, 2, 0, 2, AreaType(7));
        add(&mut heightfield, 2, 2, 3, 4, AreaType::NOT_WALKABLE);
        add(&mut heightfield, 2, 2, 5, 6, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        // The second obstacle is only reachable through a non-walkable span.
        assert_eq!(
            areas_in_column(&heightfield, 2, 2),
            vec![AreaType(7), AreaType(7), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn high_obstacle_stays_unwalkable() {
        let mut heightfield = heightfield();
        add(&mut heightfield, 2, 2, 0, 2, AreaType(7));
        add(&mut heightfield, 2, 2, 3, 8, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        assert_eq!(
            areas_in_column(&heightfield, 2, 2),
            vec![AreaType(7), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn edges_of_the_field_are_ledges() {
        let mut heightfield = heightfield();
        floor_with_height(&mut heightfield, 1);
        heightfield.filter_ledge_spans(2, 1);
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let on_edge = x == 0 || z == 0 || x == 4 || z == 4;
                assert_eq!(
                    heightfield.span_at(x, z).unwrap().area().is_walkable(),
                    !on_edge,
                    "column {x},{z}"
                );
            }
        }
    }

    #[test]
    fn drop_next_to_span_is_a_ledge() {
        let mut heightfield = heightfield();
        floor_with_height(&mut heightfield, 1);
        // Raise a plateau in the middle.
        add(&mut heightfield, 2, 2, 1, 5, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_ledge_spans(2, 1);
        assert!(!heightfield.span_at(2, 2).unwrap().area().is_walkable());
        assert!(heightfield.span_at(1, 1).unwrap().area().is_walkable());
    }

    #[test]
    fn low_ceiling_spans_are_removed() {
        let mut heightfield = heightfield();
        add(&mut heightfield, 1, 1, 0, 1, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 1, 1, 3, 4, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 3, 3, 0, 1, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 3, 3, 5, 6, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_walkable_low_height_spans(3);
        assert_eq!(
            areas_in_column(&heightfield, 1, 1),
            vec![AreaType::NOT_WALKABLE, AreaType::DEFAULT_WALKABLE]
        );
        assert_eq!(
            areas_in_column(&heightfield, 3, 3),
            vec![AreaType::DEFAULT_WALKABLE, AreaType::DEFAULT_WALKABLE]
        );
    }
}
