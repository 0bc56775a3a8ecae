use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erode the walkable area by agent radius.
    ///
    /// Spans closer than `walkable_radius` cells to a non-walkable span or to the edge of the
    /// walkable surface are marked as [`AreaType::NOT_WALKABLE`].
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u8::MAX as u16; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for span_index in self.cell_at(x, z).index_range() {
                    if !self.areas[span_index].is_walkable() {
                        distance_to_boundary[span_index] = 0;
                        continue;
                    }
                    // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor(x as i32, z as i32, span_index, dir))
                        .filter(|(_, _, neighbor_index)| self.areas[*neighbor_index].is_walkable())
                        .count();

                    // At least one missing neighbour, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[span_index] = 0;
                    }
                }
            }
        }

        self.chamfer_distance(&mut distance_to_boundary);

        // Erode
        let min_boundary_distance = walkable_radius.saturating_mul(2);
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            if *distance < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::distance_field::tests::flat_field;

    #[test]
    fn erosion_removes_a_ring_per_radius() {
        let mut chf = flat_field(9);
        chf.erode_walkable_area(2);
        let walkable = |x: u16, z: u16| chf.areas[chf.cell_at(x, z).index() as usize].is_walkable();
        assert!(!walkable(0, 4));
        assert!(!walkable(1, 4));
        assert!(walkable(2, 4));
        assert!(walkable(4, 4));
        assert!(!walkable(1, 1));
        assert!(walkable(2, 2));
    }

    #[test]
    fn zero_radius_keeps_everything() {
        let mut chf = flat_field(5);
        chf.erode_walkable_area(0);
        assert_eq!(chf.walkable_span_count(), chf.spans.len());
    }
}
