use tracing::{debug, warn};

use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

/// Number of distance levels kept in flight while flooding.
const LOG_NB_STACKS: u16 = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;
/// How far regions may grow into lower levels before new regions are seeded.
const EXPAND_ITERS: u16 = 8;

impl CompactHeightfield {
    /// Partitions the walkable surface into regions using a watershed transform of the distance field.
    ///
    /// Regions grow outward from the spans farthest from any boundary, level by level.
    /// Every non-null region consists of connected, non-overlapping walkable spans whose outline is
    /// a simple polygon.
    ///
    /// Groups of connected regions that together have fewer than `min_region_area` spans and do not
    /// touch the border are removed. Regions of at most `merge_region_area` spans are merged into
    /// their smallest compatible neighbor. Walkable spans that end up without a region are marked
    /// as [`AreaType::NOT_WALKABLE`](crate::AreaType::NOT_WALKABLE).
    ///
    /// `border_size` paints a strip of that many cells around the field as border regions.
    ///
    /// The distance field must have been built with [`CompactHeightfield::build_distance_field`].
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        if self.dist.len() != self.spans.len() {
            return Err(RegionError::MissingDistanceField);
        }

        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = self.paint_border_regions(border_size, &mut src_reg)?;
        let mut level = (self.max_distance + 1) & !1;

        let mut s_id = NB_STACKS - 1;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks);
            } else {
                // Copy left overs from last level.
                let (src, dst) = level_stacks.split_at_mut(s_id);
                append_stacks(&src[s_id - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                EXPAND_ITERS,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id],
                false,
            );

            // Mark new regions with ids.
            for j in 0..level_stacks[s_id].len() {
                let entry = level_stacks[s_id][j];
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(entry, level, region_id, &mut src_reg, &mut src_dist, &mut stack)
                {
                    region_id = region_id.next().ok_or(RegionError::TooManyRegions)?;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            EXPAND_ITERS * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        let (max_region, overlaps) = self.merge_and_filter_regions(
            min_region_area as usize,
            merge_region_area as usize,
            region_id,
            &mut src_reg,
        );
        if !overlaps.is_empty() {
            warn!(
                "{} regions overlap themselves after merging",
                overlaps.len()
            );
        }
        self.max_region = max_region;

        let dropped = self.store_regions(&src_reg);
        debug!(
            "watershed partitioning produced {} regions, {dropped} walkable spans left without a region",
            max_region.bits()
        );
        Ok(())
    }

    /// Buckets all unassigned walkable spans into the level stacks, starting at `start_level`.
    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>; NB_STACKS],
    ) {
        let start_level = start_level >> 1;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // Put all cells in the level range into the appropriate stacks.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = self.dist[i] >> 1;
                    // Spans above the start level belong in the first stack.
                    let s_id = start_level.saturating_sub(level) as usize;
                    if s_id >= NB_STACKS {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    /// Grows existing regions into the spans of `stack` for up to `max_iter` rounds.
    ///
    /// With `fill_stack`, the stack is first filled with every unassigned span at or above `level`.
    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    for i in self.cell_at(x, z).index_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // Mark all cells which already have a region.
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != RegionId::NONE) {
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

                let mut region = src_reg[i];
                let mut d2 = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some((_, _, a_i)) = self.neighbor(entry.x as i32, entry.z as i32, i, dir)
                    else {
                        continue;
                    };
                    if self.areas[a_i] != area {
                        continue;
                    }
                    let a_region = src_reg[a_i];
                    let a_dist = src_dist[a_i].saturating_add(2);
                    if a_region.is_interior() && a_dist < d2 {
                        region = a_region;
                        d2 = a_dist;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance2: d2,
                    });
                } else {
                    failed += 1;
                }
            }

            // Write back after the pass so that the order of the stack does not matter.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance2;
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

    /// Floods a new region from `start` across unassigned spans of the same area down to `level - 2`.
    ///
    /// Spans that touch another region, including diagonally, are left unassigned.
    /// Returns `true` if at least one span was claimed.
    fn flood_region(
        &self,
        start: LevelStackEntry,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(start_index) = start.index else {
            return false;
        };
        let area = self.areas[start_index];

        // Flood fill mark region.
        stack.clear();
        stack.push(start);
        src_reg[start_index] = region;
        src_dist[start_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(back) = stack.pop() {
            let (cx, cz) = (back.x as i32, back.z as i32);
            let Some(ci) = back.index else {
                continue;
            };

            // Check if any of the neighbours already have a valid region set.
            let mut touches_other = false;
            for dir in 0..4 {
                // 8 connected
                let Some((a_x, a_z, a_i)) = self.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                if self.areas[a_i] != area {
                    continue;
                }
                let neighbor_region = src_reg[a_i];
                // Do not take borders into account.
                if neighbor_region.contains(RegionId::BORDER_REGION) {
                    continue;
                }
                if neighbor_region != RegionId::NONE && neighbor_region != region {
                    touches_other = true;
                    break;
                }

                let dir2 = (dir + 1) & 0x3;
                if let Some((_, _, a_i2)) = self.neighbor(a_x, a_z, a_i, dir2) {
                    if self.areas[a_i2] != area {
                        continue;
                    }
                    let diagonal_region = src_reg[a_i2];
                    if diagonal_region.is_interior() && diagonal_region != region {
                        touches_other = true;
                        break;
                    }
                }
            }
            if touches_other {
                src_reg[ci] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some((a_x, a_z, a_i)) = self.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                if self.areas[a_i] != area {
                    continue;
                }
                if self.dist[a_i] >= lev && src_reg[a_i] == RegionId::NONE {
                    src_reg[a_i] = region;
                    src_dist[a_i] = 0;
                    stack.push(LevelStackEntry {
                        x: a_x as u16,
                        z: a_z as u16,
                        index: Some(a_i),
                    });
                }
            }
        }

        count > 0
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    dst_stack.extend(
        src_stack
            .iter()
            .filter(|entry| entry.index.is_some_and(|i| src_reg[i] == RegionId::NONE)),
    );
}

#[derive(Clone, Copy, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance2: u16,
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, distance_field::tests::flat_field};

    use super::*;

    #[test]
    fn open_square_becomes_a_single_region() {
        let mut chf = flat_field(10);
        chf.build_distance_field();
        chf.build_regions(0, 8, 20).unwrap();
        assert_eq!(chf.region_count(), 1);
        assert_eq!(chf.max_region, RegionId::from(1));
        assert!(chf.spans.iter().all(|span| span.region == RegionId::from(1)));
    }

    #[test]
    fn every_walkable_span_gets_a_region() {
        let mut chf = flat_field(24);
        // Carve a wall through the middle, leaving a doorway.
        for z in 0..24 {
            if (10..13).contains(&z) {
                continue;
            }
            let i = chf.cell_at(12, z).index() as usize;
            chf.areas[i] = AreaType::NOT_WALKABLE;
        }
        chf.build_distance_field();
        chf.build_regions(0, 4, 20).unwrap();
        for (span, area) in chf.spans.iter().zip(&chf.areas) {
            assert_eq!(area.is_walkable(), span.region != RegionId::NONE);
        }
        assert!(chf.region_count() >= 1);
    }

    #[test]
    fn small_islands_are_removed() {
        let mut chf = flat_field(12);
        // Isolate a 2x2 island in the corner.
        for i in 0..4 {
            for (x, z) in [(2, i), (i, 2)] {
                let index = chf.cell_at(x, z).index() as usize;
                chf.areas[index] = AreaType::NOT_WALKABLE;
            }
        }
        let index = chf.cell_at(2, 3).index() as usize;
        chf.areas[index] = AreaType::NOT_WALKABLE;
        chf.build_distance_field();
        chf.build_regions(0, 8, 20).unwrap();
        let island = chf.cell_at(0, 0).index() as usize;
        assert_eq!(chf.spans[island].region, RegionId::NONE);
        assert_eq!(chf.areas[island], AreaType::NOT_WALKABLE);
        assert_eq!(chf.max_region.bits() as usize, chf.region_count());
    }

    #[test]
    fn border_is_painted_with_flagged_regions() {
        let mut chf = flat_field(16);
        chf.build_distance_field();
        chf.build_regions(2, 0, 0).unwrap();
        assert_eq!(chf.border_size, 2);
        let corner = chf.cell_at(0, 0).index() as usize;
        assert!(chf.spans[corner].region.contains(RegionId::BORDER_REGION));
        let center = chf.cell_at(8, 8).index() as usize;
        assert!(chf.spans[center].region.is_interior());
        // The border strips do not take up interior ids.
        assert_eq!(chf.max_region.bits() as usize, chf.region_count());
    }

    #[test]
    fn missing_distance_field_is_reported() {
        let mut chf = flat_field(4);
        chf.dist.clear();
        assert_eq!(
            chf.build_regions(0, 0, 0),
            Err(RegionError::MissingDistanceField)
        );
    }
}
