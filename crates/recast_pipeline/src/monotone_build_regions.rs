use tracing::debug;

use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

impl CompactHeightfield {
    /// Partitions the walkable surface into monotone regions with a single sweep along the z-axis.
    ///
    /// Much faster than [`CompactHeightfield::build_regions`] and does not need a distance field,
    /// but tends to produce long, thin regions.
    ///
    /// Small regions are filtered and merged exactly as in watershed partitioning.
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let region_id = self.sweep_monotone(border_size, &mut src_reg)?;

        // Merge regions and filter out small regions.
        // Monotone partitioning does not generate overlapping regions.
        let (max_region, _) = self.merge_and_filter_regions(
            min_region_area as usize,
            merge_region_area as usize,
            region_id,
            &mut src_reg,
        );
        self.max_region = max_region;

        let dropped = self.store_regions(&src_reg);
        debug!(
            "monotone partitioning produced {} regions, {dropped} walkable spans left without a region",
            max_region.bits()
        );
        Ok(())
    }

    /// Assigns every walkable span a region by sweeping the rows of the field.
    ///
    /// A run of spans in a row continues the region of the row above when it is the only run
    /// touching that region. Returns the next free region id.
    pub(crate) fn sweep_monotone(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
    ) -> Result<RegionId, RegionError> {
        let mut region_id = self.paint_border_regions(border_size, src_reg)?;

        let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(self.width.max(self.height) as usize);
        let mut prev: Vec<u16> = Vec::with_capacity(256);

        let border = border_size.min(self.width / 2).min(self.height / 2);
        // Sweep one line at a time.
        for z in border..self.height - border {
            // Collect spans from this row.
            prev.clear();
            prev.resize(region_id.bits() as usize + 1, 0);
            sweeps.clear();
            sweeps.push(SweepSpan::default());

            for x in border..self.width - border {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    if !area.is_walkable() {
                        continue;
                    }

                    // -x
                    let mut previous = None;
                    if let Some((_, _, a_i)) = self.neighbor(x as i32, z as i32, i, 0) {
                        let a_region = src_reg[a_i];
                        if a_region.is_interior() && self.areas[a_i] == area {
                            previous = Some(a_region.bits() as usize);
                        }
                    }
                    let previous = match previous {
                        Some(previous) => previous,
                        None => {
                            sweeps.push(SweepSpan::default());
                            sweeps.len() - 1
                        }
                    };

                    // -z
                    if let Some((_, _, a_i)) = self.neighbor(x as i32, z as i32, i, 3) {
                        let a_region = src_reg[a_i];
                        if a_region.is_interior() && self.areas[a_i] == area {
                            let sweep = &mut sweeps[previous];
                            sweep.neighbor = match sweep.neighbor {
                                SweepNeighbor::Unset => SweepNeighbor::Region(a_region),
                                SweepNeighbor::Region(neighbor) if neighbor == a_region => {
                                    SweepNeighbor::Region(neighbor)
                                }
                                // Touches more than one region of the previous row.
                                _ => SweepNeighbor::Multiple,
                            };
                            if sweep.neighbor != SweepNeighbor::Multiple {
                                sweep.sample_count += 1;
                                prev[a_region.bits() as usize] += 1;
                            }
                        }
                    }

                    // Row-local id, replaced below.
                    src_reg[i] = RegionId::from(previous as u16);
                }
            }

            // Create unique ID.
            for sweep in sweeps.iter_mut().skip(1) {
                // If the run is the only one connected to the region of the previous row,
                // it continues that region.
                match sweep.neighbor {
                    SweepNeighbor::Region(neighbor)
                        if prev[neighbor.bits() as usize] == sweep.sample_count =>
                    {
                        sweep.id = neighbor;
                    }
                    _ => {
                        sweep.id = region_id;
                        region_id = region_id.next().ok_or(RegionError::TooManyRegions)?;
                    }
                }
            }

            // Remap IDs
            for x in border..self.width - border {
                for i in self.cell_at(x, z).index_range() {
                    let row_id = src_reg[i].bits() as usize;
                    if row_id > 0 && row_id < sweeps.len() && self.areas[i].is_walkable() {
                        src_reg[i] = sweeps[row_id].id;
                    }
                }
            }
        }
        Ok(region_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Number of spans of this run that touch `neighbor` in the previous row.
    sample_count: u16,
    /// Final region id.
    id: RegionId,
    /// The region of the previous row this run touches.
    neighbor: SweepNeighbor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SweepNeighbor {
    #[default]
    Unset,
    Region(RegionId),
    Multiple,
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, distance_field::tests::flat_field};

    use super::*;

    #[test]
    fn open_square_becomes_a_single_region() {
        let mut chf = flat_field(10);
        chf.build_regions_monotone(0, 8, 20).unwrap();
        assert_eq!(chf.region_count(), 1);
        assert_eq!(chf.max_region, RegionId::from(1));
        assert!(chf.spans.iter().all(|span| span.region == RegionId::from(1)));
    }

    #[test]
    fn obstacle_splits_rows_into_separate_regions() {
        let mut chf = flat_field(12);
        // A pillar in the middle forces the rows next to it to split.
        for z in 4..8 {
            for x in 4..8 {
                let i = chf.cell_at(x, z).index() as usize;
                chf.areas[i] = AreaType::NOT_WALKABLE;
            }
        }
        chf.build_regions_monotone(0, 0, 0).unwrap();
        assert!(chf.region_count() > 1);
        assert_eq!(chf.max_region.bits() as usize, chf.region_count());
        let left = chf.cell_at(1, 5).index() as usize;
        let right = chf.cell_at(10, 5).index() as usize;
        assert_ne!(chf.spans[left].region, chf.spans[right].region);
        for (span, area) in chf.spans.iter().zip(&chf.areas) {
            assert_eq!(area.is_walkable(), span.region.is_interior());
        }
    }

    #[test]
    fn does_not_need_a_distance_field() {
        let mut chf = flat_field(6);
        assert!(chf.dist.is_empty());
        chf.build_regions_monotone(0, 0, 0).unwrap();
        assert_eq!(chf.region_count(), 1);
    }
}
