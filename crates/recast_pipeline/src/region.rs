use crate::{CompactHeightfield, span::AreaType};

bitflags::bitflags! {
    /// A region in a [`CompactHeightfield`](crate::CompactHeightfield).
    ///
    /// The low 15 bits carry the id, [`RegionId::BORDER_REGION`] marks the padding painted
    /// around the edges of the field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// The default region, which is used for spans that are not in a region, i.e. not walkable.
        const NONE = 0;

        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;

        /// The maximum region id, including flags.
        const MAX = u16::MAX;
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId::from_bits_retain(value)
    }
}

impl RegionId {
    /// Returns the id with the [`RegionId::BORDER_REGION`] flag stripped.
    #[inline]
    pub fn id(&self) -> u16 {
        self.bits() & !Self::BORDER_REGION.bits()
    }

    /// Returns `true` if this is a real region, i.e. neither [`RegionId::NONE`] nor a border region.
    #[inline]
    pub fn is_interior(&self) -> bool {
        *self != Self::NONE && !self.contains(Self::BORDER_REGION)
    }

    /// Returns the next region id. `None` once ids would collide with [`RegionId::BORDER_REGION`].
    #[inline]
    pub(crate) fn next(self) -> Option<Self> {
        let next = self.bits().checked_add(1)?;
        (next < Self::BORDER_REGION.bits()).then_some(Self::from_bits_retain(next))
    }
}

/// Errors that can occur while partitioning a [`CompactHeightfield`](crate::CompactHeightfield) into regions.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// More regions were needed than region ids exist.
    #[error("ran out of region ids, the field needs more than {max} regions", max = RegionId::BORDER_REGION.bits() - 1)]
    TooManyRegions,
    /// The distance field was not built before the regions.
    #[error("the distance field must be built before watershed regions")]
    MissingDistanceField,
}


/// Book-keeping for one region while regions are merged and filtered.
#[derive(Debug, Clone, Default)]
pub(crate) struct Region {
    /// Number of spans belonging to this region
    pub(crate) span_count: usize,
    /// ID of the region. Changes when the region is merged into another one.
    pub(crate) id: RegionId,
    /// Area type.
    pub(crate) area_type: AreaType,
    pub(crate) remap: bool,
    pub(crate) visited: bool,
    pub(crate) overlap: bool,
    pub(crate) connects_to_border: bool,
    pub(crate) y_min: u16,
    pub(crate) y_max: u16,
    /// Neighboring regions, in contour order. [`RegionId::NONE`] stands for a wall.
    pub(crate) connections: Vec<RegionId>,
    /// Regions sharing a column with this one, i.e. stacked above or below it.
    pub(crate) floors: Vec<RegionId>,
}

impl Region {
    fn new(id: RegionId) -> Self {
        Self {
            id,
            y_min: u16::MAX,
            ..Default::default()
        }
    }

    fn add_unique_floor_region(&mut self, floor: RegionId) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    fn add_unique_connection(&mut self, connection: RegionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    fn remove_adjacent_neighbors(&mut self) {
        // Remove adjacent duplicates.
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbor(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut neighbor_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                neighbor_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if neighbor_changed {
            self.remove_adjacent_neighbors();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared_edges = self
            .connections
            .iter()
            .filter(|connection| **connection == other.id)
            .count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    /// Region is connected to border if one of the neighbours is a wall.
    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&RegionId::NONE)
    }

    fn is_live(&self) -> bool {
        self.id.is_interior()
    }
}

/// Merges region `b` into region `a` by splicing their neighbor rings at the shared edge.
/// Returns `false` if the two regions do not touch.
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let a_id = regions[a].id;
    let b_id = regions[b].id;

    // Duplicate current neighbourhood.
    let a_connections = regions[a].connections.clone();
    let b_connections = std::mem::take(&mut regions[b].connections);

    // Find insertion point on A.
    let Some(insert_a) = a_connections.iter().position(|c| *c == b_id) else {
        regions[b].connections = b_connections;
        return false;
    };
    // Find insertion point on B.
    let Some(insert_b) = b_connections.iter().position(|c| *c == a_id) else {
        regions[b].connections = b_connections;
        return false;
    };

    // Merge neighbours.
    let na = a_connections.len();
    let nb = b_connections.len();
    let merged = (0..na - 1)
        .map(|i| a_connections[(insert_a + 1 + i) % na])
        .chain((0..nb - 1).map(|i| b_connections[(insert_b + 1 + i) % nb]))
        .collect();
    let b_floors = std::mem::take(&mut regions[b].floors);
    let b_span_count = std::mem::take(&mut regions[b].span_count);

    let region_a = &mut regions[a];
    region_a.connections = merged;
    region_a.remove_adjacent_neighbors();
    for floor in b_floors {
        region_a.add_unique_floor_region(floor);
    }
    region_a.span_count += b_span_count;
    true
}

impl CompactHeightfield {
    pub(crate) fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Paints the four border strips with their own [`RegionId::BORDER_REGION`] flagged ids.
    /// Returns the next free region id.
    pub(crate) fn paint_border_regions(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
    ) -> Result<RegionId, RegionError> {
        let mut region_id = RegionId::from(1);
        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = border_size.min(self.width);
            let border_height = border_size.min(self.height);
            let rects = [
                (0, border_width, 0, self.height),
                (self.width - border_width, self.width, 0, self.height),
                (0, self.width, 0, border_height),
                (0, self.width, self.height - border_height, self.height),
            ];
            for (min_x, max_x, min_z, max_z) in rects {
                self.paint_rect_region(
                    min_x,
                    max_x,
                    min_z,
                    max_z,
                    region_id | RegionId::BORDER_REGION,
                    src_reg,
                );
                region_id = region_id.next().ok_or(RegionError::TooManyRegions)?;
            }
        }
        self.border_size = border_size;
        Ok(region_id)
    }

    /// Walks the boundary of the region of span `i`, starting in direction `dir`,
    /// and records the sequence of neighboring regions.
    fn walk_region_contour(
        &self,
        mut x: i32,
        mut z: i32,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
        connections: &mut Vec<RegionId>,
    ) {
        let start_dir = dir;
        let start_i = i;

        let neighbor_region = |x: i32, z: i32, i: usize, dir: u8| {
            self.neighbor(x, z, i, dir)
                .map(|(_, _, a_i)| src_reg[a_i])
                .unwrap_or(RegionId::NONE)
        };

        let mut current_region = neighbor_region(x, z, i, dir);
        connections.push(current_region);

        for _ in 0..40_000 {
            let region = neighbor_region(x, z, i, dir);
            if region != src_reg[i] {
                // Solid edge: record the region on the other side.
                if region != current_region {
                    current_region = region;
                    connections.push(current_region);
                }
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_i)) = self.neighbor(x, z, i, dir) else {
                    // Should not happen.
                    return;
                };
                x = n_x;
                z = n_z;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        let mut j = 0;
        while j < connections.len() && connections.len() > 1 {
            let nj = (j + 1) % connections.len();
            if connections[j] == connections[nj] {
                connections.remove(j);
            } else {
                j += 1;
            }
        }
    }

    /// Removes regions smaller than `min_region_area` and merges regions of at most
    /// `merge_region_area` spans into their smallest neighbor.
    ///
    /// `next_region_id` is the first id the partitioning left unused. Returns the highest
    /// compacted region id and the ids of regions found overlapping themselves.
    pub(crate) fn merge_and_filter_regions(
        &self,
        min_region_area: usize,
        merge_region_area: usize,
        next_region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> (RegionId, Vec<RegionId>) {
        // Ids below the next free id, slot 0 stays unused.
        let region_count = next_region_id.bits() as usize;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(RegionId::from(i as u16)))
            .collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i];
                    let r_index = r.bits() as usize;
                    if r == RegionId::NONE || r_index >= region_count {
                        continue;
                    }
                    let region = &mut regions[r_index];
                    region.span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id == RegionId::NONE || floor_id.bits() as usize >= region_count {
                            continue;
                        }
                        if floor_id == r {
                            region.overlap = true;
                        }
                        region.add_unique_floor_region(floor_id);
                    }

                    // Have found contour
                    if !region.connections.is_empty() {
                        continue;
                    }
                    region.area_type = self.areas[i];

                    // Check if this cell is next to a border.
                    let edge_dir = (0..4).find(|dir| {
                        self.neighbor(x as i32, z as i32, i, *dir)
                            .map(|(_, _, a_i)| src_reg[a_i])
                            .unwrap_or(RegionId::NONE)
                            != r
                    });
                    if let Some(dir) = edge_dir {
                        let mut connections = Vec::new();
                        self.walk_region_contour(
                            x as i32,
                            z as i32,
                            i,
                            dir,
                            src_reg,
                            &mut connections,
                        );
                        regions[r_index].connections = connections;
                    }
                }
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if !region.is_live() || region.span_count == 0 || region.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);

                for j in 0..regions[ri].connections.len() {
                    let connection = regions[ri].connections[j];
                    if connection.contains(RegionId::BORDER_REGION) {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection.bits() as usize];
                    if neighbor.visited || !neighbor.is_live() {
                        continue;
                    }
                    neighbor.visited = true;
                    stack.push(neighbor.id.bits() as usize);
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area && !connects_to_border {
                // Kill all visited regions.
                for &t in &trace {
                    regions[t].span_count = 0;
                    regions[t].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if !region.is_live() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_area && region.is_connected_to_border() {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                // Equally small neighbors are resolved towards the lower id.
                let mut best: Option<(usize, RegionId)> = None;
                for connection in &region.connections {
                    if connection.contains(RegionId::BORDER_REGION) {
                        continue;
                    }
                    let neighbor = &regions[connection.bits() as usize];
                    if !neighbor.is_live() || neighbor.overlap {
                        continue;
                    }
                    let candidate = (neighbor.span_count, neighbor.id);
                    if best.is_none_or(|best| candidate < best)
                        && region.can_merge_with(neighbor)
                        && neighbor.can_merge_with(region)
                    {
                        best = Some(candidate);
                    }
                }

                // Found new id.
                let Some((_, merge_id)) = best else {
                    continue;
                };
                if merge_id == region.id {
                    continue;
                }
                let old_id = region.id;

                // Merge neighbours.
                if merge_regions(&mut regions, merge_id.bits() as usize, i) {
                    // Fixup regions pointing to current region.
                    for region in regions.iter_mut().filter(|region| region.is_live()) {
                        // If another region was already merged into current region
                        // change the nid of the previous region too.
                        if region.id == old_id {
                            region.id = merge_id;
                        }
                        // Replace the current region with the new one if the
                        // current regions is neighbour.
                        region.replace_neighbor(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        let max_region_id = compress_region_ids(&mut regions, src_reg);
        remap_regions(&regions, src_reg);

        // Return regions that we found to be overlapping.
        let overlaps = regions
            .iter()
            .filter(|region| region.overlap)
            .map(|region| region.id)
            .collect();
        (max_region_id, overlaps)
    }

    /// Merges monotone regions into layers that never stack on top of each other, then removes
    /// layers smaller than `min_region_area`. Returns the highest compacted layer id.
    pub(crate) fn merge_and_filter_layer_regions(
        &self,
        min_region_area: usize,
        next_region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> RegionId {
        // Ids below the next free id, slot 0 stays unused.
        let region_count = next_region_id.bits() as usize;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(RegionId::from(i as u16)))
            .collect();

        // Find region neighbours and overlapping regions.
        let mut layer_regions = Vec::with_capacity(32);
        for z in 0..self.height {
            for x in 0..self.width {
                layer_regions.clear();
                for i in self.cell_at(x, z).index_range() {
                    let ri = src_reg[i];
                    if ri == RegionId::NONE || ri.bits() as usize >= region_count {
                        continue;
                    }
                    let y = self.spans[i].y;
                    let region = &mut regions[ri.bits() as usize];
                    region.span_count += 1;
                    region.area_type = self.areas[i];
                    region.y_min = region.y_min.min(y);
                    region.y_max = region.y_max.max(y);

                    // Collect all region layers.
                    layer_regions.push(ri);

                    // Update neighbours
                    for dir in 0..4 {
                        let Some((_, _, a_i)) = self.neighbor(x as i32, z as i32, i, dir) else {
                            continue;
                        };
                        let rai = src_reg[a_i];
                        if rai != RegionId::NONE
                            && (rai.bits() as usize) < region_count
                            && rai != ri
                        {
                            region.add_unique_connection(rai);
                        }
                        if rai.contains(RegionId::BORDER_REGION) {
                            region.connects_to_border = true;
                        }
                    }
                }

                // Update overlapping regions.
                for (i, &a) in layer_regions.iter().enumerate() {
                    for &b in &layer_regions[i + 1..] {
                        if a != b {
                            regions[a.bits() as usize].add_unique_floor_region(b);
                            regions[b.bits() as usize].add_unique_floor_region(a);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id = RegionId::from(1);
        for region in &mut regions {
            region.id = RegionId::NONE;
        }

        // Merge monotone regions to create non-overlapping areas.
        let mut stack = std::collections::VecDeque::with_capacity(32);
        for i in 1..region_count {
            // Skip already visited.
            if regions[i].id != RegionId::NONE {
                continue;
            }

            // Start search.
            regions[i].id = layer_id;
            stack.clear();
            stack.push_back(i);

            while let Some(current) = stack.pop_front() {
                let area_type = regions[current].area_type;
                for j in 0..regions[current].connections.len() {
                    let neighbor_index = regions[current].connections[j].bits() as usize;
                    let neighbor = &regions[neighbor_index];
                    // Skip already visited.
                    if neighbor.id != RegionId::NONE {
                        continue;
                    }
                    // Skip if different area type, do not connect regions with different area type.
                    if neighbor.area_type != area_type {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regions[i]
                        .floors
                        .contains(&RegionId::from(neighbor_index as u16))
                    {
                        continue;
                    }

                    // Deepen
                    stack.push_back(neighbor_index);

                    // Mark layer id
                    let neighbor = &mut regions[neighbor_index];
                    neighbor.id = layer_id;
                    let floors = std::mem::take(&mut neighbor.floors);
                    let span_count = std::mem::take(&mut neighbor.span_count);
                    let (y_min, y_max) = (neighbor.y_min, neighbor.y_max);
                    let connects_to_border = neighbor.connects_to_border;

                    // Merge current layers to root.
                    let root = &mut regions[i];
                    for floor in floors {
                        root.add_unique_floor_region(floor);
                    }
                    root.y_min = root.y_min.min(y_min);
                    root.y_max = root.y_max.max(y_max);
                    root.span_count += span_count;
                    root.connects_to_border |= connects_to_border;
                }
            }

            match layer_id.next() {
                Some(next) => layer_id = next,
                // Every remaining region would need a fresh layer, leave them unassigned.
                None => break,
            }
        }

        // Remove small regions
        for i in 0..region_count {
            let region = &regions[i];
            if region.span_count > 0
                && region.span_count < min_region_area
                && !region.connects_to_border
            {
                let removed = region.id;
                for region in &mut regions {
                    if region.id == removed {
                        region.id = RegionId::NONE;
                    }
                }
            }
        }

        let max_region_id = compress_region_ids(&mut regions, src_reg);
        remap_regions(&regions, src_reg);
        max_region_id
    }

    /// Writes the final region ids to the spans. Walkable spans that ended up without a region
    /// are marked as not walkable, so every remaining walkable span belongs to exactly one region.
    pub(crate) fn store_regions(&mut self, src_reg: &[RegionId]) -> usize {
        let mut dropped = 0;
        for ((span, area), region) in self.spans.iter_mut().zip(&mut self.areas).zip(src_reg) {
            span.region = *region;
            if *region == RegionId::NONE && area.is_walkable() {
                *area = AreaType::NOT_WALKABLE;
                dropped += 1;
            }
        }
        dropped
    }
}

/// Compacts the ids that still label a span to `1..=n`. Returns `n`.
fn compress_region_ids(regions: &mut [Region], src_reg: &[RegionId]) -> RegionId {
    let mut in_use = vec![false; regions.len() + 1];
    for slot in src_reg.iter().filter(|region| region.is_interior()) {
        let Some(region) = regions.get(slot.bits() as usize) else {
            continue;
        };
        if let Some(flag) = in_use.get_mut(region.id.bits() as usize) {
            *flag |= region.is_live();
        }
    }
    for region in regions.iter_mut() {
        region.remap =
            region.is_live() && in_use.get(region.id.bits() as usize).copied().unwrap_or(false);
    }
    let mut region_id_gen = 0_u16;
    for i in 0..regions.len() {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        region_id_gen += 1;
        let new_id = RegionId::from(region_id_gen);
        for region in &mut regions[i..] {
            if region.id == old_id {
                region.id = new_id;
                region.remap = false;
            }
        }
    }
    RegionId::from(region_id_gen)
}

fn remap_regions(regions: &[Region], src_reg: &mut [RegionId]) {
    for region in src_reg.iter_mut() {
        if !region.contains(RegionId::BORDER_REGION) {
            *region = regions[region.bits() as usize].id;
        }
    }
}
