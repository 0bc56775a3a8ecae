use std::collections::TryReserveError;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the open space above a [`Heightfield`].
///
/// Each walkable solid span of the heightfield becomes a [`CompactSpan`] whose floor is the top
/// of the solid span and whose height is the clearance up to the next solid span.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
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
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Builds a [`CompactHeightfield`] out of the walkable spans of this heightfield.
    /// See [`CompactHeightfield::from_heightfield`].
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(&self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    const MAX_HEIGHT: u16 = u16::MAX;
    /// The highest layer index a neighbor connection can express.
    const MAX_LAYERS: usize = CompactSpan::NOT_CONNECTED as usize - 1;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// Neighboring spans are connected when the open space they share is at least
    /// `walkable_height` tall and their floors are at most `walkable_climb` apart.
    ///
    /// # Errors
    ///
    /// Returns an error if the heightfield has too many layers or the spans cannot be allocated.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let walkable_span_count = heightfield.walkable_span_count();
        let column_count = heightfield.width as usize * heightfield.height as usize;

        let mut cells = Vec::new();
        cells.try_reserve_exact(column_count)?;
        cells.resize(column_count, CompactCell::default());
        let mut spans = Vec::new();
        spans.try_reserve_exact(walkable_span_count)?;
        let mut areas = Vec::new();
        areas.try_reserve_exact(walkable_span_count)?;

        let mut aabb = heightfield.aabb;
        aabb.max.y += walkable_height as f32 * heightfield.cell_height;

        // Fill in cells and spans
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let cell = &mut cells[column_index];
                cell.set_index(spans.len() as u32);

                for span_key in heightfield.column_span_keys(x, z) {
                    let span = heightfield.span(span_key);
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|next| heightfield.span(next).min())
                        .unwrap_or(Self::MAX_HEIGHT);
                    let compact_span =
                        CompactSpan::new(bot, top.saturating_sub(bot).min(u8::MAX as u16) as u8);
                    spans.push(compact_span);
                    areas.push(span.area());
                    cell.inc_count();
                }
            }
        }

        let mut compact_heightfield = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells,
            spans,
            dist: Vec::new(),
            areas,
        };
        compact_heightfield.connect_neighbors()?;
        Ok(compact_heightfield)
    }

    fn connect_neighbors(&mut self) -> Result<(), CompactHeightfieldError> {
        let mut max_layer_index = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        self.spans[i].set_con(dir, None);
                        let neighbor_x = x as i32 + dir_offset_x(dir);
                        let neighbor_z = z as i32 + dir_offset_z(dir);
                        // First check that the neighbour cell is in bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of them is
                        // accessible from current cell.
                        let neighbor_cell = *self.cell_at(neighbor_x as u16, neighbor_z as u16);
                        let span = &self.spans[i];
                        let span_top = span.y as i32 + span.height() as i32;
                        let mut connection = None;
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &self.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i32;
                            let top =
                                span_top.min(neighbor_span.y as i32 + neighbor_span.height() as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = top - bot >= self.walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= self.walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k - neighbor_cell.index() as usize;
                            if layer_index > Self::MAX_LAYERS {
                                max_layer_index = max_layer_index.max(layer_index);
                                continue;
                            }
                            connection = Some(layer_index as u8);
                            break;
                        }
                        self.spans[i].set_con(dir, connection);
                    }
                }
            }
        }
        if max_layer_index > Self::MAX_LAYERS {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: Self::MAX_LAYERS,
                layer_index: max_layer_index,
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Follows the connection `con` of the span at `(x, z)` in direction `dir`.
    /// Returns the coordinates and the span index of the neighbor.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let a_x = x + dir_offset_x(dir);
        let a_z = z + dir_offset_z(dir);
        let a_i = self.cell_at(a_x as u16, a_z as u16).index() as usize + con as usize;
        (a_x, a_z, a_i)
    }

    /// Returns the connected neighbor of span `i` at `(x, z)` in direction `dir`, if any.
    #[inline]
    pub(crate) fn neighbor(&self, x: i32, z: i32, i: usize, dir: u8) -> Option<(i32, i32, usize)> {
        let con = self.spans[i].con(dir)?;
        Some(self.con_indices(x, z, dir, con))
    }

    /// Number of spans with a walkable area type.
    pub fn walkable_span_count(&self) -> usize {
        self.areas.iter().filter(|area| area.is_walkable()).count()
    }

    /// Number of distinct non-border regions assigned to walkable spans.
    pub fn region_count(&self) -> usize {
        let mut regions: Vec<_> = self
            .spans
            .iter()
            .map(|span| span.region)
            .filter(RegionId::is_interior)
            .collect();
        regions.sort_unstable();
        regions.dedup();
        regions.len()
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: usize,
        /// The layer index that caused the error.
        layer_index: usize,
    },
    /// The span arrays could not be allocated.
    #[error("Failed to allocate compact heightfield: {0}")]
    AllocationFailed(#[from] TryReserveError),
}
