use glam::{IVec2, UVec4};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        LatticePoint as _, distance_point_segment_2d_sqr, intersect, left, left_on, next, prev,
    },
};

impl CompactHeightfield {
    /// Builds a contour set from the region outlines of the field.
    ///
    /// The raw contours match the region outlines exactly. `max_error` and `max_edge_len`
    /// control how closely the simplified contours follow the raw ones.
    ///
    /// Simplified contours are generated such that the vertices for portals between regions
    /// and areas match up. Setting `max_edge_len` to zero disables edge splitting.
    ///
    /// Holes in a region are merged into its outline, so every contour is a simple polygon.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> Result<ContourSet, ContourError> {
        let border_size = self.border_size;
        let mut cset = ContourSet {
            contours: Vec::with_capacity(self.max_region.bits().max(8) as usize),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // If the heightfield was built with a border, remove the offset.
            let pad = border_size as f32 * self.cell_size;
            cset.aabb.min.x += pad;
            cset.aabb.min.z += pad;
            cset.aabb.max.x -= pad;
            cset.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if !region.is_interior() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .neighbor(x as i32, z as i32, i, dir)
                            .map(|(_, _, a_i)| self.spans[a_i].region)
                            .unwrap_or(RegionId::NONE);
                        if neighbor_region == region {
                            res |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut verts = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if !region.is_interior() {
                        continue;
                    }
                    let area = self.areas[i];

                    verts.clear();
                    simplified.clear();

                    self.walk_contour(x, z, i, &mut flags, &mut verts);
                    simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() < 3 {
                        return Err(ContourError::DegenerateContour {
                            region,
                            vertex_count: simplified.len(),
                        });
                    }

                    // If the heightfield was built with a border, remove the offset.
                    let offset = UVec4::new(border_size as u32, 0, border_size as u32, 0);
                    cset.contours.push(Contour {
                        vertices: simplified.iter().map(|v| *v - offset).collect(),
                        raw_vertices: verts.iter().map(|v| *v - offset).collect(),
                        region,
                        area,
                    });
                }
            }
        }

        cset.merge_holes(self.max_region);

        debug!(
            "traced {} contours with {} vertices",
            cset.contours.len(),
            cset.contours.iter().map(|c| c.vertices.len()).sum::<usize>()
        );
        Ok(cset)
    }

    /// Walks the outline of the region of span `i` clockwise, emitting one raw vertex per
    /// boundary edge corner.
    fn walk_contour(&self, mut x: u16, mut z: u16, mut i: usize, flags: &mut [u8], points: &mut Vec<UVec4>) {
        // Choose the first non-connected edge
        let mut dir = 0;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (p_y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut r = RegionVertexId::NONE;
                let mut is_area_border = false;
                if let Some((_, _, a_i)) = self.neighbor(x as i32, z as i32, i, dir) {
                    r = RegionVertexId::from(self.spans[a_i].region);
                    is_area_border = area != self.areas[a_i];
                }
                if is_border_vertex {
                    r |= RegionVertexId::BORDER_VERTEX;
                }
                if is_area_border {
                    r |= RegionVertexId::AREA_BORDER;
                }
                points.push(UVec4::new(p_x as u32, p_y as u32, p_z as u32, r.bits()));

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_i)) = self.neighbor(x as i32, z as i32, i, dir) else {
                    // Should not happen.
                    warn!("contour walk left the field at ({x}, {z})");
                    return;
                };
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner between direction `dir` and the next one, and whether the
    /// corner is a border vertex that only exists because of tile padding.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((*self.areas[i] as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some((a_x, a_z, a_i)) = self.neighbor(x as i32, z as i32, i, dir) {
            height = height.max(self.spans[a_i].y);
            regs[1] = region_and_area(a_i);
            if let Some((_, _, b_i)) = self.neighbor(a_x, a_z, a_i, dir_p) {
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }
        if let Some((a_x, a_z, a_i)) = self.neighbor(x as i32, z as i32, i, dir_p) {
            height = height.max(self.spans[a_i].y);
            regs[3] = region_and_area(a_i);
            if let Some((_, _, b_i)) = self.neighbor(a_x, a_z, a_i, dir) {
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = (a & b & border) != 0 && a == b;
            let two_ints = ((c | d) & border) == 0;
            let ints_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

/// A simplified vertex: lattice position plus the index of the raw vertex it came from.
type SimplifiedVertex = UVec4;

fn simplify_contour(
    points: &[UVec4],
    simplified: &mut Vec<SimplifiedVertex>,
    max_error: f32,
    max_edge_len: u16,
    flags: BuildContoursFlags,
) {
    let flags_of = |i: usize| RegionVertexId::from_bits_retain(points[i].w);
    let region_of = |i: usize| flags_of(i) & RegionVertexId::REGION_MASK;
    let with_index = |i: usize| UVec4::new(points[i].x, points[i].y, points[i].z, i as u32);

    // Add initial points.
    let has_connections = (0..points.len()).any(|i| !region_of(i).is_empty());
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        let n = points.len();
        for i in 0..n {
            let ii = next(i, n);
            let different_regs = region_of(i) != region_of(ii);
            let area_borders = flags_of(i).contains(RegionVertexId::AREA_BORDER)
                != flags_of(ii).contains(RegionVertexId::AREA_BORDER);
            if different_regs || area_borders {
                simplified.push(with_index(i));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = 0;
        let mut upper_right = 0;
        for (i, point) in points.iter().enumerate() {
            let ll = points[lower_left];
            let ur = points[upper_right];
            if point.x < ll.x || (point.x == ll.x && point.z < ll.z) {
                lower_left = i;
            }
            if point.x > ur.x || (point.x == ur.x && point.z > ur.z) {
                upper_right = i;
            }
        }
        simplified.push(with_index(lower_left));
        simplified.push(with_index(upper_right));
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let pn = points.len();
    let mut i = 0;
    while i < simplified.len() {
        let ii = next(i, simplified.len());

        let a = simplified[i];
        let b = simplified[ii];
        let (ai, bi) = (a.w as usize, b.w as usize);

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (mut ci, c_inc, end_i, a_xz, b_xz) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            ((ai + 1) % pn, 1, bi, a.xz(), b.xz())
        } else {
            ((bi + pn - 1) % pn, pn - 1, ai, b.xz(), a.xz())
        };

        // Find maximum deviation from the segment.
        let mut max_dist = 0.0;
        let mut max_i = None;
        // Tessellate only outer edges or edges between areas.
        if region_of(ci).is_empty() || flags_of(ci).contains(RegionVertexId::AREA_BORDER) {
            while ci != end_i {
                let d = distance_point_segment_2d_sqr(points[ci].xz(), a_xz, b_xz);
                if d > max_dist {
                    max_dist = d;
                    max_i = Some(ci);
                }
                ci = (ci + c_inc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_dist > max_error * max_error => {
                simplified.insert(i + 1, with_index(max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len = max_edge_len as i32;
        let mut i = 0;
        while i < simplified.len() {
            let ii = next(i, simplified.len());
            let a = simplified[i];
            let b = simplified[ii];
            let (ai, bi) = (a.w as usize, b.w as usize);

            let ci = (ai + 1) % pn;
            // Tessellate only outer edges or edges between areas.
            let tessellate = (tessellate_walls && region_of(ci).is_empty())
                || (tessellate_areas && flags_of(ci).contains(RegionVertexId::AREA_BORDER));

            let mut max_i = None;
            if tessellate {
                let delta = b.xz() - a.xz();
                if delta.length_squared() > max_edge_len * max_edge_len {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        max_i = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            // If the max deviation is larger than accepted error,
            // add new point, else continue to next segment.
            match max_i {
                Some(max_i) => simplified.insert(i + 1, with_index(max_i)),
                None => i += 1,
            }
        }
    }

    for vertex in simplified.iter_mut() {
        // The edge vertex flag is taken from the current raw point,
        // and the neighbour region is taken from the next raw point.
        let ai = (vertex.w as usize + 1) % pn;
        let bi = vertex.w as usize;
        let flags = (flags_of(ai) & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
            | (flags_of(bi) & RegionVertexId::BORDER_VERTEX);
        vertex.w = flags.bits();
    }
}

/// Removes adjacent vertices which are equal on the xz-plane,
/// or else the triangulator will get confused.
fn remove_degenerate_segments(simplified: &mut Vec<UVec4>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if ni != i && simplified[i].xz() == simplified[ni].xz() {
            // Degenerate segment, remove.
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area of a contour. Positive for outlines, negative for holes.
fn signed_area_2d(vertices: &[UVec4]) -> i32 {
    let n = vertices.len();
    let area: i32 = (0..n)
        .map(|i| {
            let vi = vertices[i].xz();
            let vj = vertices[prev(i, n)].xz();
            vi.x * vj.y - vj.x * vi.y
        })
        .sum();
    (area + 1) / 2
}

/// Returns true if `point` lies in the cone formed by the vertex `i` of `vertices`
/// and its two neighbors.
fn in_cone(i: usize, vertices: &[UVec4], point: IVec2) -> bool {
    let n = vertices.len();
    let pi = vertices[i].xz();
    let pi1 = vertices[next(i, n)].xz();
    let pin1 = vertices[prev(i, n)].xz();

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, point, pin1) && left(point, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, point, pi1) && left_on(point, pi, pin1))
}

/// Returns true if the segment `d0`-`d1` crosses any edge of `vertices` that is not incident to
/// vertex `skip`.
fn intersect_seg_contour(d0: IVec2, d1: IVec2, skip: Option<usize>, vertices: &[UVec4]) -> bool {
    let n = vertices.len();
    (0..n).any(|k| {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            return false;
        }
        let p0 = vertices[k].xz();
        let p1 = vertices[k1].xz();
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            return false;
        }
        intersect(d0, d1, p0, p1)
    })
}

/// Splices `hole` into `outline` through the diagonal from outline vertex `ia` to hole vertex `ib`.
fn merge_contours(outline: &mut Contour, hole: &mut Contour, ia: usize, ib: usize) {
    let na = outline.vertices.len();
    let nb = hole.vertices.len();
    let mut merged = Vec::with_capacity(na + nb + 2);

    // Copy contour A.
    merged.extend((0..=na).map(|i| outline.vertices[(ia + i) % na]));
    // Copy contour B
    merged.extend((0..=nb).map(|i| hole.vertices[(ib + i) % nb]));

    outline.vertices = merged;
    hole.vertices.clear();
}

impl ContourSet {
    /// Merges every hole contour into the outline of its region.
    fn merge_holes(&mut self, max_region: RegionId) {
        // Calculate winding of all polygons.
        let is_hole: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| signed_area_2d(&contour.vertices) < 0)
            .collect();
        if !is_hole.contains(&true) {
            return;
        }

        // Collect outline contour and holes contours per region.
        let region_count = max_region.bits() as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; region_count];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
        for (i, contour) in self.contours.iter().enumerate() {
            let region = contour.region.bits() as usize;
            if region >= region_count {
                continue;
            }
            // Positively wound contours are outlines, negative holes.
            if is_hole[i] {
                holes[region].push(i);
            } else if outlines[region].replace(i).is_some() {
                warn!("region {region} has multiple outlines");
            }
        }

        // Finally merge each regions holes into the outline.
        for (region, holes) in holes.into_iter().enumerate() {
            if holes.is_empty() {
                continue;
            }
            let Some(outline) = outlines[region] else {
                // The region does not have an outline.
                // This can happen if the contour becomes self-overlapping because of
                // too aggressive simplification settings.
                warn!("missing outline for region {region}, could not merge its holes");
                continue;
            };
            self.merge_region_holes(outline, holes);
        }

        // Merged holes are left empty.
        self.contours.retain(|contour| !contour.vertices.is_empty());
    }

    fn merge_region_holes(&mut self, outline: usize, holes: Vec<usize>) {
        // Sort holes from left to right.
        let leftmost = |contour: &Contour| {
            let (index, vertex) = contour
                .vertices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| (v.x, v.z))
                .map(|(i, v)| (i, *v))
                .unwrap_or_default();
            (vertex.x, vertex.z, index)
        };
        let mut holes: Vec<(u32, u32, usize, usize)> = holes
            .into_iter()
            .map(|hole| {
                let (min_x, min_z, leftmost) = leftmost(&self.contours[hole]);
                (min_x, min_z, leftmost, hole)
            })
            .collect();
        holes.sort_unstable();

        let mut diagonals: Vec<(usize, i32)> = Vec::new();
        // Merge holes into the outline one by one.
        for h in 0..holes.len() {
            let (_, _, leftmost, hole) = holes[h];
            let hole_len = self.contours[hole].vertices.len();

            let mut found = None;
            let mut best_vertex = leftmost;
            for _ in 0..hole_len {
                // Find potential diagonals.
                // The 'best' vertex must be in the cone described by 3 consecutive vertices
                // of the outline.
                let corner = self.contours[hole].vertices[best_vertex].xz();
                let outline_vertices = &self.contours[outline].vertices;
                diagonals.clear();
                diagonals.extend((0..outline_vertices.len()).filter_map(|j| {
                    in_cone(j, outline_vertices, corner).then(|| {
                        let delta = outline_vertices[j].xz() - corner;
                        (j, delta.length_squared())
                    })
                }));
                // Sort potential diagonals by distance, we want to make the connection as short as possible.
                diagonals.sort_by_key(|(_, dist)| *dist);

                // Find a diagonal that is not intersecting the outline nor the remaining holes.
                found = diagonals.iter().map(|(j, _)| *j).find(|&j| {
                    let point = outline_vertices[j].xz();
                    !intersect_seg_contour(point, corner, Some(j), outline_vertices)
                        && holes[h..].iter().all(|(_, _, _, other)| {
                            !intersect_seg_contour(point, corner, None, &self.contours[*other].vertices)
                        })
                });
                // If found non-intersecting diagonal, stop looking.
                if found.is_some() {
                    break;
                }
                // All the potential diagonals for the current vertex were intersecting, try next vertex.
                best_vertex = (best_vertex + 1) % hole_len;
            }

            let Some(index) = found else {
                warn!("failed to find a diagonal to merge a hole into region {}", self.contours[outline].region.bits());
                continue;
            };
            let mut hole_contour = std::mem::take(&mut self.contours[hole]);
            merge_contours(&mut self.contours[outline], &mut hole_contour, index, best_vertex);
            self.contours[hole] = hole_contour;
        }
    }
}

/// Errors that can occur while tracing contours.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContourError {
    /// A region outline collapsed below a triangle during simplification.
    #[error("contour of region {} collapsed to {vertex_count} vertices", region.bits())]
    DegenerateContour {
        /// The region whose outline collapsed.
        region: RegionId,
        /// The number of vertices left after simplification.
        vertex_count: usize,
    },
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// The flags stored in the `w` component of a contour vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbor region, i.e. a wall.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it. So the
        /// fields value can't be used directly.
        const REGION_MASK = RegionId::MAX.bits() as u32;

        /// Border vertex flag.
        /// If a contour vertex's region ID has this bit set, the vertex lies on
        /// a tile border and will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        const AREA_BORDER = 0x20_000;
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl RegionVertexId {
    /// The neighbor region encoded in the flags.
    #[inline]
    pub fn region(&self) -> RegionId {
        RegionId::from((self.bits() & Self::REGION_MASK.bits()) as u16)
    }
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertices: `x, y, z` on the lattice, `w` holds [`RegionVertexId`] bits.
    pub vertices: Vec<UVec4>,
    /// Raw contour vertex and connection data, in the same layout as `vertices`.
    pub raw_vertices: Vec<UVec4>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

impl Contour {
    /// The flags of vertex `i`.
    #[inline]
    pub fn vertex_flags(&self, i: usize) -> RegionVertexId {
        RegionVertexId::from_bits_retain(self.vertices[i].w)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::tests::flat_field;

    fn regions(size: u16) -> CompactHeightfield {
        let mut chf = flat_field(size);
        chf.build_distance_field();
        chf.build_regions(0, 0, 0).unwrap();
        chf
    }

    #[test]
    fn square_region_traces_to_its_corners() {
        let chf = regions(10);
        let cset = chf
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .unwrap();
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        assert_eq!(contour.region, RegionId::from(1));
        assert_eq!(contour.raw_vertices.len(), 40);

        let mut corners: Vec<_> = contour.vertices.iter().map(|v| (v.x, v.z)).collect();
        corners.sort_unstable();
        assert_eq!(corners, vec![(0, 0), (0, 10), (10, 0), (10, 10)]);
        // Clockwise in lattice space means positive area with this convention.
        assert!(signed_area_2d(&contour.vertices) > 0);
    }

    #[test]
    fn long_wall_edges_are_split() {
        let chf = regions(10);
        let cset = chf
            .build_contours(1.3, 4, BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES)
            .unwrap();
        let contour = &cset.contours[0];
        assert!(contour.vertices.len() > 4);
        let n = contour.vertices.len();
        for i in 0..n {
            let delta = contour.vertices[next(i, n)].xz() - contour.vertices[i].xz();
            assert!(delta.length_squared() <= 16, "edge {i} is too long: {delta}");
        }
    }

    #[test]
    fn hole_is_merged_into_the_outline() {
        let mut chf = flat_field(12);
        for z in 5..7 {
            for x in 5..7 {
                let i = chf.cell_at(x, z).index() as usize;
                chf.areas[i] = AreaType::NOT_WALKABLE;
            }
        }
        chf.build_regions_monotone(0, 0, 0).unwrap();
        // Monotone regions flow around the pillar, so force a single region to get a hole.
        for (span, area) in chf.spans.iter_mut().zip(&chf.areas) {
            if area.is_walkable() {
                span.region = RegionId::from(1);
            }
        }
        chf.max_region = RegionId::from(1);

        let cset = chf.build_contours(0.5, 0, BuildContoursFlags::DEFAULT).unwrap();
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        // Outline corners, hole corners and the two duplicated diagonal end points.
        assert_eq!(contour.vertices.len(), 4 + 4 + 2);
        assert!(contour.vertices.iter().any(|v| (v.x, v.z) == (5, 5)));
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut verts = vec![
            UVec4::new(0, 0, 0, 0),
            UVec4::new(0, 3, 0, 1),
            UVec4::new(4, 0, 0, 2),
            UVec4::new(4, 0, 4, 3),
        ];
        remove_degenerate_segments(&mut verts);
        assert_eq!(verts.len(), 3);
    }
}
