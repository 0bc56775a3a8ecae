//! The distance field used by watershed partitioning, plus the chamfer pass it shares with erosion.

use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating distance field along the walkable surface.
    ///
    /// Each span gets the distance to the closest boundary span, where a boundary span is one
    /// that has fewer than four neighbors of its own area type. The field is smoothed with a
    /// box blur afterwards.
    pub fn build_distance_field(&mut self) {
        let mut src = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    let same_area_neighbors = (0..4)
                        .filter_map(|dir| self.neighbor(x as i32, z as i32, i, dir))
                        .filter(|(_, _, a_i)| self.areas[*a_i] == area)
                        .count();
                    if same_area_neighbors != 4 {
                        src[i] = 0;
                    }
                }
            }
        }
        self.chamfer_distance(&mut src);
        self.max_distance = src.iter().copied().max().unwrap_or_default();

        let mut dst = vec![0; self.spans.len()];
        self.box_blur(1, &src, &mut dst);
        self.dist = dst;
    }

    /// Two-pass chamfer distance transform over the span graph.
    /// Orthogonal steps cost 2, diagonal steps cost 3.
    pub(crate) fn chamfer_distance(&self, dist: &mut [u16]) {
        // Pass 1
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let (x, z) = (x as i32, z as i32);
                    if let Some((a_x, a_z, a_i)) = self.neighbor(x, z, i, 0) {
                        // (-1,0)
                        relax(dist, i, a_i, 2);
                        // (-1,-1)
                        if let Some((_, _, aa_i)) = self.neighbor(a_x, a_z, a_i, 3) {
                            relax(dist, i, aa_i, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_i)) = self.neighbor(x, z, i, 3) {
                        // (0,-1)
                        relax(dist, i, a_i, 2);
                        // (1,-1)
                        if let Some((_, _, aa_i)) = self.neighbor(a_x, a_z, a_i, 2) {
                            relax(dist, i, aa_i, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                for i in self.cell_at(x, z).index_range() {
                    let (x, z) = (x as i32, z as i32);
                    if let Some((a_x, a_z, a_i)) = self.neighbor(x, z, i, 2) {
                        // (1,0)
                        relax(dist, i, a_i, 2);
                        // (1,1)
                        if let Some((_, _, aa_i)) = self.neighbor(a_x, a_z, a_i, 1) {
                            relax(dist, i, aa_i, 3);
                        }
                    }
                    if let Some((a_x, a_z, a_i)) = self.neighbor(x, z, i, 1) {
                        // (0,1)
                        relax(dist, i, a_i, 2);
                        // (-1,1)
                        if let Some((_, _, aa_i)) = self.neighbor(a_x, a_z, a_i, 0) {
                            relax(dist, i, aa_i, 3);
                        }
                    }
                }
            }
        }
    }

    fn box_blur(&self, threshold: u16, src: &[u16], dst: &mut [u16]) {
        let threshold = threshold * 2;
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let cd = src[i];
                    if cd <= threshold {
                        dst[i] = cd;
                        continue;
                    }

                    let mut d = cd as u32;
                    for dir in 0..4 {
                        let Some((a_x, a_z, a_i)) = self.neighbor(x as i32, z as i32, i, dir)
                        else {
                            d += cd as u32 * 2;
                            continue;
                        };
                        d += src[a_i] as u32;
                        let dir2 = (dir + 1) & 0x3;
                        match self.neighbor(a_x, a_z, a_i, dir2) {
                            Some((_, _, a2_i)) => d += src[a2_i] as u32,
                            None => d += cd as u32,
                        }
                    }
                    dst[i] = ((d + 5) / 9) as u16;
                }
            }
        }
    }
}

#[inline]
fn relax(dist: &mut [u16], i: usize, from: usize, cost: u16) {
    let candidate = dist[from].saturating_add(cost);
    if candidate < dist[i] {
        dist[i] = candidate;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, CompactHeightfield, HeightfieldBuilder,
        span::AreaType,
        trimesh::TriMesh,
    };

    /// A flat `size` x `size` floor, compacted with a walkable height of 2 and climb of 1.
    pub(crate) fn flat_field(size: u16) -> CompactHeightfield {
        let extent = size as f32;
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(extent, 4.0, extent),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(extent, 1.0, 0.0),
                Vec3A::new(extent, 1.0, extent),
                Vec3A::new(0.0, 1.0, extent),
            ],
            indices: vec![[0, 2, 1].into(), [0, 3, 2].into()],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        heightfield.into_compact(2, 1).unwrap()
    }

    fn dist_at(chf: &CompactHeightfield, x: u16, z: u16) -> u16 {
        chf.dist[chf.cell_at(x, z).index() as usize]
    }

    #[test]
    fn distance_grows_towards_the_center() {
        let mut chf = flat_field(9);
        chf.build_distance_field();
        assert_eq!(dist_at(&chf, 0, 0), 0);
        assert_eq!(dist_at(&chf, 0, 4), 0);
        assert!(dist_at(&chf, 2, 2) > dist_at(&chf, 1, 1));
        assert!(dist_at(&chf, 4, 4) >= dist_at(&chf, 2, 2));
        assert_eq!(chf.max_distance, 8);
        assert_eq!(chf.dist.len(), chf.spans.len());
    }

    #[test]
    fn chamfer_uses_orthogonal_and_diagonal_costs() {
        let chf = flat_field(5);
        let mut dist = vec![u16::MAX; chf.spans.len()];
        dist[chf.cell_at(0, 0).index() as usize] = 0;
        chf.chamfer_distance(&mut dist);
        let at = |x: u16, z: u16| dist[chf.cell_at(x, z).index() as usize];
        assert_eq!(at(1, 0), 2);
        assert_eq!(at(1, 1), 3);
        assert_eq!(at(2, 1), 5);
        assert_eq!(at(4, 4), 12);
    }
}
