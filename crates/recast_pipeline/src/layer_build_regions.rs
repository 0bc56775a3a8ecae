use tracing::debug;

use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

impl CompactHeightfield {
    /// Partitions the walkable surface into non-overlapping layers.
    ///
    /// Monotone regions are grown into layers, where a region never joins a layer that already
    /// contains a region stacked above or below it. Layers smaller than `min_region_area` spans
    /// that do not touch the border are removed.
    ///
    /// Produces fewer, larger regions than monotone partitioning and suits tiled navmeshes
    /// with many overlapping floors.
    pub fn build_layer_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let region_id = self.sweep_monotone(border_size, &mut src_reg)?;

        // Merge monotone regions to layers and remove small regions.
        let max_region =
            self.merge_and_filter_layer_regions(min_region_area as usize, region_id, &mut src_reg);
        self.max_region = max_region;

        let dropped = self.store_regions(&src_reg);
        debug!(
            "layer partitioning produced {} layers, {dropped} walkable spans left without a region",
            max_region.bits()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, AreaType, HeightfieldBuilder, distance_field::tests::flat_field, trimesh::TriMesh,
    };

    use super::*;

    #[test]
    fn open_square_becomes_a_single_layer() {
        let mut chf = flat_field(10);
        chf.build_layer_regions(0, 8).unwrap();
        assert_eq!(chf.region_count(), 1);
        assert_eq!(chf.max_region, RegionId::from(1));
    }

    #[test]
    fn stacked_floors_end_up_in_different_layers() {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::new(0.0, 0.0, 0.0),
                max: Vec3A::new(8.0, 6.0, 8.0),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap();
        let floor = |y: f32, max: f32| TriMesh {
            vertices: vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(max, y, 0.0),
                Vec3A::new(max, y, 8.0),
                Vec3A::new(0.0, y, 8.0),
            ],
            indices: vec![[0, 2, 1].into(), [0, 3, 2].into()],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        };
        let mut trimesh = floor(0.0, 8.0);
        // A balcony over the left half of the ground floor.
        trimesh.extend(floor(4.0, 4.0)).unwrap();
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        let mut chf = heightfield.into_compact(2, 1).unwrap();

        chf.build_layer_regions(0, 0).unwrap();
        let column = chf.cell_at(1, 1);
        assert_eq!(column.count(), 2);
        let lower = chf.spans[column.index() as usize].region;
        let upper = chf.spans[column.index() as usize + 1].region;
        assert!(lower.is_interior());
        assert!(upper.is_interior());
        assert_ne!(lower, upper);
        assert_eq!(chf.max_region.bits() as usize, chf.region_count());
    }
}
