use glam::{IVec3, Vec3A};

use crate::{Aabb3d, AreaType, CompactHeightfield};

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans within the given convex volume.
    ///
    /// The volume is a polygon on the xz-plane, extruded between `min_y` and `max_y`.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        // Compute the bounding box of the polygon
        let Some(mut aabb) = Aabb3d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };
        aabb.min.y = volume.min_y;
        aabb.max.y = volume.max_y;

        // Compute the grid footprint of the polygon
        let scale = Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        let min = ((aabb.min - self.aabb.min) / scale).floor();
        let max = ((aabb.max - self.aabb.min) / scale).floor();
        let mut min = IVec3::new(min.x as i32, min.y as i32, min.z as i32);
        let mut max = IVec3::new(max.x as i32, max.y as i32, max.z as i32);

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.height as i32 - 1);

        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let point = Vec3A::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    0.0,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                if !point_in_poly(&point, &volume.vertices) {
                    continue;
                }
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // Skip if y extents don't overlap.
                    let y = self.spans[i].y as i32;
                    if y < min.y || y > max.y {
                        continue;
                    }
                    self.areas[i] = volume.area;
                }
            }
        }
    }
}

/// Even-odd test on the xz-plane.
fn point_in_poly(point: &Vec3A, vertices: &[Vec3A]) -> bool {
    let mut inside = false;
    let Some(mut j) = vertices.len().checked_sub(1) else {
        return false;
    };
    for i in 0..vertices.len() {
        let (xi, zi) = (vertices[i].x, vertices[i].z);
        let (xj, zj) = (vertices[j].x, vertices[j].z);
        if ((zi > point.z) != (zj > point.z)) && (point.x < (xj - xi) * (point.z - zi) / (zj - zi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A convex polygon on the xz-plane extruded along the y-axis, used to assign
/// a custom [`AreaType`] to the walkable surface inside it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The vertices of the polygon. Only x and z are used.
    pub vertices: Vec<Vec3A>,
    /// The lower bound of the volume in world units.
    pub min_y: f32,
    /// The upper bound of the volume in world units.
    pub max_y: f32,
    /// The area type assigned to the spans inside the volume.
    pub area: AreaType,
}
