//! Contains methods for rasterizing triangles of a [`TriMesh`] into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes the triangles of a [`TriMesh`] into the heightfield.
    ///
    /// Spans are inserted with the area type of their triangle. Triangles outside the bounds of
    /// the heightfield are skipped.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The [`TriMesh`] to rasterize.
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the non-walkable flag. [Limit: >= 0] [Units: vx]
    ///
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }
        let mut buffers = ClipBuffers::default();
        for (i, triangle) in trimesh.indices.iter().enumerate() {
            let triangle = [
                trimesh.vertices[triangle[0] as usize],
                trimesh.vertices[triangle[1] as usize],
                trimesh.vertices[triangle[2] as usize],
            ];
            let area_type = trimesh
                .area_types
                .get(i)
                .copied()
                .unwrap_or(AreaType::NOT_WALKABLE);
            self.rasterize_triangle(triangle, area_type, flag_merge_threshold, &mut buffers)?;
        }
        Ok(())
    }

    fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
        buffers: &mut ClipBuffers,
    ) -> Result<(), RasterizationError> {
        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        let triangle_aabb = triangle.aabb();
        if !triangle_aabb.intersects(&self.aabb) {
            return Ok(());
        }

        let width = self.width as i32;
        let height = self.height as i32;
        let bounds_height = self.aabb.max.y - self.aabb.min.y;
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        // Use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        let ClipBuffers {
            remaining,
            row,
            cell,
            rest,
        } = buffers;
        remaining.clear();
        remaining.extend_from_slice(&triangle);

        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            divide_poly(remaining, row, rest, cell_z + self.cell_size, Axis::Z);
            std::mem::swap(remaining, rest);

            if row.len() < 3 || z < 0 {
                continue;
            }

            // Find the horizontal bounds in the row
            let (min_x, max_x) = row
                .iter()
                .fold((row[0].x, row[0].x), |(min, max), v| (min.min(v.x), max.max(v.x)));
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            for x in x0..=x1 {
                // Clip polygon to column. Store the remaining polygon as well
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                divide_poly(row, cell, rest, cell_x + self.cell_size, Axis::X);
                std::mem::swap(row, rest);

                if cell.len() < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .iter()
                    .fold((cell[0].y, cell[0].y), |(min, max), v| (min.min(v.y), max.max(v.y)));
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > bounds_height {
                    continue;
                }

                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(bounds_height);

                // Snap the span to the heightfield height grid.
                let max_height = Span::MAX_HEIGHT as i32;
                let span_min_cell =
                    ((span_min * inverse_cell_height).floor() as i32).clamp(0, max_height);
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell + 1, max_height);

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell as u16,
                        max: span_max_cell as u16,
                        area: area_type,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

/// Scratch polygons reused while clipping triangles against the grid.
#[derive(Default)]
struct ClipBuffers {
    remaining: Vec<Vec3A>,
    row: Vec<Vec3A>,
    cell: Vec<Vec3A>,
    rest: Vec<Vec3A>,
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3A) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Divides a convex polygon into two along an axis-aligned separating line.
/// `below` receives the part at or below `axis_offset`, `above` the rest.
fn divide_poly(
    input: &[Vec3A],
    below: &mut Vec<Vec3A>,
    above: &mut Vec<Vec3A>,
    axis_offset: f32,
    axis: Axis,
) {
    below.clear();
    above.clear();
    let Some(&last) = input.last() else {
        return;
    };
    let delta = |v: Vec3A| axis_offset - axis.of(v);

    let mut b = last;
    for &a in input {
        let delta_a = delta(a);
        let delta_b = delta(b);
        let same_side = (delta_a >= 0.0) == (delta_b >= 0.0);
        if !same_side {
            // The edge crosses the separating line, both halves get the intersection point.
            let s = delta_b / (delta_b - delta_a);
            let intersection = b + (a - b) * s;
            below.push(intersection);
            above.push(intersection);
            // Points on the dividing line were already added above.
            if delta_a > 0.0 {
                below.push(a);
            } else if delta_a < 0.0 {
                above.push(a);
            }
        } else if delta_a >= 0.0 {
            below.push(a);
            if delta_a == 0.0 {
                above.push(a);
            }
        } else {
            above.push(a);
        }
        b = a;
    }
}

/// Errors that can occur while rasterizing triangles.
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted into the heightfield.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use super::*;
    use crate::{Aabb3d, HeightfieldBuilder};

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::new(0.0, 0.0, 0.0),
                max: Vec3A::new(4.0, 2.0, 4.0),
            },
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn floor(y: f32) -> TriMesh {
        TriMesh {
            vertices: vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(4.0, y, 0.0),
                Vec3A::new(4.0, y, 4.0),
                Vec3A::new(0.0, y, 4.0),
            ],
            indices: vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        }
    }

    #[test]
    fn flat_floor_fills_every_column_once() {
        let mut heightfield = heightfield();
        heightfield.rasterize_triangles(&floor(1.0), 1).unwrap();
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let keys: Vec<_> = heightfield.column_span_keys(x, z).collect();
                assert_eq!(keys.len(), 1, "column {x},{z}");
                let span = heightfield.span(keys[0]);
                assert_eq!(span.min(), 2, "column {x},{z}");
                assert_eq!(span.max(), 3, "column {x},{z}");
                assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
            }
        }
    }

    #[test]
    fn triangle_outside_bounds_is_skipped() {
        let mut heightfield = heightfield();
        let mut trimesh = floor(1.0);
        for v in &mut trimesh.vertices {
            v.x += 10.0;
        }
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn stacked_floors_create_separate_spans() {
        let mut heightfield = heightfield();
        let mut trimesh = floor(0.0);
        trimesh.extend(floor(1.9)).unwrap();
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        let keys: Vec<_> = heightfield.column_span_keys(1, 1).collect();
        assert_eq!(keys.len(), 2);
        assert!(heightfield.span(keys[0]).max() < heightfield.span(keys[1]).min());
    }

    #[test]
    fn divide_poly_splits_square() {
        let square = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(0.0, 0.0, 2.0),
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_poly(&square, &mut below, &mut above, 1.0, Axis::X);
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|v| v.x <= 1.0));
        assert!(above.iter().all(|v| v.x >= 1.0));
    }
}
