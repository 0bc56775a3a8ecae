//! The triangle soup fed into the voxelizer.

use glam::{UVec3, Vec3A};
use thiserror::Error;

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh from flat host buffers. Every triangle starts out as
    /// [`AreaType::NOT_WALKABLE`]; see [`TriMesh::mark_walkable_triangles`].
    ///
    /// # Errors
    ///
    /// Returns an error if a vertex is not finite or an index points past the vertex buffer.
    pub fn from_buffers(vertices: &[[f32; 3]], indices: &[[u32; 3]]) -> Result<Self, GeometryError> {
        if let Some(vertex) = vertices
            .iter()
            .position(|v| !v.iter().all(|c| c.is_finite()))
        {
            return Err(GeometryError::NonFiniteVertex { vertex });
        }
        if let Some((triangle, index)) = indices.iter().enumerate().find_map(|(i, tri)| {
            tri.iter()
                .find(|index| **index as usize >= vertices.len())
                .map(|index| (i, *index))
        }) {
            return Err(GeometryError::IndexOutOfBounds {
                triangle,
                index,
                vertex_count: vertices.len(),
            });
        }
        Ok(Self {
            vertices: vertices.iter().copied().map(Vec3A::from).collect(),
            indices: indices.iter().copied().map(UVec3::from).collect(),
            area_types: vec![AreaType::NOT_WALKABLE; indices.len()],
        })
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if the combined vertex count no longer fits into `u32` indices.
    pub fn extend(&mut self, other: TriMesh) -> Result<(), GeometryError> {
        let vertex_count = self.vertices.len() + other.vertices.len();
        if vertex_count > u32::MAX as usize {
            return Err(GeometryError::TooManyVertices { vertex_count });
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| *i + next_vertex_index));
        self.area_types.extend(other.area_types);
        Ok(())
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// The triangles are marked as walkable if the angle between their normal and the up axis
    /// is smaller than the threshold angle. Triangles that already carry a walkable area keep it.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y > threshold_cos && !self.area_types[i].is_walkable() {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Number of triangles whose vertices span a non-zero area.
    pub fn non_degenerate_triangle_count(&self) -> usize {
        self.indices
            .iter()
            .filter(|indices| indices.normal(&self.vertices) != Vec3A::ZERO)
            .count()
    }
}

/// Errors caused by malformed input geometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// The input contains no triangles.
    #[error("input mesh has no triangles")]
    NoTriangles,
    /// Every input triangle has zero area.
    #[error("all {triangle_count} input triangles are degenerate")]
    AllTrianglesDegenerate {
        /// Number of input triangles.
        triangle_count: usize,
    },
    /// A vertex has a NaN or infinite coordinate.
    #[error("vertex {vertex} is not finite")]
    NonFiniteVertex {
        /// Index of the offending vertex.
        vertex: usize,
    },
    /// A triangle references a vertex that does not exist.
    #[error("triangle {triangle} references vertex {index}, but there are only {vertex_count}")]
    IndexOutOfBounds {
        /// Index of the offending triangle.
        triangle: usize,
        /// The out of range vertex index.
        index: u32,
        /// Number of vertices in the buffer.
        vertex_count: usize,
    },
    /// The vertex count does not fit into `u32` indices.
    #[error("{vertex_count} vertices cannot be indexed with u32")]
    TooManyVertices {
        /// The combined vertex count.
        vertex_count: usize,
    },
    /// Nothing walkable survived filtering and erosion.
    #[error("no walkable area left after {stage}")]
    NoWalkableArea {
        /// The stage after which the walkable area vanished.
        stage: &'static str,
    },
    /// The final polygon mesh has no polygons.
    #[error("polygon mesh is empty")]
    EmptyPolygonMesh,
}
