//! The error taxonomy of a [`build`](crate::build).
//!
//! Every stage error converts into exactly one [`BuildError`] category.

use thiserror::Error;

use crate::{
    compact_heightfield::CompactHeightfieldError,
    config::ParameterError,
    contours::ContourError,
    detail_mesh::DetailNavmeshError,
    heightfield::HeightfieldBuilderError,
    poly_mesh::PolygonMeshError,
    rasterize::RasterizationError,
    region::RegionError,
    trimesh::GeometryError,
};

/// Why a build failed.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A [`BuildParameters`](crate::BuildParameters) field is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[source] StageError),
    /// The input mesh is empty, degenerate or has no walkable area.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(#[source] StageError),
    /// A region failed to produce a valid polygon.
    #[error("degenerate mesh: {0}")]
    DegenerateMesh(#[source] StageError),
    /// An arena or index space of the pipeline was exhausted.
    #[error("internal allocation failure: {0}")]
    InternalAllocation(#[source] StageError),
}

impl BuildError {
    /// The stage error that caused the failure.
    pub fn stage_error(&self) -> &StageError {
        match self {
            BuildError::InvalidParameter(e)
            | BuildError::InvalidGeometry(e)
            | BuildError::DegenerateMesh(e)
            | BuildError::InternalAllocation(e) => e,
        }
    }
}

/// The error of the stage that failed.
#[derive(Error, Debug)]
pub enum StageError {
    /// See [`ParameterError`].
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    /// See [`GeometryError`].
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// See [`HeightfieldBuilderError`].
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// See [`RasterizationError`].
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),
    /// See [`CompactHeightfieldError`].
    #[error(transparent)]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// See [`RegionError`].
    #[error(transparent)]
    Region(#[from] RegionError),
    /// See [`ContourError`].
    #[error(transparent)]
    Contour(#[from] ContourError),
    /// See [`PolygonMeshError`].
    #[error(transparent)]
    PolygonMesh(#[from] PolygonMeshError),
    /// See [`DetailNavmeshError`].
    #[error(transparent)]
    DetailNavmesh(#[from] DetailNavmeshError),
}

impl From<ParameterError> for BuildError {
    fn from(e: ParameterError) -> Self {
        BuildError::InvalidParameter(e.into())
    }
}

impl From<GeometryError> for BuildError {
    fn from(e: GeometryError) -> Self {
        match e {
            GeometryError::TooManyVertices { .. } => BuildError::InternalAllocation(e.into()),
            GeometryError::EmptyPolygonMesh => BuildError::DegenerateMesh(e.into()),
            _ => BuildError::InvalidGeometry(e.into()),
        }
    }
}

impl From<HeightfieldBuilderError> for BuildError {
    fn from(e: HeightfieldBuilderError) -> Self {
        match e {
            HeightfieldBuilderError::ColumnCountTooLarge { .. } => {
                BuildError::InvalidGeometry(e.into())
            }
            HeightfieldBuilderError::AllocationFailed(_) => BuildError::InternalAllocation(e.into()),
        }
    }
}

impl From<RasterizationError> for BuildError {
    fn from(e: RasterizationError) -> Self {
        BuildError::InternalAllocation(e.into())
    }
}

impl From<CompactHeightfieldError> for BuildError {
    fn from(e: CompactHeightfieldError) -> Self {
        match e {
            CompactHeightfieldError::TooManyLayers { .. } => BuildError::InvalidGeometry(e.into()),
            CompactHeightfieldError::AllocationFailed(_) => {
                BuildError::InternalAllocation(e.into())
            }
        }
    }
}

impl From<RegionError> for BuildError {
    fn from(e: RegionError) -> Self {
        BuildError::InternalAllocation(e.into())
    }
}

impl From<ContourError> for BuildError {
    fn from(e: ContourError) -> Self {
        BuildError::DegenerateMesh(e.into())
    }
}

impl From<PolygonMeshError> for BuildError {
    fn from(e: PolygonMeshError) -> Self {
        match e {
            PolygonMeshError::InvalidVerticesPerPolygon { .. } => {
                BuildError::InvalidParameter(e.into())
            }
            PolygonMeshError::NoTriangles { .. } => BuildError::DegenerateMesh(e.into()),
            PolygonMeshError::TooManyVertices { .. } | PolygonMeshError::TooManyPolygons { .. } => {
                BuildError::InternalAllocation(e.into())
            }
        }
    }
}

impl From<DetailNavmeshError> for BuildError {
    fn from(e: DetailNavmeshError) -> Self {
        match e {
            DetailNavmeshError::NoSeedSpan { .. } => BuildError::DegenerateMesh(e.into()),
            DetailNavmeshError::AllocationFailed(_) => BuildError::InternalAllocation(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegionId;

    #[test]
    fn stage_errors_land_in_their_category() {
        assert!(matches!(
            BuildError::from(GeometryError::NoTriangles),
            BuildError::InvalidGeometry(StageError::Geometry(GeometryError::NoTriangles))
        ));
        assert!(matches!(
            BuildError::from(ParameterError::NotPositive { name: "cell_size" }),
            BuildError::InvalidParameter(_)
        ));
        assert!(matches!(
            BuildError::from(RegionError::TooManyRegions),
            BuildError::InternalAllocation(_)
        ));
        assert!(matches!(
            BuildError::from(PolygonMeshError::NoTriangles {
                region: RegionId::from(1)
            }),
            BuildError::DegenerateMesh(_)
        ));
        assert!(matches!(
            BuildError::from(PolygonMeshError::TooManyVertices {
                vertex_count: 70_000
            }),
            BuildError::InternalAllocation(_)
        ));
    }

    #[test]
    fn message_names_the_category_and_the_cause() {
        let error = BuildError::from(ContourError::DegenerateContour {
            region: RegionId::from(4),
            vertex_count: 2,
        });
        assert_eq!(
            error.to_string(),
            "degenerate mesh: contour of region 4 collapsed to 2 vertices"
        );
    }
}
