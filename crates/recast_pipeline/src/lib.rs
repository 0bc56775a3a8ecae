#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod detail_mesh;
mod distance_field;
mod erosion;
mod error;
mod heightfield;
mod layer_build_regions;
mod mark_convex_poly_area;
pub(crate) mod math;
mod monotone_build_regions;
mod pipeline;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod report;
mod span;
mod trimesh;
mod watershed_build_regions;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{BuildParameters, NavmeshConfig, ParameterError, Partitioning};
pub use contours::{BuildContoursFlags, Contour, ContourError, ContourSet, RegionVertexId};
pub use detail_mesh::{DetailNavmesh, DetailNavmeshError, DetailTriangle, SubMesh};
pub use error::{BuildError, StageError};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use mark_convex_poly_area::ConvexVolume;
pub use math::Aabb3d;
pub use pipeline::{BuildJob, BuildResult, build, build_many, release};
pub use poly_mesh::{MAX_VERTICES_PER_POLYGON, PolygonMesh, PolygonMeshError, RC_MESH_NULL_IDX};
pub use rasterize::RasterizationError;
pub use region::{RegionError, RegionId};
pub use report::{BuildReport, REPORT_CAPACITY};
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::{GeometryError, TriMesh};
