//! Runs the whole navmesh generation pipeline on a triangle soup.

use tracing::{debug, warn};

use crate::{
    BuildParameters, DetailNavmesh, HeightfieldBuilder, Partitioning, PolygonMesh, TriMesh,
    error::BuildError, report::BuildReport, trimesh::GeometryError,
};

/// The outcome of a [`build`].
///
/// `poly_mesh` and `poly_mesh_detail` are only present when `ok` is `true`. The report is
/// always filled in: with the warnings and a summary on success, with the failure otherwise.
#[derive(Debug)]
pub struct BuildResult {
    /// Whether the build succeeded.
    pub ok: bool,
    /// The polygon mesh.
    pub poly_mesh: Option<PolygonMesh>,
    /// The detail mesh matching [`BuildResult::poly_mesh`].
    pub poly_mesh_detail: Option<DetailNavmesh>,
    /// Diagnostics of the build.
    pub report: BuildReport,
    /// Why the build failed, if it did.
    pub error: Option<BuildError>,
}

impl BuildResult {
    fn success(poly_mesh: PolygonMesh, poly_mesh_detail: DetailNavmesh, report: BuildReport) -> Self {
        Self {
            ok: true,
            poly_mesh: Some(poly_mesh),
            poly_mesh_detail: Some(poly_mesh_detail),
            report,
            error: None,
        }
    }

    fn failure(error: BuildError, report: BuildReport) -> Self {
        Self {
            ok: false,
            poly_mesh: None,
            poly_mesh_detail: None,
            report,
            error: Some(error),
        }
    }

    /// Converts the result into the meshes or the error that prevented them.
    pub fn into_result(self) -> Result<(PolygonMesh, DetailNavmesh), BuildError> {
        match (self.poly_mesh, self.poly_mesh_detail, self.error) {
            (Some(poly_mesh), Some(detail), _) => Ok((poly_mesh, detail)),
            (_, _, Some(error)) => Err(error),
            _ => Err(GeometryError::EmptyPolygonMesh.into()),
        }
    }

    /// Releases the meshes held by this result. See [`release`].
    pub fn release(self) {
        release(self.poly_mesh, self.poly_mesh_detail);
    }
}

/// Releases meshes handed out by [`build`]. Passing `None` for either is a no-op.
///
/// Dropping the meshes has the same effect, this exists for hosts that free their outputs
/// explicitly.
pub fn release(poly_mesh: Option<PolygonMesh>, poly_mesh_detail: Option<DetailNavmesh>) {
    drop(poly_mesh_detail);
    drop(poly_mesh);
}

/// Builds a navmesh from a triangle soup.
///
/// `vertices` are world-space positions with y pointing up, `indices` are triangles into
/// `vertices`. The build never panics on bad input: any failure is returned in
/// [`BuildResult::error`] and described in the report.
pub fn build(params: &BuildParameters, vertices: &[[f32; 3]], indices: &[[u32; 3]]) -> BuildResult {
    let mut report = BuildReport::new();
    match run(params, vertices, indices, &mut report) {
        Ok((poly_mesh, detail)) => {
            report.summary(format_args!(
                "navmesh built: {} polys, {} verts",
                poly_mesh.polygon_count(),
                poly_mesh.vertices.len()
            ));
            BuildResult::success(poly_mesh, detail, report)
        }
        Err(error) => {
            warn!("navmesh build failed: {error}");
            report.error(&error);
            BuildResult::failure(error, report)
        }
    }
}

fn run(
    params: &BuildParameters,
    vertices: &[[f32; 3]],
    indices: &[[u32; 3]],
    report: &mut BuildReport,
) -> Result<(PolygonMesh, DetailNavmesh), BuildError> {
    let mut trimesh = TriMesh::from_buffers(vertices, indices)?;
    let triangle_count = trimesh.indices.len();
    if triangle_count == 0 {
        return Err(GeometryError::NoTriangles.into());
    }
    let solid_triangles = trimesh.non_degenerate_triangle_count();
    if solid_triangles == 0 {
        return Err(GeometryError::AllTrianglesDegenerate { triangle_count }.into());
    }
    if solid_triangles < triangle_count {
        report.warn(format_args!(
            "{} degenerate triangles ignored",
            triangle_count - solid_triangles
        ));
    }
    let aabb = trimesh.compute_aabb().ok_or(GeometryError::NoTriangles)?;
    let config = params.to_config(aabb, report)?;

    // Voxelize
    trimesh.mark_walkable_triangles(config.walkable_slope_angle);
    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;
    heightfield.rasterize_triangles(&trimesh, config.walkable_climb)?;
    drop(trimesh);
    heightfield.filter_all(config.walkable_height, config.walkable_climb);
    debug!(
        "rasterized {triangle_count} triangles into {}x{} columns, {} spans",
        heightfield.width,
        heightfield.height,
        heightfield.span_count()
    );
    if heightfield.walkable_span_count() == 0 {
        return Err(GeometryError::NoWalkableArea {
            stage: "span filtering",
        }
        .into());
    }

    let mut chf = heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
    chf.erode_walkable_area(config.walkable_radius);
    if chf.walkable_span_count() == 0 {
        return Err(GeometryError::NoWalkableArea { stage: "erosion" }.into());
    }
    for volume in &config.area_volumes {
        chf.mark_convex_poly_area(volume);
    }

    // Partition
    let walkable_spans = chf.walkable_span_count();
    match config.partitioning {
        Partitioning::Watershed => {
            chf.build_distance_field();
            chf.build_regions(
                config.border_size,
                config.min_region_area,
                config.merge_region_area,
            )?;
        }
        Partitioning::Monotone => chf.build_regions_monotone(
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        )?,
        Partitioning::Layers => {
            chf.build_layer_regions(config.border_size, config.min_region_area)?;
        }
    }
    let dropped = walkable_spans - chf.walkable_span_count();
    if dropped > 0 {
        report.warn(format_args!("{dropped} spans removed with small regions"));
    }

    // Outline and mesh
    let contours = chf.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    )?;
    let (poly_mesh, bad_triangulations) =
        contours.build_polygon_mesh(config.max_vertices_per_polygon as usize)?;
    drop(contours);
    if bad_triangulations > 0 {
        report.warn(format_args!(
            "{bad_triangulations} contours only partially triangulated"
        ));
    }
    if poly_mesh.polygon_count() == 0 {
        return Err(GeometryError::EmptyPolygonMesh.into());
    }

    let (detail, detail_failures) = DetailNavmesh::build(
        &poly_mesh,
        &chf,
        config.detail_sample_dist,
        config.detail_sample_max_error,
    )?;
    if detail_failures > 0 {
        report.warn(format_args!(
            "{detail_failures} polygons with an incomplete detail mesh"
        ));
    }
    Ok((poly_mesh, detail))
}

/// One independent input of [`build_many`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildJob {
    /// The parameters of the build.
    pub params: BuildParameters,
    /// World-space vertex positions.
    pub vertices: Vec<[f32; 3]>,
    /// Triangles into [`BuildJob::vertices`].
    pub indices: Vec<[u32; 3]>,
}

impl BuildJob {
    /// Runs [`build`] on this job.
    pub fn build(&self) -> BuildResult {
        build(&self.params, &self.vertices, &self.indices)
    }
}

/// Runs [`build`] on every job and returns the results in the order of `jobs`.
///
/// With the `parallel` feature the jobs are spread over the rayon thread pool.
pub fn build_many(jobs: &[BuildJob]) -> Vec<BuildResult> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        jobs.par_iter().map(BuildJob::build).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        jobs.iter().map(BuildJob::build).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;

    fn quad(extent: f32) -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
        (
            vec![
                [0.0, 0.0, 0.0],
                [extent, 0.0, 0.0],
                [extent, 0.0, extent],
                [0.0, 0.0, extent],
            ],
            vec![[0, 2, 1], [0, 3, 2]],
        )
    }

    #[test]
    fn flat_quad_builds() {
        let (vertices, indices) = quad(10.0);
        let result = build(&BuildParameters::default(), &vertices, &indices);
        assert!(result.ok, "{}", result.report);
        assert!(result.error.is_none());
        assert!(result.report.as_str().starts_with("navmesh built: "));
        let (mesh, detail) = result.into_result().unwrap();
        assert!(mesh.polygon_count() > 0);
        assert_eq!(detail.meshes.len(), mesh.polygon_count());
    }

    #[test]
    fn empty_input_is_invalid_geometry() {
        let result = build(&BuildParameters::default(), &[], &[]);
        assert!(!result.ok);
        assert!(result.poly_mesh.is_none());
        assert!(result.poly_mesh_detail.is_none());
        assert!(matches!(
            result.error,
            Some(BuildError::InvalidGeometry(StageError::Geometry(
                GeometryError::NoTriangles
            )))
        ));
        assert_eq!(
            result.report.as_str(),
            "error: invalid geometry: input mesh has no triangles"
        );
    }

    #[test]
    fn degenerate_triangles_are_invalid_geometry() {
        let vertices = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let result = build(&BuildParameters::default(), &vertices, &[[0, 1, 2]]);
        assert!(matches!(
            result.error,
            Some(BuildError::InvalidGeometry(StageError::Geometry(
                GeometryError::AllTrianglesDegenerate { triangle_count: 1 }
            )))
        ));
    }

    #[test]
    fn bad_parameters_are_rejected_before_voxelization() {
        let (vertices, indices) = quad(10.0);
        let params = BuildParameters {
            verts_per_poly: 2,
            ..Default::default()
        };
        let result = build(&params, &vertices, &indices);
        assert!(matches!(result.error, Some(BuildError::InvalidParameter(_))));
    }

    #[test]
    fn walls_have_no_walkable_area() {
        let vertices = [[0.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 5.0, 5.0]];
        let result = build(&BuildParameters::default(), &vertices, &[[0, 1, 2]]);
        assert!(matches!(
            result.error,
            Some(BuildError::InvalidGeometry(StageError::Geometry(
                GeometryError::NoWalkableArea { .. }
            )))
        ));
    }

    #[test]
    fn release_accepts_partial_outputs() {
        let (vertices, indices) = quad(10.0);
        let result = build(&BuildParameters::default(), &vertices, &indices);
        release(result.poly_mesh, None);
        build(&BuildParameters::default(), &[], &[]).release();
    }

    #[test]
    fn batches_keep_their_order() {
        let (vertices, indices) = quad(10.0);
        let jobs = vec![
            BuildJob {
                params: BuildParameters::default(),
                vertices: vertices.clone(),
                indices: indices.clone(),
            },
            BuildJob::default(),
            BuildJob {
                params: BuildParameters::default(),
                vertices,
                indices,
            },
        ];
        let results = build_many(&jobs);
        assert_eq!(
            results.iter().map(|r| r.ok).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert_eq!(results[0].poly_mesh, results[2].poly_mesh);
    }
}
