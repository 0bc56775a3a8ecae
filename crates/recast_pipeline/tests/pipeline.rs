//! End to end builds through [`recast_pipeline::build`].

mod common;

use std::collections::HashSet;

use approx::assert_relative_eq;
use common::{Scene, flat_quad, load_scene};
use glam::Vec3A;
use recast_pipeline::{
    AreaType, BuildError, BuildJob, BuildParameters, ConvexVolume, GeometryError, Partitioning,
    REPORT_CAPACITY, StageError, build, build_many,
};

fn build_scene(scene: &Scene, params: &BuildParameters) -> recast_pipeline::BuildResult {
    build(params, &scene.vertices, &scene.indices)
}

#[test]
fn builds_are_deterministic() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    let params = BuildParameters::default();
    let (first_mesh, first_detail) = build_scene(&scene, &params).into_result()?;
    let (second_mesh, second_detail) = build_scene(&scene, &params).into_result()?;
    assert_eq!(first_mesh.vertices, second_mesh.vertices, "vertex tables differ");
    assert_eq!(first_mesh.polygons, second_mesh.polygons, "polygon tables differ");
    assert_eq!(first_detail, second_detail, "detail meshes differ");
    Ok(())
}

#[test]
fn polygons_respect_the_vertex_limit() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    for verts_per_poly in [3, 4, 6, 12] {
        let params = BuildParameters {
            verts_per_poly,
            ..Default::default()
        };
        let (mesh, _) = build_scene(&scene, &params).into_result()?;
        assert_eq!(mesh.vertices_per_polygon, verts_per_poly as usize);
        for i in 0..mesh.polygon_count() {
            let polygon = mesh.polygon(i);
            assert!(
                (3..=verts_per_poly as usize).contains(&polygon.len()),
                "{verts_per_poly}: polygon {i} has {} vertices",
                polygon.len()
            );
            assert!(
                polygon.iter().all(|v| (*v as usize) < mesh.vertices.len()),
                "{verts_per_poly}: polygon {i} references a missing vertex"
            );
        }
    }
    Ok(())
}

#[test]
fn triangle_polygons() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    let params = BuildParameters {
        verts_per_poly: 3,
        ..Default::default()
    };
    let (mesh, _) = build_scene(&scene, &params).into_result()?;
    assert!(mesh.polygon_count() > 1);
    for i in 0..mesh.polygon_count() {
        assert_eq!(mesh.polygon(i).len(), 3, "polygon {i} is not a triangle");
    }
    Ok(())
}

#[test]
fn detail_indices_stay_in_bounds() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    for detail_sample_dist in [0.0, 6.0] {
        let params = BuildParameters {
            detail_sample_dist,
            ..Default::default()
        };
        let (mesh, detail) = build_scene(&scene, &params).into_result()?;
        assert_eq!(
            detail.meshes.len(),
            mesh.polygon_count(),
            "{detail_sample_dist}: one sub-mesh per polygon"
        );
        for (i, sub_mesh) in detail.meshes.iter().enumerate() {
            assert!(
                sub_mesh.first_vertex_index + sub_mesh.vertex_count <= detail.vertices.len(),
                "{detail_sample_dist}: sub-mesh {i} vertices out of bounds"
            );
            assert!(
                sub_mesh.first_triangle_index + sub_mesh.triangle_count <= detail.triangles.len(),
                "{detail_sample_dist}: sub-mesh {i} triangles out of bounds"
            );
            let triangles = &detail.triangles[sub_mesh.first_triangle_index..]
                [..sub_mesh.triangle_count];
            for triangle in triangles {
                assert!(
                    triangle
                        .vertices
                        .iter()
                        .all(|v| (*v as usize) < sub_mesh.vertex_count),
                    "{detail_sample_dist}: sub-mesh {i} has a local index past its vertices"
                );
            }
        }
        assert!(
            detail
                .global_triangles()
                .flatten()
                .all(|v| v < detail.vertices.len()),
            "{detail_sample_dist}: global triangle index out of bounds"
        );
    }
    Ok(())
}

#[test]
fn flat_quad_is_a_single_region() -> anyhow::Result<()> {
    let quad = flat_quad(10.0);
    let params = BuildParameters::default();
    let (mesh, detail) = build_scene(&quad, &params).into_result()?;

    let regions: HashSet<_> = mesh.regions.iter().copied().collect();
    assert_eq!(regions.len(), 1, "expected one region, got {regions:?}");

    let cs = params.cell_size;

    // The walkable surface is inset by the agent radius and the ledge at the rim.
    let inset = (params.agent_radius / cs).ceil() * cs + 2.0 * cs;
    for i in 0..mesh.vertices.len() {
        let v = mesh.world_vertex(i);
        assert!(
            (-cs..=10.0 + cs).contains(&v.x) && (-cs..=10.0 + cs).contains(&v.z),
            "vertex {i} at {v} lies outside the quad"
        );
        assert!(v.y.abs() <= 2.0 * params.cell_height, "vertex {i} at {v} is off the floor");
    }
    let (min, max) = (0..mesh.vertices.len())
        .map(|i| mesh.world_vertex(i))
        .fold((Vec3A::MAX, Vec3A::MIN), |(min, max), v| (min.min(v), max.max(v)));
    assert!(min.x <= inset && min.z <= inset, "mesh starts at {min}");
    assert!(max.x >= 10.0 - inset && max.z >= 10.0 - inset, "mesh ends at {max}");
    // A square input yields a square walkable surface.
    assert_relative_eq!(max.x - min.x, max.z - min.z, epsilon = cs);

    for v in &detail.vertices {
        assert!(v.y.abs() <= 2.0 * params.cell_height, "detail vertex {v} is off the floor");
    }
    Ok(())
}

#[test]
fn raised_platform_is_its_own_region() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    let (mesh, _) = build_scene(&scene, &BuildParameters::default()).into_result()?;
    let on_platform: HashSet<_> = (0..mesh.polygon_count())
        .filter(|&i| {
            mesh.polygon(i)
                .iter()
                .all(|&v| mesh.world_vertex(v as usize).y > 0.5)
        })
        .map(|i| mesh.regions[i])
        .collect();
    let on_floor: HashSet<_> = (0..mesh.polygon_count())
        .filter(|&i| {
            mesh.polygon(i)
                .iter()
                .all(|&v| mesh.world_vertex(v as usize).y < 0.5)
        })
        .map(|i| mesh.regions[i])
        .collect();
    assert!(!on_platform.is_empty(), "platform has no polygons");
    assert!(!on_floor.is_empty(), "floor has no polygons");
    assert!(
        on_platform.is_disjoint(&on_floor),
        "platform and floor share a region"
    );
    Ok(())
}

#[test]
fn every_partitioning_builds_the_scene() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    for partitioning in [
        Partitioning::Watershed,
        Partitioning::Monotone,
        Partitioning::Layers,
    ] {
        let params = BuildParameters {
            partitioning,
            ..Default::default()
        };
        let result = build_scene(&scene, &params);
        assert!(result.ok, "{partitioning:?}: {}", result.report);
        assert!(
            result.report.as_str().starts_with("navmesh built: "),
            "{partitioning:?}: {}",
            result.report
        );
    }
    Ok(())
}

#[test]
fn area_volumes_tag_polygons() -> anyhow::Result<()> {
    const PLATFORM: AreaType = AreaType(7);
    let scene = load_scene("platform")?;
    let params = BuildParameters {
        area_volumes: vec![ConvexVolume {
            vertices: vec![
                Vec3A::new(-4.0, 0.0, -4.0),
                Vec3A::new(4.0, 0.0, -4.0),
                Vec3A::new(4.0, 0.0, 4.0),
                Vec3A::new(-4.0, 0.0, 4.0),
            ],
            min_y: 0.5,
            max_y: 2.0,
            area: PLATFORM,
        }],
        ..Default::default()
    };
    let (mesh, _) = build_scene(&scene, &params).into_result()?;
    for i in 0..mesh.polygon_count() {
        let high = mesh
            .polygon(i)
            .iter()
            .all(|&v| mesh.world_vertex(v as usize).y > 0.5);
        assert_eq!(
            mesh.areas[i] == PLATFORM,
            high,
            "polygon {i} has area {:?}",
            mesh.areas[i]
        );
    }
    Ok(())
}

#[test]
fn empty_input_fails_without_meshes() {
    let result = build(&BuildParameters::default(), &[], &[]);
    assert!(!result.ok);
    assert!(result.poly_mesh.is_none());
    assert!(result.poly_mesh_detail.is_none());
    assert!(matches!(result.error, Some(BuildError::InvalidGeometry(_))));
    assert!(result.report.as_str().starts_with("error: "));
}

#[test]
fn out_of_range_indices_are_invalid_geometry() {
    let quad = flat_quad(10.0);
    let result = build(&BuildParameters::default(), &quad.vertices, &[[0, 1, 9]]);
    assert!(matches!(
        result.error,
        Some(BuildError::InvalidGeometry(StageError::Geometry(
            GeometryError::IndexOutOfBounds {
                triangle: 0,
                index: 9,
                vertex_count: 4
            }
        )))
    ));
}

#[test]
fn degenerate_triangles_are_reported() -> anyhow::Result<()> {
    let mut quad = flat_quad(10.0);
    quad.indices.push([0, 0, 1]);
    let result = build_scene(&quad, &BuildParameters::default());
    assert!(result.ok, "{}", result.report);
    assert!(result.report.warning_count() >= 1);
    assert!(
        result
            .report
            .as_str()
            .contains("warning: 1 degenerate triangles ignored"),
        "{}",
        result.report
    );
    Ok(())
}

#[test]
fn reports_stay_bounded() -> anyhow::Result<()> {
    let mut scene = load_scene("platform")?;
    scene.indices.push([0, 0, 1]);
    let params = BuildParameters {
        agent_height: 0.1,
        detail_sample_dist: 0.5,
        ..Default::default()
    };
    let result = build_scene(&scene, &params);
    assert!(result.ok, "{}", result.report);
    assert!(result.report.warning_count() >= 3);
    assert!(result.report.as_str().len() <= REPORT_CAPACITY);
    Ok(())
}

#[test]
fn batch_results_match_single_builds() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    let jobs: Vec<_> = [3, 6]
        .into_iter()
        .map(|verts_per_poly| BuildJob {
            params: BuildParameters {
                verts_per_poly,
                ..Default::default()
            },
            vertices: scene.vertices.clone(),
            indices: scene.indices.clone(),
        })
        .collect();
    let results = build_many(&jobs);
    assert_eq!(results.len(), jobs.len());
    for (job, result) in jobs.iter().zip(results) {
        let single = job.build();
        assert_eq!(result.poly_mesh, single.poly_mesh);
        assert_eq!(result.poly_mesh_detail, single.poly_mesh_detail);
        assert_eq!(result.report, single.report);
    }
    Ok(())
}

#[cfg(feature = "serialize")]
#[test]
fn parameters_round_trip_through_json() -> anyhow::Result<()> {
    let params = BuildParameters {
        partitioning: Partitioning::Monotone,
        verts_per_poly: 4,
        ..Default::default()
    };
    let json = serde_json::to_string(&params)?;
    let parsed: BuildParameters = serde_json::from_str(&json)?;
    assert_eq!(parsed, params);

    // Missing fields fall back to the defaults.
    let partial: BuildParameters = serde_json::from_str(r#"{ "cell_size": 0.25 }"#)?;
    assert_eq!(
        partial,
        BuildParameters {
            cell_size: 0.25,
            ..Default::default()
        }
    );
    Ok(())
}
