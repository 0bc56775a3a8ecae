//! Region partitioning, driven stage by stage.

mod common;

use common::{Scene, load_scene};
use recast_pipeline::{
    BuildParameters, BuildReport, CompactHeightfield, HeightfieldBuilder, NavmeshConfig,
    Partitioning, RegionId, TriMesh,
};

const PARTITIONINGS: [Partitioning; 3] = [
    Partitioning::Watershed,
    Partitioning::Monotone,
    Partitioning::Layers,
];

/// Runs the pipeline up to and including erosion.
fn eroded_field(scene: &Scene, params: &BuildParameters) -> anyhow::Result<(CompactHeightfield, NavmeshConfig)> {
    let mut trimesh = TriMesh::from_buffers(&scene.vertices, &scene.indices)?;
    let aabb = trimesh
        .compute_aabb()
        .ok_or_else(|| anyhow::anyhow!("scene is empty"))?;
    let config = params.to_config(aabb, &mut BuildReport::new())?;
    trimesh.mark_walkable_triangles(config.walkable_slope_angle);

    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;
    heightfield.rasterize_triangles(&trimesh, config.walkable_climb)?;
    heightfield.filter_all(config.walkable_height, config.walkable_climb);

    let mut compact = heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
    compact.erode_walkable_area(config.walkable_radius);
    Ok((compact, config))
}

fn partition(
    compact: &mut CompactHeightfield,
    config: &NavmeshConfig,
    partitioning: Partitioning,
) -> anyhow::Result<()> {
    match partitioning {
        Partitioning::Watershed => {
            compact.build_distance_field();
            compact.build_regions(
                config.border_size,
                config.min_region_area,
                config.merge_region_area,
            )?;
        }
        Partitioning::Monotone => compact.build_regions_monotone(
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
        )?,
        Partitioning::Layers => {
            compact.build_layer_regions(config.border_size, config.min_region_area)?
        }
    }
    Ok(())
}

#[test]
fn regions_cover_every_walkable_span() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    for partitioning in PARTITIONINGS {
        let params = BuildParameters {
            partitioning,
            ..Default::default()
        };
        let (mut compact, config) = eroded_field(&scene, &params)?;
        partition(&mut compact, &config, partitioning)?;

        assert!(compact.region_count() >= 2, "{partitioning:?}: floor and platform");
        for (i, (span, area)) in compact.spans.iter().zip(&compact.areas).enumerate() {
            if area.is_walkable() {
                assert!(
                    span.region.is_interior(),
                    "{partitioning:?}: walkable span {i} has region {:?}",
                    span.region
                );
            } else {
                assert_eq!(
                    span.region,
                    RegionId::NONE,
                    "{partitioning:?}: unwalkable span {i} was assigned a region"
                );
            }
        }
        assert_eq!(
            compact.max_region.bits() as usize,
            compact.region_count(),
            "{partitioning:?}: region ids are not compacted"
        );
    }
    Ok(())
}

#[test]
fn larger_minimum_size_never_adds_regions() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    for partitioning in PARTITIONINGS {
        let mut previous = usize::MAX;
        for region_min_size in [0.0, 2.0, 8.0, 16.0, 100.0] {
            let params = BuildParameters {
                partitioning,
                region_min_size,
                ..Default::default()
            };
            let (mut compact, config) = eroded_field(&scene, &params)?;
            partition(&mut compact, &config, partitioning)?;
            let count = compact.region_count();
            assert!(
                count <= previous,
                "{partitioning:?}: region_min_size {region_min_size} grew the regions from {previous} to {count}"
            );
            previous = count;
        }
        assert_eq!(previous, 0, "{partitioning:?}: a huge minimum removes every region");
    }
    Ok(())
}

#[test]
fn watershed_requires_a_distance_field() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    let (mut compact, config) = eroded_field(&scene, &BuildParameters::default())?;
    assert!(
        compact
            .build_regions(config.border_size, config.min_region_area, config.merge_region_area)
            .is_err()
    );
    Ok(())
}

#[test]
fn partitioning_is_repeatable() -> anyhow::Result<()> {
    let scene = load_scene("platform")?;
    for partitioning in PARTITIONINGS {
        let params = BuildParameters {
            partitioning,
            ..Default::default()
        };
        let regions = || -> anyhow::Result<Vec<RegionId>> {
            let (mut compact, config) = eroded_field(&scene, &params)?;
            partition(&mut compact, &config, partitioning)?;
            Ok(compact.spans.iter().map(|span| span.region).collect())
        };
        assert_eq!(regions()?, regions()?, "{partitioning:?}");
    }
    Ok(())
}
