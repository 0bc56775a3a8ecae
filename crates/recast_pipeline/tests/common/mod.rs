//! Geometry shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::Context as _;

/// A triangle soup in the layout [`recast_pipeline::build`] consumes.
pub struct Scene {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

/// Loads every object of an OBJ file under `tests/assets` into one triangle soup.
pub fn load_scene(name: &str) -> anyhow::Result<Scene> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("assets")
        .join(format!("{name}.obj"));
    let (models, _materials) = tobj::load_obj(
        &path,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("failed to load {}", path.display()))?;

    let mut scene = Scene {
        vertices: Vec::new(),
        indices: Vec::new(),
    };
    for model in models {
        let offset = scene.vertices.len() as u32;
        scene.vertices.extend(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|p| [p[0], p[1], p[2]]),
        );
        scene.indices.extend(
            model
                .mesh
                .indices
                .chunks_exact(3)
                .map(|i| [i[0] + offset, i[1] + offset, i[2] + offset]),
        );
    }
    Ok(scene)
}

/// A flat square on the xz-plane with its corner at the origin.
pub fn flat_quad(extent: f32) -> Scene {
    Scene {
        vertices: vec![
            [0.0, 0.0, 0.0],
            [extent, 0.0, 0.0],
            [extent, 0.0, extent],
            [0.0, 0.0, extent],
        ],
        indices: vec![[0, 2, 1], [0, 3, 2]],
    }
}
