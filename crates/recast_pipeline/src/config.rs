//! Build parameters in world units and the voxel-unit configuration derived from them.

use std::f32::consts::FRAC_PI_2;

use thiserror::Error;

use crate::{Aabb3d, BuildContoursFlags, ConvexVolume, poly_mesh::MAX_VERTICES_PER_POLYGON, report::BuildReport};

/// The algorithm used to partition the walkable surface into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Partitioning {
    /// Watershed partitioning over the distance field. Produces the nicest regions, but is the
    /// slowest and may create holes in regions for some geometry.
    #[default]
    Watershed,
    /// A single sweep over the rows. Fastest, but produces long, thin polygons.
    Monotone,
    /// Non-overlapping layers. Suits tiled meshes with many stacked floors.
    Layers,
}

impl TryFrom<i16> for Partitioning {
    type Error = ParameterError;

    /// Converts the numeric partition code used by hosts: 0 watershed, 1 monotone, 2 layers.
    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Watershed),
            1 => Ok(Self::Monotone),
            2 => Ok(Self::Layers),
            _ => Err(ParameterError::UnknownPartitioning { code }),
        }
    }
}

/// The parameters of a navmesh build, in world units. This is what a host hands to
/// [`build`](crate::build).
///
/// The default values are chosen to be reasonable for an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct BuildParameters {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// A recommended starting value is a half or a third of the agent radius. Smaller values
    /// increase the resolution of the mesh at a steep cost in build time.
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// A good starting point is half of [`BuildParameters::cell_size`].
    pub cell_height: f32,
    /// The height of the agent. `[Limit: >= 0] [Units: wu]`
    pub agent_height: f32,
    /// The radius of the agent. The walkable area is eroded by this amount. `[Limit: >= 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest ledge the agent can step up. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest walkable slope. Values above 90 degrees are clamped. `[Limit: >= 0] [Units: radians]`
    pub agent_max_slope: f32,
    /// Regions with fewer than `region_min_size²` spans are removed. `[Limit: >= 0] [Units: vx]`
    pub region_min_size: f32,
    /// Regions with fewer than `region_merge_size²` spans are merged into neighbors when possible.
    /// `[Limit: >= 0] [Units: vx]`
    pub region_merge_size: f32,
    /// The maximum length of contour edges along the border of the mesh. Zero disables
    /// splitting. `[Limit: >= 0] [Units: wu]`
    pub edge_max_len: f32,
    /// The maximum distance a simplified contour may deviate from the raw contour.
    /// Good values are between 1.1 and 1.5. `[Limit: >= 0] [Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon. `[Limit: 3..=12]`
    pub verts_per_poly: u16,
    /// The detail mesh sampling distance. Values below 0.9 disable sampling. `[Units: cells]`
    pub detail_sample_dist: f32,
    /// The maximum deviation of the detail mesh from the heightfield. `[Units: cell heights]`
    pub detail_sample_max_error: f32,
    /// The region partitioning algorithm.
    pub partitioning: Partitioning,
    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,
    /// Volumes that mark the walkable surface inside them with a specific area type.
    pub area_volumes: Vec<ConvexVolume>,
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            partitioning: Partitioning::default(),
            contour_flags: BuildContoursFlags::default(),
            area_volumes: Vec::new(),
        }
    }
}

impl BuildParameters {
    /// Checks that every parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric parameter is negative or not finite, the cell size or cell
    /// height is zero, [`BuildParameters::verts_per_poly`] is outside `3..=12`, or an area volume
    /// is malformed.
    pub fn validate(&self) -> Result<(), ParameterError> {
        let fields = [
            ("cell_size", self.cell_size),
            ("cell_height", self.cell_height),
            ("agent_height", self.agent_height),
            ("agent_radius", self.agent_radius),
            ("agent_max_climb", self.agent_max_climb),
            ("agent_max_slope", self.agent_max_slope),
            ("region_min_size", self.region_min_size),
            ("region_merge_size", self.region_merge_size),
            ("edge_max_len", self.edge_max_len),
            ("edge_max_error", self.edge_max_error),
            ("detail_sample_dist", self.detail_sample_dist),
            ("detail_sample_max_error", self.detail_sample_max_error),
        ];
        if let Some((name, value)) = fields
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(ParameterError::OutOfRange { name, value });
        }
        if self.cell_size == 0.0 {
            return Err(ParameterError::NotPositive { name: "cell_size" });
        }
        if self.cell_height == 0.0 {
            return Err(ParameterError::NotPositive {
                name: "cell_height",
            });
        }
        if !(3..=MAX_VERTICES_PER_POLYGON).contains(&(self.verts_per_poly as usize)) {
            return Err(ParameterError::VerticesPerPolygon {
                value: self.verts_per_poly,
            });
        }
        if let Some(index) = self.area_volumes.iter().position(|volume| {
            volume.vertices.len() < 3
                || !(volume.min_y.is_finite() && volume.max_y.is_finite())
                || volume.min_y > volume.max_y
        }) {
            return Err(ParameterError::InvalidAreaVolume { index });
        }
        Ok(())
    }

    /// Validates the parameters and derives the voxel-unit configuration for a field covering
    /// `aabb`. Values that are out of range but can be clamped are clamped with a warning in
    /// `report`.
    ///
    /// # Errors
    ///
    /// See [`BuildParameters::validate`].
    pub fn to_config(
        &self,
        aabb: Aabb3d,
        report: &mut BuildReport,
    ) -> Result<NavmeshConfig, ParameterError> {
        self.validate()?;
        let cs = self.cell_size;
        let ch = self.cell_height;

        let mut walkable_slope_angle = self.agent_max_slope;
        if walkable_slope_angle > FRAC_PI_2 {
            report.warn("agent_max_slope clamped to 90 degrees");
            walkable_slope_angle = FRAC_PI_2;
        }

        let mut walkable_height = (self.agent_height / ch).ceil() as u16;
        if walkable_height < NavmeshConfig::MIN_WALKABLE_HEIGHT {
            report.warn(format_args!(
                "walkable height {walkable_height} vx raised to {}",
                NavmeshConfig::MIN_WALKABLE_HEIGHT
            ));
            walkable_height = NavmeshConfig::MIN_WALKABLE_HEIGHT;
        }

        let detail_sample_dist = if self.detail_sample_dist < 0.9 {
            if self.detail_sample_dist > 0.0 {
                report.warn("detail_sample_dist below 0.9, detail sampling disabled");
            }
            0.0
        } else {
            cs * self.detail_sample_dist
        };

        Ok(NavmeshConfig {
            width: ((aabb.max.x - aabb.min.x) / cs + 0.5) as u16,
            height: ((aabb.max.z - aabb.min.z) / cs + 0.5) as u16,
            border_size: 0,
            cell_size: cs,
            cell_height: ch,
            aabb,
            walkable_slope_angle,
            walkable_height,
            walkable_climb: (self.agent_max_climb / ch).floor() as u16,
            walkable_radius: (self.agent_radius / cs).ceil() as u16,
            max_edge_len: (self.edge_max_len / cs) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist,
            detail_sample_max_error: ch * self.detail_sample_max_error,
            partitioning: self.partitioning,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes.clone(),
        })
    }
}

/// The configuration of a single build in voxel units, derived with
/// [`BuildParameters::to_config`].
///
/// Units are voxels (vx) or world units (wu); voxel sizes follow from
/// [`NavmeshConfig::cell_size`] and [`NavmeshConfig::cell_height`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Units: vx]`
    pub width: u16,
    /// The height of the field along the z-axis. `[Units: vx]`
    pub height: u16,
    /// The size of the non-navigable border around the heightfield. Zero for single builds. `[Units: vx]`
    pub border_size: u16,
    /// The xz-plane cell size. `[Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size. `[Units: wu]`
    pub cell_height: f32,
    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,
    /// The maximum slope that is considered walkable. `[Limits: 0 <= value <= 0.5*π] [Units: radians]`
    pub walkable_slope_angle: f32,
    /// Minimum floor to ceiling height that still allows the floor to be walkable. `[Limit: >= 3] [Units: vx]`
    pub walkable_height: u16,
    /// Maximum ledge height that is considered to still be traversable. `[Units: vx]`
    pub walkable_climb: u16,
    /// The distance to erode the walkable area away from obstructions. `[Units: vx]`
    pub walkable_radius: u16,
    /// The maximum length of contour edges along the border of the mesh. Zero disables splitting. `[Units: vx]`
    pub max_edge_len: u16,
    /// The maximum distance a simplified contour may deviate from the raw contour. `[Units: vx]`
    pub max_simplification_error: f32,
    /// Isolated regions smaller than this are removed. `[Units: spans]`
    pub min_region_area: u16,
    /// Regions smaller than this are merged into neighbors when possible. `[Units: spans]`
    pub merge_region_area: u16,
    /// The maximum number of vertices per polygon. `[Limit: 3..=12]`
    pub max_vertices_per_polygon: u16,
    /// The detail mesh sampling distance, zero disables sampling. `[Units: wu]`
    pub detail_sample_dist: f32,
    /// The maximum deviation of the detail mesh from the heightfield. `[Units: wu]`
    pub detail_sample_max_error: f32,
    /// The region partitioning algorithm.
    pub partitioning: Partitioning,
    /// Flags controlling the contour generation process.
    pub contour_flags: BuildContoursFlags,
    /// Volumes that mark the walkable surface inside them with a specific area type.
    pub area_volumes: Vec<ConvexVolume>,
}

impl NavmeshConfig {
    /// The smallest supported walkable height.
    pub const MIN_WALKABLE_HEIGHT: u16 = 3;
}

/// Errors caused by unusable [`BuildParameters`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// A numeric parameter is negative, infinite or NaN.
    #[error("{name} must be finite and non-negative, got {value}")]
    OutOfRange {
        /// The parameter name.
        name: &'static str,
        /// The rejected value.
        value: f32,
    },
    /// A parameter that is used as a divisor is zero.
    #[error("{name} must be greater than zero")]
    NotPositive {
        /// The parameter name.
        name: &'static str,
    },
    /// The polygon size is not supported.
    #[error("verts_per_poly must be within 3..={MAX_VERTICES_PER_POLYGON}, got {value}")]
    VerticesPerPolygon {
        /// The rejected value.
        value: u16,
    },
    /// The numeric partitioning code is unknown.
    #[error("unknown partitioning code {code}")]
    UnknownPartitioning {
        /// The rejected code.
        code: i16,
    },
    /// An area volume has fewer than 3 vertices or an inverted height range.
    #[error("area volume {index} is malformed")]
    InvalidAreaVolume {
        /// Index into [`BuildParameters::area_volumes`].
        index: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;

    fn unit_aabb(extent: f32) -> Aabb3d {
        Aabb3d {
            min: Vec3A::ZERO,
            max: Vec3A::new(extent, 1.0, extent),
        }
    }

    fn parameters() -> BuildParameters {
        BuildParameters {
            cell_size: 0.5,
            cell_height: 0.25,
            ..Default::default()
        }
    }

    #[test]
    fn derives_voxel_units() {
        let mut report = BuildReport::new();
        let config = parameters().to_config(unit_aabb(10.0), &mut report).unwrap();
        assert_eq!(config.width, 20);
        assert_eq!(config.height, 20);
        assert_eq!(config.border_size, 0);
        assert_eq!(config.walkable_height, 8);
        assert_eq!(config.walkable_climb, 3);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.max_edge_len, 24);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_eq!(config.max_vertices_per_polygon, 6);
        assert_eq!(config.detail_sample_dist, 3.0);
        assert_eq!(config.detail_sample_max_error, 0.25);
        assert_eq!(report.warning_count(), 0);
    }

    #[test]
    fn clamps_with_warnings() {
        let mut report = BuildReport::new();
        let config = BuildParameters {
            agent_max_slope: 120.0_f32.to_radians(),
            agent_height: 0.25,
            detail_sample_dist: 0.5,
            ..parameters()
        }
        .to_config(unit_aabb(10.0), &mut report)
        .unwrap();
        assert_eq!(config.walkable_slope_angle, FRAC_PI_2);
        assert_eq!(config.walkable_height, NavmeshConfig::MIN_WALKABLE_HEIGHT);
        assert_eq!(config.detail_sample_dist, 0.0);
        assert_eq!(report.warning_count(), 3);
    }

    #[test]
    fn zero_sample_distance_disables_sampling_silently() {
        let mut report = BuildReport::new();
        let config = BuildParameters {
            detail_sample_dist: 0.0,
            ..parameters()
        }
        .to_config(unit_aabb(10.0), &mut report)
        .unwrap();
        assert_eq!(config.detail_sample_dist, 0.0);
        assert_eq!(report.warning_count(), 0);
    }

    #[test]
    fn rejects_negative_and_non_finite_values() {
        let negative = BuildParameters {
            agent_radius: -1.0,
            ..Default::default()
        };
        assert_eq!(
            negative.validate(),
            Err(ParameterError::OutOfRange {
                name: "agent_radius",
                value: -1.0
            })
        );
        let nan = BuildParameters {
            edge_max_error: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            nan.validate(),
            Err(ParameterError::OutOfRange {
                name: "edge_max_error",
                ..
            })
        ));
        let zero_cells = BuildParameters {
            cell_size: 0.0,
            ..Default::default()
        };
        assert_eq!(
            zero_cells.validate(),
            Err(ParameterError::NotPositive { name: "cell_size" })
        );
    }

    #[test]
    fn polygon_size_is_bounded() {
        for (verts_per_poly, valid) in [(2, false), (3, true), (12, true), (13, false)] {
            let parameters = BuildParameters {
                verts_per_poly,
                ..Default::default()
            };
            assert_eq!(parameters.validate().is_ok(), valid, "{verts_per_poly}");
        }
    }

    #[test]
    fn partitioning_codes() {
        assert_eq!(Partitioning::try_from(0), Ok(Partitioning::Watershed));
        assert_eq!(Partitioning::try_from(1), Ok(Partitioning::Monotone));
        assert_eq!(Partitioning::try_from(2), Ok(Partitioning::Layers));
        assert_eq!(
            Partitioning::try_from(3),
            Err(ParameterError::UnknownPartitioning { code: 3 })
        );
    }
}
