//! Configuration for the Recast navigation mesh generation process

use glam::Vec3;
use recast_common::{calc_grid_size, Error, Result};

/// Configuration parameters for one Recast build (one solo mesh or one tile).
///
/// Distances in this struct are in voxel units (cells) unless stated otherwise.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct RecastConfig {
    /// The width of the field along the x-axis, in cells (including border)
    pub width: i32,
    /// The height of the field along the z-axis, in cells (including border)
    pub height: i32,
    /// Number of cells on each side of a tile that overlap its neighbours
    pub border_size: i32,
    /// Tile edge length in cells, zero for a solo mesh
    pub tile_size: i32,

    /// The width/depth resolution of the field (cell size, world units)
    pub cs: f32,
    /// The height resolution of the field (cell height, world units)
    pub ch: f32,

    /// The minimum bounds of the field's AABB (world units)
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB (world units)
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to ceiling height that still allows the floor to be walkable
    pub walkable_height: i32,
    /// The maximum ledge height that is still traversable
    pub walkable_climb: i32,
    /// The distance to erode the walkable area away from obstructions
    pub walkable_radius: i32,

    /// The maximum length of contour edges along the border of the mesh
    pub max_edge_len: i32,
    /// The maximum distance a simplified contour may deviate from the raw contour (cells)
    pub max_simplification_error: f32,
    /// Regions smaller than this (in cells) that are not connected to a tile border are removed
    pub min_region_area: i32,
    /// Regions smaller than this (in cells) are merged into larger neighbours when possible
    pub merge_region_area: i32,
    /// Partition with the monotone sweep instead of the watershed
    pub monotone_partitioning: bool,

    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: i32,

    /// Sampling distance for the detail mesh (world units, zero disables sampling)
    pub detail_sample_dist: f32,
    /// Maximum deviation of the detail mesh from the heightfield (world units)
    pub detail_sample_max_error: f32,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            border_size: 0,
            tile_size: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 64,
            merge_region_area: 400,
            monotone_partitioning: false,
            max_vertices_per_polygon: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
        }
    }
}

impl RecastConfig {
    /// Creates a new RecastConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounds and derives the grid size from them
    pub fn set_bounds(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        let (w, h) = calc_grid_size(bmin, bmax, self.cs);
        self.width = w;
        self.height = h;
    }

    /// Validates the configuration parameters.
    ///
    /// Everything checked here is rejected before any buffer is allocated.
    pub fn validate(&self) -> Result<()> {
        if !(self.cs > 0.0) || !(self.ch > 0.0) {
            return Err(Error::Configuration(
                "cell size and cell height must be positive".to_string(),
            ));
        }

        if self.bmin.x > self.bmax.x || self.bmin.y > self.bmax.y || self.bmin.z > self.bmax.z {
            return Err(Error::Configuration(format!(
                "inverted bounds: {:?} .. {:?}",
                self.bmin, self.bmax
            )));
        }

        if self.width <= 0 || self.height <= 0 {
            return Err(Error::Configuration(format!(
                "degenerate grid size {}x{}",
                self.width, self.height
            )));
        }

        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::Configuration(
                "walkable slope angle must be within 0..=90 degrees".to_string(),
            ));
        }

        if self.walkable_height < 3 {
            return Err(Error::Configuration(
                "walkable height must be at least 3 cells".to_string(),
            ));
        }

        if self.walkable_climb < 0 || self.walkable_radius < 0 || self.border_size < 0 {
            return Err(Error::Configuration(
                "walkable climb, radius and border size must not be negative".to_string(),
            ));
        }

        if !(3..=6).contains(&self.max_vertices_per_polygon) {
            return Err(Error::Configuration(
                "vertices per polygon must be within 3..=6".to_string(),
            ));
        }

        Ok(())
    }
}
