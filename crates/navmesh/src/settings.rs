//! Build settings, area tables and the JSON configuration of a navigation mesh entity

use std::collections::BTreeMap;
use std::path::Path;

use detour::{
    PolyFlags, QueryFilter, POLY_AREA_DOOR, POLY_AREA_GRASS, POLY_AREA_GROUND, POLY_AREA_JUMP,
    POLY_AREA_ROAD, POLY_AREA_WATER,
};
use glam::Vec3;
use recast::{ConvexVolume, PolyMesh, RecastConfig, RC_WALKABLE_AREA};
use recast_common::{ilog2, next_pow2, Error, Result};
use serde::{Deserialize, Serialize};

use crate::crowd_agent::{CrowdAgentParams, MovementType};
use crate::geometry::OffMeshConnection;

/// Largest number of tile bits a tiled mesh may use; the rest of a 22 bit budget goes to polys
const MAX_TILE_BITS: u32 = 14;
const TILE_AND_POLY_BITS: u32 = 22;

/// Parameters of the navigation mesh build, in world units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMeshSettings {
    pub cell_size: f32,
    pub cell_height: f32,
    pub agent_height: f32,
    pub agent_radius: f32,
    pub agent_max_climb: f32,
    /// Maximum walkable slope, in degrees
    pub agent_max_slope: f32,
    /// Side length, in cells, of the smallest region kept
    pub region_min_size: f32,
    /// Side length, in cells, below which regions are merged into neighbours
    pub region_merge_size: f32,
    /// Partition with the monotone sweep instead of the watershed
    pub monotone_partitioning: bool,
    pub edge_max_len: f32,
    pub edge_max_error: f32,
    pub verts_per_poly: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0,
            region_min_size: 8.0,
            region_merge_size: 20.0,
            monotone_partitioning: false,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
        }
    }
}

impl NavMeshSettings {
    /// Copy with every numeric value taken by absolute value
    pub fn sanitized(&self) -> Self {
        Self {
            cell_size: self.cell_size.abs(),
            cell_height: self.cell_height.abs(),
            agent_height: self.agent_height.abs(),
            agent_radius: self.agent_radius.abs(),
            agent_max_climb: self.agent_max_climb.abs(),
            agent_max_slope: self.agent_max_slope.abs(),
            region_min_size: self.region_min_size.abs(),
            region_merge_size: self.region_merge_size.abs(),
            monotone_partitioning: self.monotone_partitioning,
            edge_max_len: self.edge_max_len.abs(),
            edge_max_error: self.edge_max_error.abs(),
            verts_per_poly: self.verts_per_poly.abs(),
            detail_sample_dist: self.detail_sample_dist.abs(),
            detail_sample_max_error: self.detail_sample_max_error.abs(),
        }
    }

    /// Agent radius in cells
    pub fn walkable_radius_cells(&self) -> i32 {
        (self.agent_radius / self.cell_size).ceil() as i32
    }

    /// Derives the Recast configuration covering `bmin..bmax`
    pub fn to_recast_config(&self, bmin: Vec3, bmax: Vec3) -> Result<RecastConfig> {
        if !(self.cell_size > 0.0) || !(self.cell_height > 0.0) {
            return Err(Error::Configuration(format!(
                "cell size {} and cell height {} must be positive",
                self.cell_size, self.cell_height
            )));
        }
        let cs = self.cell_size;
        let ch = self.cell_height;
        let mut cfg = RecastConfig {
            cs,
            ch,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / ch).ceil() as i32,
            walkable_climb: (self.agent_max_climb / ch).floor() as i32,
            walkable_radius: self.walkable_radius_cells(),
            max_edge_len: (self.edge_max_len / cs) as i32,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as i32,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as i32,
            monotone_partitioning: self.monotone_partitioning,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                cs * self.detail_sample_dist
            },
            detail_sample_max_error: ch * self.detail_sample_max_error,
            ..RecastConfig::default()
        };
        cfg.set_bounds(bmin, bmax);
        Ok(cfg)
    }
}

/// Tiling parameters of a tiled navigation mesh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMeshTileSettings {
    /// Build every tile of the grid on the initial build
    pub build_all_tiles: bool,
    /// Maximum number of tiles; derived from the grid size when zero
    pub max_tiles: i32,
    /// Maximum number of polygons per tile; derived from the grid size when zero
    pub max_polys_per_tile: i32,
    /// Tile edge length in cells
    pub tile_size: i32,
}

impl Default for NavMeshTileSettings {
    fn default() -> Self {
        Self {
            build_all_tiles: false,
            max_tiles: 0,
            max_polys_per_tile: 0,
            tile_size: 32,
        }
    }
}

impl NavMeshTileSettings {
    pub fn sanitized(&self) -> Self {
        Self {
            build_all_tiles: self.build_all_tiles,
            max_tiles: self.max_tiles.abs(),
            max_polys_per_tile: self.max_polys_per_tile.abs(),
            tile_size: self.tile_size.abs(),
        }
    }

    /// Tile and polygon capacity for a `tiles_x` x `tiles_y` grid
    pub fn capacity(&self, tiles_x: i32, tiles_y: i32) -> (i32, i32) {
        let tile_count = (tiles_x.max(1) as u32).saturating_mul(tiles_y.max(1) as u32);
        let tile_bits = ilog2(next_pow2(tile_count)).min(MAX_TILE_BITS);
        let poly_bits = TILE_AND_POLY_BITS - tile_bits;
        let max_tiles = if self.max_tiles > 0 { self.max_tiles } else { 1 << tile_bits };
        let max_polys = if self.max_polys_per_tile > 0 {
            self.max_polys_per_tile
        } else {
            1 << poly_bits
        };
        (max_tiles, max_polys)
    }
}

/// Traversal flags and cost of one area id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaFlags {
    pub flags: PolyFlags,
    pub cost: f32,
}

/// Maps polygon area ids to traversal flags and costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaFlagsTable {
    entries: BTreeMap<u8, AreaFlags>,
}

impl Default for AreaFlagsTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.set(POLY_AREA_GROUND, PolyFlags::WALK, 1.0);
        table.set(POLY_AREA_WATER, PolyFlags::SWIM, 10.0);
        table.set(POLY_AREA_ROAD, PolyFlags::WALK, 1.0);
        table.set(POLY_AREA_DOOR, PolyFlags::WALK | PolyFlags::DOOR, 1.0);
        table.set(POLY_AREA_GRASS, PolyFlags::WALK, 2.0);
        table.set(POLY_AREA_JUMP, PolyFlags::JUMP, 1.5);
        table
    }
}

impl AreaFlagsTable {
    /// A table without entries: every area gets no flags and unit cost
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, area: u8, flags: PolyFlags, cost: f32) {
        self.entries.insert(area, AreaFlags { flags, cost });
    }

    pub fn get(&self, area: u8) -> Option<&AreaFlags> {
        self.entries.get(&area)
    }

    pub fn flags_for(&self, area: u8) -> PolyFlags {
        self.entries.get(&area).map_or(PolyFlags::empty(), |e| e.flags)
    }

    pub fn cost_for(&self, area: u8) -> f32 {
        self.entries.get(&area).map_or(1.0, |e| e.cost)
    }

    /// Remaps the generic walkable area to ground and assigns every polygon its flags
    pub fn apply_to_poly_mesh(&self, mesh: &mut PolyMesh) {
        for (area, flags) in mesh.areas.iter_mut().zip(mesh.flags.iter_mut()) {
            if *area == RC_WALKABLE_AREA {
                *area = POLY_AREA_GROUND;
            }
            *flags = self.flags_for(*area).bits();
        }
    }

    /// Builds a query filter with this table's area costs
    pub fn query_filter(&self, include: PolyFlags, exclude: PolyFlags) -> QueryFilter {
        let mut filter = QueryFilter::new(include, exclude);
        for (&area, entry) in &self.entries {
            filter.set_area_cost(area, entry.cost);
        }
        filter
    }
}

/// Kind of build pipeline a navigation mesh uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshType {
    /// A single tile covering the whole input
    #[default]
    Solo,
    /// A grid of independently built tiles
    Tile,
}

/// Everything a navigation mesh entity is configured with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMeshConfig {
    pub mesh_type: MeshType,
    pub movement_type: MovementType,
    pub settings: NavMeshSettings,
    pub tile_settings: NavMeshTileSettings,
    pub area_flags: AreaFlagsTable,
    pub crowd_include_flags: PolyFlags,
    pub crowd_exclude_flags: PolyFlags,
    pub convex_volumes: Vec<ConvexVolume>,
    pub off_mesh_connections: Vec<OffMeshConnection>,
    /// Crowd parameters applied to agents without their own
    pub agent_params: CrowdAgentParams,
    /// Number of crowd agent slots
    pub max_agents: usize,
    /// Vertical offset added to ground snap hits
    pub ground_snap_offset: f32,
    /// Collision mask of ground snap rays
    pub ray_mask: u32,
    /// Move events per second while an agent moves; zero fires only on the first tick
    pub move_event_frequency: f32,
    /// Steady events per second while an agent stands still
    pub steady_event_frequency: f32,
    /// Keep the last intermediate meshes for debug drawing
    pub keep_intermediate: bool,
}

impl Default for NavMeshConfig {
    fn default() -> Self {
        Self {
            mesh_type: MeshType::Solo,
            movement_type: MovementType::Surface,
            settings: NavMeshSettings::default(),
            tile_settings: NavMeshTileSettings::default(),
            area_flags: AreaFlagsTable::default(),
            crowd_include_flags: PolyFlags::WALK | PolyFlags::SWIM | PolyFlags::DOOR | PolyFlags::JUMP,
            crowd_exclude_flags: PolyFlags::DISABLED,
            convex_volumes: Vec::new(),
            off_mesh_connections: Vec::new(),
            agent_params: CrowdAgentParams::default(),
            max_agents: 128,
            ground_snap_offset: 0.0,
            ray_mask: u32::MAX,
            move_event_frequency: 30.0,
            steady_event_frequency: 30.0,
            keep_intermediate: false,
        }
    }
}

impl NavMeshConfig {
    /// Parses a configuration from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Copy with negative numeric values replaced by their absolute values
    pub fn sanitized(mut self) -> Self {
        self.settings = self.settings.sanitized();
        self.tile_settings = self.tile_settings.sanitized();
        self.move_event_frequency = self.move_event_frequency.abs();
        self.steady_event_frequency = self.steady_event_frequency.abs();
        self
    }
}
