//! Tile grid management for tiled navigation meshes
//!
//! The input bounds are cut into square tiles of `tile_size` cells. Each tile is built
//! from its bounds padded by the agent radius plus three cells, so that neighbouring tiles
//! see the same voxels along their shared edge and their polygons line up. Rebuilding a
//! tile always removes the installed one first.

use std::path::Path;

use detour::{load_nav_mesh_set_from_file, save_nav_mesh_set_to_file, NavMeshParams, TileRef};
use glam::Vec3;
use recast::{BuildContext, TimerCategory};
use recast_common::{calc_grid_size, Error, Result};

use crate::pipeline::{build_tile_data, BuildInput, BuildOutcome, BuildPipeline, IntermediateMeshes, TileBuildStats};
use crate::settings::{NavMeshSettings, NavMeshTileSettings};

/// Extra cells around a tile beyond the agent radius
const TILE_BORDER_PADDING: i32 = 3;

/// Grid of independently built navigation mesh tiles
#[derive(Debug)]
pub struct TileMesh {
    tile_settings: NavMeshTileSettings,
    /// Settings copied at the last build
    settings: NavMeshSettings,
    bmin: Vec3,
    bmax: Vec3,
    grid_width: i32,
    grid_height: i32,
    nav_mesh: Option<detour::NavMesh>,
    keep_intermediate: bool,
    intermediate: Option<IntermediateMeshes>,
    last_stats: Option<TileBuildStats>,
    total_build_time_ms: f64,
}

impl TileMesh {
    pub fn new(tile_settings: NavMeshTileSettings, keep_intermediate: bool) -> Self {
        Self {
            tile_settings,
            settings: NavMeshSettings::default(),
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            grid_width: 0,
            grid_height: 0,
            nav_mesh: None,
            keep_intermediate,
            intermediate: None,
            last_stats: None,
            total_build_time_ms: 0.0,
        }
    }

    pub fn tile_settings(&self) -> &NavMeshTileSettings {
        &self.tile_settings
    }

    /// Tile edge length in world units
    pub fn tile_world_size(&self) -> f32 {
        self.tile_settings.tile_size as f32 * self.settings.cell_size
    }

    /// Number of tiles along x and z
    pub fn grid_size(&self) -> (i32, i32) {
        (self.grid_width, self.grid_height)
    }

    /// Border around each tile, in cells
    pub fn border_size(&self) -> i32 {
        self.settings.walkable_radius_cells() + TILE_BORDER_PADDING
    }

    /// Grid coordinate of the tile containing `pos`
    pub fn get_tile_pos(&self, pos: Vec3) -> (i32, i32) {
        let ts = self.tile_world_size();
        if ts <= 0.0 {
            return (0, 0);
        }
        (
            ((pos.x - self.bmin.x) / ts).floor() as i32,
            ((pos.z - self.bmin.z) / ts).floor() as i32,
        )
    }

    /// Unpadded bounds of tile (`tx`, `ty`)
    pub fn tile_bounds(&self, tx: i32, ty: i32) -> (Vec3, Vec3) {
        let ts = self.tile_world_size();
        let bmin = Vec3::new(
            self.bmin.x + tx as f32 * ts,
            self.bmin.y,
            self.bmin.z + ty as f32 * ts,
        );
        let bmax = Vec3::new(
            self.bmin.x + (tx + 1) as f32 * ts,
            self.bmax.y,
            self.bmin.z + (ty + 1) as f32 * ts,
        );
        (bmin, bmax)
    }

    /// Bounds of tile (`tx`, `ty`) grown by the border on the xz-plane
    pub fn padded_tile_bounds(&self, tx: i32, ty: i32) -> (Vec3, Vec3) {
        let (bmin, bmax) = self.tile_bounds(tx, ty);
        let pad = self.border_size() as f32 * self.settings.cell_size;
        (
            Vec3::new(bmin.x - pad, bmin.y, bmin.z - pad),
            Vec3::new(bmax.x + pad, bmax.y, bmax.z + pad),
        )
    }

    fn contains_tile(&self, tx: i32, ty: i32) -> bool {
        tx >= 0 && ty >= 0 && tx < self.grid_width && ty < self.grid_height
    }

    pub fn total_build_time_ms(&self) -> f64 {
        self.total_build_time_ms
    }

    /// Sets up an empty grid over the input bounds, discarding every installed tile
    pub fn init(&mut self, input: &BuildInput) -> Result<()> {
        self.nav_mesh = None;
        self.intermediate = None;
        self.last_stats = None;
        self.total_build_time_ms = 0.0;

        let settings = input.settings;
        if self.tile_settings.tile_size <= 0 {
            return Err(Error::Configuration(format!(
                "tile size must be positive, got {}",
                self.tile_settings.tile_size
            )));
        }
        // Validates the cell sizes before anything is derived from them
        settings.to_recast_config(Vec3::ZERO, Vec3::ONE)?;

        let (bmin, bmax) = input.geometry.bounds();
        let (gw, gh) = calc_grid_size(bmin, bmax, settings.cell_size);
        let ts = self.tile_settings.tile_size;
        self.settings = settings;
        self.bmin = bmin;
        self.bmax = bmax;
        self.grid_width = (gw + ts - 1) / ts;
        self.grid_height = (gh + ts - 1) / ts;

        let (max_tiles, max_polys) = self.tile_settings.capacity(self.grid_width, self.grid_height);
        let tile_world = self.tile_world_size();
        self.nav_mesh = Some(detour::NavMesh::new(NavMeshParams {
            origin: bmin,
            tile_width: tile_world,
            tile_height: tile_world,
            max_tiles,
            max_polys_per_tile: max_polys,
        })?);
        log::debug!(
            "tile grid {} x {} ({} x {} cells per tile), {} tiles max",
            self.grid_width,
            self.grid_height,
            ts,
            ts,
            max_tiles
        );
        Ok(())
    }

    fn nav_mesh_mut(&mut self) -> Result<&mut detour::NavMesh> {
        self.nav_mesh
            .as_mut()
            .ok_or_else(|| Error::Configuration("tile grid has not been built".to_string()))
    }

    /// Builds the tile containing `pos`, replacing any installed tile there
    pub fn build_tile(&mut self, input: &BuildInput, ctx: &mut BuildContext, pos: Vec3) -> Result<BuildOutcome> {
        let (tx, ty) = self.get_tile_pos(pos);
        self.build_tile_at(input, ctx, tx, ty)
    }

    /// Builds tile (`tx`, `ty`), replacing any installed tile there.
    ///
    /// The old tile is removed before the build starts and stays removed if it fails.
    pub fn build_tile_at(
        &mut self,
        input: &BuildInput,
        ctx: &mut BuildContext,
        tx: i32,
        ty: i32,
    ) -> Result<BuildOutcome> {
        self.nav_mesh_mut()?;
        if !self.contains_tile(tx, ty) {
            return Err(Error::Configuration(format!(
                "tile ({}, {}) is outside the {} x {} grid",
                tx, ty, self.grid_width, self.grid_height
            )));
        }
        self.remove_tile_at(tx, ty);

        let ts = self.tile_settings.tile_size;
        let border = self.border_size();
        let (bmin, bmax) = self.padded_tile_bounds(tx, ty);
        let mut cfg = self.settings.to_recast_config(bmin, bmax)?;
        cfg.tile_size = ts;
        cfg.border_size = border;
        cfg.width = ts + border * 2;
        cfg.height = ts + border * 2;

        // Tiles are built with the settings of the grid, not those of the caller
        let tile_input = BuildInput {
            settings: self.settings,
            ..*input
        };
        let build = match build_tile_data(&tile_input, ctx, cfg, tx, ty, self.keep_intermediate) {
            Ok(Some(build)) => build,
            Ok(None) => return Ok(BuildOutcome::Empty),
            Err(e) => {
                ctx.error(TimerCategory::Total, format!("tile ({}, {}) failed: {}", tx, ty, e));
                return Err(e);
            }
        };

        let stats = build.stats;
        self.nav_mesh_mut()?.add_tile(build.data, None)?;
        self.total_build_time_ms += stats.build_time_ms;
        self.last_stats = Some(stats);
        if build.intermediate.is_some() {
            self.intermediate = build.intermediate;
        }
        log::debug!(
            "built tile ({}, {}): {} polygons, {} bytes, {:.2} ms",
            tx,
            ty,
            stats.poly_count,
            stats.memory_usage,
            stats.build_time_ms
        );
        Ok(BuildOutcome::Built)
    }

    /// Removes the tile containing `pos`; returns false when there was none
    pub fn remove_tile(&mut self, pos: Vec3) -> bool {
        let (tx, ty) = self.get_tile_pos(pos);
        self.remove_tile_at(tx, ty)
    }

    pub fn remove_tile_at(&mut self, tx: i32, ty: i32) -> bool {
        let Some(nav) = self.nav_mesh.as_mut() else {
            return false;
        };
        let Some(tile_ref) = nav.get_tile_ref_at(tx, ty, 0) else {
            return false;
        };
        match nav.remove_tile(tile_ref) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("failed to remove tile ({}, {}): {}", tx, ty, e);
                false
            }
        }
    }

    /// Builds every tile of the grid; failing tiles are skipped.
    ///
    /// Returns the number of tiles installed.
    pub fn build_all_tiles(&mut self, input: &BuildInput, ctx: &mut BuildContext) -> Result<usize> {
        self.nav_mesh_mut()?;
        let start = web_time::Instant::now();
        let mut built = 0;
        for ty in 0..self.grid_height {
            for tx in 0..self.grid_width {
                match self.build_tile_at(input, ctx, tx, ty) {
                    Ok(BuildOutcome::Built) => built += 1,
                    Ok(BuildOutcome::Empty) => {}
                    Err(e) => log::warn!("skipping tile ({}, {}): {}", tx, ty, e),
                }
            }
        }
        log::info!(
            "built {} of {} tiles in {:.2} ms",
            built,
            self.grid_width * self.grid_height,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(built)
    }

    /// Removes every installed tile
    pub fn remove_all_tiles(&mut self) {
        let Some(nav) = self.nav_mesh.as_mut() else {
            return;
        };
        let refs: Vec<TileRef> = nav.tiles().map(|(r, _)| r).collect();
        for tile_ref in refs {
            if let Err(e) = nav.remove_tile(tile_ref) {
                log::warn!("failed to remove tile {:?}: {}", tile_ref, e);
            }
        }
    }

    /// Writes every installed tile to `path`
    pub fn save_all<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let nav = self
            .nav_mesh
            .as_ref()
            .ok_or_else(|| Error::Configuration("tile grid has not been built".to_string()))?;
        save_nav_mesh_set_to_file(nav, path)
    }

    /// Replaces the installed tiles with those stored at `path`
    pub fn load_all<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.nav_mesh_mut()?;
        let loaded = load_nav_mesh_set_from_file(path)?;
        let params = loaded.get_params();
        if (params.tile_width - self.tile_world_size()).abs() > 1e-4 {
            return Err(Error::Configuration(format!(
                "stored tile width {} does not match the grid's {}",
                params.tile_width,
                self.tile_world_size()
            )));
        }
        log::info!("loaded {} tiles", loaded.tile_count());
        self.nav_mesh = Some(loaded);
        Ok(())
    }
}

impl BuildPipeline for TileMesh {
    fn build(&mut self, input: &BuildInput, ctx: &mut BuildContext) -> Result<BuildOutcome> {
        self.init(input)?;
        if !self.tile_settings.build_all_tiles {
            return Ok(BuildOutcome::Empty);
        }
        match self.build_all_tiles(input, ctx)? {
            0 => Ok(BuildOutcome::Empty),
            _ => Ok(BuildOutcome::Built),
        }
    }

    fn nav_mesh(&self) -> Option<&detour::NavMesh> {
        self.nav_mesh.as_ref()
    }

    fn intermediate(&self) -> Option<&IntermediateMeshes> {
        self.intermediate.as_ref()
    }

    fn last_build_stats(&self) -> Option<&TileBuildStats> {
        self.last_stats.as_ref()
    }
}
