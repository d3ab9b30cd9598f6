//! Test mesh creation helpers
//!
//! Tiles are built from a flat square plane through the real Recast pipeline, using the
//! padded tile bounds a tiled build uses.

use glam::Vec3;
use recast::{BuildContext, RecastBuilder, RecastConfig, RecastOutput};

use crate::{create_nav_mesh_data, NavMeshCreateParams, NavMeshParams, PolyFlags, POLY_AREA_GROUND};

pub(crate) const CELL_SIZE: f32 = 0.3;
pub(crate) const CELL_HEIGHT: f32 = 0.2;
pub(crate) const TILE_SIZE: i32 = 32;
const WALKABLE_RADIUS: i32 = 2;

pub(crate) fn tile_world_size() -> f32 {
    TILE_SIZE as f32 * CELL_SIZE
}

pub(crate) fn plane_params(max_tiles: i32) -> NavMeshParams {
    NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: tile_world_size(),
        tile_height: tile_world_size(),
        max_tiles,
        max_polys_per_tile: 256,
    }
}

/// Recast output for tile (tx, ty) of a `size` x `size` plane at y = 0
pub(crate) fn plane_output(size: f32, tx: i32, ty: i32) -> RecastOutput {
    let verts = vec![0.0, 0.0, 0.0, 0.0, 0.0, size, size, 0.0, size, size, 0.0, 0.0];
    let tris = vec![0, 1, 2, 0, 2, 3];

    let border = WALKABLE_RADIUS + 3;
    let pad = border as f32 * CELL_SIZE;
    let tw = tile_world_size();
    let mut cfg = RecastConfig {
        cs: CELL_SIZE,
        ch: CELL_HEIGHT,
        walkable_height: 10,
        walkable_climb: 4,
        walkable_radius: WALKABLE_RADIUS,
        max_edge_len: 40,
        min_region_area: 8,
        merge_region_area: 20,
        monotone_partitioning: true,
        tile_size: TILE_SIZE,
        border_size: border,
        detail_sample_dist: 1.8,
        detail_sample_max_error: 0.2,
        ..RecastConfig::default()
    };
    cfg.bmin = Vec3::new(tx as f32 * tw - pad, -1.0, ty as f32 * tw - pad);
    cfg.bmax = Vec3::new((tx + 1) as f32 * tw + pad, 1.0, (ty + 1) as f32 * tw + pad);
    cfg.width = TILE_SIZE + border * 2;
    cfg.height = TILE_SIZE + border * 2;

    let mut ctx = BuildContext::new();
    let mut out = RecastBuilder::new(cfg)
        .build(&mut ctx, &verts, &tris, &[])
        .unwrap()
        .expect("plane tile has walkable area");
    for area in &mut out.poly_mesh.areas {
        *area = POLY_AREA_GROUND;
    }
    for flags in &mut out.poly_mesh.flags {
        *flags = PolyFlags::WALK.bits();
    }
    out
}

/// Tile data blob for tile (tx, ty) of a `size` x `size` plane at y = 0
pub(crate) fn plane_tile_data(size: f32, tx: i32, ty: i32) -> Vec<u8> {
    let out = plane_output(size, tx, ty);
    create_nav_mesh_data(&NavMeshCreateParams {
        poly_mesh: &out.poly_mesh,
        detail_mesh: Some(&out.detail_mesh),
        off_mesh_connections: &[],
        walkable_height: 2.0,
        walkable_radius: 0.6,
        walkable_climb: 0.8,
        tile_x: tx,
        tile_y: ty,
        tile_layer: 0,
        user_id: 0,
    })
    .unwrap()
}
