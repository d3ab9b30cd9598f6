//! Flat plane navigation meshes for crowd tests

use detour::{create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshParams, PolyFlags, QueryFilter};
use glam::Vec3;
use recast::{BuildContext, RecastBuilder, RecastConfig};

const CELL_SIZE: f32 = 0.3;
const TILE_SIZE: i32 = 32;
const WALKABLE_RADIUS: i32 = 2;
/// Side length of the test plane: two tiles in each direction
const PLANE_SIZE: f32 = 19.2;

fn plane_tile(tx: i32, ty: i32) -> Vec<u8> {
    let s = PLANE_SIZE;
    let verts = vec![0.0, 0.0, 0.0, 0.0, 0.0, s, s, 0.0, s, s, 0.0, 0.0];
    let tris = vec![0, 1, 2, 0, 2, 3];

    let border = WALKABLE_RADIUS + 3;
    let pad = border as f32 * CELL_SIZE;
    let tw = TILE_SIZE as f32 * CELL_SIZE;
    let cfg = RecastConfig {
        cs: CELL_SIZE,
        ch: 0.2,
        walkable_height: 10,
        walkable_climb: 4,
        walkable_radius: WALKABLE_RADIUS,
        max_edge_len: 40,
        min_region_area: 8,
        merge_region_area: 20,
        monotone_partitioning: true,
        tile_size: TILE_SIZE,
        border_size: border,
        width: TILE_SIZE + border * 2,
        height: TILE_SIZE + border * 2,
        bmin: Vec3::new(tx as f32 * tw - pad, -1.0, ty as f32 * tw - pad),
        bmax: Vec3::new((tx + 1) as f32 * tw + pad, 1.0, (ty + 1) as f32 * tw + pad),
        detail_sample_dist: 1.8,
        detail_sample_max_error: 0.2,
        ..RecastConfig::default()
    };

    let mut ctx = BuildContext::new();
    let mut out = RecastBuilder::new(cfg)
        .build(&mut ctx, &verts, &tris, &[])
        .unwrap()
        .expect("plane tile has walkable area");
    out.poly_mesh.areas.iter_mut().for_each(|a| *a = detour::POLY_AREA_GROUND);
    out.poly_mesh.flags.iter_mut().for_each(|f| *f = PolyFlags::WALK.bits());

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

/// A 19.2 x 19.2 plane at y = 0 split into 2 x 2 tiles
pub(crate) fn plane_nav_mesh() -> NavMesh {
    let tw = TILE_SIZE as f32 * CELL_SIZE;
    let mut nav = NavMesh::new(NavMeshParams {
        origin: Vec3::ZERO,
        tile_width: tw,
        tile_height: tw,
        max_tiles: 4,
        max_polys_per_tile: 256,
    })
    .unwrap();
    for ty in 0..2 {
        for tx in 0..2 {
            nav.add_tile(plane_tile(tx, ty), None).unwrap();
        }
    }
    nav
}

pub(crate) fn walk_filter() -> QueryFilter {
    QueryFilter::new(PolyFlags::WALK, PolyFlags::DISABLED)
}
