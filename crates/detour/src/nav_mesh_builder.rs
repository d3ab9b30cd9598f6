//! Tile data creation from Recast output
//!
//! Converts a polygon mesh (cell units) and its detail mesh (world units) into a tile data
//! blob. Off-mesh connections whose start point lies inside the tile become extra
//! two-vertex polygons appended after the ground polygons.

use glam::Vec3;

use super::binary_format::write_tile;
use super::nav_mesh::{MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use super::{PolyFlags, PolyType, Status, DT_EXT_LINK, MAX_VERTS_PER_POLY};
use recast::{PolyMesh, PolyMeshDetail, MESH_NULL_IDX, PORTAL_FLAG};
use recast_common::{Error, Result};

/// Off-mesh connection to pack into a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshConnectionParams {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub bidirectional: bool,
    pub area: u8,
    pub flags: PolyFlags,
    pub user_id: u32,
}

/// Input for [`create_nav_mesh_data`]
#[derive(Debug, Clone)]
pub struct NavMeshCreateParams<'a> {
    /// Polygon mesh with per-polygon area and flags filled in
    pub poly_mesh: &'a PolyMesh,
    /// Detail mesh; polygons are fan triangulated when absent
    pub detail_mesh: Option<&'a PolyMeshDetail>,
    pub off_mesh_connections: &'a [OffMeshConnectionParams],
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    pub user_id: u32,
}

/// Tile side of a polygon mesh portal code
fn portal_side(code: u16) -> u16 {
    match code & 0xf {
        0 => 2,
        1 => 1,
        2 => 0,
        _ => 3,
    }
}

/// Fan triangulation of a polygon with boundary edge flags
fn fan_triangles(nv: usize) -> Vec<[u8; 4]> {
    let mut tris = Vec::with_capacity(nv.saturating_sub(2));
    for j in 2..nv {
        let mut flags = 0u8;
        // Edge (0, 1) of the first and edge (j - 1, j) of every triangle lie on the boundary
        if j == 2 {
            flags |= 1;
        }
        flags |= 1 << 2;
        if j == nv - 1 {
            flags |= 1 << 4;
        }
        tris.push([0, (j - 1) as u8, j as u8, flags]);
    }
    tris
}

/// Builds a tile data blob from Recast output
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<Vec<u8>> {
    let mesh = params.poly_mesh;
    let nvp = mesh.nvp;
    if mesh.poly_count() == 0 || mesh.vert_count() == 0 {
        return Err(Status::InvalidParam.into());
    }
    if nvp > MAX_VERTS_PER_POLY {
        return Err(Error::Configuration(format!(
            "tile polygons hold at most {} vertices, got {}",
            MAX_VERTS_PER_POLY, nvp
        )));
    }
    if let Some(dmesh) = params.detail_mesh {
        if dmesh.meshes.len() != mesh.poly_count() {
            return Err(Status::InvalidParam.into());
        }
    }

    let bmin = mesh.bmin;
    let bmax = mesh.bmax;

    // Only connections starting inside the tile are stored in it
    let cons: Vec<&OffMeshConnectionParams> = params
        .off_mesh_connections
        .iter()
        .filter(|c| c.start.x >= bmin.x && c.start.x <= bmax.x && c.start.z >= bmin.z && c.start.z <= bmax.z)
        .collect();

    let ground_polys = mesh.poly_count();
    let total_verts = mesh.vert_count() + cons.len() * 2;
    let total_polys = ground_polys + cons.len();
    if total_verts > MESH_NULL_IDX as usize || total_polys > MESH_NULL_IDX as usize {
        return Err(Error::ResourceExhaustion(format!(
            "tile holds {} vertices and {} polygons",
            total_verts, total_polys
        )));
    }

    let mut verts: Vec<Vec3> = mesh
        .verts
        .iter()
        .map(|v| {
            Vec3::new(
                bmin.x + v[0] as f32 * mesh.cs,
                bmin.y + v[1] as f32 * mesh.ch,
                bmin.z + v[2] as f32 * mesh.cs,
            )
        })
        .collect();

    let mut polys = Vec::with_capacity(total_polys);
    for i in 0..ground_polys {
        let pv = mesh.poly_verts(i);
        let pn = mesh.poly_neis(i);
        let mut poly = Poly {
            flags: PolyFlags::from_bits_truncate(mesh.flags.get(i).copied().unwrap_or(0)),
            vert_count: pv.len() as u8,
            area: mesh.areas[i],
            poly_type: PolyType::Ground,
            ..Poly::default()
        };
        for (j, &v) in pv.iter().enumerate() {
            poly.verts[j] = v;
            let nei = pn[j];
            poly.neis[j] = if nei == MESH_NULL_IDX {
                0
            } else if nei & PORTAL_FLAG != 0 {
                DT_EXT_LINK | portal_side(nei)
            } else {
                nei + 1
            };
        }
        polys.push(poly);
    }

    let mut off_mesh_connections = Vec::with_capacity(cons.len());
    for con in &cons {
        let v = verts.len() as u16;
        verts.push(con.start);
        verts.push(con.end);
        let poly_index = polys.len() as u16;
        let mut poly = Poly {
            flags: con.flags,
            vert_count: 2,
            area: con.area,
            poly_type: PolyType::OffMeshConnection,
            ..Poly::default()
        };
        poly.verts[0] = v;
        poly.verts[1] = v + 1;
        polys.push(poly);
        off_mesh_connections.push(OffMeshConnection {
            start: con.start,
            end: con.end,
            radius: con.radius,
            poly: poly_index,
            bidirectional: con.bidirectional,
            user_id: con.user_id,
        });
    }

    // Detail meshes store only the vertices beyond the polygon's own
    let mut detail_meshes = Vec::with_capacity(ground_polys);
    let mut detail_verts = Vec::new();
    let mut detail_tris = Vec::new();
    for i in 0..ground_polys {
        let nv = polys[i].vert_count as usize;
        match params.detail_mesh {
            Some(dmesh) => {
                let [vbase, vcount, tbase, tcount] = dmesh.meshes[i];
                let extra = (vcount as usize).saturating_sub(nv);
                detail_meshes.push(PolyDetail {
                    vert_base: detail_verts.len() as u32,
                    tri_base: detail_tris.len() as u32,
                    vert_count: extra as u8,
                    tri_count: tcount as u8,
                });
                let start = vbase as usize + nv;
                detail_verts.extend_from_slice(&dmesh.verts[start..start + extra]);
                detail_tris.extend_from_slice(&dmesh.tris[tbase as usize..(tbase + tcount) as usize]);
            }
            None => {
                let tris = fan_triangles(nv);
                detail_meshes.push(PolyDetail {
                    vert_base: detail_verts.len() as u32,
                    tri_base: detail_tris.len() as u32,
                    vert_count: 0,
                    tri_count: tris.len() as u8,
                });
                detail_tris.extend(tris);
            }
        }
    }

    let header = TileHeader {
        x: params.tile_x,
        y: params.tile_y,
        layer: params.tile_layer,
        user_id: params.user_id,
        poly_count: polys.len() as i32,
        vert_count: verts.len() as i32,
        detail_mesh_count: detail_meshes.len() as i32,
        detail_vert_count: detail_verts.len() as i32,
        detail_tri_count: detail_tris.len() as i32,
        off_mesh_connection_count: off_mesh_connections.len() as i32,
        walkable_height: params.walkable_height,
        walkable_radius: params.walkable_radius,
        walkable_climb: params.walkable_climb,
        bmin,
        bmax,
    };

    let tile = MeshTile {
        header: Some(header),
        polys,
        verts,
        detail_meshes,
        detail_verts,
        detail_tris,
        off_mesh_connections,
        ..MeshTile::default()
    };
    write_tile(&tile)
}
