//! Navigation mesh implementation for Detour
//!
//! The navigation mesh is a fixed-capacity grid of tile slots. Each installed tile is parsed
//! from its data blob, linked internally, and stitched to its neighbours through the portal
//! edges both tiles expose on their shared border. Polygon references carry a per-slot salt
//! so that references into a removed tile are detected instead of aliasing its replacement.

use std::collections::HashMap;

use glam::Vec3;

use super::binary_format::read_tile;
use super::{
    NavMeshParams, PolyFlags, PolyRef, PolyType, Status, TileRef, DT_EXT_LINK, DT_INTERNAL_SIDE,
    MAX_VERTS_PER_POLY,
};
use recast_common::{
    closest_height_point_triangle, dist_point_segment_sqr_2d, ilog2, next_pow2, overlap_bounds,
    point_in_polygon_2d, Result,
};

/// Fewest salt bits a reference may carry
const DT_MIN_SALT_BITS: u32 = 10;

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Link {
    /// Reference to the connected polygon
    pub reference: PolyRef,
    /// Edge index of the connection, or 0xff for a link onto an off-mesh connection
    pub edge: u8,
    /// Tile side of a portal link, or `DT_INTERNAL_SIDE`
    pub side: u8,
    /// Start of the linked sub-segment of the edge, 0..=255
    pub bmin: u8,
    /// End of the linked sub-segment of the edge, 0..=255
    pub bmax: u8,
}

impl Link {
    fn internal(reference: PolyRef, edge: u8) -> Self {
        Self {
            reference,
            edge,
            side: DT_INTERNAL_SIDE,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// Polygon of a mesh tile
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Poly {
    /// Vertices of the polygon (indices into the tile vertex array)
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per edge: 0 for a wall, `index + 1` for a neighbour in the same tile,
    /// or `DT_EXT_LINK | side` for a portal to the neighbouring tile
    pub neis: [u16; MAX_VERTS_PER_POLY],
    /// Flags for the polygon
    pub flags: PolyFlags,
    /// Number of vertices in the polygon
    pub vert_count: u8,
    /// Area ID of the polygon
    pub area: u8,
    /// Polygon type
    pub poly_type: PolyType,
}

/// Detailed mesh for a polygon
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyDetail {
    /// Index of the first extra vertex in the detail_verts array
    pub vert_base: u32,
    /// Index of the first triangle in the detail_tris array
    pub tri_base: u32,
    /// Number of extra vertices
    pub vert_count: u8,
    /// Number of triangles
    pub tri_count: u8,
}

/// Off-mesh connection stored in a tile
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    /// Search radius used to attach the end points
    pub radius: f32,
    /// Index of the polygon standing for this connection
    pub poly: u16,
    /// Whether the connection can be travelled end to start
    pub bidirectional: bool,
    pub user_id: u32,
}

/// Tile header information
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    /// Tile position (x, y, layer)
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    /// User defined data
    pub user_id: u32,
    pub poly_count: i32,
    pub vert_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub off_mesh_connection_count: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Bounding box of the tile
    pub bmin: Vec3,
    pub bmax: Vec3,
}

/// Mesh tile in the navigation mesh
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Salt value for the tile slot
    pub salt: u32,
    /// Tile header, `None` while the slot is free
    pub header: Option<TileHeader>,
    /// Polygons in the tile
    pub polys: Vec<Poly>,
    /// Vertices in the tile
    pub verts: Vec<Vec3>,
    /// Links of each polygon
    pub links: Vec<Vec<Link>>,
    /// Detailed mesh data
    pub detail_meshes: Vec<PolyDetail>,
    /// Extra detail mesh vertices
    pub detail_verts: Vec<Vec3>,
    /// Detail triangles: three vertex indices and packed edge flags
    pub detail_tris: Vec<[u8; 4]>,
    /// Off-mesh connections
    pub off_mesh_connections: Vec<OffMeshConnection>,
    /// Raw tile data the tile was created from
    pub data: Vec<u8>,
}

impl MeshTile {
    /// Whether the slot holds a tile
    pub fn is_occupied(&self) -> bool {
        self.header.is_some()
    }

    /// Vertex positions of polygon `i`, valid up to its vertex count
    pub fn poly_vertices(&self, i: usize) -> ([Vec3; MAX_VERTS_PER_POLY], usize) {
        let poly = &self.polys[i];
        let mut out = [Vec3::ZERO; MAX_VERTS_PER_POLY];
        let nv = poly.vert_count as usize;
        for (j, v) in out.iter_mut().enumerate().take(nv) {
            *v = self.verts[poly.verts[j] as usize];
        }
        (out, nv)
    }

    /// Bounds of polygon `i`, including its detail vertices
    pub fn poly_bounds(&self, i: usize) -> (Vec3, Vec3) {
        let (verts, nv) = self.poly_vertices(i);
        let mut bmin = verts[0];
        let mut bmax = verts[0];
        for v in &verts[1..nv] {
            bmin = bmin.min(*v);
            bmax = bmax.max(*v);
        }
        if let Some(pd) = self.detail_meshes.get(i) {
            let base = pd.vert_base as usize;
            for v in &self.detail_verts[base..base + pd.vert_count as usize] {
                bmin = bmin.min(*v);
                bmax = bmax.max(*v);
            }
        }
        (bmin, bmax)
    }

    /// Centroid of polygon `i`
    pub fn poly_center(&self, i: usize) -> Vec3 {
        let (verts, nv) = self.poly_vertices(i);
        verts[..nv].iter().copied().sum::<Vec3>() / nv.max(1) as f32
    }

    fn detail_vertex(&self, poly_idx: usize, pd: &PolyDetail, k: u8) -> Vec3 {
        let poly = &self.polys[poly_idx];
        if k < poly.vert_count {
            self.verts[poly.verts[k as usize] as usize]
        } else {
            self.detail_verts[pd.vert_base as usize + (k - poly.vert_count) as usize]
        }
    }

    /// Surface height of polygon `i` under `pos`, if `pos` lies over it
    pub fn get_poly_height(&self, i: usize, pos: Vec3) -> Option<f32> {
        let poly = &self.polys[i];
        let (verts, nv) = self.poly_vertices(i);

        if poly.poly_type == PolyType::OffMeshConnection {
            let (_, t) = dist_point_segment_sqr_2d(pos, verts[0], verts[1]);
            return Some(verts[0].y + (verts[1].y - verts[0].y) * t);
        }

        if !point_in_polygon_2d(pos, &verts[..nv]) {
            return None;
        }

        if let Some(pd) = self.detail_meshes.get(i) {
            for t in 0..pd.tri_count as usize {
                let tri = self.detail_tris[pd.tri_base as usize + t];
                let a = self.detail_vertex(i, pd, tri[0]);
                let b = self.detail_vertex(i, pd, tri[1]);
                let c = self.detail_vertex(i, pd, tri[2]);
                if let Some(h) = closest_height_point_triangle(pos, a, b, c) {
                    return Some(h);
                }
            }
        }

        // Numerically on an edge of every detail triangle: use the closest boundary height
        Some(self.closest_point_on_boundary(i, pos).y)
    }

    fn closest_point_on_boundary(&self, i: usize, pos: Vec3) -> Vec3 {
        let (verts, nv) = self.poly_vertices(i);
        let mut best = (f32::MAX, verts[0]);
        for j in 0..nv {
            let va = verts[j];
            let vb = verts[(j + 1) % nv];
            let (d, t) = dist_point_segment_sqr_2d(pos, va, vb);
            if d < best.0 {
                best = (d, va.lerp(vb, t));
            }
        }
        best.1
    }

    /// Closest point on polygon `i` to `pos`, and whether `pos` lies over the polygon
    pub fn closest_point_on_poly(&self, i: usize, pos: Vec3) -> (Vec3, bool) {
        if self.polys[i].poly_type == PolyType::OffMeshConnection {
            let (verts, _) = self.poly_vertices(i);
            let (_, t) = dist_point_segment_sqr_2d(pos, verts[0], verts[1]);
            return (verts[0].lerp(verts[1], t), false);
        }
        match self.get_poly_height(i, pos) {
            Some(h) => (Vec3::new(pos.x, h, pos.z), true),
            None => (self.closest_point_on_boundary(i, pos), false),
        }
    }

    /// Indices of the ground polygons whose bounds overlap the query box
    pub fn query_polygons(&self, qmin: Vec3, qmax: Vec3) -> Vec<usize> {
        (0..self.polys.len())
            .filter(|&i| self.polys[i].poly_type == PolyType::Ground)
            .filter(|&i| {
                let (bmin, bmax) = self.poly_bounds(i);
                overlap_bounds(qmin, qmax, bmin, bmax)
            })
            .collect()
    }

    /// Nearest ground polygon of this tile to `center` within `half_extents`
    pub fn find_nearest_poly(&self, center: Vec3, half_extents: Vec3) -> Option<(usize, Vec3)> {
        let climb = self.header.as_ref().map_or(0.0, |h| h.walkable_climb);
        let mut nearest: Option<(usize, Vec3, f32)> = None;
        for i in self.query_polygons(center - half_extents, center + half_extents) {
            let (closest, over) = self.closest_point_on_poly(i, center);
            let diff = center - closest;
            // A point over the polygon is as good as on it while within climb height
            let d = if over {
                let dy = (diff.y.abs() - climb).max(0.0);
                dy * dy
            } else {
                diff.length_squared()
            };
            match nearest {
                Some((_, _, best)) if best <= d => {}
                _ => nearest = Some((i, closest, d)),
            }
        }
        nearest.map(|(i, p, _)| (i, p))
    }
}

/// Grid offset of the tile across `side`
fn side_offset(side: u8) -> (i32, i32) {
    match side & 0x3 {
        0 => (1, 0),
        1 => (0, 1),
        2 => (-1, 0),
        _ => (0, -1),
    }
}

#[inline]
fn opposite_side(side: u8) -> u8 {
    (side + 2) % 4
}

/// Coordinate along a portal edge (u) and its height, for the given side
fn slab_point(v: Vec3, side: u8) -> (f32, f32) {
    if side % 2 == 0 {
        (v.z, v.y)
    } else {
        (v.x, v.y)
    }
}

/// Coordinate across a portal edge, shared by both tiles on a border
fn slab_coord(v: Vec3, side: u8) -> f32 {
    if side % 2 == 0 {
        v.x
    } else {
        v.z
    }
}

fn slab_end_points(va: Vec3, vb: Vec3, side: u8) -> ((f32, f32), (f32, f32)) {
    let a = slab_point(va, side);
    let b = slab_point(vb, side);
    if a.0 < b.0 {
        (a, b)
    } else {
        (b, a)
    }
}

/// Whether two portal edges overlap along the border and meet within `py` vertically
fn overlap_slabs(amin: (f32, f32), amax: (f32, f32), bmin: (f32, f32), bmax: (f32, f32), px: f32, py: f32) -> bool {
    let minx = (amin.0 + px).max(bmin.0 + px);
    let maxx = (amax.0 - px).min(bmax.0 - px);
    if minx > maxx {
        return false;
    }

    let slope = |lo: (f32, f32), hi: (f32, f32)| {
        let d = (hi.1 - lo.1) / (hi.0 - lo.0);
        (d, lo.1 - d * lo.0)
    };
    let (ad, ak) = slope(amin, amax);
    let (bd, bk) = slope(bmin, bmax);
    let dmin = (bd * minx + bk) - (ad * minx + ak);
    let dmax = (bd * maxx + bk) - (ad * maxx + ak);

    // Crossing segments always overlap
    if dmin * dmax < 0.0 {
        return true;
    }
    let thr = (py * 2.0) * (py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Navigation mesh made of independently added and removed tiles
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
    /// Free tile slots; the next slot to use is at the end
    next_free: Vec<usize>,
    pos_lookup: HashMap<(i32, i32, i32), usize>,
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

impl NavMesh {
    /// Creates a new navigation mesh with `params.max_tiles` empty tile slots
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if !params.origin.is_finite() || !(params.tile_width > 0.0) || !(params.tile_height > 0.0) {
            return Err(Status::InvalidParam.into());
        }
        if params.max_tiles <= 0 || params.max_polys_per_tile <= 0 {
            return Err(Status::InvalidParam.into());
        }

        let tile_bits = ilog2(next_pow2(params.max_tiles as u32));
        let poly_bits = ilog2(next_pow2(params.max_polys_per_tile as u32));
        let salt_bits = match 32u32.checked_sub(tile_bits + poly_bits) {
            Some(bits) if bits >= DT_MIN_SALT_BITS => bits.min(31),
            _ => return Err(Status::InvalidParam.into()),
        };

        let tiles = (0..params.max_tiles)
            .map(|_| MeshTile {
                salt: 1,
                ..MeshTile::default()
            })
            .collect();
        let next_free = (0..params.max_tiles as usize).rev().collect();

        Ok(Self {
            params,
            tiles,
            next_free,
            pos_lookup: HashMap::new(),
            salt_bits,
            tile_bits,
            poly_bits,
        })
    }

    /// Gets the navigation mesh parameters
    pub fn get_params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Gets the maximum number of tiles
    pub fn get_max_tiles(&self) -> i32 {
        self.params.max_tiles
    }

    /// Number of installed tiles
    pub fn tile_count(&self) -> usize {
        self.pos_lookup.len()
    }

    /// Creates a PolyRef from salt, tile index and polygon index
    #[inline]
    pub fn encode_poly_ref(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        PolyRef::new(
            ((salt & salt_mask) << (self.poly_bits + self.tile_bits))
                | ((tile & tile_mask) << self.poly_bits)
                | (poly & poly_mask),
        )
    }

    /// Decodes a PolyRef into salt, tile index and polygon index
    #[inline]
    pub fn decode_poly_ref(&self, reference: PolyRef) -> (u32, u32, u32) {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        let id = reference.id();
        (
            (id >> (self.poly_bits + self.tile_bits)) & salt_mask,
            (id >> self.poly_bits) & tile_mask,
            id & poly_mask,
        )
    }

    fn tile_ref_at_index(&self, idx: usize) -> TileRef {
        TileRef::new(self.encode_poly_ref(self.tiles[idx].salt, idx as u32, 0).id())
    }

    fn poly_ref(&self, tile_idx: usize, poly_idx: usize) -> PolyRef {
        self.encode_poly_ref(self.tiles[tile_idx].salt, tile_idx as u32, poly_idx as u32)
    }

    /// Tile grid location containing a world position
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let tx = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let ty = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Gets the tile at the given grid location
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.pos_lookup.get(&(x, y, layer)).map(|&i| &self.tiles[i])
    }

    /// Gets the reference of the tile at the given grid location
    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<TileRef> {
        self.pos_lookup
            .get(&(x, y, layer))
            .map(|&i| self.tile_ref_at_index(i))
    }

    /// Slot indices of every layer installed at a grid location
    pub(crate) fn tile_indices_at(&self, x: i32, y: i32) -> impl Iterator<Item = usize> + '_ {
        self.pos_lookup
            .iter()
            .filter(move |((tx, ty, _), _)| *tx == x && *ty == y)
            .map(|(_, &i)| i)
    }

    pub(crate) fn tile_by_index(&self, idx: usize) -> &MeshTile {
        &self.tiles[idx]
    }

    /// All installed tiles with their references
    pub fn tiles(&self) -> impl Iterator<Item = (TileRef, &MeshTile)> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_occupied())
            .map(|(i, t)| (self.tile_ref_at_index(i), t))
    }

    /// Reference of the first polygon of a tile
    pub fn get_poly_ref_base(&self, tile_ref: TileRef) -> PolyRef {
        PolyRef::new(tile_ref.id())
    }

    fn tile_index_of(&self, reference: PolyRef) -> Option<(usize, usize)> {
        let (salt, it, ip) = self.decode_poly_ref(reference);
        let tile = self.tiles.get(it as usize)?;
        if !tile.is_occupied() || tile.salt != salt || ip as usize >= tile.polys.len() {
            return None;
        }
        Some((it as usize, ip as usize))
    }

    /// Whether the reference points to an installed polygon
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.tile_index_of(reference).is_some()
    }

    /// Gets the tile and polygon a reference points to
    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (it, ip) = self.tile_index_of(reference).ok_or(Status::InvalidParam)?;
        let tile = &self.tiles[it];
        Ok((tile, &tile.polys[ip]))
    }

    /// Tile and polygon index a reference points to
    pub fn get_tile_and_poly_index(&self, reference: PolyRef) -> Result<(&MeshTile, usize)> {
        let (it, ip) = self.tile_index_of(reference).ok_or(Status::InvalidParam)?;
        Ok((&self.tiles[it], ip))
    }

    /// Links leaving a polygon
    pub fn get_links(&self, reference: PolyRef) -> Result<&[Link]> {
        let (tile, ip) = self.get_tile_and_poly_index(reference)?;
        Ok(&tile.links[ip])
    }

    /// End points of the portal between two linked polygons
    pub fn get_portal_points(&self, from: PolyRef, to: PolyRef) -> Result<(Vec3, Vec3)> {
        let (from_tile, from_idx) = self.get_tile_and_poly_index(from)?;
        let (to_tile, to_idx) = self.get_tile_and_poly_index(to)?;
        let from_poly = &from_tile.polys[from_idx];
        let to_poly = &to_tile.polys[to_idx];

        let link = from_tile.links[from_idx]
            .iter()
            .find(|l| l.reference == to)
            .ok_or(Status::InvalidParam)?;

        if from_poly.poly_type == PolyType::OffMeshConnection {
            let v = from_tile.verts[from_poly.verts[(link.edge & 1) as usize] as usize];
            return Ok((v, v));
        }

        if to_poly.poly_type == PolyType::OffMeshConnection {
            let back = to_tile.links[to_idx]
                .iter()
                .find(|l| l.reference == from)
                .ok_or(Status::InvalidParam)?;
            let v = to_tile.verts[to_poly.verts[(back.edge & 1) as usize] as usize];
            return Ok((v, v));
        }

        let nv = from_poly.vert_count as usize;
        let edge = link.edge as usize;
        let v0 = from_tile.verts[from_poly.verts[edge] as usize];
        let v1 = from_tile.verts[from_poly.verts[(edge + 1) % nv] as usize];

        if link.side != DT_INTERNAL_SIDE && (link.bmin != 0 || link.bmax != 255) {
            let s = 1.0 / 255.0;
            let tmin = link.bmin as f32 * s;
            let tmax = link.bmax as f32 * s;
            return Ok((v0.lerp(v1, tmin), v0.lerp(v1, tmax)));
        }
        Ok((v0, v1))
    }

    /// Midpoint of the portal between two linked polygons
    pub fn get_edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<Vec3> {
        let (left, right) = self.get_portal_points(from, to)?;
        Ok((left + right) * 0.5)
    }

    /// Installs a tile from its data blob.
    ///
    /// With `last_ref` the tile is placed back into the slot and salt the reference names,
    /// which keeps previously stored references valid.
    pub fn add_tile(&mut self, data: Vec<u8>, last_ref: Option<TileRef>) -> Result<TileRef> {
        let mut tile = read_tile(&data)?;
        let header = tile.header.clone().ok_or(Status::DataCorrupted)?;

        if header.poly_count as u64 > (1u64 << self.poly_bits) {
            return Err(Status::InvalidParam.into());
        }
        if self.pos_lookup.contains_key(&(header.x, header.y, header.layer)) {
            return Err(Status::AlreadyExists.into());
        }

        let (idx, salt) = match last_ref {
            None => {
                let idx = self.next_free.pop().ok_or(Status::OutOfMemory)?;
                (idx, self.tiles[idx].salt)
            }
            Some(r) => {
                let (salt, it, _) = self.decode_poly_ref(PolyRef::new(r.id()));
                let idx = it as usize;
                let pos = self
                    .next_free
                    .iter()
                    .position(|&i| i == idx)
                    .ok_or(Status::OutOfMemory)?;
                if salt == 0 {
                    return Err(Status::InvalidParam.into());
                }
                self.next_free.remove(pos);
                (idx, salt)
            }
        };

        tile.salt = salt;
        tile.links = vec![Vec::new(); tile.polys.len()];
        tile.data = data;
        self.tiles[idx] = tile;
        self.pos_lookup.insert((header.x, header.y, header.layer), idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        self.connect_off_mesh_ends(idx, idx);

        for side in 0..4u8 {
            let (dx, dy) = side_offset(side);
            if let Some(&nei) = self.pos_lookup.get(&(header.x + dx, header.y + dy, header.layer)) {
                self.connect_ext_links(idx, nei, side);
                self.connect_ext_links(nei, idx, opposite_side(side));
            }
        }
        for nei in self.neighbour_indices(header.x, header.y, header.layer) {
            self.connect_off_mesh_ends(idx, nei);
            self.connect_off_mesh_ends(nei, idx);
        }

        let tile_ref = self.tile_ref_at_index(idx);
        log::debug!(
            "added tile ({}, {}, {}) with {} polygons as {:?}",
            header.x,
            header.y,
            header.layer,
            header.poly_count,
            tile_ref
        );
        Ok(tile_ref)
    }

    /// Removes a tile and returns the data it was created from
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<Vec<u8>> {
        let (salt, it, _) = self.decode_poly_ref(PolyRef::new(tile_ref.id()));
        let idx = it as usize;
        let header = match self.tiles.get(idx) {
            Some(tile) if tile.salt == salt => tile.header.clone().ok_or(Status::InvalidParam)?,
            _ => return Err(Status::InvalidParam.into()),
        };

        self.pos_lookup.remove(&(header.x, header.y, header.layer));

        // Drop every link that points into the removed tile
        for nei in self.neighbour_indices(header.x, header.y, header.layer) {
            let poly_bits = self.poly_bits;
            let tile_mask = (1u32 << self.tile_bits) - 1;
            for links in &mut self.tiles[nei].links {
                links.retain(|l| ((l.reference.id() >> poly_bits) & tile_mask) != it);
            }
        }

        let old = std::mem::take(&mut self.tiles[idx]);
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let mut next_salt = (old.salt + 1) & salt_mask;
        if next_salt == 0 {
            next_salt = 1;
        }
        self.tiles[idx].salt = next_salt;
        self.next_free.push(idx);

        log::debug!("removed tile ({}, {}, {})", header.x, header.y, header.layer);
        Ok(old.data)
    }

    /// Slots of the up to eight tiles surrounding a grid location
    fn neighbour_indices(&self, x: i32, y: i32, layer: i32) -> Vec<usize> {
        let mut out = Vec::with_capacity(8);
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if let Some(&i) = self.pos_lookup.get(&(x + dx, y + dy, layer)) {
                    out.push(i);
                }
            }
        }
        out
    }

    fn connect_int_links(&mut self, idx: usize) {
        let base = self.poly_ref(idx, 0).id();
        let MeshTile { polys, links, .. } = &mut self.tiles[idx];
        for (i, poly) in polys.iter().enumerate() {
            if poly.poly_type != PolyType::Ground {
                continue;
            }
            for j in 0..poly.vert_count as usize {
                let nei = poly.neis[j];
                if nei == 0 || nei & DT_EXT_LINK != 0 {
                    continue;
                }
                let reference = PolyRef::new(base | (nei - 1) as u32);
                links[i].push(Link::internal(reference, j as u8));
            }
        }
    }

    /// Connects the start point of every off-mesh connection to the ground polygon under it
    fn base_off_mesh_links(&mut self, idx: usize) {
        let tile = &self.tiles[idx];
        let climb = tile.header.as_ref().map_or(0.0, |h| h.walkable_climb);
        let mut new_links = Vec::new();
        for con in &tile.off_mesh_connections {
            let ext = Vec3::new(con.radius, climb, con.radius);
            if let Some((land, _)) = tile.find_nearest_poly(con.start, ext) {
                new_links.push((con.poly as usize, land));
            }
        }
        for (con_poly, land) in new_links {
            let land_ref = self.poly_ref(idx, land);
            let con_ref = self.poly_ref(idx, con_poly);
            self.tiles[idx].links[con_poly].push(Link::internal(land_ref, 0));
            self.tiles[idx].links[land].push(Link::internal(con_ref, 0xff));
        }
    }

    /// Connects the end points of `src`'s off-mesh connections to ground polygons of `dst`
    fn connect_off_mesh_ends(&mut self, src: usize, dst: usize) {
        let Some(dst_header) = self.tiles[dst].header.clone() else {
            return;
        };
        let mut new_links = Vec::new();
        for con in &self.tiles[src].off_mesh_connections {
            let end = con.end;
            if end.x < dst_header.bmin.x
                || end.x > dst_header.bmax.x
                || end.z < dst_header.bmin.z
                || end.z > dst_header.bmax.z
            {
                continue;
            }
            let ext = Vec3::new(con.radius, dst_header.walkable_climb, con.radius);
            if let Some((land, _)) = self.tiles[dst].find_nearest_poly(end, ext) {
                new_links.push((con.poly as usize, land, con.bidirectional));
            }
        }
        for (con_poly, land, bidirectional) in new_links {
            let land_ref = self.poly_ref(dst, land);
            let con_ref = self.poly_ref(src, con_poly);
            self.tiles[src].links[con_poly].push(Link::internal(land_ref, 1));
            if bidirectional {
                self.tiles[dst].links[land].push(Link::internal(con_ref, 0xff));
            }
        }
    }

    /// Links the portal edges of tile `idx` on `side` to the matching edges of tile `target`
    fn connect_ext_links(&mut self, idx: usize, target: usize, side: u8) {
        let mut new_links = Vec::new();
        {
            let tile = &self.tiles[idx];
            let m = DT_EXT_LINK | side as u16;
            for (i, poly) in tile.polys.iter().enumerate() {
                let nv = poly.vert_count as usize;
                for j in 0..nv {
                    if poly.neis[j] != m {
                        continue;
                    }
                    let va = tile.verts[poly.verts[j] as usize];
                    let vb = tile.verts[poly.verts[(j + 1) % nv] as usize];
                    for (nei, cmin, cmax) in self.find_connecting_polys(target, va, vb, opposite_side(side)) {
                        // Portion of this edge covered by the neighbour
                        let (ua, _) = slab_point(va, side);
                        let (ub, _) = slab_point(vb, side);
                        let mut tmin = (cmin - ua) / (ub - ua);
                        let mut tmax = (cmax - ua) / (ub - ua);
                        if tmin > tmax {
                            std::mem::swap(&mut tmin, &mut tmax);
                        }
                        new_links.push((
                            i,
                            Link {
                                reference: nei,
                                edge: j as u8,
                                side,
                                bmin: (tmin.clamp(0.0, 1.0) * 255.0).round() as u8,
                                bmax: (tmax.clamp(0.0, 1.0) * 255.0).round() as u8,
                            },
                        ));
                    }
                }
            }
        }
        for (i, link) in new_links {
            self.tiles[idx].links[i].push(link);
        }
    }

    /// Polygons of tile `target` with a portal edge on `side` overlapping segment (va, vb).
    ///
    /// Returns each polygon with the overlapping interval along the border.
    fn find_connecting_polys(&self, target: usize, va: Vec3, vb: Vec3, side: u8) -> Vec<(PolyRef, f32, f32)> {
        const EDGE_EPS: f32 = 0.01;
        let tile = &self.tiles[target];
        let climb = tile.header.as_ref().map_or(0.0, |h| h.walkable_climb);
        let (amin, amax) = slab_end_points(va, vb, side);
        if (amax.0 - amin.0).abs() < f32::EPSILON {
            return Vec::new();
        }
        let apos = slab_coord(va, side);
        let m = DT_EXT_LINK | side as u16;

        let mut out = Vec::new();
        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != m {
                    continue;
                }
                let vc = tile.verts[poly.verts[j] as usize];
                let vd = tile.verts[poly.verts[(j + 1) % nv] as usize];
                if (slab_coord(vc, side) - apos).abs() > EDGE_EPS {
                    continue;
                }
                let (bmin, bmax) = slab_end_points(vc, vd, side);
                if (bmax.0 - bmin.0).abs() < f32::EPSILON {
                    continue;
                }
                if !overlap_slabs(amin, amax, bmin, bmax, EDGE_EPS, climb) {
                    continue;
                }
                out.push((self.poly_ref(target, i), amin.0.max(bmin.0), amax.0.min(bmax.0)));
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{plane_params, plane_tile_data};

    #[test]
    fn test_rejects_too_many_reference_bits() {
        let mut params = plane_params(1 << 14);
        params.max_polys_per_tile = 1 << 10;
        assert!(NavMesh::new(params).is_err());
        params.max_polys_per_tile = 1 << 8;
        assert!(NavMesh::new(params).is_ok());
    }

    #[test]
    fn test_poly_ref_encoding() {
        let nav = NavMesh::new(plane_params(16)).unwrap();
        let r = nav.encode_poly_ref(5, 3, 17);
        assert_eq!(nav.decode_poly_ref(r), (5, 3, 17));
        assert!(!r.is_null());
    }

    #[test]
    fn test_add_and_remove_tile() {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        let data = plane_tile_data(10.0, 0, 0);
        let tref = nav.add_tile(data.clone(), None).unwrap();
        assert_eq!(nav.tile_count(), 1);
        assert_eq!(nav.get_tile_ref_at(0, 0, 0), Some(tref));

        let tile = nav.get_tile_at(0, 0, 0).unwrap();
        assert!(!tile.polys.is_empty());
        let first = nav.get_poly_ref_base(tref);
        assert!(nav.is_valid_poly_ref(first));

        // Same location again is rejected
        assert!(nav.add_tile(data.clone(), None).is_err());

        let removed = nav.remove_tile(tref).unwrap();
        assert_eq!(removed, data);
        assert_eq!(nav.tile_count(), 0);
        assert!(!nav.is_valid_poly_ref(first));
        assert!(nav.remove_tile(tref).is_err());

        // The slot is reused with a new salt
        let again = nav.add_tile(data, None).unwrap();
        assert_ne!(again, tref);
        assert!(!nav.is_valid_poly_ref(first));
    }

    #[test]
    fn test_add_tile_with_last_ref() {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        let tref = nav.encode_poly_ref(7, 4, 0);
        let placed = nav
            .add_tile(plane_tile_data(10.0, 0, 0), Some(TileRef::new(tref.id())))
            .unwrap();
        assert_eq!(placed.id(), tref.id());
        assert_eq!(nav.decode_poly_ref(PolyRef::new(placed.id())), (7, 4, 0));
    }

    #[test]
    fn test_calc_tile_loc() {
        let nav = NavMesh::new(plane_params(16)).unwrap();
        let w = nav.get_params().tile_width;
        assert_eq!(nav.calc_tile_loc(Vec3::new(0.1, 0.0, 0.1)), (0, 0));
        assert_eq!(nav.calc_tile_loc(Vec3::new(w + 0.1, 0.0, 2.0 * w + 0.1)), (1, 2));
        assert_eq!(nav.calc_tile_loc(Vec3::new(-0.1, 0.0, 0.1)), (-1, 0));
    }

    #[test]
    fn test_internal_links_are_symmetric() {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        nav.add_tile(plane_tile_data(10.0, 0, 0), None).unwrap();
        let (tref, tile) = nav.tiles().next().unwrap();
        let base = nav.get_poly_ref_base(tref).id();
        for (i, links) in tile.links.iter().enumerate() {
            for link in links {
                let back = nav.get_links(link.reference).unwrap();
                assert!(back.iter().any(|l| l.reference.id() == base | i as u32));
            }
        }
    }

    #[test]
    fn test_neighbour_tiles_are_stitched() {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        let a = nav.add_tile(plane_tile_data(20.0, 0, 0), None).unwrap();
        let b = nav.add_tile(plane_tile_data(20.0, 1, 0), None).unwrap();
        let (_, ia, _) = nav.decode_poly_ref(PolyRef::new(a.id()));
        let (_, ib, _) = nav.decode_poly_ref(PolyRef::new(b.id()));

        fn portal_links(nav: &NavMesh, from: u32, to: u32) -> usize {
            nav.tile_by_index(from as usize)
                .links
                .iter()
                .flatten()
                .filter(|l| l.side != DT_INTERNAL_SIDE)
                .filter(|l| nav.decode_poly_ref(l.reference).1 == to)
                .count()
        }
        assert!(portal_links(&nav, ia, ib) > 0);
        assert!(portal_links(&nav, ib, ia) > 0);

        // Removing one tile unlinks the other
        nav.remove_tile(b).unwrap();
        assert_eq!(portal_links(&nav, ia, ib), 0);
    }

    #[test]
    fn test_poly_height_on_flat_plane() {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        nav.add_tile(plane_tile_data(10.0, 0, 0), None).unwrap();
        let tile = nav.get_tile_at(0, 0, 0).unwrap();
        let p = Vec3::new(4.0, 0.0, 4.0);
        let (i, nearest) = tile.find_nearest_poly(p, Vec3::new(1.0, 2.0, 1.0)).unwrap();
        assert!((nearest.x - 4.0).abs() < 1e-4 && (nearest.z - 4.0).abs() < 1e-4);
        let h = tile.get_poly_height(i, p).unwrap();
        assert!(h.abs() < 0.5, "height {}", h);
    }

    #[test]
    fn test_overlap_slabs() {
        let a = ((0.0, 0.0), (4.0, 0.0));
        assert!(overlap_slabs(a.0, a.1, (2.0, 0.1), (6.0, 0.1), 0.01, 0.4));
        assert!(!overlap_slabs(a.0, a.1, (5.0, 0.0), (6.0, 0.0), 0.01, 0.4));
        assert!(!overlap_slabs(a.0, a.1, (1.0, 3.0), (3.0, 3.0), 0.01, 0.4));
    }
}
