//! Binary encoding of tile data and navigation mesh sets
//!
//! Tile data is a little-endian blob: a [`TileHeader`] followed by the vertex, polygon,
//! detail mesh and off-mesh connection arrays. A navigation mesh set wraps any number of
//! tile blobs together with the mesh parameters and each tile's reference, so that a loaded
//! mesh hands out the same references as the saved one.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;

use super::nav_mesh::{MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use super::{NavMesh, NavMeshParams, PolyFlags, PolyType, Status, TileRef, MAX_VERTS_PER_POLY};
use recast_common::{Error, Result};

/// Magic number of a tile data blob ('DNAV')
pub const DT_NAVMESH_MAGIC: u32 =
    ((b'D' as u32) << 24) | ((b'N' as u32) << 16) | ((b'A' as u32) << 8) | (b'V' as u32);
/// Version of the tile data layout
pub const DT_NAVMESH_VERSION: u32 = 7;

/// Magic number of a navigation mesh set ('MSET')
pub const NAVMESHSET_MAGIC: u32 =
    ((b'M' as u32) << 24) | ((b'S' as u32) << 16) | ((b'E' as u32) << 8) | (b'T' as u32);
/// Version of the navigation mesh set layout
pub const NAVMESHSET_VERSION: u32 = 1;

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<Vec3> {
    let x = reader.read_f32::<LittleEndian>()?;
    let y = reader.read_f32::<LittleEndian>()?;
    let z = reader.read_f32::<LittleEndian>()?;
    Ok(Vec3::new(x, y, z))
}

/// Reads a count field, rejecting negative values
fn read_count<R: Read>(reader: &mut R) -> Result<i32> {
    let n = reader.read_i32::<LittleEndian>()?;
    if n < 0 {
        return Err(Status::DataCorrupted.into());
    }
    Ok(n)
}

impl TileHeader {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(DT_NAVMESH_MAGIC)?;
        writer.write_u32::<LittleEndian>(DT_NAVMESH_VERSION)?;
        writer.write_i32::<LittleEndian>(self.x)?;
        writer.write_i32::<LittleEndian>(self.y)?;
        writer.write_i32::<LittleEndian>(self.layer)?;
        writer.write_u32::<LittleEndian>(self.user_id)?;
        writer.write_i32::<LittleEndian>(self.poly_count)?;
        writer.write_i32::<LittleEndian>(self.vert_count)?;
        writer.write_i32::<LittleEndian>(self.detail_mesh_count)?;
        writer.write_i32::<LittleEndian>(self.detail_vert_count)?;
        writer.write_i32::<LittleEndian>(self.detail_tri_count)?;
        writer.write_i32::<LittleEndian>(self.off_mesh_connection_count)?;
        writer.write_f32::<LittleEndian>(self.walkable_height)?;
        writer.write_f32::<LittleEndian>(self.walkable_radius)?;
        writer.write_f32::<LittleEndian>(self.walkable_climb)?;
        write_vec3(writer, self.bmin)?;
        write_vec3(writer, self.bmax)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        if reader.read_u32::<LittleEndian>()? != DT_NAVMESH_MAGIC {
            return Err(Status::WrongMagic.into());
        }
        if reader.read_u32::<LittleEndian>()? != DT_NAVMESH_VERSION {
            return Err(Status::WrongVersion.into());
        }
        Ok(TileHeader {
            x: reader.read_i32::<LittleEndian>()?,
            y: reader.read_i32::<LittleEndian>()?,
            layer: reader.read_i32::<LittleEndian>()?,
            user_id: reader.read_u32::<LittleEndian>()?,
            poly_count: read_count(reader)?,
            vert_count: read_count(reader)?,
            detail_mesh_count: read_count(reader)?,
            detail_vert_count: read_count(reader)?,
            detail_tri_count: read_count(reader)?,
            off_mesh_connection_count: read_count(reader)?,
            walkable_height: reader.read_f32::<LittleEndian>()?,
            walkable_radius: reader.read_f32::<LittleEndian>()?,
            walkable_climb: reader.read_f32::<LittleEndian>()?,
            bmin: read_vec3(reader)?,
            bmax: read_vec3(reader)?,
        })
    }
}

/// Serializes a tile (without its runtime links) into a tile data blob
pub(crate) fn write_tile(tile: &MeshTile) -> Result<Vec<u8>> {
    let header = tile.header.as_ref().ok_or(Status::InvalidParam)?;
    let mut buffer = Vec::new();
    header.write_to(&mut buffer)?;

    for v in &tile.verts {
        write_vec3(&mut buffer, *v)?;
    }

    for poly in &tile.polys {
        for &v in &poly.verts {
            buffer.write_u16::<LittleEndian>(v)?;
        }
        for &n in &poly.neis {
            buffer.write_u16::<LittleEndian>(n)?;
        }
        buffer.write_u16::<LittleEndian>(poly.flags.bits())?;
        buffer.write_u8(poly.vert_count)?;
        buffer.write_u8(poly.area)?;
        buffer.write_u8(match poly.poly_type {
            PolyType::Ground => 0,
            PolyType::OffMeshConnection => 1,
        })?;
    }

    for pd in &tile.detail_meshes {
        buffer.write_u32::<LittleEndian>(pd.vert_base)?;
        buffer.write_u32::<LittleEndian>(pd.tri_base)?;
        buffer.write_u8(pd.vert_count)?;
        buffer.write_u8(pd.tri_count)?;
    }

    for v in &tile.detail_verts {
        write_vec3(&mut buffer, *v)?;
    }

    for t in &tile.detail_tris {
        buffer.write_all(t)?;
    }

    for con in &tile.off_mesh_connections {
        write_vec3(&mut buffer, con.start)?;
        write_vec3(&mut buffer, con.end)?;
        buffer.write_f32::<LittleEndian>(con.radius)?;
        buffer.write_u16::<LittleEndian>(con.poly)?;
        buffer.write_u8(con.bidirectional as u8)?;
        buffer.write_u32::<LittleEndian>(con.user_id)?;
    }

    Ok(buffer)
}

/// Preallocation for `count` records, never more than the input could hold
fn capacity_hint(count: i32, data: &[u8]) -> usize {
    usize::try_from(count).unwrap_or(0).min(data.len())
}

/// Parses a tile data blob; links are left empty
pub(crate) fn read_tile(data: &[u8]) -> Result<MeshTile> {
    let mut reader = Cursor::new(data);
    let header = TileHeader::read_from(&mut reader)?;
    let counts = [
        header.vert_count,
        header.poly_count,
        header.detail_mesh_count,
        header.detail_vert_count,
        header.detail_tri_count,
        header.off_mesh_connection_count,
    ];
    if counts.iter().any(|&c| c < 0) {
        return Err(Status::DataCorrupted.into());
    }

    let verts = (0..header.vert_count)
        .map(|_| read_vec3(&mut reader))
        .collect::<Result<Vec<_>>>()?;

    let mut polys = Vec::with_capacity(capacity_hint(header.poly_count, data));
    for _ in 0..header.poly_count {
        let mut poly = Poly::default();
        for v in &mut poly.verts {
            *v = reader.read_u16::<LittleEndian>()?;
        }
        for n in &mut poly.neis {
            *n = reader.read_u16::<LittleEndian>()?;
        }
        poly.flags = PolyFlags::from_bits_truncate(reader.read_u16::<LittleEndian>()?);
        poly.vert_count = reader.read_u8()?;
        poly.area = reader.read_u8()?;
        poly.poly_type = match reader.read_u8()? {
            0 => PolyType::Ground,
            1 => PolyType::OffMeshConnection,
            _ => return Err(Status::DataCorrupted.into()),
        };
        let nv = poly.vert_count as usize;
        if nv > MAX_VERTS_PER_POLY || poly.verts[..nv].iter().any(|&v| v as usize >= verts.len()) {
            return Err(Status::DataCorrupted.into());
        }
        polys.push(poly);
    }

    let mut detail_meshes = Vec::with_capacity(capacity_hint(header.detail_mesh_count, data));
    for _ in 0..header.detail_mesh_count {
        detail_meshes.push(PolyDetail {
            vert_base: reader.read_u32::<LittleEndian>()?,
            tri_base: reader.read_u32::<LittleEndian>()?,
            vert_count: reader.read_u8()?,
            tri_count: reader.read_u8()?,
        });
    }

    let detail_verts = (0..header.detail_vert_count)
        .map(|_| read_vec3(&mut reader))
        .collect::<Result<Vec<_>>>()?;

    let mut detail_tris = Vec::with_capacity(capacity_hint(header.detail_tri_count, data));
    for _ in 0..header.detail_tri_count {
        let mut t = [0u8; 4];
        reader.read_exact(&mut t)?;
        detail_tris.push(t);
    }

    for pd in &detail_meshes {
        let vend = pd.vert_base as usize + pd.vert_count as usize;
        let tend = pd.tri_base as usize + pd.tri_count as usize;
        if vend > detail_verts.len() || tend > detail_tris.len() {
            return Err(Status::DataCorrupted.into());
        }
    }

    let mut off_mesh_connections = Vec::with_capacity(capacity_hint(header.off_mesh_connection_count, data));
    for _ in 0..header.off_mesh_connection_count {
        let con = OffMeshConnection {
            start: read_vec3(&mut reader)?,
            end: read_vec3(&mut reader)?,
            radius: reader.read_f32::<LittleEndian>()?,
            poly: reader.read_u16::<LittleEndian>()?,
            bidirectional: reader.read_u8()? != 0,
            user_id: reader.read_u32::<LittleEndian>()?,
        };
        if con.poly as usize >= polys.len() {
            return Err(Status::DataCorrupted.into());
        }
        off_mesh_connections.push(con);
    }

    Ok(MeshTile {
        salt: 0,
        header: Some(header),
        polys,
        verts,
        links: Vec::new(),
        detail_meshes,
        detail_verts,
        detail_tris,
        off_mesh_connections,
        data: Vec::new(),
    })
}

/// Header of a navigation mesh set
#[derive(Debug, Clone)]
struct NavMeshSetHeader {
    magic: u32,
    version: u32,
    tile_count: i32,
    params: NavMeshParams,
}

impl NavMeshSetHeader {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(self.tile_count)?;

        // Write params
        write_vec3(writer, self.params.origin)?;
        writer.write_f32::<LittleEndian>(self.params.tile_width)?;
        writer.write_f32::<LittleEndian>(self.params.tile_height)?;
        writer.write_i32::<LittleEndian>(self.params.max_tiles)?;
        writer.write_i32::<LittleEndian>(self.params.max_polys_per_tile)?;

        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_u32::<LittleEndian>()?;
        let tile_count = read_count(reader)?;

        // Read params
        let origin = read_vec3(reader)?;
        let tile_width = reader.read_f32::<LittleEndian>()?;
        let tile_height = reader.read_f32::<LittleEndian>()?;
        let max_tiles = reader.read_i32::<LittleEndian>()?;
        let max_polys_per_tile = reader.read_i32::<LittleEndian>()?;

        Ok(NavMeshSetHeader {
            magic,
            version,
            tile_count,
            params: NavMeshParams {
                origin,
                tile_width,
                tile_height,
                max_tiles,
                max_polys_per_tile,
            },
        })
    }
}

/// Saves every installed tile of a navigation mesh into a navigation mesh set
pub fn save_nav_mesh_set(nav_mesh: &NavMesh) -> Result<Vec<u8>> {
    let tiles: Vec<(TileRef, &MeshTile)> = nav_mesh.tiles().filter(|(_, t)| !t.data.is_empty()).collect();

    let header = NavMeshSetHeader {
        magic: NAVMESHSET_MAGIC,
        version: NAVMESHSET_VERSION,
        tile_count: tiles.len() as i32,
        params: *nav_mesh.get_params(),
    };

    let mut buffer = Vec::new();
    header.write_to(&mut buffer)?;

    for (tile_ref, tile) in tiles {
        buffer.write_u32::<LittleEndian>(tile_ref.id())?;
        buffer.write_i32::<LittleEndian>(tile.data.len() as i32)?;
        buffer.extend_from_slice(&tile.data);
    }

    Ok(buffer)
}

/// Loads a navigation mesh set into a fresh navigation mesh.
///
/// Each tile is reinstalled under the reference it was saved with.
pub fn load_nav_mesh_set(data: &[u8]) -> Result<NavMesh> {
    let mut cursor = Cursor::new(data);
    let header = NavMeshSetHeader::read_from(&mut cursor)?;
    if header.magic != NAVMESHSET_MAGIC {
        return Err(Status::WrongMagic.into());
    }
    if header.version != NAVMESHSET_VERSION {
        return Err(Status::WrongVersion.into());
    }

    let mut nav_mesh = NavMesh::new(header.params)?;
    for _ in 0..header.tile_count {
        let tile_ref = TileRef::new(cursor.read_u32::<LittleEndian>()?);
        let data_size = cursor.read_i32::<LittleEndian>()?;
        if tile_ref.is_null() || data_size <= 0 {
            break;
        }
        let remaining = data.len() as u64 - cursor.position().min(data.len() as u64);
        if data_size as u64 > remaining {
            return Err(Status::DataCorrupted.into());
        }
        let mut tile_data = vec![0u8; data_size as usize];
        cursor.read_exact(&mut tile_data)?;
        nav_mesh.add_tile(tile_data, Some(tile_ref))?;
    }

    log::debug!("loaded navigation mesh set with {} tiles", nav_mesh.tile_count());
    Ok(nav_mesh)
}

/// Writes a navigation mesh set to a file, replacing any previous content
pub fn save_nav_mesh_set_to_file<P: AsRef<Path>>(nav_mesh: &NavMesh, path: P) -> Result<()> {
    let data = save_nav_mesh_set(nav_mesh)?;
    std::fs::write(path, data).map_err(Error::from)
}

/// Reads a navigation mesh set from a file
pub fn load_nav_mesh_set_from_file<P: AsRef<Path>>(path: P) -> Result<NavMesh> {
    let data = std::fs::read(path)?;
    load_nav_mesh_set(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{plane_params, plane_tile_data};

    #[test]
    fn test_tile_blob_round_trip() {
        let data = plane_tile_data(10.0, 0, 0);
        let tile = read_tile(&data).unwrap();
        assert_eq!(write_tile(&tile).unwrap(), data);
        let header = tile.header.unwrap();
        assert_eq!(header.poly_count as usize, tile.polys.len());
        assert_eq!(header.detail_mesh_count as usize, tile.detail_meshes.len());
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        let mut data = plane_tile_data(10.0, 0, 0);
        let truncated = &data[..data.len() / 2];
        assert!(read_tile(truncated).is_err());

        data[0] ^= 0xff;
        let err = read_tile(&data).unwrap_err();
        assert!(matches!(err, Error::Detour(ref m) if m == "Wrong magic number"));
    }

    #[test]
    fn test_inflated_counts_fail_without_allocating() {
        let mut data = plane_tile_data(10.0, 0, 0);
        // poly_count follows magic, version, x, y, layer and user id
        data[24..28].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(read_tile(&data).is_err());
        data[24..28].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(read_tile(&data).is_err());
    }

    #[test]
    fn test_nav_mesh_set_round_trip() {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        for (tx, ty) in [(0, 0), (1, 0), (0, 1)] {
            nav.add_tile(plane_tile_data(20.0, tx, ty), None).unwrap();
        }
        // Leave a hole in the slot order
        let removed = nav.get_tile_ref_at(1, 0, 0).unwrap();
        let data = nav.remove_tile(removed).unwrap();
        nav.add_tile(data, None).unwrap();

        let bytes = save_nav_mesh_set(&nav).unwrap();
        let loaded = load_nav_mesh_set(&bytes).unwrap();
        assert_eq!(loaded.tile_count(), nav.tile_count());
        assert_eq!(loaded.get_params(), nav.get_params());
        for (tile_ref, tile) in nav.tiles() {
            let header = tile.header.as_ref().unwrap();
            assert_eq!(loaded.get_tile_ref_at(header.x, header.y, header.layer), Some(tile_ref));
            let other = loaded.get_tile_at(header.x, header.y, header.layer).unwrap();
            assert_eq!(other.data, tile.data);
        }
    }

    #[test]
    fn test_nav_mesh_set_file_round_trip() {
        let mut nav = NavMesh::new(plane_params(4)).unwrap();
        nav.add_tile(plane_tile_data(10.0, 0, 0), None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_tiles.bin");
        save_nav_mesh_set_to_file(&nav, &path).unwrap();
        let loaded = load_nav_mesh_set_from_file(&path).unwrap();
        assert_eq!(loaded.tile_count(), 1);
    }

    #[test]
    fn test_tile_length_past_end_is_rejected() {
        let header_len = save_nav_mesh_set(&NavMesh::new(plane_params(4)).unwrap()).unwrap().len();
        let mut nav = NavMesh::new(plane_params(4)).unwrap();
        nav.add_tile(plane_tile_data(10.0, 0, 0), None).unwrap();
        let mut bytes = save_nav_mesh_set(&nav).unwrap();

        let size_at = header_len + 4;
        bytes[size_at..size_at + 4].copy_from_slice(&i32::MAX.to_le_bytes());
        let err = load_nav_mesh_set(&bytes).unwrap_err();
        assert!(matches!(err, Error::Detour(_)));

        let tile_len = (bytes.len() - header_len - 8) as i32;
        bytes[size_at..size_at + 4].copy_from_slice(&(tile_len + 1).to_le_bytes());
        assert!(load_nav_mesh_set(&bytes).is_err());
        bytes[size_at..size_at + 4].copy_from_slice(&tile_len.to_le_bytes());
        assert_eq!(load_nav_mesh_set(&bytes).unwrap().tile_count(), 1);
    }

    #[test]
    fn test_wrong_set_version() {
        let nav = NavMesh::new(plane_params(4)).unwrap();
        let mut bytes = save_nav_mesh_set(&nav).unwrap();
        bytes[4] = 9;
        assert!(load_nav_mesh_set(&bytes).is_err());
    }
}
