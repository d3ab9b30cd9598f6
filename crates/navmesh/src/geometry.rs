//! Input geometry: the triangle soup a navigation mesh is built from, plus off-mesh links

use std::path::Path;

use detour::{OffMeshConnectionParams, PolyFlags, POLY_AREA_JUMP};
use glam::Vec3;
use recast_common::{calc_bounds, vert_at, Error, Result};
use serde::{Deserialize, Serialize};

/// Triangle soup with cached bounds
#[derive(Debug, Clone, PartialEq)]
pub struct InputGeometry {
    verts: Vec<f32>,
    tris: Vec<i32>,
    bmin: Vec3,
    bmax: Vec3,
}

impl InputGeometry {
    /// Creates geometry from a flat vertex buffer and triangle indices
    pub fn new(verts: Vec<f32>, tris: Vec<i32>) -> Result<Self> {
        if verts.is_empty() || tris.is_empty() {
            return Err(Error::Configuration("input geometry is empty".to_string()));
        }
        if verts.len() % 3 != 0 || tris.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "vertex and index buffers must hold whole triples".to_string(),
            ));
        }
        let vert_count = (verts.len() / 3) as i32;
        if let Some(bad) = tris.iter().find(|&&i| i < 0 || i >= vert_count) {
            return Err(Error::InvalidMesh(format!(
                "triangle index {} out of range (0..{})",
                bad, vert_count
            )));
        }
        let (bmin, bmax) = calc_bounds(&verts);
        Ok(Self {
            verts,
            tris,
            bmin,
            bmax,
        })
    }

    /// Parses Wavefront OBJ text
    ///
    /// Only `v` and `f` records are read. Faces with more than three corners are fan
    /// triangulated and negative indices count back from the last vertex.
    pub fn from_obj_str(content: &str) -> Result<Self> {
        let mut verts = Vec::new();
        let mut tris = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            parse_obj_line(line, &mut verts, &mut tris)
                .map_err(|e| Error::InvalidMesh(format!("line {}: {}", line_no + 1, e)))?;
        }
        Self::new(verts, tris)
    }

    pub fn from_obj_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_obj_str(&content)
    }

    pub fn vertices(&self) -> &[f32] {
        &self.verts
    }

    pub fn triangles(&self) -> &[i32] {
        &self.tris
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn tri_count(&self) -> usize {
        self.tris.len() / 3
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bmin, self.bmax)
    }

    /// Indices of the triangles whose xz bounds overlap `bmin..bmax`
    pub fn triangles_in_bounds(&self, bmin: Vec3, bmax: Vec3) -> Vec<i32> {
        let mut out = Vec::new();
        for tri in self.tris.chunks_exact(3) {
            let a = vert_at(&self.verts, tri[0] as usize);
            let b = vert_at(&self.verts, tri[1] as usize);
            let c = vert_at(&self.verts, tri[2] as usize);
            let tmin = a.min(b).min(c);
            let tmax = a.max(b).max(c);
            if tmin.x <= bmax.x && tmax.x >= bmin.x && tmin.z <= bmax.z && tmax.z >= bmin.z {
                out.extend_from_slice(tri);
            }
        }
        out
    }
}

fn parse_obj_index(token: &str, vert_count: usize) -> std::result::Result<i32, String> {
    // "f 1/2/3" style corners keep only the position index
    let raw = token.split('/').next().unwrap_or(token);
    let idx: i64 = raw
        .parse()
        .map_err(|_| format!("invalid face index '{}'", token))?;
    let resolved = if idx < 0 { vert_count as i64 + idx } else { idx - 1 };
    if resolved < 0 || resolved >= vert_count as i64 {
        return Err(format!("face index {} out of range", idx));
    }
    Ok(resolved as i32)
}

fn parse_obj_line(line: &str, verts: &mut Vec<f32>, tris: &mut Vec<i32>) -> std::result::Result<(), String> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("v") => {
            for axis in ["x", "y", "z"] {
                let value = tokens
                    .next()
                    .ok_or_else(|| format!("vertex is missing its {} coordinate", axis))?
                    .parse::<f32>()
                    .map_err(|_| format!("vertex {} coordinate is not a number", axis))?;
                verts.push(value);
            }
        }
        Some("f") => {
            let vert_count = verts.len() / 3;
            let corners = tokens
                .map(|t| parse_obj_index(t, vert_count))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if corners.len() < 3 {
                return Err("face needs at least 3 corners".to_string());
            }
            for i in 2..corners.len() {
                tris.extend_from_slice(&[corners[0], corners[i - 1], corners[i]]);
            }
        }
        _ => {}
    }
    Ok(())
}

/// An explicit link between two points the walkable surface does not connect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub bidirectional: bool,
    pub area: u8,
    pub flags: PolyFlags,
}

impl Default for OffMeshConnection {
    fn default() -> Self {
        Self {
            start: Vec3::ZERO,
            end: Vec3::ZERO,
            radius: 0.6,
            bidirectional: true,
            area: POLY_AREA_JUMP,
            flags: PolyFlags::JUMP,
        }
    }
}

impl OffMeshConnection {
    pub fn new(start: Vec3, end: Vec3, radius: f32, bidirectional: bool) -> Self {
        Self {
            start,
            end,
            radius,
            bidirectional,
            ..Self::default()
        }
    }

    pub(crate) fn to_params(self, user_id: u32) -> OffMeshConnectionParams {
        OffMeshConnectionParams {
            start: self.start,
            end: self.end,
            radius: self.radius,
            bidirectional: self.bidirectional,
            area: self.area,
            flags: self.flags,
            user_id,
        }
    }
}

/// Flat square plane at height `y`, split into two triangles
#[cfg(test)]
pub(crate) fn plane(size: f32, y: f32) -> InputGeometry {
    InputGeometry::new(
        vec![0.0, y, 0.0, 0.0, y, size, size, y, size, size, y, 0.0],
        vec![0, 1, 2, 0, 2, 3],
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_input() {
        assert!(InputGeometry::new(vec![], vec![]).unwrap_err().is_configuration());
        assert!(matches!(
            InputGeometry::new(vec![0.0; 9], vec![0, 1, 3]),
            Err(Error::InvalidMesh(_))
        ));
        assert!(matches!(
            InputGeometry::new(vec![0.0; 8], vec![0, 1, 2]),
            Err(Error::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_bounds() {
        let geom = plane(10.0, 1.5);
        assert_eq!(geom.bounds(), (Vec3::new(0.0, 1.5, 0.0), Vec3::new(10.0, 1.5, 10.0)));
        assert_eq!(geom.vert_count(), 4);
        assert_eq!(geom.tri_count(), 2);
    }

    #[test]
    fn test_obj_parsing() {
        let obj = r#"
            # a quad and a triangle
            v 0 0 0
            v 0 0 1
            v 1 0 1
            v 1 0 0
            vn 0 1 0
            f 1//1 2//1 3//1 4//1
            v 2 0 0
            f -3 -2 -1
        "#;
        let geom = InputGeometry::from_obj_str(obj).unwrap();
        assert_eq!(geom.vert_count(), 5);
        assert_eq!(geom.triangles(), &[0, 1, 2, 0, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_obj_errors() {
        assert!(InputGeometry::from_obj_str("v 0 0\n").is_err());
        assert!(InputGeometry::from_obj_str("v 0 0 0\nv 1 0 0\nf 1 2\n").is_err());
        assert!(InputGeometry::from_obj_str("v 0 0 0\nv 1 0 0\nv 1 0 1\nf 1 2 9\n").is_err());
        assert!(InputGeometry::from_obj_str("").unwrap_err().is_configuration());
    }

    #[test]
    fn test_obj_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.obj");
        std::fs::write(&path, "v 0 0 0\nv 0 0 1\nv 1 0 0\nf 1 2 3\n").unwrap();
        let geom = InputGeometry::from_obj_file(&path).unwrap();
        assert_eq!(geom.tri_count(), 1);
    }

    #[test]
    fn test_triangles_in_bounds() {
        let geom = InputGeometry::new(
            vec![
                0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, //
                10.0, 0.0, 10.0, 10.0, 0.0, 11.0, 11.0, 0.0, 10.0,
            ],
            vec![0, 1, 2, 3, 4, 5],
        )
        .unwrap();
        assert_eq!(
            geom.triangles_in_bounds(Vec3::splat(-1.0), Vec3::splat(2.0)),
            vec![0, 1, 2]
        );
        assert_eq!(geom.triangles_in_bounds(Vec3::splat(-1.0), Vec3::splat(20.0)).len(), 6);
        assert!(geom
            .triangles_in_bounds(Vec3::splat(4.0), Vec3::splat(5.0))
            .is_empty());
    }

    #[test]
    fn test_off_mesh_connection_defaults() {
        let con = OffMeshConnection::new(Vec3::ZERO, Vec3::X, 0.5, false);
        assert_eq!(con.area, POLY_AREA_JUMP);
        assert_eq!(con.flags, PolyFlags::JUMP);
        let params = con.to_params(7);
        assert_eq!(params.user_id, 7);
        assert!(!params.bidirectional);
    }
}
