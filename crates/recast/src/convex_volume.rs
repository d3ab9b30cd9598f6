//! Convex volumes that override the area id of the walkable surface they enclose

use glam::Vec3;

use super::area::mark_convex_poly_area;
use super::compact_heightfield::CompactHeightfield;
use recast_common::{Error, Result};

/// Maximum number of vertices in a convex volume
pub const MAX_CONVEX_VOLUME_VERTS: usize = 12;

/// A convex prism: a convex polygon on the xz-plane extruded between two heights
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// Polygon vertices (world space, y ignored)
    pub vertices: Vec<Vec3>,
    /// Lowest floor height affected
    pub min_height: f32,
    /// Highest floor height affected
    pub max_height: f32,
    /// Area id applied inside the volume
    pub area_type: u8,
}

impl ConvexVolume {
    /// Creates a convex volume, rejecting degenerate or non-convex outlines
    pub fn new(vertices: Vec<Vec3>, min_height: f32, max_height: f32, area_type: u8) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::InvalidMesh(
                "convex volume requires at least 3 vertices".to_string(),
            ));
        }
        if vertices.len() > MAX_CONVEX_VOLUME_VERTS {
            return Err(Error::InvalidMesh(format!(
                "convex volume has too many vertices: {} (max {})",
                vertices.len(),
                MAX_CONVEX_VOLUME_VERTS
            )));
        }
        if min_height > max_height {
            return Err(Error::InvalidMesh(
                "convex volume min height above max height".to_string(),
            ));
        }
        if !Self::is_convex(&vertices) {
            return Err(Error::InvalidMesh(
                "convex volume outline is not convex".to_string(),
            ));
        }

        Ok(Self {
            vertices,
            min_height,
            max_height,
            area_type,
        })
    }

    /// Creates an axis-aligned box volume around `center`
    pub fn from_box(center: Vec3, half_extents: Vec3, area_type: u8) -> Result<Self> {
        let (min_x, max_x) = (center.x - half_extents.x, center.x + half_extents.x);
        let (min_z, max_z) = (center.z - half_extents.z, center.z + half_extents.z);
        Self::new(
            vec![
                Vec3::new(min_x, center.y, min_z),
                Vec3::new(min_x, center.y, max_z),
                Vec3::new(max_x, center.y, max_z),
                Vec3::new(max_x, center.y, min_z),
            ],
            center.y - half_extents.y,
            center.y + half_extents.y,
            area_type,
        )
    }

    /// Whether all turns of the outline have the same direction
    fn is_convex(vertices: &[Vec3]) -> bool {
        let n = vertices.len();
        let mut sign = 0.0f32;
        for i in 0..n {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            let c = vertices[(i + 2) % n];
            let cross = (b.x - a.x) * (c.z - b.z) - (b.z - a.z) * (c.x - b.x);
            if cross.abs() < 1e-6 {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        sign != 0.0
    }

    /// World-space bounds of the volume
    pub fn bounds(&self) -> (Vec3, Vec3) {
        let mut bmin = self.vertices[0];
        let mut bmax = self.vertices[0];
        for v in &self.vertices[1..] {
            bmin = bmin.min(*v);
            bmax = bmax.max(*v);
        }
        bmin.y = self.min_height;
        bmax.y = self.max_height;
        (bmin, bmax)
    }

    /// Marks the enclosed walkable spans of `chf` with this volume's area
    pub fn apply(&self, chf: &mut CompactHeightfield) {
        mark_convex_poly_area(chf, &self.vertices, self.min_height, self.max_height, self.area_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_volume() {
        let vol = ConvexVolume::from_box(Vec3::new(1.0, 0.0, 1.0), Vec3::new(1.0, 2.0, 1.0), 1).unwrap();
        let (bmin, bmax) = vol.bounds();
        assert_eq!(bmin, Vec3::new(0.0, -2.0, 0.0));
        assert_eq!(bmax, Vec3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn test_rejects_concave_outline() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        assert!(ConvexVolume::new(verts, 0.0, 1.0, 1).is_err());
    }

    #[test]
    fn test_rejects_too_few_vertices() {
        let verts = vec![Vec3::ZERO, Vec3::X];
        let err = ConvexVolume::new(verts, 0.0, 1.0, 1).unwrap_err();
        assert!(err.is_configuration());
    }
}
