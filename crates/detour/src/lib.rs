//! Detour component: the runtime side of the navigation mesh
//!
//! Recast output is packed into self-contained tile blobs which a [`NavMesh`] addresses on a
//! 2D grid. Tiles can be added and removed at runtime; polygons in neighbouring tiles are
//! linked through their shared portal edges. [`NavMeshQuery`] answers nearest-polygon, height
//! and corridor queries on top of the installed tiles.

mod binary_format;
mod nav_mesh;
mod nav_mesh_builder;
mod nav_mesh_query;
mod status;

#[cfg(test)]
mod test_mesh_helpers;

pub use binary_format::{
    load_nav_mesh_set, load_nav_mesh_set_from_file, save_nav_mesh_set, save_nav_mesh_set_to_file,
    DT_NAVMESH_MAGIC, DT_NAVMESH_VERSION, NAVMESHSET_MAGIC, NAVMESHSET_VERSION,
};
pub use nav_mesh::{Link, MeshTile, NavMesh, OffMeshConnection, Poly, PolyDetail, TileHeader};
pub use nav_mesh_builder::{create_nav_mesh_data, NavMeshCreateParams, OffMeshConnectionParams};
pub use nav_mesh_query::NavMeshQuery;
pub use status::Status;

use glam::Vec3;

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;
/// Number of distinct area ids a polygon can carry
pub const MAX_AREAS: usize = 64;
/// Neighbour flag marking an edge that links to another tile; the low bits hold the side
pub const DT_EXT_LINK: u16 = 0x8000;
/// Side value of a link that stays within its tile
pub const DT_INTERNAL_SIDE: u8 = 0xff;

/// Standard polygon area ids
pub const POLY_AREA_GROUND: u8 = 0;
pub const POLY_AREA_WATER: u8 = 1;
pub const POLY_AREA_ROAD: u8 = 2;
pub const POLY_AREA_DOOR: u8 = 3;
pub const POLY_AREA_GRASS: u8 = 4;
pub const POLY_AREA_JUMP: u8 = 5;

bitflags::bitflags! {
    /// Traversal abilities required to cross a polygon
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        /// Ability to walk (ground, grass, road)
        const WALK = 0x01;
        /// Ability to swim (water)
        const SWIM = 0x02;
        /// Ability to move through doors
        const DOOR = 0x04;
        /// Ability to jump
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
        /// All abilities
        const ALL = 0xffff;
    }
}

/// Kind of navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum PolyType {
    /// Regular polygon on the walkable surface
    #[default]
    Ground,
    /// Two-vertex polygon standing for an off-mesh connection
    OffMeshConnection,
}

/// Reference to a polygon: salt, tile index and polygon index packed into 32 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    /// Creates a new polygon reference
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Gets the raw reference value
    pub fn id(&self) -> u32 {
        self.0
    }

    /// Whether this is the null reference
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Reference to a tile; encoded like a [`PolyRef`] with a zero polygon index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileRef(u32);

impl TileRef {
    /// Creates a new tile reference
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Gets the raw reference value
    pub fn id(&self) -> u32 {
        self.0
    }

    /// Whether this is the null reference
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Parameters shared by every tile of a navigation mesh
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World-space origin of tile (0, 0)
    pub origin: Vec3,
    /// Width of a tile along x
    pub tile_width: f32,
    /// Height of a tile along z
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: i32,
    /// Maximum number of polygons per tile
    pub max_polys_per_tile: i32,
}

/// Filter deciding which polygons a query may visit and what crossing them costs
#[derive(Debug, Clone)]
pub struct QueryFilter {
    /// Polygons must carry at least one of these flags
    pub include_flags: PolyFlags,
    /// Polygons carrying any of these flags are skipped
    pub exclude_flags: PolyFlags,
    /// Cost multiplier per area id
    pub area_cost: [f32; MAX_AREAS],
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::empty(),
            area_cost: [1.0; MAX_AREAS],
        }
    }
}

impl QueryFilter {
    /// Creates a filter with the given include and exclude flags and unit area costs
    pub fn new(include_flags: PolyFlags, exclude_flags: PolyFlags) -> Self {
        Self {
            include_flags,
            exclude_flags,
            ..Self::default()
        }
    }

    /// Whether a polygon with `flags` may be visited
    pub fn pass_filter(&self, flags: PolyFlags) -> bool {
        flags.intersects(self.include_flags) && !flags.intersects(self.exclude_flags)
    }

    /// Sets the traversal cost multiplier of `area`
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area as usize) {
            *c = cost;
        }
    }

    /// Gets the traversal cost multiplier of `area`
    pub fn get_area_cost(&self, area: u8) -> f32 {
        self.area_cost.get(area as usize).copied().unwrap_or(1.0)
    }

    /// Cost of moving from `a` to `b` across a polygon of `area`
    pub fn get_cost(&self, a: Vec3, b: Vec3, area: u8) -> f32 {
        a.distance(b) * self.get_area_cost(area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_include_exclude() {
        let filter = QueryFilter::new(PolyFlags::WALK | PolyFlags::SWIM, PolyFlags::DISABLED);
        assert!(filter.pass_filter(PolyFlags::WALK));
        assert!(filter.pass_filter(PolyFlags::SWIM | PolyFlags::DOOR));
        assert!(!filter.pass_filter(PolyFlags::DOOR));
        assert!(!filter.pass_filter(PolyFlags::WALK | PolyFlags::DISABLED));
        assert!(!filter.pass_filter(PolyFlags::empty()));
    }

    #[test]
    fn test_area_cost() {
        let mut filter = QueryFilter::default();
        filter.set_area_cost(POLY_AREA_WATER, 10.0);
        filter.set_area_cost(200, 5.0);
        assert_eq!(filter.get_area_cost(POLY_AREA_WATER), 10.0);
        assert_eq!(filter.get_area_cost(POLY_AREA_GROUND), 1.0);
        assert_eq!(filter.get_area_cost(200), 1.0);
        let cost = filter.get_cost(Vec3::ZERO, Vec3::new(3.0, 0.0, 4.0), POLY_AREA_WATER);
        assert!((cost - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_flags_all_covers_everything() {
        assert!(PolyFlags::ALL.contains(PolyFlags::WALK | PolyFlags::JUMP | PolyFlags::DISABLED));
        assert_eq!(PolyFlags::from_bits_truncate(0x03), PolyFlags::WALK | PolyFlags::SWIM);
    }
}
