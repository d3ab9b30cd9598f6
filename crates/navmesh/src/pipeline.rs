//! Build pipelines: turning input geometry into an installed Detour navigation mesh
//!
//! Both pipelines share [`build_tile_data`], which runs the Recast stages on one
//! bounding box and packs the result into a tile blob. [`SoloMesh`] builds a single tile
//! covering the whole input; [`TileMesh`](crate::TileMesh) manages a grid of tiles.

use detour::{create_nav_mesh_data, NavMeshCreateParams, NavMeshParams, OffMeshConnectionParams};
use recast::{BuildContext, ConvexVolume, PolyMesh, PolyMeshDetail, RecastBuilder, RecastConfig, TimerCategory};
use recast_common::{next_pow2, Result};
use web_time::Instant;

use crate::geometry::{InputGeometry, OffMeshConnection};
use crate::settings::{AreaFlagsTable, NavMeshSettings};
use crate::tile_grid::TileMesh;

/// Result of a build that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// At least one tile was installed
    Built,
    /// Nothing walkable was found; no tile was installed
    Empty,
}

/// Everything one build reads, borrowed from the owning navigation mesh
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    pub geometry: &'a InputGeometry,
    pub settings: NavMeshSettings,
    pub area_flags: &'a AreaFlagsTable,
    pub convex_volumes: &'a [ConvexVolume],
    pub off_mesh_connections: &'a [OffMeshConnection],
}

/// Poly mesh and detail mesh of the last build, kept for debug drawing
#[derive(Debug, Clone)]
pub struct IntermediateMeshes {
    pub poly_mesh: PolyMesh,
    pub detail_mesh: PolyMeshDetail,
}

/// Statistics of one tile build
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TileBuildStats {
    pub tile_x: i32,
    pub tile_y: i32,
    /// Wall clock time of the build in milliseconds
    pub build_time_ms: f64,
    /// Size of the tile data blob in bytes
    pub memory_usage: usize,
    /// Input triangles handed to rasterization
    pub tri_count: usize,
    pub poly_count: usize,
}

pub(crate) struct TileBuild {
    pub data: Vec<u8>,
    pub stats: TileBuildStats,
    pub intermediate: Option<IntermediateMeshes>,
}

/// Runs the Recast stages over `cfg`'s bounds and assembles tile (`tile_x`, `tile_y`).
///
/// Returns `Ok(None)` when the bounds hold nothing walkable.
pub(crate) fn build_tile_data(
    input: &BuildInput,
    ctx: &mut BuildContext,
    cfg: RecastConfig,
    tile_x: i32,
    tile_y: i32,
    keep_intermediate: bool,
) -> Result<Option<TileBuild>> {
    let start = Instant::now();
    let tris = input.geometry.triangles_in_bounds(cfg.bmin, cfg.bmax);
    if tris.is_empty() {
        ctx.progress(
            TimerCategory::Total,
            format!("tile ({}, {}) has no input triangles", tile_x, tile_y),
        );
        return Ok(None);
    }

    let Some(mut out) =
        RecastBuilder::new(cfg).build(ctx, input.geometry.vertices(), &tris, input.convex_volumes)?
    else {
        return Ok(None);
    };
    input.area_flags.apply_to_poly_mesh(&mut out.poly_mesh);

    let connections: Vec<OffMeshConnectionParams> = input
        .off_mesh_connections
        .iter()
        .enumerate()
        .map(|(i, con)| con.to_params(i as u32))
        .collect();
    let settings = &input.settings;
    let data = ctx.timed(TimerCategory::TileAssembly, |_| {
        create_nav_mesh_data(&NavMeshCreateParams {
            poly_mesh: &out.poly_mesh,
            detail_mesh: Some(&out.detail_mesh),
            off_mesh_connections: &connections,
            walkable_height: settings.agent_height,
            walkable_radius: settings.agent_radius,
            walkable_climb: settings.agent_max_climb,
            tile_x,
            tile_y,
            tile_layer: 0,
            user_id: 0,
        })
    })?;

    let stats = TileBuildStats {
        tile_x,
        tile_y,
        build_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        memory_usage: data.len(),
        tri_count: out.tri_count,
        poly_count: out.poly_mesh.poly_count(),
    };
    let intermediate = keep_intermediate.then(|| IntermediateMeshes {
        poly_mesh: out.poly_mesh,
        detail_mesh: out.detail_mesh,
    });
    Ok(Some(TileBuild {
        data,
        stats,
        intermediate,
    }))
}

/// Shared interface of the build pipelines
pub trait BuildPipeline {
    /// Runs the pipeline's initial build; any previously built mesh is discarded first
    fn build(&mut self, input: &BuildInput, ctx: &mut BuildContext) -> Result<BuildOutcome>;

    /// The installed navigation mesh, if any
    fn nav_mesh(&self) -> Option<&detour::NavMesh>;

    /// Number of installed tiles
    fn tile_count(&self) -> usize {
        self.nav_mesh().map_or(0, |nav| nav.tile_count())
    }

    /// Meshes of the last built tile when intermediate retention is on
    fn intermediate(&self) -> Option<&IntermediateMeshes>;

    fn last_build_stats(&self) -> Option<&TileBuildStats>;
}

/// Single tile covering the whole input geometry
#[derive(Debug, Default)]
pub struct SoloMesh {
    nav_mesh: Option<detour::NavMesh>,
    keep_intermediate: bool,
    intermediate: Option<IntermediateMeshes>,
    last_stats: Option<TileBuildStats>,
}

impl SoloMesh {
    pub fn new(keep_intermediate: bool) -> Self {
        Self {
            keep_intermediate,
            ..Self::default()
        }
    }
}

impl BuildPipeline for SoloMesh {
    fn build(&mut self, input: &BuildInput, ctx: &mut BuildContext) -> Result<BuildOutcome> {
        self.nav_mesh = None;
        self.intermediate = None;

        let (bmin, bmax) = input.geometry.bounds();
        let cfg = input.settings.to_recast_config(bmin, bmax)?;
        let cs = cfg.cs;
        let Some(build) = build_tile_data(input, ctx, cfg, 0, 0, self.keep_intermediate)? else {
            return Ok(BuildOutcome::Empty);
        };

        let max_polys = next_pow2((build.stats.poly_count + input.off_mesh_connections.len()) as u32);
        let mut nav_mesh = detour::NavMesh::new(NavMeshParams {
            origin: bmin,
            tile_width: (bmax.x - bmin.x).max(cs),
            tile_height: (bmax.z - bmin.z).max(cs),
            max_tiles: 1,
            max_polys_per_tile: max_polys as i32,
        })?;
        nav_mesh.add_tile(build.data, None)?;
        log::info!(
            "solo navigation mesh built: {} polygons in {:.2} ms",
            build.stats.poly_count,
            build.stats.build_time_ms
        );

        self.nav_mesh = Some(nav_mesh);
        self.intermediate = build.intermediate;
        self.last_stats = Some(build.stats);
        Ok(BuildOutcome::Built)
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

/// The closed set of build pipelines
#[derive(Debug)]
pub enum Pipeline {
    Solo(SoloMesh),
    Tiled(TileMesh),
}

impl Pipeline {
    pub fn as_tiled(&self) -> Option<&TileMesh> {
        match self {
            Pipeline::Tiled(tiles) => Some(tiles),
            Pipeline::Solo(_) => None,
        }
    }

    pub fn as_tiled_mut(&mut self) -> Option<&mut TileMesh> {
        match self {
            Pipeline::Tiled(tiles) => Some(tiles),
            Pipeline::Solo(_) => None,
        }
    }
}

impl BuildPipeline for Pipeline {
    fn build(&mut self, input: &BuildInput, ctx: &mut BuildContext) -> Result<BuildOutcome> {
        match self {
            Pipeline::Solo(solo) => solo.build(input, ctx),
            Pipeline::Tiled(tiles) => tiles.build(input, ctx),
        }
    }

    fn nav_mesh(&self) -> Option<&detour::NavMesh> {
        match self {
            Pipeline::Solo(solo) => solo.nav_mesh(),
            Pipeline::Tiled(tiles) => tiles.nav_mesh(),
        }
    }

    fn intermediate(&self) -> Option<&IntermediateMeshes> {
        match self {
            Pipeline::Solo(solo) => solo.intermediate(),
            Pipeline::Tiled(tiles) => tiles.intermediate(),
        }
    }

    fn last_build_stats(&self) -> Option<&TileBuildStats> {
        match self {
            Pipeline::Solo(solo) => solo.last_build_stats(),
            Pipeline::Tiled(tiles) => tiles.last_build_stats(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::plane;
    use detour::{MeshTile, PolyRef};
    use glam::Vec3;
    use std::collections::{HashSet, VecDeque};

    pub(crate) fn input<'a>(
        geometry: &'a InputGeometry,
        settings: NavMeshSettings,
        area_flags: &'a AreaFlagsTable,
    ) -> BuildInput<'a> {
        BuildInput {
            geometry,
            settings,
            area_flags,
            convex_volumes: &[],
            off_mesh_connections: &[],
        }
    }

    fn polygon_area_xz(tile: &MeshTile, i: usize) -> f32 {
        let (verts, n) = tile.poly_vertices(i);
        let mut area = 0.0;
        for j in 0..n {
            let a = verts[j];
            let b = verts[(j + 1) % n];
            area += a.x * b.z - b.x * a.z;
        }
        area.abs() * 0.5
    }

    /// Every polygon of a single-tile mesh, reached from the first one through links
    fn reachable_polys(nav: &detour::NavMesh) -> (usize, usize) {
        let (tile_ref, tile) = nav.tiles().next().unwrap();
        let base = nav.get_poly_ref_base(tile_ref);
        let start = PolyRef::new(base.id());
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(r) = queue.pop_front() {
            for link in nav.get_links(r).unwrap() {
                if seen.insert(link.reference) {
                    queue.push_back(link.reference);
                }
            }
        }
        (seen.len(), tile.polys.len())
    }

    #[test]
    fn test_solo_plane_covers_eroded_area() {
        let geom = plane(10.0, 0.0);
        let table = AreaFlagsTable::default();
        let settings = NavMeshSettings {
            agent_radius: 0.5,
            ..NavMeshSettings::default()
        };
        let mut solo = SoloMesh::new(true);
        let mut ctx = BuildContext::new();
        let outcome = solo.build(&input(&geom, settings, &table), &mut ctx).unwrap();
        assert_eq!(outcome, BuildOutcome::Built);
        assert_eq!(solo.tile_count(), 1);

        let nav = solo.nav_mesh().unwrap();
        let (_, tile) = nav.tiles().next().unwrap();
        assert!(!tile.polys.is_empty());
        for poly in &tile.polys {
            assert_eq!(poly.flags, detour::PolyFlags::WALK);
        }

        // The walkable square shrinks to cells 3..30 of the 33 cell grid
        let min_x = tile.verts.iter().map(|v| v.x).fold(f32::MAX, f32::min);
        let max_x = tile.verts.iter().map(|v| v.x).fold(f32::MIN, f32::max);
        assert!((min_x - 0.9).abs() < 1e-4);
        assert!((max_x - 9.0).abs() < 1e-4);

        let stats = solo.last_build_stats().unwrap();
        assert_eq!(stats.tri_count, 2);
        assert_eq!(stats.poly_count, tile.polys.len());
        assert!(stats.memory_usage > 0);
        assert!(solo.intermediate().is_some());
    }

    #[test]
    fn test_partitioning_modes_tile_without_overlap() {
        let geom = plane(10.0, 0.0);
        let table = AreaFlagsTable::default();
        for monotone in [false, true] {
            let settings = NavMeshSettings {
                monotone_partitioning: monotone,
                ..NavMeshSettings::default()
            };
            let mut solo = SoloMesh::new(false);
            let mut ctx = BuildContext::new();
            solo.build(&input(&geom, settings, &table), &mut ctx).unwrap();
            let nav = solo.nav_mesh().unwrap();
            let (_, tile) = nav.tiles().next().unwrap();

            // The eroded square spans cells 3..30: 8.1 x 8.1 units
            let total: f32 = (0..tile.polys.len()).map(|i| polygon_area_xz(tile, i)).sum();
            let expected = 8.1 * 8.1;
            assert!(
                (total - expected).abs() < 0.05,
                "monotone={} covered {} instead of {}",
                monotone,
                total,
                expected
            );

            let (reached, count) = reachable_polys(nav);
            assert_eq!(reached, count, "monotone={} left polygons unconnected", monotone);
            assert!(solo.intermediate().is_none());
        }
    }

    #[test]
    fn test_unwalkable_input_is_empty() {
        // A ramp rising 10 over a run of 1 is far steeper than the walkable slope
        let geom = InputGeometry::new(
            vec![0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 5.0, 10.0, 1.0, 0.0, 10.0, 1.0],
            vec![0, 2, 1, 0, 3, 2],
        )
        .unwrap();
        let table = AreaFlagsTable::default();
        let mut solo = SoloMesh::new(false);
        let mut ctx = BuildContext::new();
        let outcome = solo
            .build(&input(&geom, NavMeshSettings::default(), &table), &mut ctx)
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Empty);
        assert!(solo.nav_mesh().is_none());
    }

    #[test]
    fn test_off_mesh_connection_is_packed() {
        let geom = plane(10.0, 0.0);
        let table = AreaFlagsTable::default();
        let cons = [OffMeshConnection::new(
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(8.0, 0.0, 8.0),
            0.5,
            true,
        )];
        let build_input = BuildInput {
            off_mesh_connections: &cons,
            ..input(&geom, NavMeshSettings::default(), &table)
        };
        let mut solo = SoloMesh::new(false);
        let mut ctx = BuildContext::new();
        solo.build(&build_input, &mut ctx).unwrap();
        let (_, tile) = solo.nav_mesh().unwrap().tiles().next().unwrap();
        assert_eq!(tile.off_mesh_connections.len(), 1);
        let last = tile.polys.last().unwrap();
        assert_eq!(last.poly_type, detour::PolyType::OffMeshConnection);
        assert_eq!(last.flags, detour::PolyFlags::JUMP);
    }
}
