//! Recast component for navigation mesh generation
//!
//! Recast turns a triangle soup into a polygon mesh that covers the surface an agent can walk
//! on: the triangles are voxelized, the walkable voxels are partitioned into regions, and the
//! region outlines are simplified and triangulated into convex polygons plus a detail mesh.

mod area;
mod compact_heightfield;
mod config;
mod context;
mod contour;
mod convex_volume;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod polymesh;
mod rasterization;
mod region;
mod triangle_utils;
mod watershed;

pub use area::{erode_walkable_area, mark_convex_poly_area};
pub use compact_heightfield::{
    CompactCell, CompactHeightfield, CompactSpan, RC_BORDER_REG, RC_NOT_CONNECTED,
};
pub use config::RecastConfig;
pub use context::{BuildContext, LogEntry, LogLevel, TimerCategory, DEFAULT_MAX_LOG_ENTRIES};
pub use contour::{
    BuildContoursFlags, Contour, ContourSet, RC_AREA_BORDER, RC_BORDER_VERTEX, RC_CONTOUR_REG_MASK,
};
pub use convex_volume::{ConvexVolume, MAX_CONVEX_VOLUME_VERTS};
pub use detail_mesh::{PolyMeshDetail, DETAIL_EDGE_BOUNDARY};
pub use distance_field::build_distance_field;
pub use heightfield::{
    get_dir_offset_x, get_dir_offset_y, Heightfield, Span, RC_NULL_AREA, RC_SPAN_MAX_HEIGHT,
    RC_WALKABLE_AREA,
};
pub use polymesh::{PolyMesh, MESH_NULL_IDX, PORTAL_FLAG};
pub use rasterization::{mark_walkable_triangles, rasterize_triangle, rasterize_triangles};
pub use region::build_regions_monotone;
pub use watershed::build_regions_watershed;

use recast_common::{Error, Result};

/// Output of one successful Recast build
#[derive(Debug, Clone)]
pub struct RecastOutput {
    /// Polygon mesh, in cell units relative to its bounds
    pub poly_mesh: PolyMesh,
    /// Detail height mesh, in world units
    pub detail_mesh: PolyMeshDetail,
    /// Number of input triangles that were rasterized
    pub tri_count: usize,
}

/// Builder for Recast navigation mesh generation
#[derive(Debug)]
pub struct RecastBuilder {
    /// Configuration for the navigation mesh generation
    config: RecastConfig,
}

impl RecastBuilder {
    /// Creates a new RecastBuilder with the specified configuration
    pub fn new(config: RecastConfig) -> Self {
        Self { config }
    }

    /// Gets a reference to the configuration
    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Runs the whole pipeline on `verts` (xyz triples) and `tris` (index triples).
    ///
    /// Returns `Ok(None)` when nothing walkable remains, which is not an error. All
    /// intermediate buffers are dropped before returning.
    pub fn build(
        &self,
        ctx: &mut BuildContext,
        verts: &[f32],
        tris: &[i32],
        volumes: &[ConvexVolume],
    ) -> Result<Option<RecastOutput>> {
        let cfg = &self.config;
        cfg.validate()?;
        if verts.is_empty() || tris.is_empty() {
            return Err(Error::Configuration("input mesh is empty".to_string()));
        }
        if verts.len() % 3 != 0 || tris.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "vertex and index arrays must hold whole triples".to_string(),
            ));
        }

        ctx.start_timer(TimerCategory::Total);
        let result = self.build_stages(ctx, verts, tris, volumes);
        ctx.stop_timer(TimerCategory::Total);

        if let Err(e) = &result {
            ctx.error(TimerCategory::Total, format!("build failed: {}", e));
        }
        result
    }

    fn build_stages(
        &self,
        ctx: &mut BuildContext,
        verts: &[f32],
        tris: &[i32],
        volumes: &[ConvexVolume],
    ) -> Result<Option<RecastOutput>> {
        let cfg = &self.config;
        ctx.progress(
            TimerCategory::Total,
            format!(
                "building navigation: {} x {} cells, {} verts, {} tris",
                cfg.width,
                cfg.height,
                verts.len() / 3,
                tris.len() / 3
            ),
        );

        // Rasterize input polygon soup
        let mut solid = ctx.timed(TimerCategory::Rasterization, |_| -> Result<Heightfield> {
            let mut solid =
                Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch)?;
            let areas = mark_walkable_triangles(cfg.walkable_slope_angle, verts, tris);
            rasterize_triangles(verts, tris, &areas, &mut solid, cfg.walkable_climb)?;
            Ok(solid)
        })?;

        // Filter walkable surfaces
        ctx.timed(TimerCategory::Filtering, |_| {
            solid.filter_low_hanging_walkable_obstacles(cfg.walkable_climb);
            solid.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb);
            solid.filter_walkable_low_height_spans(cfg.walkable_height);
        });

        // Compact the heightfield; the solid heightfield is no longer needed
        let mut chf = ctx.timed(TimerCategory::CompactHeightfield, |_| {
            CompactHeightfield::build_from_heightfield(&solid, cfg.walkable_height, cfg.walkable_climb)
        })?;
        drop(solid);

        ctx.timed(TimerCategory::Erosion, |_| {
            erode_walkable_area(&mut chf, cfg.walkable_radius)
        });

        ctx.timed(TimerCategory::AreaMarking, |_| {
            for vol in volumes {
                vol.apply(&mut chf);
            }
        });

        if cfg.monotone_partitioning {
            ctx.timed(TimerCategory::Regions, |_| {
                build_regions_monotone(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)
            })?;
        } else {
            ctx.timed(TimerCategory::DistanceField, |_| build_distance_field(&mut chf))?;
            ctx.timed(TimerCategory::Regions, |_| {
                build_regions_watershed(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)
            })?;
        }

        let cset = ctx.timed(TimerCategory::Contours, |_| {
            ContourSet::build(
                &chf,
                cfg.max_simplification_error,
                cfg.max_edge_len,
                BuildContoursFlags::default(),
            )
        })?;
        if cset.is_empty() {
            ctx.progress(TimerCategory::Contours, "no walkable contours");
            return Ok(None);
        }

        let poly_mesh = ctx.timed(TimerCategory::PolyMesh, |_| {
            PolyMesh::build(&cset, cfg.max_vertices_per_polygon as usize)
        })?;
        drop(cset);

        let detail_mesh = ctx.timed(TimerCategory::DetailMesh, |_| {
            PolyMeshDetail::build(&poly_mesh, &chf, cfg.detail_sample_dist, cfg.detail_sample_max_error)
        })?;

        ctx.progress(
            TimerCategory::Total,
            format!(
                "built {} polygons, {} detail triangles",
                poly_mesh.poly_count(),
                detail_mesh.triangle_count()
            ),
        );

        Ok(Some(RecastOutput {
            poly_mesh,
            detail_mesh,
            tri_count: tris.len() / 3,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn plane(size: f32) -> (Vec<f32>, Vec<i32>) {
        (
            vec![0.0, 0.0, 0.0, 0.0, 0.0, size, size, 0.0, size, size, 0.0, 0.0],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn plane_config(size: f32, monotone: bool) -> RecastConfig {
        let mut cfg = RecastConfig {
            cs: 0.3,
            ch: 0.2,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            max_edge_len: 40,
            min_region_area: 64,
            merge_region_area: 400,
            monotone_partitioning: monotone,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
            ..RecastConfig::default()
        };
        cfg.set_bounds(Vec3::new(0.0, -1.0, 0.0), Vec3::new(size, 1.0, size));
        cfg
    }

    #[test]
    fn test_flat_plane_builds() {
        let (verts, tris) = plane(10.0);
        for monotone in [false, true] {
            let builder = RecastBuilder::new(plane_config(10.0, monotone));
            let mut ctx = BuildContext::new();
            let out = builder.build(&mut ctx, &verts, &tris, &[]).unwrap().unwrap();
            assert!(out.poly_mesh.poly_count() >= 1);
            assert_eq!(out.detail_mesh.meshes.len(), out.poly_mesh.poly_count());
            assert_eq!(out.tri_count, 2);
            assert!(ctx.accumulated_time(TimerCategory::Total) > std::time::Duration::ZERO);
        }
    }

    #[test]
    fn test_polygons_cover_eroded_area() {
        let (verts, tris) = plane(10.0);
        let builder = RecastBuilder::new(plane_config(10.0, false));
        let mut ctx = BuildContext::new();
        let out = builder.build(&mut ctx, &verts, &tris, &[]).unwrap().unwrap();
        let mesh = &out.poly_mesh;

        let mut min = [u16::MAX; 2];
        let mut max = [0u16; 2];
        for v in &mesh.verts {
            min[0] = min[0].min(v[0]);
            min[1] = min[1].min(v[2]);
            max[0] = max[0].max(v[0]);
            max[1] = max[1].max(v[2]);
        }
        // 33 cells per side: the outermost ring is a ledge, then two cells of erosion
        assert_eq!(min, [3, 3]);
        assert_eq!(max, [30, 30]);
    }

    #[test]
    fn test_steep_geometry_is_empty() {
        // A vertical wall has nothing to walk on
        let verts = vec![0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 5.0, 5.0, 0.0, 5.0, 0.0, 0.0];
        let tris = vec![0, 1, 2, 0, 2, 3];
        let mut cfg = plane_config(5.0, true);
        cfg.set_bounds(Vec3::new(0.0, 0.0, -1.0), Vec3::new(5.0, 5.0, 1.0));
        let mut ctx = BuildContext::new();
        let out = RecastBuilder::new(cfg).build(&mut ctx, &verts, &tris, &[]).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_empty_input_is_configuration_error() {
        let builder = RecastBuilder::new(plane_config(10.0, false));
        let mut ctx = BuildContext::new();
        let err = builder.build(&mut ctx, &[], &[], &[]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_convex_volume_changes_area() {
        let (verts, tris) = plane(10.0);
        let builder = RecastBuilder::new(plane_config(10.0, true));
        let vol = ConvexVolume::from_box(Vec3::new(5.0, 0.0, 5.0), Vec3::new(2.0, 1.0, 2.0), 1).unwrap();
        let mut ctx = BuildContext::new();
        let out = builder.build(&mut ctx, &verts, &tris, &[vol]).unwrap().unwrap();
        assert!(out.poly_mesh.areas.contains(&1));
        assert!(out.poly_mesh.areas.contains(&RC_WALKABLE_AREA));
    }
}
