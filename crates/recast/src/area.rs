//! Area marking operations for Recast

use glam::Vec3;

use super::compact_heightfield::CompactHeightfield;
use super::heightfield::RC_NULL_AREA;
use recast_common::point_in_polygon_2d;

/// Erodes the walkable area by `radius` cells, marking every span closer than that to an
/// obstruction or to the edge of the walkable surface as unwalkable.
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xff_u8; chf.spans.len()];

    // Spans touching an unwalkable or missing neighbour start at zero
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let walkable_neighbours = (0..4)
                    .filter_map(|dir| chf.neighbour(x, z, i, dir))
                    .filter(|&(_, _, ni)| chf.areas[ni] != RC_NULL_AREA)
                    .count();
                if walkable_neighbours != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut [u8], i: usize, from: usize, cost: u8| {
        let nd = dist[from].saturating_add(cost);
        if nd < dist[i] {
            dist[i] = nd;
        }
    };

    // Pass 1: (-1,0), (-1,-1), (0,-1), (1,-1)
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 0) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 3) {
                        relax(&mut dist, i, bi, 3);
                    }
                }
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 3) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 2) {
                        relax(&mut dist, i, bi, 3);
                    }
                }
            }
        }
    }

    // Pass 2: (1,0), (1,1), (0,1), (-1,1)
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 2) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 1) {
                        relax(&mut dist, i, bi, 3);
                    }
                }
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 1) {
                    relax(&mut dist, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 0) {
                        relax(&mut dist, i, bi, 3);
                    }
                }
            }
        }
    }

    let threshold = (radius * 2).clamp(0, 0xff) as u8;
    for (area, d) in chf.areas.iter_mut().zip(dist) {
        if d < threshold {
            *area = RC_NULL_AREA;
        }
    }
}

/// Applies `area` to every walkable span whose cell centre lies inside the convex polygon
/// `verts` and whose floor lies between `hmin` and `hmax`.
pub fn mark_convex_poly_area(
    chf: &mut CompactHeightfield,
    verts: &[Vec3],
    hmin: f32,
    hmax: f32,
    area: u8,
) {
    if verts.len() < 3 {
        return;
    }
    let mut bmin = verts[0];
    let mut bmax = verts[0];
    for v in &verts[1..] {
        bmin = bmin.min(*v);
        bmax = bmax.max(*v);
    }
    bmin.y = hmin;
    bmax.y = hmax;

    let minx = ((bmin.x - chf.bmin.x) / chf.cs) as i32;
    let maxx = ((bmax.x - chf.bmin.x) / chf.cs) as i32;
    let minz = ((bmin.z - chf.bmin.z) / chf.cs) as i32;
    let maxz = ((bmax.z - chf.bmin.z) / chf.cs) as i32;
    let miny = ((bmin.y - chf.bmin.y) / chf.ch) as i32;
    let maxy = ((bmax.y - chf.bmin.y) / chf.ch) as i32;

    if maxx < 0 || minx >= chf.width || maxz < 0 || minz >= chf.height {
        return;
    }
    let minx = minx.max(0);
    let maxx = maxx.min(chf.width - 1);
    let minz = minz.max(0);
    let maxz = maxz.min(chf.height - 1);

    for z in minz..=maxz {
        for x in minx..=maxx {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }
                let y = chf.spans[i].y as i32;
                if y < miny || y > maxy {
                    continue;
                }
                let p = Vec3::new(
                    chf.bmin.x + (x as f32 + 0.5) * chf.cs,
                    0.0,
                    chf.bmin.z + (z as f32 + 0.5) * chf.cs,
                );
                if point_in_polygon_2d(p, verts) {
                    chf.areas[i] = area;
                }
            }
        }
    }
}
