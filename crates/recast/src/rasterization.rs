//! Triangle rasterization for Recast
//!
//! Triangles are clipped against the rows and then the columns of the heightfield grid; the
//! vertical extent of each clipped piece becomes one span.

use glam::Vec3;

use super::heightfield::{Heightfield, RC_NULL_AREA, RC_SPAN_MAX_HEIGHT, RC_WALKABLE_AREA};
use recast_common::{overlap_bounds, vert_at, Error, Result};

/// Axis used when splitting a polygon with an axis-aligned line
#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Splits a convex polygon at `line` along `axis` into the part below the line and the part
/// above it. Vertices on the line go to both.
fn divide_poly(input: &[Vec3], below: &mut Vec<Vec3>, above: &mut Vec<Vec3>, line: f32, axis: Axis) {
    below.clear();
    above.clear();
    if input.is_empty() {
        return;
    }

    let d: Vec<f32> = input.iter().map(|v| line - axis.of(*v)).collect();
    let n = input.len();
    let mut j = n - 1;
    for i in 0..n {
        let in_a = d[j] >= 0.0;
        let in_b = d[i] >= 0.0;
        if in_a != in_b {
            let s = d[j] / (d[j] - d[i]);
            let p = input[j] + (input[i] - input[j]) * s;
            below.push(p);
            above.push(p);
            if d[i] > 0.0 {
                below.push(input[i]);
            } else if d[i] < 0.0 {
                above.push(input[i]);
            }
        } else {
            if d[i] >= 0.0 {
                below.push(input[i]);
                if d[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(input[i]);
        }
        j = i;
    }
}

/// Rasterizes a single triangle into the heightfield
pub fn rasterize_triangle(
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    hf: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    let bmin = hf.bmin;
    let bmax = hf.bmax;
    let w = hf.width;
    let h = hf.height;
    let cs = hf.cs;
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;
    let by = bmax.y - bmin.y;

    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);
    if !overlap_bounds(bmin, bmax, tmin, tmax) {
        return Ok(());
    }

    let z0 = (((tmin.z - bmin.z) * ics) as i32).clamp(-1, h - 1);
    let z1 = (((tmax.z - bmin.z) * ics) as i32).clamp(0, h - 1);

    let mut remaining = vec![v0, v1, v2];
    let mut row = Vec::with_capacity(7);
    let mut rest = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);
    let mut row_rest = Vec::with_capacity(7);

    for z in z0..=z1 {
        let cz = bmin.z + z as f32 * cs;
        divide_poly(&remaining, &mut row, &mut rest, cz + cs, Axis::Z);
        std::mem::swap(&mut remaining, &mut rest);
        if row.len() < 3 || z < 0 {
            continue;
        }

        let (min_x, max_x) = row
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
        let x0 = ((min_x - bmin.x) * ics) as i32;
        let x1 = ((max_x - bmin.x) * ics) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        for x in x0..=x1 {
            let cx = bmin.x + x as f32 * cs;
            divide_poly(&row, &mut cell, &mut row_rest, cx + cs, Axis::X);
            std::mem::swap(&mut row, &mut row_rest);
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let (mut smin, mut smax) = cell
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
            smin -= bmin.y;
            smax -= bmin.y;
            if smax < 0.0 || smin > by {
                continue;
            }
            smin = smin.max(0.0);
            smax = smax.min(by);

            let ismin = ((smin * ich).floor() as i32).clamp(0, RC_SPAN_MAX_HEIGHT);
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, RC_SPAN_MAX_HEIGHT);

            hf.add_span(
                x,
                z,
                ismin as u16,
                ismax as u16,
                area,
                flag_merge_threshold,
            )?;
        }
    }

    Ok(())
}

/// Validates an indexed triangle list against its vertex buffer
fn check_triangles(verts: &[f32], tris: &[i32]) -> Result<()> {
    if verts.len() % 3 != 0 || tris.len() % 3 != 0 {
        return Err(Error::InvalidMesh(
            "vertex and index buffers must hold whole triples".to_string(),
        ));
    }
    let nverts = (verts.len() / 3) as i32;
    if let Some(bad) = tris.iter().find(|&&i| i < 0 || i >= nverts) {
        return Err(Error::InvalidMesh(format!(
            "triangle index {} out of range (vertex count {})",
            bad, nverts
        )));
    }
    Ok(())
}

/// Area id for each triangle: `RC_WALKABLE_AREA` when its slope is at most
/// `walkable_slope_angle` degrees, `RC_NULL_AREA` otherwise
pub fn mark_walkable_triangles(walkable_slope_angle: f32, verts: &[f32], tris: &[i32]) -> Vec<u8> {
    let walkable_thr = walkable_slope_angle.to_radians().cos();
    tris.chunks_exact(3)
        .map(|t| {
            let v0 = vert_at(verts, t[0] as usize);
            let v1 = vert_at(verts, t[1] as usize);
            let v2 = vert_at(verts, t[2] as usize);
            let normal = (v1 - v0).cross(v2 - v0).normalize_or_zero();
            if normal.y.abs() >= walkable_thr && normal != Vec3::ZERO {
                RC_WALKABLE_AREA
            } else {
                RC_NULL_AREA
            }
        })
        .collect()
}

/// Rasterizes an indexed triangle list with one area id per triangle
pub fn rasterize_triangles(
    verts: &[f32],
    tris: &[i32],
    areas: &[u8],
    hf: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    check_triangles(verts, tris)?;
    if areas.len() * 3 != tris.len() {
        return Err(Error::InvalidMesh(format!(
            "{} area ids for {} triangles",
            areas.len(),
            tris.len() / 3
        )));
    }

    for (t, &area) in tris.chunks_exact(3).zip(areas) {
        rasterize_triangle(
            vert_at(verts, t[0] as usize),
            vert_at(verts, t[1] as usize),
            vert_at(verts, t[2] as usize),
            area,
            hf,
            flag_merge_threshold,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(size: f32) -> (Vec<f32>, Vec<i32>) {
        let verts = vec![
            0.0, 0.0, 0.0, //
            size, 0.0, 0.0, //
            size, 0.0, size, //
            0.0, 0.0, size,
        ];
        (verts, vec![0, 2, 1, 0, 3, 2])
    }

    #[test]
    fn test_divide_poly_splits_square() {
        let square = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        let mut below = Vec::new();
        let mut above = Vec::new();
        divide_poly(&square, &mut below, &mut above, 1.0, Axis::X);
        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|v| v.x <= 1.0));
        assert!(above.iter().all(|v| v.x >= 1.0));
    }

    #[test]
    fn test_rasterize_flat_plane_fills_grid() {
        let (verts, tris) = plane(4.0);
        let mut hf = Heightfield::new(
            8,
            8,
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(4.0, 1.0, 4.0),
            0.5,
            0.1,
        )
        .unwrap();
        let areas = mark_walkable_triangles(45.0, &verts, &tris);
        assert_eq!(areas, vec![RC_WALKABLE_AREA, RC_WALKABLE_AREA]);
        rasterize_triangles(&verts, &tris, &areas, &mut hf, 1).unwrap();

        for z in 0..8 {
            for x in 0..8 {
                let column = hf.column(x, z);
                assert_eq!(column.len(), 1, "column ({}, {})", x, z);
                assert_eq!(column[0].area, RC_WALKABLE_AREA);
                // Surface at y = 0 lies 10 cells above bmin.y
                assert_eq!(column[0].smax, 11);
            }
        }
    }

    #[test]
    fn test_steep_triangle_is_not_walkable() {
        let verts = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 5.0, 0.0];
        let areas = mark_walkable_triangles(45.0, &verts, &[0, 1, 2]);
        assert_eq!(areas, vec![RC_NULL_AREA]);
    }

    #[test]
    fn test_bad_index_rejected() {
        let (verts, _) = plane(1.0);
        let mut hf =
            Heightfield::new(2, 2, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0), 0.5, 0.1).unwrap();
        let err = rasterize_triangles(&verts, &[0, 1, 9], &[RC_WALKABLE_AREA], &mut hf, 1);
        assert!(matches!(err, Err(Error::InvalidMesh(_))));
    }
}
