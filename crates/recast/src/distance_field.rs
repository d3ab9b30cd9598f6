//! Distance field generation for watershed region partitioning
//!
//! Every span gets its chamfer distance (orthogonal step 2, diagonal step 3) to the nearest
//! region boundary, where a boundary span is one missing a same-area neighbour.

use super::compact_heightfield::CompactHeightfield;
use recast_common::{Error, Result};

/// Builds the distance field of `chf`, storing it in `chf.dist` and `chf.max_distance`
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let span_count = chf.spans.len();
    let mut src = Vec::new();
    src.try_reserve_exact(span_count)
        .map_err(|e| Error::ResourceExhaustion(format!("distance field: {}", e)))?;
    src.resize(span_count, 0xffff_u16);

    let max_distance = calculate_distance_field(chf, &mut src);
    let dist = box_blur(chf, 1, &src);

    chf.dist = dist;
    chf.max_distance = max_distance;
    log::debug!("distance field built, max distance {}", max_distance);
    Ok(())
}

fn calculate_distance_field(chf: &CompactHeightfield, src: &mut [u16]) -> u16 {
    let w = chf.width;
    let h = chf.height;

    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                let area = chf.areas[i];
                let same_area = (0..4)
                    .filter_map(|dir| chf.neighbour(x, z, i, dir))
                    .filter(|&(_, _, ni)| chf.areas[ni] == area)
                    .count();
                if same_area != 4 {
                    src[i] = 0;
                }
            }
        }
    }

    let relax = |src: &mut [u16], i: usize, from: usize, cost: u16| {
        let nd = src[from].saturating_add(cost);
        if nd < src[i] {
            src[i] = nd;
        }
    };

    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 0) {
                    relax(src, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 3) {
                        relax(src, i, bi, 3);
                    }
                }
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 3) {
                    relax(src, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 2) {
                        relax(src, i, bi, 3);
                    }
                }
            }
        }
    }

    for z in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 2) {
                    relax(src, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 1) {
                        relax(src, i, bi, 3);
                    }
                }
                if let Some((ax, az, ai)) = chf.neighbour(x, z, i, 1) {
                    relax(src, i, ai, 2);
                    if let Some((_, _, bi)) = chf.neighbour(ax, az, ai, 0) {
                        relax(src, i, bi, 3);
                    }
                }
            }
        }
    }

    src.iter().copied().max().unwrap_or(0)
}

/// 3x3 box blur of the distance field; spans at or below `2 * thr` are left untouched
fn box_blur(chf: &CompactHeightfield, thr: u16, src: &[u16]) -> Vec<u16> {
    let thr = thr * 2;
    let mut dst = vec![0u16; src.len()];

    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                let cd = src[i];
                if cd <= thr {
                    dst[i] = cd;
                    continue;
                }

                let mut d = cd as u32;
                for dir in 0..4 {
                    match chf.neighbour(x, z, i, dir) {
                        Some((ax, az, ai)) => {
                            d += src[ai] as u32;
                            let dir2 = (dir + 1) & 0x3;
                            d += chf
                                .neighbour(ax, az, ai, dir2)
                                .map_or(cd as u32, |(_, _, bi)| src[bi] as u32);
                        }
                        None => d += cd as u32 * 2,
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, RC_WALKABLE_AREA};
    use glam::Vec3;

    fn flat_chf(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 5.0, size as f32),
            1.0,
            0.5,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap()
    }

    #[test]
    fn test_distance_grows_towards_centre() {
        let mut chf = flat_chf(9);
        build_distance_field(&mut chf).unwrap();

        let edge = chf.cell_spans(0, 4).start;
        let centre = chf.cell_spans(4, 4).start;
        assert_eq!(chf.dist[edge], 0);
        assert!(chf.dist[centre] > chf.dist[edge]);
        assert!(chf.max_distance >= chf.dist[centre]);
        assert_eq!(chf.max_distance, 8);
    }

    #[test]
    fn test_area_change_is_boundary() {
        let mut chf = flat_chf(9);
        let i = chf.cell_spans(4, 4).start;
        chf.areas[i] = 1;
        build_distance_field(&mut chf).unwrap();
        assert_eq!(chf.dist[i], 0);
    }
}
