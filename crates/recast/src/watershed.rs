//! Watershed region partitioning
//!
//! Regions are grown from the distance field peaks downwards two levels at a time. This gives
//! the nicest tessellation of the three partitioning methods but needs the distance field.

use super::compact_heightfield::{CompactHeightfield, RC_BORDER_REG};
use super::heightfield::RC_NULL_AREA;
use super::region::{finish_regions, merge_and_filter_regions, paint_border_regions};
use recast_common::{Error, Result};

const EXPAND_ITERS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    /// Span index, `None` once the span has been assigned
    index: Option<usize>,
}

/// Flood fills a new region `r` from span `i` through spans at or above `level - 2`.
/// Returns false when the seed turned out to touch an existing region.
fn flood_region(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    (x, z, i): (i32, i32, usize),
    level: u16,
    r: u16,
    stack: &mut Vec<(i32, i32, usize)>,
) -> bool {
    let area = chf.areas[i];
    stack.clear();
    stack.push((x, z, i));
    src_reg[i] = r;
    src_dist[i] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some((cx, cz, ci)) = stack.pop() {
        // Stop at spans that already border another region, including diagonally
        let mut touches_other = false;
        for dir in 0..4 {
            let Some((ax, az, ai)) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr & RC_BORDER_REG != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                touches_other = true;
                break;
            }

            let dir2 = (dir + 1) & 0x3;
            if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dir2) {
                if chf.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != 0 && nr2 != r {
                    touches_other = true;
                    break;
                }
            }
        }
        if touches_other {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        for dir in 0..4 {
            let Some((ax, az, ai)) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push((ax, az, ai));
            }
        }
    }

    count > 0
}

/// Grows existing regions into unassigned spans at or above `level`. With `max_iter` of
/// `None` the expansion runs until no span can be claimed.
fn expand_regions(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    level: u16,
    max_iter: Option<usize>,
) {
    let mut stack = Vec::new();
    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != RC_NULL_AREA {
                    stack.push(LevelStackEntry { x, z, index: Some(i) });
                }
            }
        }
    }

    let mut dirty = Vec::new();
    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            let Some(i) = entry.index else {
                failed += 1;
                continue;
            };

            let mut r = src_reg[i];
            let mut d2 = u16::MAX;
            let area = chf.areas[i];
            for dir in 0..4 {
                let Some((_, _, ai)) = chf.neighbour(entry.x, entry.z, i, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if nr > 0 && nr & RC_BORDER_REG == 0 && src_dist[ai].saturating_add(2) < d2 {
                    r = nr;
                    d2 = src_dist[ai] + 2;
                }
            }

            if r != 0 {
                entry.index = None;
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        // Apply after the sweep so the result does not depend on span order
        for &(i, r, d) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }

        if failed == stack.len() {
            break;
        }
        if let Some(max_iter) = max_iter {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

/// Partitions the walkable surface with the watershed method.
///
/// Requires the distance field (see [`crate::build_distance_field`]). Spans within
/// `border_size` of the edge become border regions that never merge with interior ones.
pub fn build_regions_watershed(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    if chf.dist.len() != chf.spans.len() {
        return Err(Error::Recast(
            "watershed partitioning needs the distance field".to_string(),
        ));
    }

    let span_count = chf.spans.len();
    let mut src_reg = vec![0u16; span_count];
    let mut src_dist = vec![0u16; span_count];
    let mut region_id = paint_border_regions(chf, &mut src_reg, border_size);
    let mut stack = Vec::new();

    let mut level = (chf.max_distance.saturating_add(1)) & !1;
    while level > 0 {
        level = level.saturating_sub(2);

        expand_regions(chf, &mut src_reg, &mut src_dist, level, Some(EXPAND_ITERS));

        for z in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_spans(x, z) {
                    if chf.dist[i] < level || src_reg[i] != 0 || chf.areas[i] == RC_NULL_AREA {
                        continue;
                    }
                    if flood_region(
                        chf,
                        &mut src_reg,
                        &mut src_dist,
                        (x, z, i),
                        level,
                        region_id,
                        &mut stack,
                    ) {
                        if region_id == RC_BORDER_REG - 1 {
                            return Err(Error::ResourceExhaustion(
                                "region id overflow".to_string(),
                            ));
                        }
                        region_id += 1;
                    }
                }
            }
        }
    }

    expand_regions(chf, &mut src_reg, &mut src_dist, 0, None);

    let (max_regions, overlaps) =
        merge_and_filter_regions(chf, &mut src_reg, min_region_area, merge_region_area, region_id)?;
    finish_regions(chf, &src_reg, max_regions, overlaps);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
    use crate::heightfield::{Heightfield, RC_WALKABLE_AREA};
    use crate::region::build_regions_monotone;
    use glam::Vec3;

    fn plane_chf(w: i32, h: i32, skip: impl Fn(i32, i32) -> bool) -> CompactHeightfield {
        let mut hf =
            Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5).unwrap();
        for z in 0..h {
            for x in 0..w {
                if !skip(x, z) {
                    hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
                }
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap();
        build_distance_field(&mut chf).unwrap();
        chf
    }

    #[test]
    fn test_requires_distance_field() {
        let mut chf = plane_chf(4, 4, |_, _| false);
        chf.dist.clear();
        assert!(build_regions_watershed(&mut chf, 0, 0, 0).is_err());
    }

    #[test]
    fn test_every_walkable_span_gets_a_region() {
        let mut chf = plane_chf(16, 16, |_, _| false);
        build_regions_watershed(&mut chf, 0, 0, 20).unwrap();
        assert!(chf.max_regions >= 1);
        assert!(chf.spans.iter().all(|s| s.reg != 0));
    }

    #[test]
    fn test_islands_get_distinct_regions() {
        let mut chf = plane_chf(11, 11, |x, _| x == 5);
        build_regions_watershed(&mut chf, 0, 0, 0).unwrap();
        let left = chf.spans[chf.cell_spans(1, 5).start].reg;
        let right = chf.spans[chf.cell_spans(9, 5).start].reg;
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
    }

    #[test]
    fn test_watershed_and_monotone_cover_same_spans() {
        let skip = |x: i32, z: i32| (3..6).contains(&x) && (3..6).contains(&z);
        let mut ws = plane_chf(12, 12, skip);
        let mut mono = plane_chf(12, 12, skip);
        build_regions_watershed(&mut ws, 0, 2, 20).unwrap();
        build_regions_monotone(&mut mono, 0, 2, 20).unwrap();

        let covered = |chf: &CompactHeightfield| chf.spans.iter().filter(|s| s.reg != 0).count();
        assert_eq!(covered(&ws), covered(&mono));
        assert_eq!(covered(&ws), ws.span_count());
    }
}
