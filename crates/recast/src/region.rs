//! Region partitioning shared by the watershed and monotone builders
//!
//! After raw regions are painted, small isolated regions are dropped, small regions are merged
//! into their smallest compatible neighbour and the surviving ids are compacted to `1..=n`.

use super::compact_heightfield::{CompactHeightfield, RC_BORDER_REG};
use super::heightfield::RC_NULL_AREA;
use recast_common::{Error, Result};

const NULL_NEIGHBOUR: u16 = 0xffff;
const MAX_CONTOUR_WALK: usize = 40000;

struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    visited: bool,
    overlap: bool,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn add_unique_floor(&mut self, id: u16) {
        if !self.floors.contains(&id) {
            self.floors.push(id);
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in &mut self.connections {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in &mut self.floors {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared_edges = self.connections.iter().filter(|&&c| c == other.id).count();
        shared_edges <= 1 && !self.floors.contains(&other.id)
    }

    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }
}

/// Assigns `region_id` to every walkable span in the cell rectangle `[minx, maxx) x [minz, maxz)`
pub(crate) fn paint_rect_region(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    (minx, maxx): (i32, i32),
    (minz, maxz): (i32, i32),
    region_id: u16,
) {
    for z in minz..maxz {
        for x in minx..maxx {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] != RC_NULL_AREA {
                    src_reg[i] = region_id;
                }
            }
        }
    }
}

/// Paints the four border strips with their own border regions, returning the next free id
pub(crate) fn paint_border_regions(
    chf: &mut CompactHeightfield,
    src_reg: &mut [u16],
    border_size: i32,
) -> u16 {
    let mut region_id = 1u16;
    if border_size > 0 {
        let w = chf.width;
        let h = chf.height;
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        let strips = [
            ((0, bw), (0, h)),
            ((w - bw, w), (0, h)),
            ((0, w), (0, bh)),
            ((0, w), (h - bh, h)),
        ];
        for (xs, zs) in strips {
            paint_rect_region(chf, src_reg, xs, zs, region_id | RC_BORDER_REG);
            region_id += 1;
        }
    }
    chf.border_size = border_size;
    region_id
}

fn is_solid_edge(chf: &CompactHeightfield, src_reg: &[u16], x: i32, z: i32, i: usize, dir: usize) -> bool {
    let r = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |(_, _, ai)| src_reg[ai]);
    r != src_reg[i]
}

/// Walks the boundary of the region containing span `i`, collecting the ordered list of
/// neighbouring region ids (0 for no neighbour)
fn walk_contour(
    chf: &CompactHeightfield,
    src_reg: &[u16],
    mut x: i32,
    mut z: i32,
    mut i: usize,
    mut dir: usize,
) -> Vec<u16> {
    let start_dir = dir;
    let start_i = i;
    let mut cont = Vec::new();

    let mut cur_reg = chf
        .neighbour(x, z, i, dir)
        .map_or(0, |(_, _, ai)| src_reg[ai]);
    cont.push(cur_reg);

    for _ in 0..MAX_CONTOUR_WALK {
        if is_solid_edge(chf, src_reg, x, z, i, dir) {
            let r = chf
                .neighbour(x, z, i, dir)
                .map_or(0, |(_, _, ai)| src_reg[ai]);
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
            dir = (dir + 1) & 0x3;
        } else {
            match chf.neighbour(x, z, i, dir) {
                Some((nx, nz, ni)) => {
                    x = nx;
                    z = nz;
                    i = ni;
                }
                None => return cont,
            }
            dir = (dir + 3) & 0x3;
        }
        if start_i == i && start_dir == dir {
            break;
        }
    }

    if cont.len() > 1 {
        let mut j = 0;
        while j < cont.len() {
            let nj = (j + 1) % cont.len();
            if cont[j] == cont[nj] {
                cont.remove(j);
            } else {
                j += 1;
            }
        }
    }
    cont
}

/// Merges region `b` into region `a`; fails when the two do not share exactly one edge run
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;
    let acon = regions[a].connections.clone();
    let bcon = std::mem::take(&mut regions[b].connections);

    let (Some(insa), Some(insb)) = (
        acon.iter().position(|&c| c == bid),
        bcon.iter().position(|&c| c == aid),
    ) else {
        regions[b].connections = bcon;
        return false;
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for k in 0..acon.len() - 1 {
        merged.push(acon[(insa + 1 + k) % acon.len()]);
    }
    for k in 0..bcon.len() - 1 {
        merged.push(bcon[(insb + 1 + k) % bcon.len()]);
    }

    let floors = std::mem::take(&mut regions[b].floors);
    let span_count = regions[b].span_count;
    regions[b].span_count = 0;

    let rega = &mut regions[a];
    rega.connections = merged;
    rega.remove_adjacent_neighbours();
    for f in floors {
        rega.add_unique_floor(f);
    }
    rega.span_count += span_count;
    true
}

/// Removes regions smaller than `min_region_area`, merges regions up to `merge_region_size`
/// into neighbours and compacts the ids. Returns the new maximum region id and the number of
/// regions that overlap themselves vertically.
pub(crate) fn merge_and_filter_regions(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    min_region_area: i32,
    merge_region_size: i32,
    max_region_id: u16,
) -> Result<(u16, usize)> {
    let nreg = max_region_id as usize + 1;
    let mut regions: Vec<Region> = Vec::new();
    regions
        .try_reserve_exact(nreg)
        .map_err(|e| Error::ResourceExhaustion(format!("region table: {}", e)))?;
    regions.extend((0..nreg).map(|i| Region::new(i as u16)));

    // Region sizes, floors and neighbour lists
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cell_spans(x, z);
            for i in cell.clone() {
                let r = src_reg[i] as usize;
                if r == 0 || r >= nreg {
                    continue;
                }
                regions[r].span_count += 1;

                for j in cell.clone() {
                    if i == j {
                        continue;
                    }
                    let floor = src_reg[j];
                    if floor == 0 || floor as usize >= nreg {
                        continue;
                    }
                    if floor as usize == r {
                        regions[r].overlap = true;
                    }
                    regions[r].add_unique_floor(floor);
                }

                if !regions[r].connections.is_empty() {
                    continue;
                }
                regions[r].area_type = chf.areas[i];

                if let Some(dir) = (0..4).find(|&d| is_solid_edge(chf, src_reg, x, z, i, d)) {
                    regions[r].connections = walk_contour(chf, src_reg, x, z, i, dir);
                }
            }
        }
    }

    // Drop small islands that do not touch the tile border
    let mut stack = Vec::new();
    let mut trace = Vec::new();
    for i in 0..nreg {
        let reg = &regions[i];
        if reg.id == 0 || reg.id & RC_BORDER_REG != 0 || reg.span_count == 0 || reg.visited {
            continue;
        }

        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();
        stack.push(i);
        regions[i].visited = true;

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);
            for k in 0..regions[ri].connections.len() {
                let c = regions[ri].connections[k];
                if c & RC_BORDER_REG != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[c as usize];
                if nei.visited || nei.id == 0 || nei.id & RC_BORDER_REG != 0 {
                    continue;
                }
                nei.visited = true;
                stack.push(c as usize);
            }
        }

        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    // Merge small regions into neighbours
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let reg = &regions[i];
            if reg.id == 0 || reg.id & RC_BORDER_REG != 0 || reg.overlap || reg.span_count == 0 {
                continue;
            }
            if reg.span_count > merge_region_size && reg.is_connected_to_border() {
                continue;
            }

            let mut smallest = i32::MAX;
            let mut merge_id = reg.id;
            for &c in &reg.connections {
                if c & RC_BORDER_REG != 0 {
                    continue;
                }
                let mreg = &regions[c as usize];
                if mreg.id == 0 || mreg.id & RC_BORDER_REG != 0 || mreg.overlap {
                    continue;
                }
                if mreg.span_count < smallest && reg.can_merge_with(mreg) && mreg.can_merge_with(reg) {
                    smallest = mreg.span_count;
                    merge_id = mreg.id;
                }
            }

            if merge_id != reg.id {
                let old_id = reg.id;
                if merge_regions(&mut regions, merge_id as usize, i) {
                    for r in regions.iter_mut() {
                        if r.id == 0 || r.id & RC_BORDER_REG != 0 {
                            continue;
                        }
                        if r.id == old_id {
                            r.id = merge_id;
                        }
                        r.replace_neighbour(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    // Compact region ids; only regions still owning spans get one
    let mut new_ids = vec![0u16; nreg];
    let mut next_id = 0u16;
    for r in &regions {
        if r.span_count == 0 || r.id == 0 || r.id & RC_BORDER_REG != 0 {
            continue;
        }
        let slot = &mut new_ids[r.id as usize];
        if *slot == 0 {
            next_id += 1;
            *slot = next_id;
        }
    }
    for r in regions.iter_mut() {
        if r.id & RC_BORDER_REG == 0 {
            r.id = new_ids[r.id as usize];
        }
    }

    for reg in src_reg.iter_mut() {
        if *reg & RC_BORDER_REG == 0 {
            *reg = regions[*reg as usize].id;
        }
    }

    let overlaps = regions.iter().filter(|r| r.overlap).count();
    Ok((next_id, overlaps))
}

/// Writes the region ids to the spans and logs region statistics
pub(crate) fn finish_regions(chf: &mut CompactHeightfield, src_reg: &[u16], max_regions: u16, overlaps: usize) {
    for (span, &reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    chf.max_regions = max_regions;
    if overlaps > 0 {
        log::warn!("{} regions overlap themselves vertically", overlaps);
    }
    log::debug!("partitioned into {} regions", max_regions);
}

#[derive(Clone, Copy, Default)]
struct SweepSpan {
    /// Region id
    id: u16,
    /// Number of samples touching the neighbour below
    ns: u16,
    /// Neighbour region id below
    nei: u16,
}

/// Partitions the walkable surface into monotone regions by sweeping rows along x.
///
/// Faster than watershed and never produces holes or overlaps, at the cost of long, thin
/// regions.
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut src_reg = vec![0u16; chf.spans.len()];
    let mut id = paint_border_regions(chf, &mut src_reg, border_size);

    let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(w.max(h) as usize + 1);
    let mut prev: Vec<u16> = Vec::new();

    for z in border_size..h - border_size {
        prev.clear();
        prev.resize(id as usize + 1, 0);
        sweeps.clear();
        sweeps.push(SweepSpan::default());
        let mut rid = 1u16;

        for x in border_size..w - border_size {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }

                let mut previd = 0;
                if let Some((_, _, ai)) = chf.neighbour(x, z, i, 0) {
                    if src_reg[ai] & RC_BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = src_reg[ai];
                    }
                }
                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    sweeps.push(SweepSpan::default());
                }

                if let Some((_, _, ai)) = chf.neighbour(x, z, i, 3) {
                    let nr = src_reg[ai];
                    if nr != 0 && nr & RC_BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEIGHBOUR;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // Continue a region from the row below only when the whole run touches it
        for sweep in sweeps.iter_mut().skip(1) {
            if sweep.nei != NULL_NEIGHBOUR && sweep.nei != 0 && prev[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if id == RC_BORDER_REG - 1 {
                    return Err(Error::ResourceExhaustion("region id overflow".to_string()));
                }
                sweep.id = id;
                id += 1;
            }
        }

        for x in border_size..w - border_size {
            for i in chf.cell_spans(x, z) {
                let r = src_reg[i];
                if r > 0 && r < rid {
                    src_reg[i] = sweeps[r as usize].id;
                }
            }
        }
    }

    let (max_regions, overlaps) =
        merge_and_filter_regions(chf, &mut src_reg, min_region_area, merge_region_area, id)?;
    finish_regions(chf, &src_reg, max_regions, overlaps);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, RC_WALKABLE_AREA};
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
        CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap()
    }

    #[test]
    fn test_monotone_single_plane_is_one_region() {
        let mut chf = plane_chf(10, 10, |_, _| false);
        build_regions_monotone(&mut chf, 0, 0, 0).unwrap();
        assert_eq!(chf.max_regions, 1);
        assert!(chf.spans.iter().all(|s| s.reg == 1));
    }

    #[test]
    fn test_monotone_separate_islands() {
        // Two 4x10 strips separated by a gap column
        let mut chf = plane_chf(9, 10, |x, _| x == 4);
        build_regions_monotone(&mut chf, 0, 0, 0).unwrap();
        assert_eq!(chf.region_count(), 2);
        let left = chf.spans[chf.cell_spans(0, 0).start].reg;
        let right = chf.spans[chf.cell_spans(8, 9).start].reg;
        assert_ne!(left, right);
    }

    #[test]
    fn test_small_regions_removed() {
        let mut chf = plane_chf(9, 9, |x, z| !(x < 2 && z < 2) && !(x >= 3 && z >= 3));
        build_regions_monotone(&mut chf, 0, 8, 0).unwrap();
        let small = chf.spans[chf.cell_spans(0, 0).start].reg;
        let big = chf.spans[chf.cell_spans(5, 5).start].reg;
        assert_eq!(small, 0);
        assert_ne!(big, 0);
    }

    #[test]
    fn test_border_regions_are_flagged() {
        let mut chf = plane_chf(12, 12, |_, _| false);
        build_regions_monotone(&mut chf, 2, 0, 0).unwrap();
        let corner = chf.spans[chf.cell_spans(0, 0).start].reg;
        let inner = chf.spans[chf.cell_spans(6, 6).start].reg;
        assert_ne!(corner & RC_BORDER_REG, 0);
        assert_eq!(inner, 1);
        assert_eq!(chf.max_regions, 1);
        assert_eq!(chf.border_size, 2);
    }

    #[test]
    fn test_region_ids_are_dense() {
        // A hole in the middle splits the sweep into several runs, some of which merge
        for merge_area in [0, 20] {
            let mut chf = plane_chf(16, 16, |x, z| (6..10).contains(&x) && (6..10).contains(&z));
            build_regions_monotone(&mut chf, 1, 0, merge_area).unwrap();
            let mut ids: Vec<u16> = chf
                .spans
                .iter()
                .map(|s| s.reg)
                .filter(|&r| r != 0 && r & RC_BORDER_REG == 0)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            let expected: Vec<u16> = (1..=chf.max_regions).collect();
            assert_eq!(ids, expected, "merge area {}", merge_area);
        }
    }
}
