//! Contour generation for Recast
//!
//! Traces the outline of every region in a compact heightfield and simplifies it into a
//! polygon. Holes (regions enclosing others) are spliced into their outline so that every
//! region ends up with exactly one simple contour.

use glam::Vec3;

use super::compact_heightfield::{CompactHeightfield, RC_BORDER_REG};
use super::triangle_utils::{intersect, left, left_on, next, polygon_area2, prev, vequal};
use recast_common::{Error, Result};

/// Vertex flag: the vertex sits on the tile border and may be removed when stitching tiles
pub const RC_BORDER_VERTEX: i32 = 0x10000;
/// Vertex flag: the edge starting at this vertex separates two areas
pub const RC_AREA_BORDER: i32 = 0x20000;
/// Mask of the neighbour region id stored in a contour vertex
pub const RC_CONTOUR_REG_MASK: i32 = 0xffff;

const MAX_CONTOUR_WALK: usize = 40000;

/// Edge tessellation options for contour simplification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildContoursFlags {
    /// Split long solid (impassable) edges
    pub tess_wall_edges: bool,
    /// Split long edges between areas
    pub tess_area_edges: bool,
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self {
            tess_wall_edges: true,
            tess_area_edges: false,
        }
    }
}

/// A simplified region outline
#[derive(Debug, Clone, Default)]
pub struct Contour {
    /// Simplified vertices `[x, y, z, r]`, r holding the neighbour region and vertex flags
    pub verts: Vec<[i32; 4]>,
    /// Raw traced vertices
    pub rverts: Vec<[i32; 4]>,
    /// Region id of the contour
    pub reg: u16,
    /// Area id of the contour
    pub area: u8,
}

/// The set of contours of one compact heightfield
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// Bounds with the border removed
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Width in cells, without the border
    pub width: i32,
    /// Height in cells, without the border
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    /// Traces and simplifies the contour of every region in `chf`.
    ///
    /// `max_error` bounds the distance between simplified and raw outline (cells) and
    /// `max_edge_len` caps tessellated edge lengths (cells, 0 disables splitting).
    pub fn build(
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
        flags: BuildContoursFlags,
    ) -> Result<Self> {
        let border_size = chf.border_size;
        let mut bmin = chf.bmin;
        let mut bmax = chf.bmax;
        if border_size > 0 {
            let pad = border_size as f32 * chf.cs;
            bmin.x += pad;
            bmin.z += pad;
            bmax.x -= pad;
            bmax.z -= pad;
        }

        let mut cset = Self {
            contours: Vec::new(),
            bmin,
            bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: chf.width - border_size * 2,
            height: chf.height - border_size * 2,
            border_size,
            max_error,
        };

        let mut edge_flags = mark_region_boundaries(chf);
        let mut raw = Vec::new();

        for z in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_spans(x, z) {
                    if edge_flags[i] == 0 || edge_flags[i] == 0xf {
                        edge_flags[i] = 0;
                        continue;
                    }
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & RC_BORDER_REG != 0 {
                        continue;
                    }

                    raw.clear();
                    walk_contour(chf, &mut edge_flags, x, z, i, &mut raw);
                    let mut simplified = simplify_contour(&raw, max_error, max_edge_len, flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() >= 3 {
                        let mut rverts = raw.clone();
                        if border_size > 0 {
                            for v in simplified.iter_mut().chain(rverts.iter_mut()) {
                                v[0] -= border_size;
                                v[2] -= border_size;
                            }
                        }
                        cset.contours.push(Contour {
                            verts: simplified,
                            rverts,
                            reg,
                            area: chf.areas[i],
                        });
                    }
                }
            }
        }

        cset.merge_holes(chf.max_regions)?;
        log::debug!("built {} contours", cset.contours.len());
        Ok(cset)
    }

    /// Number of contours
    pub fn len(&self) -> usize {
        self.contours.len()
    }

    /// Whether no region produced a contour
    pub fn is_empty(&self) -> bool {
        self.contours.is_empty()
    }

    fn merge_holes(&mut self, max_regions: u16) -> Result<()> {
        if self.contours.is_empty() {
            return Ok(());
        }

        let winding: Vec<bool> = self
            .contours
            .iter()
            .map(|c| polygon_area2(&c.verts) < 0)
            .collect();
        if !winding.iter().any(|&hole| hole) {
            return Ok(());
        }

        let nregions = max_regions as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; nregions];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); nregions];

        for (ci, c) in self.contours.iter().enumerate() {
            let reg = c.reg as usize;
            if reg >= nregions {
                return Err(Error::Recast(format!("contour region {} out of range", reg)));
            }
            if winding[ci] {
                holes[reg].push(ci);
            } else if outlines[reg].is_some() {
                log::error!("multiple outlines for region {}", reg);
            } else {
                outlines[reg] = Some(ci);
            }
        }

        for reg in 0..nregions {
            if holes[reg].is_empty() {
                continue;
            }
            match outlines[reg] {
                Some(outline) => self.merge_region_holes(outline, &holes[reg]),
                None => log::error!("missing outline for region {}, holes not merged", reg),
            }
        }

        self.contours.retain(|c| !c.verts.is_empty());
        Ok(())
    }

    fn merge_region_holes(&mut self, outline: usize, hole_ids: &[usize]) {
        // Leftmost vertex of each hole, processed left to right
        let mut holes: Vec<(usize, usize, i32, i32)> = hole_ids
            .iter()
            .map(|&h| {
                let verts = &self.contours[h].verts;
                let mut best = 0;
                for (i, v) in verts.iter().enumerate() {
                    let b = &verts[best];
                    if v[0] < b[0] || (v[0] == b[0] && v[2] < b[2]) {
                        best = i;
                    }
                }
                (h, best, verts[best][0], verts[best][2])
            })
            .collect();
        holes.sort_by(|a, b| (a.2, a.3).cmp(&(b.2, b.3)));

        for hi in 0..holes.len() {
            let (hole, leftmost, _, _) = holes[hi];
            let hole_len = self.contours[hole].verts.len();
            let mut merge_at = None;
            let mut best_vertex = leftmost;

            for _ in 0..hole_len {
                let corner = self.contours[hole].verts[best_vertex];
                let outline_verts = &self.contours[outline].verts;

                let mut diags: Vec<(usize, i32)> = (0..outline_verts.len())
                    .filter(|&j| in_cone(outline_verts, j, &corner))
                    .map(|j| {
                        let dx = outline_verts[j][0] - corner[0];
                        let dz = outline_verts[j][2] - corner[2];
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                diags.sort_by_key(|&(_, d)| d);

                for &(j, _) in &diags {
                    let pt = outline_verts[j];
                    let mut blocked = intersect_seg_contour(&pt, &corner, Some(j), outline_verts);
                    for &(other, _, _, _) in &holes[hi..] {
                        if blocked {
                            break;
                        }
                        blocked |=
                            intersect_seg_contour(&pt, &corner, None, &self.contours[other].verts);
                    }
                    if !blocked {
                        merge_at = Some(j);
                        break;
                    }
                }
                if merge_at.is_some() {
                    break;
                }
                best_vertex = (best_vertex + 1) % hole_len;
            }

            let Some(ia) = merge_at else {
                log::warn!(
                    "failed to find merge point for hole in region {}",
                    self.contours[outline].reg
                );
                continue;
            };

            let hole_verts = std::mem::take(&mut self.contours[hole].verts);
            let outline_verts = &mut self.contours[outline].verts;
            let na = outline_verts.len();
            let nb = hole_verts.len();
            let mut merged = Vec::with_capacity(na + nb + 2);
            for k in 0..=na {
                merged.push(outline_verts[(ia + k) % na]);
            }
            for k in 0..=nb {
                merged.push(hole_verts[(best_vertex + k) % nb]);
            }
            *outline_verts = merged;
        }
    }
}

/// Per-span mask of the sides that face another region (or nothing)
fn mark_region_boundaries(chf: &CompactHeightfield) -> Vec<u8> {
    let mut flags = vec![0u8; chf.spans.len()];
    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                let reg = chf.spans[i].reg;
                if reg == 0 || reg & RC_BORDER_REG != 0 {
                    continue;
                }
                let mut connected = 0u8;
                for dir in 0..4 {
                    let r = chf
                        .neighbour(x, z, i, dir)
                        .map_or(0, |(_, _, ai)| chf.spans[ai].reg);
                    if r == reg {
                        connected |= 1 << dir;
                    }
                }
                flags[i] = connected ^ 0xf;
            }
        }
    }
    flags
}

/// Height of the corner of span `i` in direction `dir`, and whether it is a border vertex
/// shared by two border regions and two interior regions of the same area
fn get_corner_height(chf: &CompactHeightfield, x: i32, z: i32, i: usize, dir: usize) -> (i32, bool) {
    let dirp = (dir + 1) & 0x3;
    let tag = |si: usize| chf.spans[si].reg as u32 | ((chf.areas[si] as u32) << 16);

    let mut height = chf.spans[i].y as i32;
    let mut regs = [0u32; 4];
    regs[0] = tag(i);

    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dir) {
        height = height.max(chf.spans[ai].y as i32);
        regs[1] = tag(ai);
        if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dirp) {
            height = height.max(chf.spans[ai2].y as i32);
            regs[2] = tag(ai2);
        }
    }
    if let Some((ax, az, ai)) = chf.neighbour(x, z, i, dirp) {
        height = height.max(chf.spans[ai].y as i32);
        regs[3] = tag(ai);
        if let Some((_, _, ai2)) = chf.neighbour(ax, az, ai, dir) {
            height = height.max(chf.spans[ai2].y as i32);
            regs[2] = tag(ai2);
        }
    }

    let border = RC_BORDER_REG as u32;
    let is_border_vertex = (0..4).any(|j| {
        let a = regs[j];
        let b = regs[(j + 1) & 0x3];
        let c = regs[(j + 2) & 0x3];
        let d = regs[(j + 3) & 0x3];
        let two_same_exts = (a & b & border) != 0 && a == b;
        let two_ints = ((c | d) & border) == 0;
        let ints_same_area = (c >> 16) == (d >> 16);
        let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
        two_same_exts && two_ints && ints_same_area && no_zeros
    });

    (height, is_border_vertex)
}

fn walk_contour(
    chf: &CompactHeightfield,
    flags: &mut [u8],
    mut x: i32,
    mut z: i32,
    mut i: usize,
    points: &mut Vec<[i32; 4]>,
) {
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..MAX_CONTOUR_WALK {
        if flags[i] & (1 << dir) != 0 {
            let (py, is_border_vertex) = get_corner_height(chf, x, z, i, dir);
            let (px, pz) = match dir {
                0 => (x, z + 1),
                1 => (x + 1, z + 1),
                2 => (x + 1, z),
                _ => (x, z),
            };

            let mut r = 0;
            if let Some((_, _, ai)) = chf.neighbour(x, z, i, dir) {
                r = chf.spans[ai].reg as i32;
                if area != chf.areas[ai] {
                    r |= RC_AREA_BORDER;
                }
            }
            if is_border_vertex {
                r |= RC_BORDER_VERTEX;
            }
            points.push([px, py, pz, r]);

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            let Some((nx, nz, ni)) = chf.neighbour(x, z, i, dir) else {
                return;
            };
            x = nx;
            z = nz;
            i = ni;
            dir = (dir + 3) & 0x3;
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let dx = (x - px) as f32;
    let dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = px as f32 + t * pqx - x as f32;
    let dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Simplifies a raw contour. The fourth component of each simplified vertex is first the
/// index of its raw vertex and, on return, the neighbour region and vertex flags.
fn simplify_contour(
    points: &[[i32; 4]],
    max_error: f32,
    max_edge_len: i32,
    flags: BuildContoursFlags,
) -> Vec<[i32; 4]> {
    let pn = points.len();
    let mut simplified: Vec<[i32; 4]> = Vec::new();
    if pn == 0 {
        return simplified;
    }

    let has_connections = points.iter().any(|p| p[3] & RC_CONTOUR_REG_MASK != 0);
    if has_connections {
        // Keep every point where the neighbour region or area changes
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs = (points[i][3] & RC_CONTOUR_REG_MASK) != (points[ii][3] & RC_CONTOUR_REG_MASK);
            let area_borders = (points[i][3] & RC_AREA_BORDER) != (points[ii][3] & RC_AREA_BORDER);
            if different_regs || area_borders {
                simplified.push([points[i][0], points[i][1], points[i][2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Seed with the lower-left and upper-right points
        let mut ll = 0;
        let mut ur = 0;
        for (i, p) in points.iter().enumerate() {
            let l = &points[ll];
            if p[0] < l[0] || (p[0] == l[0] && p[2] < l[2]) {
                ll = i;
            }
            let u = &points[ur];
            if p[0] > u[0] || (p[0] == u[0] && p[2] > u[2]) {
                ur = i;
            }
        }
        simplified.push([points[ll][0], points[ll][1], points[ll][2], ll as i32]);
        simplified.push([points[ur][0], points[ur][1], points[ur][2], ur as i32]);
    }

    // Insert the farthest raw point until every raw point is within the error
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut ax, mut az, ai) = (simplified[i][0], simplified[i][2], simplified[i][3] as usize);
        let (mut bx, mut bz, bi) = (simplified[ii][0], simplified[ii][2], simplified[ii][3] as usize);

        // Walk the segment in lexicographic order so shared edges simplify identically
        let (cinc, mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            (1, (ai + 1) % pn, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            (pn - 1, (bi + pn - 1) % pn, ai)
        };

        let mut maxd = 0.0;
        let mut maxi = None;
        if points[ci][3] & RC_CONTOUR_REG_MASK == 0 || points[ci][3] & RC_AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci][0], points[ci][2], ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(mi) if maxd > max_error_sqr => {
                simplified.insert(i + 1, [points[mi][0], points[mi][1], points[mi][2], mi as i32]);
            }
            _ => i += 1,
        }
    }

    // Split edges longer than max_edge_len
    if max_edge_len > 0 && (flags.tess_wall_edges || flags.tess_area_edges) {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (ax, az, ai) = (simplified[i][0], simplified[i][2], simplified[i][3] as usize);
            let (bx, bz, bi) = (simplified[ii][0], simplified[ii][2], simplified[ii][3] as usize);

            let ci = (ai + 1) % pn;
            let tess = (flags.tess_wall_edges && points[ci][3] & RC_CONTOUR_REG_MASK == 0)
                || (flags.tess_area_edges && points[ci][3] & RC_AREA_BORDER != 0);

            let mut maxi = None;
            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(mi) => {
                    simplified.insert(i + 1, [points[mi][0], points[mi][1], points[mi][2], mi as i32]);
                }
                None => i += 1,
            }
        }
    }

    // Region and area flags come from the next raw point, the border flag from the current one
    for v in simplified.iter_mut() {
        let bi = v[3] as usize;
        let ai = (bi + 1) % pn;
        v[3] = (points[ai][3] & (RC_CONTOUR_REG_MASK | RC_AREA_BORDER)) | (points[bi][3] & RC_BORDER_VERTEX);
    }
    simplified
}

fn remove_degenerate_segments(simplified: &mut Vec<[i32; 4]>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if simplified.len() > 1 && vequal(&simplified[i], &simplified[ni]) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Whether `pj` lies in the cone formed by vertex `i` of `verts` and its neighbours
fn in_cone(verts: &[[i32; 4]], i: usize, pj: &[i32; 4]) -> bool {
    let n = verts.len();
    let pi = &verts[i];
    let pi1 = &verts[next(i, n)];
    let pin1 = &verts[prev(i, n)];

    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Whether segment d0-d1 crosses any edge of `verts` not incident to vertex `skip`
fn intersect_seg_contour(d0: &[i32; 4], d1: &[i32; 4], skip: Option<usize>, verts: &[[i32; 4]]) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = next(k, n);
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p1 = &verts[k];
        let p2 = &verts[k1];
        if vequal(d0, p1) || vequal(d1, p1) || vequal(d0, p2) || vequal(d1, p2) {
            continue;
        }
        if intersect(d0, d1, p1, p2) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::{Heightfield, RC_WALKABLE_AREA};
    use crate::region::build_regions_monotone;

    fn regions_chf(w: i32, h: i32, border: i32, skip: impl Fn(i32, i32) -> bool) -> CompactHeightfield {
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
        build_regions_monotone(&mut chf, border, 0, 0).unwrap();
        chf
    }

    #[test]
    fn test_square_region_gives_quad() {
        let chf = regions_chf(8, 8, 0, |_, _| false);
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        assert_eq!(cset.len(), 1);
        let c = &cset.contours[0];
        assert_eq!(c.reg, 1);
        assert_eq!(c.verts.len(), 4);
        for v in &c.verts {
            assert!(v[0] == 0 || v[0] == 8);
            assert!(v[2] == 0 || v[2] == 8);
            assert_eq!(v[1], 2);
        }
        assert_eq!(c.rverts.len(), 32);
    }

    #[test]
    fn test_border_is_subtracted() {
        let chf = regions_chf(12, 12, 2, |_, _| false);
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        assert_eq!(cset.width, 8);
        assert_eq!(cset.bmin.x, 2.0);
        assert_eq!(cset.len(), 1);
        for v in &cset.contours[0].verts {
            assert!(v[0] >= 0 && v[0] <= 8);
        }
    }

    #[test]
    fn test_long_wall_edges_are_split() {
        let chf = regions_chf(16, 4, 0, |_, _| false);
        let cset = ContourSet::build(&chf, 1.3, 4, BuildContoursFlags::default()).unwrap();
        let c = &cset.contours[0];
        assert!(c.verts.len() > 4);
        for k in 0..c.verts.len() {
            let a = c.verts[k];
            let b = c.verts[(k + 1) % c.verts.len()];
            let dx = b[0] - a[0];
            let dz = b[2] - a[2];
            assert!(dx * dx + dz * dz <= 16);
        }
    }

    #[test]
    fn test_hole_is_merged_into_outline() {
        // A ring around an empty centre painted as one region
        let mut chf = regions_chf(9, 9, 0, |x, z| (3..6).contains(&x) && (3..6).contains(&z));
        for s in chf.spans.iter_mut() {
            s.reg = 1;
        }
        chf.max_regions = 1;

        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        assert_eq!(cset.len(), 1);
        // Outline and hole quads joined by a doubled bridge edge
        assert_eq!(cset.contours[0].verts.len(), 10);
    }

    #[test]
    fn test_empty_heightfield_no_contours() {
        let chf = regions_chf(4, 4, 0, |_, _| true);
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        assert!(cset.is_empty());
    }
}
