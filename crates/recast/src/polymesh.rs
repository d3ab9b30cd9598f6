//! Polygon mesh generation for Recast
//!
//! Each contour is triangulated by ear clipping, the triangles are greedily merged into convex
//! polygons of at most `nvp` vertices and polygon adjacency is computed from shared edges.

use std::collections::HashMap;

use glam::Vec3;

use super::contour::ContourSet;
use super::triangle_utils::{intersect, intersect_prop, left, left_on, next, prev, vequal};
use recast_common::{Error, Result};

/// Null index for polygon vertices and neighbours
pub const MESH_NULL_IDX: u16 = 0xffff;
/// Neighbour flag marking a tile portal edge; the low bits hold the side code
pub const PORTAL_FLAG: u16 = 0x8000;
/// Largest number of vertices or polygons a mesh can hold
const MAX_MESH_ELEMENTS: usize = 0xfffe;
const REMOVABLE: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// A polygon mesh
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertices `[x, y, z]` in cell units
    pub verts: Vec<[u16; 3]>,
    /// `nvp` vertex indices followed by `nvp` neighbour entries per polygon
    pub polys: Vec<u16>,
    /// Region id per polygon
    pub regs: Vec<u16>,
    /// Area id per polygon
    pub areas: Vec<u8>,
    /// Ability flags per polygon
    pub flags: Vec<u16>,
    /// Max vertices per polygon
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Number of polygons
    pub fn poly_count(&self) -> usize {
        self.areas.len()
    }

    /// Number of vertices
    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    /// Vertex indices of polygon `i`, without the trailing nulls
    pub fn poly_verts(&self, i: usize) -> &[u16] {
        let p = &self.polys[i * self.nvp * 2..i * self.nvp * 2 + self.nvp];
        &p[..count_poly_verts(p)]
    }

    /// Neighbour entries of polygon `i` (one per vertex slot)
    pub fn poly_neis(&self, i: usize) -> &[u16] {
        let base = i * self.nvp * 2 + self.nvp;
        &self.polys[base..base + self.nvp]
    }

    /// Total number of triangles the polygons fan into
    pub fn triangle_count(&self) -> usize {
        (0..self.poly_count())
            .map(|i| self.poly_verts(i).len().saturating_sub(2))
            .sum()
    }

    /// Builds a polygon mesh from a contour set with at most `nvp` vertices per polygon
    pub fn build(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if !(3..=6).contains(&nvp) {
            return Err(Error::Configuration(format!(
                "vertices per polygon must be within 3..=6, got {}",
                nvp
            )));
        }

        let mut max_vertices = 0;
        let mut max_verts_per_cont = 0;
        for c in &cset.contours {
            if c.verts.len() < 3 {
                continue;
            }
            max_vertices += c.verts.len();
            max_verts_per_cont = max_verts_per_cont.max(c.verts.len());
        }
        if max_vertices >= MAX_MESH_ELEMENTS {
            return Err(Error::ResourceExhaustion(format!(
                "too many vertices {} (max {})",
                max_vertices, MAX_MESH_ELEMENTS
            )));
        }

        let mut mesh = Self {
            verts: Vec::with_capacity(max_vertices),
            polys: Vec::new(),
            regs: Vec::new(),
            areas: Vec::new(),
            flags: Vec::new(),
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
        };

        let mut vert_lookup: HashMap<(u16, u16), Vec<u16>> = HashMap::new();
        let mut indices: Vec<u32> = Vec::with_capacity(max_verts_per_cont);
        let mut tris: Vec<[u32; 3]> = Vec::with_capacity(max_verts_per_cont);

        for cont in &cset.contours {
            if cont.verts.len() < 3 {
                continue;
            }

            indices.clear();
            indices.extend(0..cont.verts.len() as u32);
            tris.clear();
            if !triangulate(&cont.verts, &mut indices, &mut tris) {
                log::warn!("bad triangulation of contour for region {}", cont.reg);
            }

            let mesh_indices: Vec<u16> = cont
                .verts
                .iter()
                .map(|v| mesh.add_vertex(&mut vert_lookup, v[0], v[1], v[2]))
                .collect();

            let mut polys: Vec<Vec<u16>> = tris
                .iter()
                .filter_map(|t| {
                    let (a, b, c) = (
                        mesh_indices[t[0] as usize],
                        mesh_indices[t[1] as usize],
                        mesh_indices[t[2] as usize],
                    );
                    (a != b && a != c && b != c).then(|| {
                        let mut p = vec![MESH_NULL_IDX; nvp];
                        p[..3].copy_from_slice(&[a, b, c]);
                        p
                    })
                })
                .collect();
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                merge_polys(&mut polys, &mesh.verts, nvp);
            }

            for p in polys {
                mesh.polys.extend_from_slice(&p);
                mesh.polys.extend(std::iter::repeat(MESH_NULL_IDX).take(nvp));
                mesh.regs.push(cont.reg);
                mesh.areas.push(cont.area);
            }
            if mesh.poly_count() > MAX_MESH_ELEMENTS {
                return Err(Error::ResourceExhaustion(format!(
                    "too many polygons (max {})",
                    MAX_MESH_ELEMENTS
                )));
            }
        }

        if mesh.verts.len() > MAX_MESH_ELEMENTS {
            return Err(Error::ResourceExhaustion(format!(
                "too many vertices {} (max {})",
                mesh.verts.len(),
                MAX_MESH_ELEMENTS
            )));
        }

        mesh.build_adjacency();
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(cset.width, cset.height);
        }
        mesh.flags = vec![0; mesh.poly_count()];

        log::debug!(
            "built polygon mesh: {} vertices, {} polygons",
            mesh.vert_count(),
            mesh.poly_count()
        );
        Ok(mesh)
    }

    /// Returns the index of the vertex at (x, z) within two cells of height, adding it if needed
    fn add_vertex(&mut self, lookup: &mut HashMap<(u16, u16), Vec<u16>>, x: i32, y: i32, z: i32) -> u16 {
        let (x, y, z) = (x as u16, y as u16, z as u16);
        let bucket = lookup.entry((x, z)).or_default();
        for &i in bucket.iter() {
            let v = self.verts[i as usize];
            if (v[1] as i32 - y as i32).abs() <= 2 {
                return i;
            }
        }
        let i = self.verts.len() as u16;
        self.verts.push([x, y, z]);
        bucket.push(i);
        i
    }

    fn build_adjacency(&mut self) {
        let nvp = self.nvp;
        let npolys = self.poly_count();

        // Edge (v0 < v1) -> (poly, edge) of the first owner
        let mut edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
        for i in 0..npolys {
            let verts = self.poly_verts(i).to_vec();
            for j in 0..verts.len() {
                let v0 = verts[j];
                let v1 = verts[(j + 1) % verts.len()];
                if v0 < v1 {
                    edges.entry((v0, v1)).or_insert((i, j));
                }
            }
        }

        let mut links = Vec::new();
        for i in 0..npolys {
            let verts = self.poly_verts(i);
            for j in 0..verts.len() {
                let v0 = verts[j];
                let v1 = verts[(j + 1) % verts.len()];
                if v0 > v1 {
                    if let Some(&(p, e)) = edges.get(&(v1, v0)) {
                        if p != i {
                            links.push((p, e, i, j));
                        }
                    }
                }
            }
        }

        for (p0, e0, p1, e1) in links {
            self.polys[p0 * nvp * 2 + nvp + e0] = p1 as u16;
            self.polys[p1 * nvp * 2 + nvp + e1] = p0 as u16;
        }
    }

    /// Tags unconnected edges lying on the tile boundary with their portal side code:
    /// 0 at x = 0, 1 at z = height, 2 at x = width, 3 at z = 0
    fn mark_portal_edges(&mut self, width: i32, height: i32) {
        let nvp = self.nvp;
        for i in 0..self.poly_count() {
            let nverts = self.poly_verts(i).len();
            for j in 0..nverts {
                let base = i * nvp * 2;
                if self.polys[base + nvp + j] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.verts[self.polys[base + j] as usize];
                let vb = self.verts[self.polys[base + (j + 1) % nverts] as usize];
                let (ax, az, bx, bz) = (va[0] as i32, va[2] as i32, vb[0] as i32, vb[2] as i32);

                let side = if ax == 0 && bx == 0 {
                    Some(0)
                } else if az == height && bz == height {
                    Some(1)
                } else if ax == width && bx == width {
                    Some(2)
                } else if az == 0 && bz == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polys[base + nvp + j] = PORTAL_FLAG | side;
                }
            }
        }
    }
}

pub(crate) fn count_poly_verts(p: &[u16]) -> usize {
    p.iter().position(|&v| v == MESH_NULL_IDX).unwrap_or(p.len())
}

fn contour_vert<'a>(verts: &'a [[i32; 4]], indices: &[u32], i: usize) -> &'a [i32; 4] {
    &verts[(indices[i] & INDEX_MASK) as usize]
}

fn in_cone(i: usize, j: usize, verts: &[[i32; 4]], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let pi = contour_vert(verts, indices, i);
    let pj = contour_vert(verts, indices, j);
    let pi1 = contour_vert(verts, indices, next(i, n));
    let pin1 = contour_vert(verts, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        if loose {
            return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
        }
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn diagonalie(i: usize, j: usize, verts: &[[i32; 4]], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let d0 = contour_vert(verts, indices, i);
    let d1 = contour_vert(verts, indices, j);
    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = contour_vert(verts, indices, k);
        let p1 = contour_vert(verts, indices, k1);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        let crosses = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if crosses {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, verts: &[[i32; 4]], indices: &[u32], loose: bool) -> bool {
    in_cone(i, j, verts, indices, loose) && diagonalie(i, j, verts, indices, loose)
}

/// Ear clips the polygon `indices` into `tris`, always cutting the shortest ear first.
/// Returns false when the polygon could not be fully triangulated.
fn triangulate(verts: &[[i32; 4]], indices: &mut Vec<u32>, tris: &mut Vec<[u32; 3]>) -> bool {
    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, indices, false) {
            indices[i1] |= REMOVABLE;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let shortest_ear = |indices: &[u32], candidate: &dyn Fn(usize) -> bool| {
            let mut best: Option<(usize, i32)> = None;
            for i in 0..n {
                if !candidate(i) {
                    continue;
                }
                let p0 = contour_vert(verts, indices, i);
                let p2 = contour_vert(verts, indices, next(next(i, n), n));
                let dx = p2[0] - p0[0];
                let dz = p2[2] - p0[2];
                let len = dx * dx + dz * dz;
                if best.map_or(true, |(_, l)| len < l) {
                    best = Some((i, len));
                }
            }
            best.map(|(i, _)| i)
        };

        let mut mini = shortest_ear(indices, &|i| indices[next(i, n)] & REMOVABLE != 0);
        if mini.is_none() {
            // Overlapping segments can block every strict diagonal
            mini = shortest_ear(indices, &|i| diagonal(i, next(next(i, n), n), verts, indices, true));
        }
        let Some(i) = mini else {
            return false;
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([
            indices[i] & INDEX_MASK,
            indices[i1] & INDEX_MASK,
            indices[i2] & INDEX_MASK,
        ]);

        indices.remove(i1);
        let n = indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);

        if diagonal(prev(i, n), i1, verts, indices, false) {
            indices[i] |= REMOVABLE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), verts, indices, false) {
            indices[i1] |= REMOVABLE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    tris.push([
        indices[0] & INDEX_MASK,
        indices[1] & INDEX_MASK,
        indices[2] & INDEX_MASK,
    ]);
    true
}

fn uleft(a: [u16; 3], b: [u16; 3], c: [u16; 3]) -> bool {
    let (ax, az) = (a[0] as i32, a[2] as i32);
    (b[0] as i32 - ax) * (c[2] as i32 - az) - (c[0] as i32 - ax) * (b[2] as i32 - az) < 0
}

/// Squared length of the shared edge when `pa` and `pb` can merge into a convex polygon
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[[u16; 3]], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| verts[i as usize];
    if !uleft(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !uleft(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let a = v(pa[ea]);
    let b = v(pa[(ea + 1) % na]);
    let dx = a[0] as i32 - b[0] as i32;
    let dz = a[2] as i32 - b[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Greedily merges the pair of polygons sharing the longest edge until no merge keeps
/// the result convex and within `nvp` vertices
fn merge_polys(polys: &mut Vec<Vec<u16>>, verts: &[[u16; 3]], nvp: usize) {
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polys.len() {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], verts, nvp) {
                    if best.map_or(true, |b| value > b.0) {
                        best = Some((value, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };

        let a = &polys[pa];
        let b = &polys[pb];
        let na = count_poly_verts(a);
        let nb = count_poly_verts(b);
        let mut merged = Vec::with_capacity(nvp);
        for i in 0..na - 1 {
            merged.push(a[(ea + 1 + i) % na]);
        }
        for i in 0..nb - 1 {
            merged.push(b[(eb + 1 + i) % nb]);
        }
        merged.resize(nvp, MESH_NULL_IDX);
        polys[pa] = merged;
        polys.swap_remove(pb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::Contour;

    fn quad_contour(reg: u16, x0: i32, z0: i32, x1: i32, z1: i32) -> Contour {
        Contour {
            verts: vec![[x0, 2, z0, 0], [x0, 2, z1, 0], [x1, 2, z1, 0], [x1, 2, z0, 0]],
            rverts: Vec::new(),
            reg,
            area: 63,
        }
    }

    fn cset(contours: Vec<Contour>, border_size: i32, size: i32) -> ContourSet {
        ContourSet {
            contours,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(size as f32, 4.0, size as f32),
            cs: 1.0,
            ch: 0.5,
            width: size,
            height: size,
            border_size,
            max_error: 1.3,
        }
    }

    #[test]
    fn test_quad_contour_becomes_single_poly() {
        let mesh = PolyMesh::build(&cset(vec![quad_contour(1, 0, 0, 8, 8)], 0, 8), 6).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.vert_count(), 4);
        assert_eq!(mesh.poly_verts(0).len(), 4);
        assert_eq!(mesh.regs[0], 1);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn test_triangles_only_with_three_verts_per_poly() {
        let mesh = PolyMesh::build(&cset(vec![quad_contour(1, 0, 0, 8, 8)], 0, 8), 3).unwrap();
        assert_eq!(mesh.poly_count(), 2);
        // The two triangles share the diagonal
        let shared = mesh.poly_neis(0).iter().filter(|&&n| n == 1).count();
        assert_eq!(shared, 1);
    }

    #[test]
    fn test_adjacent_contours_link_up() {
        let contours = vec![quad_contour(1, 0, 0, 4, 8), quad_contour(2, 4, 0, 8, 8)];
        let mesh = PolyMesh::build(&cset(contours, 0, 8), 6).unwrap();
        assert_eq!(mesh.poly_count(), 2);
        assert_eq!(mesh.vert_count(), 6);
        assert!(mesh.poly_neis(0).contains(&1));
        assert!(mesh.poly_neis(1).contains(&0));
    }

    #[test]
    fn test_portal_edges_on_tile_border() {
        let mesh = PolyMesh::build(&cset(vec![quad_contour(1, 0, 0, 8, 8)], 2, 8), 6).unwrap();
        let mut codes: Vec<u16> = mesh
            .poly_neis(0)
            .iter()
            .filter(|&&n| n != MESH_NULL_IDX)
            .map(|&n| n & !PORTAL_FLAG)
            .collect();
        codes.sort();
        assert_eq!(codes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_l_shape_stays_convex() {
        let contour = Contour {
            verts: vec![
                [0, 2, 0, 0],
                [0, 2, 8, 0],
                [4, 2, 8, 0],
                [4, 2, 4, 0],
                [8, 2, 4, 0],
                [8, 2, 0, 0],
            ],
            rverts: Vec::new(),
            reg: 1,
            area: 63,
        };
        let mesh = PolyMesh::build(&cset(vec![contour], 0, 8), 6).unwrap();
        assert!(mesh.poly_count() >= 2);
        for i in 0..mesh.poly_count() {
            let pv = mesh.poly_verts(i);
            for k in 0..pv.len() {
                let a = mesh.verts[pv[k] as usize];
                let b = mesh.verts[pv[(k + 1) % pv.len()] as usize];
                let c = mesh.verts[pv[(k + 2) % pv.len()] as usize];
                let (ax, az) = (a[0] as i32, a[2] as i32);
                let turn = (b[0] as i32 - ax) * (c[2] as i32 - az) - (c[0] as i32 - ax) * (b[2] as i32 - az);
                assert!(turn <= 0, "polygon {} is not convex", i);
            }
        }
    }

    #[test]
    fn test_rejects_bad_nvp() {
        let err = PolyMesh::build(&cset(Vec::new(), 0, 8), 7).unwrap_err();
        assert!(err.is_configuration());
    }
}
