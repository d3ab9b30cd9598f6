//! Detail mesh generation for Recast
//!
//! Every polygon of the polygon mesh gets a small triangle mesh that follows the sampled
//! surface height more closely than the flat polygon does.

use glam::Vec3;

use super::compact_heightfield::CompactHeightfield;
use super::polymesh::PolyMesh;
use recast_common::{
    closest_height_point_triangle, dist_2d, dist_point_segment_sqr, dist_point_segment_sqr_2d,
    dist_to_poly_2d, Result,
};

const UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;
const EDGE_EPS_SQR: f32 = 0.001 * 0.001;

/// Edge flag of a detail triangle edge that lies on its polygon's boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// A detailed polygon mesh
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// Per polygon: vertex base, vertex count, triangle base, triangle count
    pub meshes: Vec<[u32; 4]>,
    /// World-space vertices; each submesh starts with its polygon's vertices
    pub verts: Vec<Vec3>,
    /// Local vertex indices plus packed edge flags (2 bits per edge)
    pub tris: Vec<[u8; 4]>,
}

struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    zmin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    /// Samples the floor height of the spans of region `reg` under the polygon bounds
    fn sample(chf: &CompactHeightfield, bounds: [i32; 4], reg: u16, border: i32) -> Self {
        let [xmin, xmax, zmin, zmax] = bounds;
        let width = xmax - xmin;
        let height = zmax - zmin;
        let mut data = vec![UNSET_HEIGHT; (width * height) as usize];

        for hz in 0..height {
            for hx in 0..width {
                let x = xmin + hx + border;
                let z = zmin + hz + border;
                if x < 0 || z < 0 || x >= chf.width || z >= chf.height {
                    continue;
                }
                if let Some(i) = chf.cell_spans(x, z).find(|&i| chf.spans[i].reg == reg) {
                    data[(hx + hz * width) as usize] = chf.spans[i].y;
                }
            }
        }

        Self {
            data,
            xmin,
            zmin,
            width,
            height,
        }
    }

    /// Height (cells) under the local position `p`, searching outwards when the cell is unset
    fn height_at(&self, p: Vec3, ics: f32, ch: f32, radius: i32) -> u16 {
        let ix = ((p.x * ics + 0.01).floor() as i32 - self.xmin).clamp(0, self.width - 1);
        let iz = ((p.z * ics + 0.01).floor() as i32 - self.zmin).clamp(0, self.height - 1);
        let mut h = self.data[(ix + iz * self.width) as usize];
        if h != UNSET_HEIGHT {
            return h;
        }

        // Spiral outwards ring by ring, keeping the sample closest in height
        let (mut x, mut z, mut dx, mut dz) = (1i32, 0i32, 1i32, 0i32);
        let max_size = radius * 2 + 1;
        let max_iter = max_size * max_size - 1;
        let mut next_ring_start = 8;
        let mut next_ring_iters = 16;
        let mut dmin = f32::MAX;

        for i in 0..max_iter {
            let nx = ix + x;
            let nz = iz + z;
            if nx >= 0 && nz >= 0 && nx < self.width && nz < self.height {
                let nh = self.data[(nx + nz * self.width) as usize];
                if nh != UNSET_HEIGHT {
                    let d = (nh as f32 * ch - p.y).abs();
                    if d < dmin {
                        h = nh;
                        dmin = d;
                    }
                }
            }

            if i + 1 == next_ring_start {
                if h != UNSET_HEIGHT {
                    break;
                }
                next_ring_start += next_ring_iters;
                next_ring_iters += 8;
            }

            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                let tmp = dx;
                dx = -dz;
                dz = tmp;
            }
            x += dx;
            z += dz;
        }

        if h == UNSET_HEIGHT {
            (p.y / ch).max(0.0) as u16
        } else {
            h
        }
    }
}

struct DetailParams {
    sample_dist: f32,
    sample_max_error: f32,
    cs: f32,
    ch: f32,
    search_radius: i32,
}

impl PolyMeshDetail {
    /// Builds the detail mesh of `mesh` from the heightfield it was built from.
    ///
    /// `sample_dist` is the world-space spacing of height samples (0 disables sampling) and
    /// `sample_max_error` the height error that triggers inserting a sample.
    pub fn build(
        mesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        let mut dmesh = Self::default();
        if mesh.poly_count() == 0 {
            return Ok(dmesh);
        }

        let params = DetailParams {
            sample_dist,
            sample_max_error,
            cs: mesh.cs,
            ch: mesh.ch,
            search_radius: (mesh.max_edge_error.ceil() as i32).max(1),
        };
        let orig = mesh.bmin;
        let border = mesh.border_size;

        for p in 0..mesh.poly_count() {
            let pv = mesh.poly_verts(p);
            let poly: Vec<Vec3> = pv
                .iter()
                .map(|&vi| {
                    let v = mesh.verts[vi as usize];
                    Vec3::new(v[0] as f32 * mesh.cs, v[1] as f32 * mesh.ch, v[2] as f32 * mesh.cs)
                })
                .collect();

            let mut bounds = [i32::MAX, i32::MIN, i32::MAX, i32::MIN];
            for &vi in pv {
                let v = mesh.verts[vi as usize];
                bounds[0] = bounds[0].min(v[0] as i32);
                bounds[1] = bounds[1].max(v[0] as i32);
                bounds[2] = bounds[2].min(v[2] as i32);
                bounds[3] = bounds[3].max(v[2] as i32);
            }
            let bounds = [
                (bounds[0] - 1).max(-border),
                (bounds[1] + 1).min(chf.width - border),
                (bounds[2] - 1).max(-border),
                (bounds[3] + 1).min(chf.height - border),
            ];
            let hp = HeightPatch::sample(chf, bounds, mesh.regs[p], border);

            let (verts, tris) = build_poly_detail(&poly, &params, &hp);

            let vert_base = dmesh.verts.len() as u32;
            let tri_base = dmesh.tris.len() as u32;
            dmesh.meshes.push([vert_base, verts.len() as u32, tri_base, tris.len() as u32]);
            // Detail heights sit one cell above the span floor
            dmesh
                .verts
                .extend(verts.iter().map(|v| *v + orig + Vec3::new(0.0, chf.ch, 0.0)));
            dmesh
                .tris
                .extend(tris.iter().map(|t| [t[0], t[1], t[2], tri_edge_flags(&verts, t, poly.len())]));
        }

        log::debug!(
            "built detail mesh: {} vertices, {} triangles",
            dmesh.verts.len(),
            dmesh.tris.len()
        );
        Ok(dmesh)
    }

    /// Number of detail triangles
    pub fn triangle_count(&self) -> usize {
        self.tris.len()
    }
}

fn poly_min_extent(verts: &[Vec3]) -> f32 {
    let n = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = (i + 1) % n;
        let mut max_edge_dist = 0.0f32;
        for (j, v) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            let (d, _) = dist_point_segment_sqr_2d(*v, verts[i], verts[ni]);
            max_edge_dist = max_edge_dist.max(d);
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

fn build_poly_detail(poly: &[Vec3], params: &DetailParams, hp: &HeightPatch) -> (Vec<Vec3>, Vec<[u8; 3]>) {
    let nin = poly.len();
    let ics = 1.0 / params.cs;
    let mut verts: Vec<Vec3> = poly.to_vec();
    let mut hull: Vec<usize> = Vec::with_capacity(MAX_VERTS);

    if params.sample_dist > 0.0 {
        let max_err_sqr = params.sample_max_error * params.sample_max_error;
        for i in 0..nin {
            let j = (i + nin - 1) % nin;
            let (mut vj, mut vi) = (poly[j], poly[i]);
            let mut swapped = false;
            // Sample shared edges in the same direction from both sides
            if (vj.x - vi.x).abs() < 1e-6 {
                if vj.z > vi.z {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj.x > vi.x {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }

            let delta = vi - vj;
            let d = (delta.x * delta.x + delta.z * delta.z).sqrt();
            let mut nn = 1 + (d / params.sample_dist).floor() as usize;
            nn = nn.min(MAX_VERTS_PER_EDGE - 1);
            if verts.len() + nn >= MAX_VERTS {
                nn = MAX_VERTS.saturating_sub(1 + verts.len()).max(1);
            }

            let edge: Vec<Vec3> = (0..=nn)
                .map(|k| {
                    let u = k as f32 / nn as f32;
                    let mut pos = vj + delta * u;
                    pos.y = hp.height_at(pos, ics, params.ch, params.search_radius) as f32 * params.ch;
                    pos
                })
                .collect();

            let mut idx = vec![0usize, nn];
            let mut k = 0;
            while k + 1 < idx.len() {
                let (a, b) = (idx[k], idx[k + 1]);
                let mut maxd = 0.0;
                let mut maxi = None;
                for m in a + 1..b {
                    let dev = dist_point_segment_sqr(edge[m], edge[a], edge[b]);
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                match maxi {
                    Some(m) if maxd > max_err_sqr => idx.insert(k + 1, m),
                    _ => k += 1,
                }
            }

            hull.push(j);
            let inner = &idx[1..idx.len() - 1];
            let ordered: Vec<usize> = if swapped {
                inner.iter().rev().copied().collect()
            } else {
                inner.to_vec()
            };
            for k in ordered {
                if verts.len() >= MAX_VERTS {
                    break;
                }
                hull.push(verts.len());
                verts.push(edge[k]);
            }
        }
    } else {
        hull.extend(0..nin);
    }

    let mut tris = triangulate_hull(&verts, &hull, nin);
    if tris.is_empty() {
        log::warn!("could not triangulate detail polygon with {} vertices", nin);
        return (verts, Vec::new());
    }

    let min_extent = poly_min_extent(poly);
    if params.sample_dist > 0.0 && min_extent >= params.sample_dist * 2.0 {
        let mut bmin = poly[0];
        let mut bmax = poly[0];
        for v in &poly[1..] {
            bmin = bmin.min(*v);
            bmax = bmax.max(*v);
        }

        let sd = params.sample_dist;
        let x0 = (bmin.x / sd).floor() as i32;
        let x1 = (bmax.x / sd).ceil() as i32;
        let z0 = (bmin.z / sd).floor() as i32;
        let z1 = (bmax.z / sd).ceil() as i32;

        let mut samples: Vec<(Vec3, bool)> = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                let mut pt = Vec3::new(x as f32 * sd, (bmax.y + bmin.y) * 0.5, z as f32 * sd);
                // Keep samples away from the polygon edges
                if dist_to_poly_2d(pt, poly) > -sd / 2.0 {
                    continue;
                }
                pt.y = hp.height_at(pt, ics, params.ch, params.search_radius) as f32 * params.ch;
                samples.push((pt, false));
            }
        }

        for _ in 0..samples.len() {
            if verts.len() >= MAX_VERTS || tris.len() + 2 > MAX_TRIS {
                break;
            }

            let mut best: Option<(usize, f32)> = None;
            for (si, (pt, added)) in samples.iter().enumerate() {
                if *added {
                    continue;
                }
                let Some(d) = dist_to_tri_mesh(*pt, &verts, &tris) else {
                    continue;
                };
                if best.map_or(true, |(_, bd)| d > bd) {
                    best = Some((si, d));
                }
            }
            let Some((si, bestd)) = best else {
                break;
            };
            if bestd <= params.sample_max_error {
                break;
            }

            samples[si].1 = true;
            let pt = samples[si].0;
            let vi = verts.len();
            verts.push(pt);
            split_containing_triangle(&verts, &mut tris, vi);
        }
    }

    (verts, tris)
}

/// Fans the hull into triangles, growing from the ear with the shortest perimeter
fn triangulate_hull(verts: &[Vec3], hull: &[usize], nin: usize) -> Vec<[u8; 3]> {
    let nhull = hull.len();
    let mut tris = Vec::new();
    if nhull < 3 {
        return tris;
    }
    let next = |i: usize| (i + 1) % nhull;
    let prev = |i: usize| (i + nhull - 1) % nhull;

    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        // Ears have an original polygon vertex in the middle
        if hull[i] >= nin {
            continue;
        }
        let pv = verts[hull[prev(i)]];
        let cv = verts[hull[i]];
        let nv = verts[hull[next(i)]];
        let d = dist_2d(pv, cv) + dist_2d(cv, nv) + dist_2d(nv, pv);
        if d < dmin {
            start = i;
            left = next(i);
            right = prev(i);
            dmin = d;
        }
    }

    tris.push([hull[start] as u8, hull[left] as u8, hull[right] as u8]);

    while next(left) != right {
        let nleft = next(left);
        let nright = prev(right);
        let cvleft = verts[hull[left]];
        let nvleft = verts[hull[nleft]];
        let cvright = verts[hull[right]];
        let nvright = verts[hull[nright]];
        let dleft = dist_2d(cvleft, nvleft) + dist_2d(nvleft, cvright);
        let dright = dist_2d(cvright, nvright) + dist_2d(cvleft, nvright);

        if dleft < dright {
            tris.push([hull[left] as u8, hull[nleft] as u8, hull[right] as u8]);
            left = nleft;
        } else {
            tris.push([hull[left] as u8, hull[nright] as u8, hull[right] as u8]);
            right = nright;
        }
    }
    tris
}

/// Vertical distance from `p` to the triangle mesh below or above it
fn dist_to_tri_mesh(p: Vec3, verts: &[Vec3], tris: &[[u8; 3]]) -> Option<f32> {
    tris.iter()
        .filter_map(|t| {
            closest_height_point_triangle(p, verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize])
                .map(|h| (h - p.y).abs())
        })
        .min_by(|a, b| a.total_cmp(b))
}

/// Replaces the triangle containing vertex `vi` with three triangles fanning from it
fn split_containing_triangle(verts: &[Vec3], tris: &mut Vec<[u8; 3]>, vi: usize) {
    let p = verts[vi];
    let Some(ti) = tris.iter().position(|t| {
        closest_height_point_triangle(p, verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize])
            .is_some()
    }) else {
        return;
    };

    let [a, b, c] = tris.swap_remove(ti);
    let v = vi as u8;
    for t in [[a, b, v], [b, c, v], [c, a, v]] {
        let area = recast_common::tri_area_2d(verts[t[0] as usize], verts[t[1] as usize], verts[t[2] as usize]);
        if area.abs() > 1e-6 {
            tris.push(t);
        }
    }
}

fn edge_on_poly_boundary(va: Vec3, vb: Vec3, npoly: usize, verts: &[Vec3]) -> bool {
    (0..npoly).any(|i| {
        let j = (i + npoly - 1) % npoly;
        let (da, _) = dist_point_segment_sqr_2d(va, verts[j], verts[i]);
        let (db, _) = dist_point_segment_sqr_2d(vb, verts[j], verts[i]);
        da < EDGE_EPS_SQR && db < EDGE_EPS_SQR
    })
}

fn tri_edge_flags(verts: &[Vec3], t: &[u8; 3], npoly: usize) -> u8 {
    let mut flags = 0;
    for k in 0..3 {
        let va = verts[t[k] as usize];
        let vb = verts[t[(k + 1) % 3] as usize];
        if edge_on_poly_boundary(va, vb, npoly, verts) {
            flags |= DETAIL_EDGE_BOUNDARY << (k * 2);
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, ContourSet};
    use crate::heightfield::{Heightfield, RC_WALKABLE_AREA};
    use crate::region::build_regions_monotone;

    fn flat_pipeline(size: i32) -> (PolyMesh, CompactHeightfield) {
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
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap();
        build_regions_monotone(&mut chf, 0, 0, 0).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        let mesh = PolyMesh::build(&cset, 6).unwrap();
        (mesh, chf)
    }

    #[test]
    fn test_flat_detail_without_sampling() {
        let (mesh, chf) = flat_pipeline(8);
        let dmesh = PolyMeshDetail::build(&mesh, &chf, 0.0, 1.0).unwrap();
        assert_eq!(dmesh.meshes.len(), mesh.poly_count());
        assert_eq!(dmesh.triangle_count(), mesh.triangle_count());
        for v in &dmesh.verts {
            assert!((v.y - 1.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_flat_detail_with_sampling_stays_flat() {
        let (mesh, chf) = flat_pipeline(8);
        let dmesh = PolyMeshDetail::build(&mesh, &chf, 2.0, 0.5).unwrap();
        let [vb, vn, tb, tn] = dmesh.meshes[0];
        assert!(vn >= 4);
        assert!(tn >= 2);
        for v in &dmesh.verts[vb as usize..(vb + vn) as usize] {
            assert!((v.y - 1.5).abs() < 1e-4);
        }
        for t in &dmesh.tris[tb as usize..(tb + tn) as usize] {
            assert!(t[..3].iter().all(|&i| (i as u32) < vn));
        }
    }

    #[test]
    fn test_boundary_edges_flagged() {
        let (mesh, chf) = flat_pipeline(8);
        let dmesh = PolyMeshDetail::build(&mesh, &chf, 0.0, 1.0).unwrap();
        let boundary_edges: u32 = dmesh
            .tris
            .iter()
            .map(|t| (0..3usize).filter(|&k| (t[3] >> (k * 2)) & DETAIL_EDGE_BOUNDARY != 0).count() as u32)
            .sum();
        assert_eq!(boundary_edges, 4);
    }

    #[test]
    fn test_spiral_search_fills_gaps() {
        let hp = HeightPatch {
            data: vec![UNSET_HEIGHT, UNSET_HEIGHT, UNSET_HEIGHT, 7],
            xmin: 0,
            zmin: 0,
            width: 2,
            height: 2,
        };
        assert_eq!(hp.height_at(Vec3::new(0.2, 0.0, 0.2), 1.0, 0.5, 2), 7);
    }
}
