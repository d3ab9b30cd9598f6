//! Geometric queries on the xz-plane.
//!
//! Navigation data is 2.5D: polygons are convex on the xz-plane and carry height separately,
//! so most tests here ignore the y component.

use glam::Vec3;

/// Twice the signed area of triangle (a, b, c) on the xz-plane
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Squared distance between two points on the xz-plane
#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

/// Distance between two points on the xz-plane
#[inline]
pub fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    dist_sqr_2d(a, b).sqrt()
}

/// Squared distance from `p` to segment (a, b) on the xz-plane, and the segment parameter
pub fn dist_point_segment_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let pqx = b.x - a.x;
    let pqz = b.z - a.z;
    let mut dx = p.x - a.x;
    let mut dz = p.z - a.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = a.x + t * pqx - p.x;
    dz = a.z + t * pqz - p.z;
    (dx * dx + dz * dz, t)
}

/// Squared 3D distance from `p` to segment (a, b)
pub fn dist_point_segment_sqr(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let d = ab.length_squared();
    let mut t = ab.dot(p - a);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (a + ab * t - p).length_squared()
}

/// Point-in-polygon test on the xz-plane (crossing number)
pub fn point_in_polygon_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Signed distance from `p` to the edges of a polygon on the xz-plane.
///
/// Negative inside, positive outside.
pub fn dist_to_poly_2d(p: Vec3, verts: &[Vec3]) -> f32 {
    let mut dmin = f32::MAX;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (d, _) = dist_point_segment_sqr_2d(p, verts[j], verts[i]);
        dmin = dmin.min(d);
        j = i;
    }
    let d = dmin.sqrt();
    if point_in_polygon_2d(p, verts) {
        -d
    } else {
        d
    }
}

/// Height of triangle (a, b, c) under `p`, if `p` projects inside it on the xz-plane
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        u = -u;
        v = -v;
    }
    let denom = denom.abs();

    if u >= -EPS * denom && v >= -EPS * denom && (u + v) <= denom * (1.0 + EPS) {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Closest point to `p` on triangle (a, b, c) in 3D
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Whether two axis-aligned boxes overlap (touching counts)
#[inline]
pub fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x
        && amax.x >= bmin.x
        && amin.y <= bmax.y
        && amax.y >= bmin.y
        && amin.z <= bmax.z
        && amax.z >= bmin.z
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_point_in_polygon() {
        let poly = square();
        assert!(point_in_polygon_2d(Vec3::new(1.0, 5.0, 1.0), &poly));
        assert!(!point_in_polygon_2d(Vec3::new(3.0, 0.0, 1.0), &poly));
    }

    #[test]
    fn test_dist_to_poly_sign() {
        let poly = square();
        let inside = dist_to_poly_2d(Vec3::new(1.0, 0.0, 1.0), &poly);
        let outside = dist_to_poly_2d(Vec3::new(3.0, 0.0, 1.0), &poly);
        assert!((inside + 1.0).abs() < 1e-5);
        assert!((outside - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_triangle_height() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 2.0, 2.0);
        let c = Vec3::new(2.0, 0.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(0.5, 10.0, 1.0), a, b, c).unwrap();
        assert!((h - 1.0).abs() < 1e-5);
        assert!(closest_height_point_triangle(Vec3::new(5.0, 0.0, 5.0), a, b, c).is_none());
    }

    #[test]
    fn test_segment_distance() {
        let (d, t) = dist_point_segment_sqr_2d(
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        );
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_closest_point_on_triangle_inside() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 0.0, 2.0);
        let c = Vec3::new(2.0, 0.0, 0.0);
        let p = closest_point_on_triangle(Vec3::new(0.5, 3.0, 0.5), a, b, c);
        assert!((p - Vec3::new(0.5, 0.0, 0.5)).length() < 1e-5);
    }
}
