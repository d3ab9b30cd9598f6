//! Scalar and vector helpers

use glam::Vec3;

/// Clamps a value between min and max
#[inline]
pub fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Get the next power of 2 greater than or equal to x
#[inline]
pub fn next_pow2(x: u32) -> u32 {
    if x <= 1 {
        return 1;
    }
    let mut n = x - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n + 1
}

/// Integer log base 2
#[inline]
pub fn ilog2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    31 - x.leading_zeros()
}

/// Component-wise bounds of a flat `[x, y, z, x, y, z, ...]` vertex buffer
pub fn calc_bounds(verts: &[f32]) -> (Vec3, Vec3) {
    let mut bmin = Vec3::splat(f32::MAX);
    let mut bmax = Vec3::splat(f32::MIN);
    for v in verts.chunks_exact(3) {
        let p = Vec3::new(v[0], v[1], v[2]);
        bmin = bmin.min(p);
        bmax = bmax.max(p);
    }
    if verts.len() < 3 {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    (bmin, bmax)
}

/// Number of cells covering the given bounds on the xz-plane
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cs: f32) -> (i32, i32) {
    let w = ((bmax.x - bmin.x) / cs + 0.5) as i32;
    let h = ((bmax.z - bmin.z) / cs + 0.5) as i32;
    (w, h)
}

/// Reads vertex `i` of a flat vertex buffer
#[inline]
pub fn vert_at(verts: &[f32], i: usize) -> Vec3 {
    Vec3::new(verts[i * 3], verts[i * 3 + 1], verts[i * 3 + 2])
}

/// Heading (yaw, radians) of a horizontal direction, measured from +z towards +x
#[inline]
pub fn heading_from_direction(dir: Vec3) -> f32 {
    dir.x.atan2(dir.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2_and_ilog2() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(64), 64);
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(8), 3);
        assert_eq!(ilog2(9), 3);
    }

    #[test]
    fn test_calc_bounds_and_grid() {
        let verts = [0.0, 0.0, 0.0, 10.0, 1.0, 0.0, 10.0, -1.0, 6.0];
        let (bmin, bmax) = calc_bounds(&verts);
        assert_eq!(bmin, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(bmax, Vec3::new(10.0, 1.0, 6.0));
        assert_eq!(calc_grid_size(bmin, bmax, 0.5), (20, 12));
    }

    #[test]
    fn test_heading() {
        assert!((heading_from_direction(Vec3::Z)).abs() < 1e-6);
        assert!((heading_from_direction(Vec3::X) - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }
}
