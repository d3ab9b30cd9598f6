//! Integer polygon predicates on the xz-plane
//!
//! Contour and polygon vertices are `[x, y, z, extra]` in cell units; only x and z take part.

/// Twice the signed area of (a, b, c); negative when c lies left of a->b
#[inline]
pub(crate) fn area2(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

#[inline]
pub(crate) fn left(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    area2(a, b, c) == 0
}

#[inline]
pub(crate) fn vequal(a: &[i32; 4], b: &[i32; 4]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

/// True when ab properly intersects cd (they share a point interior to both)
pub(crate) fn intersect_prop(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// True when c lies on the closed segment ab
fn between(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

/// True when segments ab and cd intersect, properly or improperly
pub(crate) fn intersect(a: &[i32; 4], b: &[i32; 4], c: &[i32; 4], d: &[i32; 4]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Twice the signed area of a polygon; negative for clockwise (hole) winding
pub(crate) fn polygon_area2(verts: &[[i32; 4]]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        area += vi[0] * vj[2] - vj[0] * vi[2];
        j = i;
    }
    (area + 1) / 2
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 >= n {
        0
    } else {
        i + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i32, z: i32) -> [i32; 4] {
        [x, 0, z, 0]
    }

    #[test]
    fn test_left_of_segment() {
        // area2 = (1)(1) - (0)(0) > 0, so (0, 1) is to the right in this convention
        assert!(!left(&p(0, 0), &p(1, 0), &p(0, 1)));
        assert!(left(&p(0, 0), &p(1, 0), &p(0, -1)));
        assert!(collinear(&p(0, 0), &p(2, 0), &p(1, 0)));
        assert!(!left(&p(0, 0), &p(2, 0), &p(1, 0)));
        assert!(left_on(&p(0, 0), &p(2, 0), &p(1, 0)));
    }

    #[test]
    fn test_segment_intersection() {
        assert!(intersect(&p(0, 0), &p(2, 2), &p(0, 2), &p(2, 0)));
        assert!(!intersect(&p(0, 0), &p(1, 0), &p(0, 1), &p(1, 1)));
        // Touching at an endpoint counts
        assert!(intersect(&p(0, 0), &p(2, 0), &p(1, 0), &p(1, 3)));
    }

    #[test]
    fn test_polygon_winding() {
        let ccw = [p(0, 0), p(0, 4), p(4, 4), p(4, 0)];
        let mut cw = ccw;
        cw.reverse();
        assert_ne!(polygon_area2(&ccw).signum(), polygon_area2(&cw).signum());
    }
}
