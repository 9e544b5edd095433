//! Per-triangle ordering criteria and the discrete curvature measure
//!
//! Every greedy decision in the pipeline is ordered by a scalar
//! computed from a triangle's geometry. Smaller is always better.

use connect3d_core::Point3d;

/// The per-triangle scalar used to order greedy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Criterion {
    /// Radius of the triangle's circumcircle
    Circumradius,
    /// Longest edge in the triangle (prefers acute, small triangles)
    #[default]
    LongestEdge,
    /// Triangle area
    Area,
    /// Longest edge relative to the inradius
    AspectRatio,
}

/// Evaluate the criterion for a triangle given its corner coordinates.
pub fn triangle_criterion(criterion: Criterion, a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    match criterion {
        Criterion::Circumradius => circumradius(a, b, c),
        Criterion::LongestEdge => longest_edge(a, b, c),
        Criterion::Area => triangle_area(a, b, c),
        Criterion::AspectRatio => aspect_ratio(a, b, c),
    }
}

/// Circumcircle radius; degenerate (collinear) triangles rank last.
pub fn circumradius(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    let la = (b - a).norm();
    let lb = (c - b).norm();
    let lc = (a - c).norm();
    let area = triangle_area(a, b, c);

    if area <= f64::MIN_POSITIVE {
        return f64::INFINITY;
    }

    la * lb * lc / (4.0 * area)
}

pub fn longest_edge(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    let la = (b - a).norm();
    let lb = (c - b).norm();
    let lc = (a - c).norm();

    la.max(lb).max(lc)
}

pub fn triangle_area(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    (b - a).cross(&(c - a)).norm() * 0.5
}

/// Longest edge over twice the inradius; equilateral gives the minimum.
pub fn aspect_ratio(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    let la = (b - a).norm();
    let lb = (c - b).norm();
    let lc = (a - c).norm();
    let area = triangle_area(a, b, c);

    if area <= f64::MIN_POSITIVE {
        return f64::INFINITY;
    }

    // inradius = 2 * area / perimeter
    let perimeter = la + lb + lc;
    longest_edge(a, b, c) * perimeter / (4.0 * area)
}

fn acos_safe(x: f64) -> f64 {
    x.clamp(-1.0, 1.0).acos()
}

/// Discrete curvature contributed by the edge `(e0, e1)` shared by the
/// triangles `(e0, e1, t0)` and `(e0, e1, t1)`: the angle between the
/// facet normals in degrees, scaled by the edge length. Zero for a
/// flat continuation, 180 x length for a fold-back.
pub fn edge_curvature(e0: &Point3d, e1: &Point3d, t0: &Point3d, t1: &Point3d) -> f64 {
    let ab = e1 - e0;
    let n0 = ab.cross(&(t0 - e0));
    let n1 = (t1 - e0).cross(&ab);

    let l0 = n0.norm();
    let l1 = n1.norm();

    if l0 <= f64::MIN_POSITIVE || l1 <= f64::MIN_POSITIVE {
        return 0.0;
    }

    let angle = acos_safe(n0.dot(&n1) / (l0 * l1)).to_degrees();

    angle * ab.norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> Point3d {
        Point3d::new(x, y, z)
    }

    #[test]
    fn test_longest_edge() {
        let v = triangle_criterion(
            Criterion::LongestEdge,
            &p(0.0, 0.0, 0.0),
            &p(3.0, 0.0, 0.0),
            &p(0.0, 4.0, 0.0),
        );
        assert_relative_eq!(v, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_area() {
        let v = triangle_criterion(
            Criterion::Area,
            &p(0.0, 0.0, 0.0),
            &p(2.0, 0.0, 0.0),
            &p(0.0, 2.0, 0.0),
        );
        assert_relative_eq!(v, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_circumradius_right_triangle() {
        // hypotenuse is the diameter
        let v = circumradius(&p(0.0, 0.0, 0.0), &p(3.0, 0.0, 0.0), &p(0.0, 4.0, 0.0));
        assert_relative_eq!(v, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_circumradius_degenerate() {
        let v = circumradius(&p(0.0, 0.0, 0.0), &p(1.0, 0.0, 0.0), &p(2.0, 0.0, 0.0));
        assert!(v.is_infinite());
    }

    #[test]
    fn test_aspect_ratio_equilateral_is_minimal() {
        let eq = aspect_ratio(
            &p(0.0, 0.0, 0.0),
            &p(1.0, 0.0, 0.0),
            &p(0.5, 3.0f64.sqrt() / 2.0, 0.0),
        );
        let thin = aspect_ratio(&p(0.0, 0.0, 0.0), &p(1.0, 0.0, 0.0), &p(0.5, 0.05, 0.0));
        assert!(eq < thin);
    }

    #[test]
    fn test_edge_curvature() {
        let e0 = p(0.0, 0.0, 0.0);
        let e1 = p(2.0, 0.0, 0.0);

        // coplanar continuation
        let flat = edge_curvature(&e0, &e1, &p(1.0, 1.0, 0.0), &p(1.0, -1.0, 0.0));
        assert_relative_eq!(flat, 0.0, epsilon = 1e-9);

        // right-angle fold
        let bent = edge_curvature(&e0, &e1, &p(1.0, 1.0, 0.0), &p(1.0, 0.0, 1.0));
        assert_relative_eq!(bent, 90.0 * 2.0, epsilon = 1e-9);

        // complete fold-back
        let fold = edge_curvature(&e0, &e1, &p(1.0, 1.0, 0.0), &p(1.0, 1.0, 0.0));
        assert_relative_eq!(fold, 180.0 * 2.0, epsilon = 1e-9);
    }
}
