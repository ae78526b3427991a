//! Position error quadrics for the edge collapse simplifier.
//!
//! Each vertex accumulates the planes of its incident triangles, plus the border planes that hold
//! open edges in place. The error of a candidate position is the weighted mean squared distance to
//! those planes. Attribute error is measured separately by the simplifier.

use std::ops::AddAssign;

use glam::{DMat3, DVec3};

/// Oriented plane `normal . p + offset = 0` with unit `normal`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub offset: f64,
}

impl Plane {
    /// Plane of a triangle, wound counter clockwise. `None` if the triangle has no area.
    pub fn through_triangle(a: DVec3, b: DVec3, c: DVec3) -> Option<Self> {
        let normal = (b - a).cross(c - a).try_normalize()?;
        Some(Self::through_point(normal, a))
    }

    pub fn through_point(normal: DVec3, p: DVec3) -> Self {
        Plane {
            normal,
            offset: -normal.dot(p),
        }
    }

    pub fn signed_distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) + self.offset
    }
}

/// Sum of weighted squared plane distances, `v.A.v + 2 b.v + c`, with the total weight.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Quadric {
    a: DMat3,
    b: DVec3,
    c: f64,
    weight: f64,
}

impl Quadric {
    pub fn add_plane(&mut self, plane: Plane, weight: f64) {
        let n = plane.normal * weight;
        self.a += DMat3::from_cols(
            n * plane.normal.x,
            n * plane.normal.y,
            n * plane.normal.z,
        );
        self.b += n * plane.offset;
        self.c += weight * plane.offset * plane.offset;
        self.weight += weight;
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Weighted mean squared distance from `v` to the accumulated planes. Zero with no planes.
    pub fn error(&self, v: DVec3) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let sum = v.dot(self.a * v) + 2.0 * self.b.dot(v) + self.c;
        // Rounding can leave a tiny negative sum.
        sum.max(0.0) / self.weight
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Self) {
        self.a += rhs.a;
        self.b += rhs.b;
        self.c += rhs.c;
        self.weight += rhs.weight;
    }
}

#[cfg(test)]
mod test {
    use glam::dvec3;

    use super::*;

    #[test]
    fn test_triangle_plane_distance() {
        let plane = Plane::through_triangle(
            dvec3(0.0, 0.0, 1.0),
            dvec3(1.0, 0.0, 1.0),
            dvec3(0.0, 1.0, 1.0),
        )
        .unwrap();
        assert_eq!(plane.normal, DVec3::Z);
        assert_eq!(plane.signed_distance(dvec3(5.0, -3.0, 4.0)), 3.0);

        let mut q = Quadric::default();
        q.add_plane(plane, 2.0);
        assert!((q.error(dvec3(5.0, -3.0, 4.0)) - 9.0).abs() < 1e-9);
        assert!(q.error(dvec3(5.0, -3.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_corner_quadric_pins_point() {
        // Three orthogonal planes meeting at (1, 2, 3).
        let corner = dvec3(1.0, 2.0, 3.0);
        let mut q = Quadric::default();
        for normal in [DVec3::X, DVec3::Y, DVec3::Z] {
            q.add_plane(Plane::through_point(normal, corner), 1.0);
        }
        assert!(q.error(corner) < 1e-12);

        // Mean of the three squared distances.
        assert!((q.error(corner + dvec3(3.0, 0.0, 0.0)) - 3.0).abs() < 1e-9);

        let mut merged = q;
        merged += q;
        assert_eq!(merged.weight(), 6.0);
        assert!((merged.error(corner + DVec3::ONE) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_triangle() {
        let p = dvec3(1.0, 2.0, 3.0);
        assert!(Plane::through_triangle(p, p, p * 2.0).is_none());
        assert_eq!(Quadric::default().error(p), 0.0);
    }
}
