//! Plane equations for cluster bounds

use glam::Vec3;

/// Plane `dot(normal, p) + d = 0` with a unit normal.
///
/// Cluster planes face outward: points inside the cluster have a negative
/// signed distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// Plane through three points, normal = `(b - a) × (c - a)`.
    ///
    /// Returns `None` if the points are collinear.
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Option<Self> {
        let normal = (b - a).cross(c - a).try_normalize()?;
        Some(Self {
            normal,
            d: -normal.dot(a),
        })
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Flip the plane if needed so that `inside` has a non-positive distance.
    pub fn facing_away_from(self, inside: Vec3) -> Self {
        if self.signed_distance(inside) > 0.0 {
            self.flipped()
        } else {
            self
        }
    }

    pub fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            d: -self.d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() {
        let plane = Plane::from_points(Vec3::ZERO, Vec3::X, Vec3::Y).unwrap();
        assert_eq!(plane.normal, Vec3::Z);
        assert_eq!(plane.d, 0.0);
        assert_eq!(plane.signed_distance(Vec3::new(3.0, 4.0, 2.0)), 2.0);
    }

    #[test]
    fn test_collinear_points() {
        assert!(Plane::from_points(Vec3::ZERO, Vec3::X, Vec3::X * 2.0).is_none());
    }

    #[test]
    fn test_offset_plane() {
        let z = -5.0;
        let plane = Plane::from_points(
            Vec3::new(0.0, 0.0, z),
            Vec3::new(1.0, 0.0, z),
            Vec3::new(0.0, 1.0, z),
        )
        .unwrap();
        assert!((plane.signed_distance(Vec3::new(7.0, -2.0, z))).abs() < 1e-6);
        assert!((plane.signed_distance(Vec3::new(0.0, 0.0, -3.0)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_facing_away_from_inside_point() {
        let plane = Plane::from_points(Vec3::ZERO, Vec3::X, Vec3::Y).unwrap();
        let inside = Vec3::new(0.0, 0.0, 1.0);
        let outward = plane.facing_away_from(inside);
        assert!(outward.signed_distance(inside) < 0.0);
        assert_eq!(outward.normal, -Vec3::Z);

        let already = outward.facing_away_from(inside);
        assert_eq!(already, outward);
    }
}
