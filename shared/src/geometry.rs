//! Planar geometry used for collision probing between entities.
//!
//! Every entity is an oriented rectangle. Rotations are expressed in degrees,
//! counter-clockwise, and a rotation of zero faces along the positive y-axis.

use serde::{Deserialize, Serialize};

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    pub x: f32,
    ///Value along the y-axis.
    pub y: f32,
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the unit vector a body rotated by `degrees` moves along.
    pub fn heading(degrees: f32) -> Vector2 {
        Vector2::new(0.0, 1.0).rotate(degrees)
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn dot(&self, other: &Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    ///Returns the vector rotated counter-clockwise by `degrees`.
    pub fn rotate(&self, degrees: f32) -> Vector2 {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Vector2 {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }
}

/// Half of the diagonal of a `width` x `height` rectangle.
///
/// Two rectangles whose centers are further apart than the sum of their
/// reaches cannot intersect, whatever their rotation.
pub fn reach(width: f32, height: f32) -> f32 {
    (width * width + height * height).sqrt() / 2.0
}

/// Oriented rectangle, stored as its center and its four corners.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    center: Vector2,
    vertices: [Vector2; 4],
}

impl Polygon {
    /// Builds the bounds of a `width` x `height` rectangle centered at
    /// `center` and rotated by `rotation` degrees.
    pub fn oriented_rect(center: Vector2, width: f32, height: f32, rotation: f32) -> Self {
        let w2 = width / 2.0;
        let h2 = height / 2.0;
        let corners = [
            Vector2::new(-w2, h2),
            Vector2::new(w2, h2),
            Vector2::new(w2, -h2),
            Vector2::new(-w2, -h2),
        ];
        let vertices = corners.map(|corner| corner.rotate(rotation).add(&center));
        Polygon { center, vertices }
    }

    pub fn center(&self) -> Vector2 {
        self.center
    }

    pub fn vertices(&self) -> &[Vector2; 4] {
        &self.vertices
    }

    /// Returns true if the point lies strictly inside the polygon.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let point = Vector2::new(x, y);
        let mut sign = 0.0f32;
        for i in 0..self.vertices.len() {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % self.vertices.len()];
            let edge = b.sub(&a);
            let to_point = point.sub(&a);
            let cross = edge.x * to_point.y - edge.y * to_point.x;
            if cross == 0.0 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Exact overlap test using the separating axis theorem.
    ///
    /// Polygons that only share an edge or a corner do not overlap.
    pub fn overlaps(&self, other: &Polygon) -> bool {
        !self.has_separating_axis(other) && !other.has_separating_axis(self)
    }

    fn has_separating_axis(&self, other: &Polygon) -> bool {
        for i in 0..self.vertices.len() {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % self.vertices.len()];
            let edge = b.sub(&a);
            let axis = Vector2::new(-edge.y, edge.x);

            let (min1, max1) = self.project(&axis);
            let (min2, max2) = other.project(&axis);
            if max1 <= min2 || max2 <= min1 {
                return true;
            }
        }
        false
    }

    fn project(&self, axis: &Vector2) -> (f32, f32) {
        self.vertices
            .iter()
            .map(|vertex| vertex.dot(axis))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), p| {
                (min.min(p), max.max(p))
            })
    }
}

/// Tests two bounds for intersection.
///
/// Returns the distance between both centers if they intersect, `None`
/// otherwise. Centers further apart than the summed reaches are rejected
/// without running the exact test.
pub fn intersects(bounds1: &Polygon, reach1: f32, bounds2: &Polygon, reach2: f32) -> Option<f32> {
    let distance = bounds1.center.distance(&bounds2.center);
    if distance > reach1 + reach2 {
        return None;
    }
    if bounds1.overlaps(bounds2) {
        Some(distance)
    } else {
        None
    }
}

/// Axis-aligned rectangle anchored at the origin, used for the arena.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    pub width: f32,
    pub height: f32,
}

impl Arena {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.width && y <= self.height
    }

    /// Clamps a point onto the arena.
    pub fn clamp(&self, x: f32, y: f32) -> (f32, f32) {
        (x.clamp(0.0, self.width), y.clamp(0.0, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_heading_follows_rotation() {
        let up = Vector2::heading(0.0);
        assert_approx_eq!(up.x, 0.0, 1e-6);
        assert_approx_eq!(up.y, 1.0, 1e-6);

        let left = Vector2::heading(90.0);
        assert_approx_eq!(left.x, -1.0, 1e-6);
        assert_approx_eq!(left.y, 0.0, 1e-6);
    }

    #[test]
    fn test_reach_is_half_diagonal() {
        assert_approx_eq!(reach(30.0, 40.0), 25.0, 1e-6);
    }

    #[test]
    fn test_rect_corners_rotated() {
        let rect = Polygon::oriented_rect(Vector2::new(10.0, 10.0), 2.0, 4.0, 90.0);
        let v = rect.vertices();
        // (-1, 2) rotated by 90 degrees is (-2, -1)
        assert_approx_eq!(v[0].x, 8.0, 1e-5);
        assert_approx_eq!(v[0].y, 9.0, 1e-5);
    }

    #[test]
    fn test_contains() {
        let rect = Polygon::oriented_rect(Vector2::new(0.0, 0.0), 10.0, 10.0, 45.0);
        assert!(rect.contains(0.0, 0.0));
        assert!(rect.contains(6.0, 0.0));
        assert!(!rect.contains(5.0, 5.0));
    }

    #[test]
    fn test_overlap_and_touch() {
        let a = Polygon::oriented_rect(Vector2::new(0.0, 0.0), 32.0, 32.0, 0.0);
        let b = Polygon::oriented_rect(Vector2::new(16.0, 16.0), 32.0, 32.0, 0.0);
        let touching = Polygon::oriented_rect(Vector2::new(32.0, 0.0), 32.0, 32.0, 0.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&touching));
    }

    #[test]
    fn test_rotated_rects_separated_by_diagonal() {
        // Axis-aligned boxes would overlap, the rotated diamond does not.
        let a = Polygon::oriented_rect(Vector2::new(0.0, 0.0), 10.0, 10.0, 45.0);
        let b = Polygon::oriented_rect(Vector2::new(10.0, 10.0), 10.0, 10.0, 0.0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_intersects_returns_distance() {
        let a = Polygon::oriented_rect(Vector2::new(0.0, 0.0), 32.0, 32.0, 0.0);
        let b = Polygon::oriented_rect(Vector2::new(3.0, 4.0), 32.0, 32.0, 30.0);
        let r = reach(32.0, 32.0);
        let distance = intersects(&a, r, &b, r).expect("rects overlap");
        assert_approx_eq!(distance, 5.0, 1e-5);

        let far = Polygon::oriented_rect(Vector2::new(100.0, 0.0), 32.0, 32.0, 0.0);
        assert!(intersects(&a, r, &far, r).is_none());
    }

    #[test]
    fn test_arena_clamp() {
        let arena = Arena {
            width: 1280.0,
            height: 768.0,
        };
        assert_eq!(arena.clamp(-5.0, 800.0), (0.0, 768.0));
        assert!(arena.contains(1280.0, 0.0));
        assert!(!arena.contains(1280.1, 0.0));
    }
}
