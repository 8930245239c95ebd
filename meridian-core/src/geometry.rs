//! Minimal 3-D geometry used for spatial flow weights.

use std::ops::{Add, Sub};

/// A point or offset in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Vector3 {
    /// The origin.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Creates a vector.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Creates a vector with all components equal to `v`.
    #[must_use]
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Component-wise minimum.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Scales every component.
    #[must_use]
    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Add for Vector3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Axis-aligned bounding box.
///
/// The null box has `min > max` and absorbs into any box it is merged with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox3 {
    min: Vector3,
    max: Vector3,
}

impl BoundingBox3 {
    /// Creates a box from two corners.
    #[must_use]
    pub fn new(a: Vector3, b: Vector3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// The empty box.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            min: Vector3::splat(f32::INFINITY),
            max: Vector3::splat(f32::NEG_INFINITY),
        }
    }

    /// A cube of half-width `radius` around `center`.
    #[must_use]
    pub fn from_center_radius(center: Vector3, radius: f32) -> Self {
        let r = Vector3::splat(radius.abs());
        Self {
            min: center - r,
            max: center + r,
        }
    }

    /// True for the empty box.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Lower corner.
    #[must_use]
    pub const fn min(&self) -> Vector3 {
        self.min
    }

    /// Upper corner.
    #[must_use]
    pub const fn max(&self) -> Vector3 {
        self.max
    }

    /// Center of the box. The null box reports the origin.
    #[must_use]
    pub fn center(&self) -> Vector3 {
        if self.is_null() {
            return Vector3::ZERO;
        }
        (self.min + self.max).scale(0.5)
    }

    /// Extent along each axis.
    #[must_use]
    pub fn extents(&self) -> Vector3 {
        if self.is_null() {
            return Vector3::ZERO;
        }
        self.max - self.min
    }

    /// Volume of the box.
    #[must_use]
    pub fn volume(&self) -> f32 {
        let e = self.extents();
        e.x * e.y * e.z
    }

    /// Grows this box to contain `other`.
    pub fn merge_in(&mut self, other: &Self) {
        if other.is_null() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns the union of a list of boxes.
    #[must_use]
    pub fn merged<'a>(boxes: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut out = Self::null();
        for b in boxes {
            out.merge_in(b);
        }
        out
    }
}

impl Default for BoundingBox3 {
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_box_absorbs() {
        let mut b = BoundingBox3::null();
        assert!(b.is_null());
        b.merge_in(&BoundingBox3::new(Vector3::ZERO, Vector3::splat(2.0)));
        assert!(!b.is_null());
        assert_eq!(b.center(), Vector3::splat(1.0));
    }

    #[test]
    fn test_merge_two_boxes() {
        let a = BoundingBox3::new(Vector3::ZERO, Vector3::splat(1.0));
        let b = BoundingBox3::new(Vector3::splat(3.0), Vector3::splat(4.0));
        let m = BoundingBox3::merged([&a, &b]);
        assert_eq!(m.min(), Vector3::ZERO);
        assert_eq!(m.max(), Vector3::splat(4.0));
        assert!((m.volume() - 64.0).abs() < 1e-3);
    }

    #[test]
    fn test_from_center_radius() {
        let b = BoundingBox3::from_center_radius(Vector3::new(1.0, 2.0, 3.0), 0.5);
        assert_eq!(b.min(), Vector3::new(0.5, 1.5, 2.5));
        assert_eq!(b.center(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_corners_normalized() {
        let b = BoundingBox3::new(Vector3::splat(5.0), Vector3::ZERO);
        assert_eq!(b.min(), Vector3::ZERO);
        assert_eq!(b.max(), Vector3::splat(5.0));
    }
}
