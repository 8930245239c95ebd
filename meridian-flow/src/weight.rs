//! Spatial weights for flows and server pairs.
//!
//! A flow's weight reflects how much the two endpoints matter to each other
//! spatially: larger and closer regions weigh more. The partition and
//! object locator are consumed services; this module only evaluates the
//! weight function over their answers.

use meridian_core::{BoundingBox3, ObjectId, ServerId};

/// Region ownership queries against the spatial partition.
pub trait SpatialPartition: Send + Sync {
    /// Boxes making up the region owned by `server`. Empty if unknown.
    fn server_region(&self, server: ServerId) -> Vec<BoundingBox3>;
}

/// Exact object extents, for objects this server knows about.
pub trait ObjectLocator: Send + Sync {
    /// World-space bounds of `object`, if known locally.
    fn object_bounds(&self, object: ObjectId) -> Option<BoundingBox3>;
}

/// A locator that knows nothing; every flow falls back to server regions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObjectLocator;

impl ObjectLocator for NoObjectLocator {
    fn object_bounds(&self, _object: ObjectId) -> Option<BoundingBox3> {
        None
    }
}

/// Union of every box in `server`'s region.
#[must_use]
pub fn server_bounds(partition: &dyn SpatialPartition, server: ServerId) -> BoundingBox3 {
    BoundingBox3::merged(&partition.server_region(server))
}

/// Function from a pair of regions to a weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightCalculator {
    /// Every pair gets the same weight.
    Constant(f64),
    /// `scale * r_a * r_b / max(d, min_distance)^2`, with `r` the half
    /// diagonal of each box and `d` the distance between centers.
    InverseSquare {
        /// Multiplier applied to the result.
        scale: f64,
        /// Distances below this are clamped to it.
        min_distance: f64,
    },
}

impl WeightCalculator {
    /// Evaluates the weight of the pair. Null boxes weigh zero.
    #[must_use]
    pub fn weight(&self, a: &BoundingBox3, b: &BoundingBox3) -> f64 {
        match *self {
            Self::Constant(w) => w.max(0.0),
            Self::InverseSquare {
                scale,
                min_distance,
            } => {
                if a.is_null() || b.is_null() {
                    return 0.0;
                }
                let ra = f64::from(a.extents().length()) * 0.5;
                let rb = f64::from(b.extents().length()) * 0.5;
                let d = f64::from((a.center() - b.center()).length()).max(min_distance);
                if d <= 0.0 {
                    return 0.0;
                }
                (scale * ra * rb / (d * d)).max(0.0)
            }
        }
    }
}

impl Default for WeightCalculator {
    fn default() -> Self {
        Self::InverseSquare {
            scale: 1.0,
            min_distance: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::Vector3;

    struct TwoCells;

    impl SpatialPartition for TwoCells {
        fn server_region(&self, server: ServerId) -> Vec<BoundingBox3> {
            match server.get() {
                1 => vec![
                    BoundingBox3::new(Vector3::ZERO, Vector3::new(5.0, 10.0, 10.0)),
                    BoundingBox3::new(Vector3::new(5.0, 0.0, 0.0), Vector3::splat(10.0)),
                ],
                2 => vec![BoundingBox3::new(
                    Vector3::new(10.0, 0.0, 0.0),
                    Vector3::new(20.0, 10.0, 10.0),
                )],
                _ => Vec::new(),
            }
        }
    }

    #[test]
    fn test_server_bounds_merges_region() {
        let bounds = server_bounds(&TwoCells, ServerId::new(1));
        assert_eq!(bounds.min(), Vector3::ZERO);
        assert_eq!(bounds.max(), Vector3::splat(10.0));
        assert!(server_bounds(&TwoCells, ServerId::new(9)).is_null());
    }

    #[test]
    fn test_closer_regions_weigh_more() {
        let calc = WeightCalculator::default();
        let a = BoundingBox3::from_center_radius(Vector3::ZERO, 1.0);
        let near = BoundingBox3::from_center_radius(Vector3::new(5.0, 0.0, 0.0), 1.0);
        let far = BoundingBox3::from_center_radius(Vector3::new(50.0, 0.0, 0.0), 1.0);
        assert!(calc.weight(&a, &near) > calc.weight(&a, &far));
        assert!(calc.weight(&a, &far) > 0.0);
    }

    #[test]
    fn test_null_region_weighs_zero() {
        let calc = WeightCalculator::default();
        let a = BoundingBox3::from_center_radius(Vector3::ZERO, 1.0);
        assert!(calc.weight(&a, &BoundingBox3::null()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_constant_weight() {
        let calc = WeightCalculator::Constant(2.5);
        let a = BoundingBox3::null();
        assert!((calc.weight(&a, &a) - 2.5).abs() < f64::EPSILON);
    }
}
