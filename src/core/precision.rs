//! Floating-point tolerance helpers shared by the interval/cube primitives.
//!
//! Query cubes and cache entry bounds are compared with a small epsilon so
//! that floating-point drift accumulated while dissecting or combining
//! cubes never turns an intended containment/equality check into a false
//! negative.

/// Default epsilon used for interval/cube comparisons.
///
/// Matches the tolerance the reference cache index uses for `contains` and
/// equality checks on `Interval`.
pub const EPSILON: f64 = 1e-9;

/// Approximate comparison with a configurable tolerance.
pub trait ApproxEq {
    /// Check if two values are approximately equal using the default epsilon.
    fn approx_eq(&self, other: &Self) -> bool;

    /// Check if two values are approximately equal using a custom epsilon.
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool;
}

impl ApproxEq for f64 {
    #[inline]
    fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_eps(other, EPSILON)
    }

    #[inline]
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool {
        (self - other).abs() < epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_eq_f64() {
        assert!(1.0.approx_eq(&1.0));
        assert!(1.0.approx_eq(&(1.0 + EPSILON / 2.0)));
        assert!(!1.0.approx_eq(&(1.0 + EPSILON * 2.0)));
    }
}
