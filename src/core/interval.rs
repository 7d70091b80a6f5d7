//! One-dimensional axis-aligned interval, the building block of [`Cube`](super::cube::Cube).

use super::precision::{ApproxEq, EPSILON};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when an operation requires two intervals (or cubes) to overlap
/// but they do not.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("intervals [{a0}, {b0}] and [{a1}, {b1}] are disjoint")]
pub struct DisjointIntervals {
    a0: f64,
    b0: f64,
    a1: f64,
    b1: f64,
}

/// A closed interval `[a, b]` of real numbers.
///
/// `a` is always less than or equal to `b` for intervals constructed through
/// [`Interval::new`]; callers that build one by hand (e.g. deserialization)
/// are responsible for that invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub a: f64,
    pub b: f64,
}

impl Interval {
    /// Create a new interval `[a, b]`.
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Length of the interval.
    pub fn distance(&self) -> f64 {
        self.b - self.a
    }

    /// Whether `self` and `other` share at least one point.
    pub fn intersects(&self, other: &Interval) -> bool {
        self.a <= other.b && self.b >= other.a
    }

    /// Whether `self` contains `other`, widened by a small epsilon so that
    /// floating-point drift from repeated combine/dissect does not turn an
    /// intended containment into a false negative.
    pub fn contains(&self, other: &Interval) -> bool {
        self.a - EPSILON <= other.a && self.b + EPSILON >= other.b
    }

    /// Whether `self` contains `value`, epsilon-widened as in [`Interval::contains`].
    pub fn contains_point(&self, value: f64) -> bool {
        self.a - EPSILON <= value && self.b + EPSILON >= value
    }

    /// Smallest interval enclosing both `self` and `other`. Always defined.
    pub fn combine(&self, other: &Interval) -> Interval {
        Interval::new(self.a.min(other.a), self.b.max(other.b))
    }

    /// Overlap of `self` and `other`.
    ///
    /// # Errors
    /// Returns [`DisjointIntervals`] if the two intervals do not intersect.
    pub fn intersect(&self, other: &Interval) -> Result<Interval, DisjointIntervals> {
        if !self.intersects(other) {
            return Err(DisjointIntervals {
                a0: self.a,
                b0: self.b,
                a1: other.a,
                b1: other.b,
            });
        }
        Ok(Interval::new(self.a.max(other.a), self.b.min(other.b)))
    }

    /// Epsilon-aware equality, used by tests and by dissection bookkeeping.
    pub fn approx_eq(&self, other: &Interval) -> bool {
        IntervalEq(*self) == IntervalEq(*other)
    }
}

impl Eq for IntervalEq {}

/// Newtype enabling epsilon-aware equality without committing [`Interval`]
/// itself to `Eq` (floating point generally shouldn't implement it).
struct IntervalEq(Interval);

impl PartialEq for IntervalEq {
    fn eq(&self, other: &Self) -> bool {
        self.0.a.approx_eq(&other.0.a) && self.0.b.approx_eq(&other.0.b)
    }
}
