//! Axis-aligned hyperrectangle built from per-dimension [`Interval`]s.
//!
//! `Cube` is generic over the number of dimensions `D` so the same
//! intersection/dissection logic serves both 3-D query cubes (x, y, time)
//! and any other fixed-dimensional bound the cache index needs.

use super::interval::{DisjointIntervals, Interval};
use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A `D`-dimensional axis-aligned box, one [`Interval`] per dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cube<const D: usize> {
    dims: [Interval; D],
}

impl<const D: usize> Serialize for Cube<D> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.dims.to_vec().serialize(serializer)
    }
}

impl<'de, const D: usize> Deserialize<'de> for Cube<D> {
    fn deserialize<De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: Deserializer<'de>,
    {
        let dims: Vec<Interval> = Vec::deserialize(deserializer)?;
        let dims: [Interval; D] = dims
            .try_into()
            .map_err(|v: Vec<Interval>| {
                DeError::custom(format!("expected {} dims, found {}", D, v.len()))
            })?;
        Ok(Cube { dims })
    }
}

impl<const D: usize> Cube<D> {
    /// Build a cube from its per-dimension intervals.
    pub fn new(dims: [Interval; D]) -> Self {
        Self { dims }
    }

    /// Interval of dimension `i`.
    pub fn dim(&self, i: usize) -> Interval {
        self.dims[i]
    }

    /// All dimensions as a slice.
    pub fn dims(&self) -> &[Interval; D] {
        &self.dims
    }

    /// Product of all dimensions' lengths.
    pub fn volume(&self) -> f64 {
        self.dims.iter().map(Interval::distance).product()
    }

    /// Whether every dimension overlaps the corresponding dimension of `other`.
    pub fn intersects(&self, other: &Cube<D>) -> bool {
        self.dims
            .iter()
            .zip(other.dims.iter())
            .all(|(a, b)| a.intersects(b))
    }

    /// Whether `self` contains `other` in every dimension (epsilon-widened).
    pub fn contains(&self, other: &Cube<D>) -> bool {
        self.dims
            .iter()
            .zip(other.dims.iter())
            .all(|(a, b)| a.contains(b))
    }

    /// Per-dimension hull. Always defined.
    pub fn combine(&self, other: &Cube<D>) -> Cube<D> {
        let mut dims = self.dims;
        for i in 0..D {
            dims[i] = dims[i].combine(&other.dims[i]);
        }
        Cube::new(dims)
    }

    /// Per-dimension overlap.
    ///
    /// # Errors
    /// Returns the first [`DisjointIntervals`] encountered, dimension-major,
    /// if any dimension fails to overlap.
    pub fn intersect(&self, other: &Cube<D>) -> Result<Cube<D>, DisjointIntervals> {
        let mut dims = self.dims;
        for i in 0..D {
            dims[i] = dims[i].intersect(&other.dims[i])?;
        }
        Ok(Cube::new(dims))
    }

    /// Split `self` into the pieces left over once the region covered by
    /// `fill` is removed.
    ///
    /// Walks dimensions in order; for each one it peels off the slab of
    /// `self` that lies strictly before `fill` on that axis (if any) and the
    /// slab that lies strictly after it (if any), then narrows the
    /// in-progress remainder to `fill`'s extent on that axis before moving
    /// to the next dimension. This produces at most `2 * D` disjoint
    /// remainder cubes that together with `fill` exactly reconstruct `self`,
    /// with no double-covered region.
    ///
    /// Returns an empty vector if `fill` already contains `self` (nothing
    /// left over).
    ///
    /// # Errors
    /// Returns [`DisjointIntervals`] if `fill` and `self` do not overlap in
    /// some dimension; dissecting a non-overlapping fill is not meaningful.
    pub fn dissect_by(&self, fill: &Cube<D>) -> Result<Vec<Cube<D>>, DisjointIntervals> {
        if fill.contains(self) {
            return Ok(Vec::new());
        }
        self.intersect(fill)?;

        let mut remainders = Vec::with_capacity(2 * D);
        let mut work = *self;

        for i in 0..D {
            if fill.dims[i].a > work.dims[i].a {
                let mut left = work;
                left.dims[i] = Interval::new(work.dims[i].a, fill.dims[i].a);
                remainders.push(left);
                work.dims[i] = Interval::new(fill.dims[i].a, work.dims[i].b);
            }
            if fill.dims[i].b < work.dims[i].b {
                let mut right = work;
                right.dims[i] = Interval::new(fill.dims[i].b, work.dims[i].b);
                remainders.push(right);
                work.dims[i] = Interval::new(work.dims[i].a, fill.dims[i].b);
            }
        }

        Ok(remainders)
    }
}

/// Three-dimensional cube: (x, y, time) for raster/feature query bounds.
pub type Cube3 = Cube<3>;

/// Two-dimensional cube: (x, y) for plain spatial bounds without a time axis.
pub type Cube2 = Cube<2>;

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(a: f64, b: f64) -> Interval {
        Interval::new(a, b)
    }

    fn cube3(x: (f64, f64), y: (f64, f64), t: (f64, f64)) -> Cube3 {
        Cube::new([iv(x.0, x.1), iv(y.0, y.1), iv(t.0, t.1)])
    }

    #[test]
    fn volume_is_the_product_of_dimension_lengths() {
        let c = cube3((0.0, 10.0), (0.0, 5.0), (0.0, 2.0));
        assert_eq!(c.volume(), 100.0);
    }

    #[test]
    fn dissect_by_fully_covering_fill_leaves_no_remainder() {
        let whole = cube3((0.0, 10.0), (0.0, 10.0), (0.0, 1.0));
        let remainders = whole.dissect_by(&whole).unwrap();
        assert!(remainders.is_empty());
    }

    #[test]
    fn dissect_by_center_fill_yields_six_slabs_for_a_3d_cube() {
        let whole = cube3((0.0, 10.0), (0.0, 10.0), (0.0, 10.0));
        let fill = cube3((4.0, 6.0), (4.0, 6.0), (4.0, 6.0));
        let remainders = whole.dissect_by(&fill).unwrap();
        assert_eq!(remainders.len(), 6);

        let mut covered = fill.volume();
        for r in &remainders {
            covered += r.volume();
        }
        assert!((covered - whole.volume()).abs() < 1e-9);
    }

    #[test]
    fn dissect_by_remainders_do_not_overlap_each_other_or_the_fill() {
        let whole = cube3((0.0, 10.0), (0.0, 10.0), (0.0, 10.0));
        let fill = cube3((2.0, 3.0), (7.0, 9.0), (0.0, 10.0));
        let remainders = whole.dissect_by(&fill).unwrap();

        for r in &remainders {
            assert!(r.intersect(&fill).map(|c| c.volume()).unwrap_or(0.0) < 1e-9);
        }
        for i in 0..remainders.len() {
            for j in (i + 1)..remainders.len() {
                let overlap = remainders[i]
                    .intersect(&remainders[j])
                    .map(|c| c.volume())
                    .unwrap_or(0.0);
                assert!(overlap < 1e-9, "remainders {i} and {j} overlap");
            }
        }
    }

    #[test]
    fn dissect_by_edge_aligned_fill_drops_degenerate_slabs() {
        let whole = cube3((0.0, 10.0), (0.0, 10.0), (0.0, 10.0));
        let fill = cube3((0.0, 5.0), (0.0, 10.0), (0.0, 10.0));
        let remainders = whole.dissect_by(&fill).unwrap();
        assert_eq!(remainders.len(), 1);
        assert_eq!(remainders[0], cube3((5.0, 10.0), (0.0, 10.0), (0.0, 10.0)));
    }

    #[test]
    fn dissect_by_disjoint_fill_is_an_error() {
        let whole = cube3((0.0, 1.0), (0.0, 1.0), (0.0, 1.0));
        let fill = cube3((5.0, 6.0), (5.0, 6.0), (5.0, 6.0));
        assert!(whole.dissect_by(&fill).is_err());
    }

    #[test]
    fn combine_hull_contains_both_operands() {
        let a = cube3((0.0, 2.0), (0.0, 2.0), (0.0, 2.0));
        let b = cube3((5.0, 6.0), (5.0, 6.0), (5.0, 6.0));
        let hull = a.combine(&b);
        assert!(hull.contains(&a));
        assert!(hull.contains(&b));
    }
}
