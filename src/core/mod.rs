//! Geometric primitives shared across the cache index, query model and
//! puzzle engine: epsilon-tolerant intervals and the axis-aligned cubes
//! built from them.

pub mod cube;
pub mod interval;
pub mod precision;

pub use cube::{Cube, Cube2, Cube3};
pub use interval::{DisjointIntervals, Interval};
pub use precision::{ApproxEq, EPSILON};
