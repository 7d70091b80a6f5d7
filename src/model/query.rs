//! Query cubes and the result of matching one against the cache index.

use crate::core::{Cube3, Interval};
use serde::{Deserialize, Serialize};

/// Minimum width forced onto a query's time interval so its volume is never
/// zero, matching the reference index's `t2 = max(t2, t1 + 0.25)` rule.
pub const MIN_TIME_WIDTH: f64 = 0.25;

/// The 3-D (x, y, time) extent of a query, tagged with its coordinate
/// reference system and time-type so entries from incompatible contexts are
/// never matched against it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryCube {
    pub cube: Cube3,
    pub epsg: u32,
    pub timetype: u32,
}

impl QueryCube {
    /// Build a query cube, widening the time axis to [`MIN_TIME_WIDTH`] if
    /// the caller supplied a degenerate or too-narrow interval.
    pub fn new(x: Interval, y: Interval, time: Interval, epsg: u32, timetype: u32) -> Self {
        let time = Interval::new(time.a, time.b.max(time.a + MIN_TIME_WIDTH));
        Self {
            cube: Cube3::new([x, y, time]),
            epsg,
            timetype,
        }
    }

    pub fn volume(&self) -> f64 {
        self.cube.volume()
    }
}

/// How a raster entry's pixel resolution is described and matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionType {
    /// Entry/query resolution is expressed in pixel scale.
    Pixels,
    /// No resolution constraint applies (vector/plot results).
    None,
}

/// Allowed pixel-scale range for a raster entry, plus the scale it was
/// actually produced at (or requested at, for a query's resolution info).
///
/// A finer (higher resolution, smaller scale) query than an entry allows
/// does not match that entry: [`ResolutionInfo::matches`] checks that the
/// *query's* actual scale falls within *this* entry's allowed interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionInfo {
    pub restype: ResolutionType,
    pub pixel_scale_x: Interval,
    pub pixel_scale_y: Interval,
    pub actual_pixel_scale_x: f64,
    pub actual_pixel_scale_y: f64,
}

impl ResolutionInfo {
    /// No resolution constraint, used for non-raster (feature/plot) entries.
    pub fn unconstrained() -> Self {
        Self {
            restype: ResolutionType::None,
            pixel_scale_x: Interval::new(0.0, f64::INFINITY),
            pixel_scale_y: Interval::new(0.0, f64::INFINITY),
            actual_pixel_scale_x: 0.0,
            actual_pixel_scale_y: 0.0,
        }
    }

    /// Build a raster resolution info whose allowed scale interval is
    /// `[scale, 2*scale]`, matching the reference implementation's pattern
    /// for cached entries (an entry produced at scale `s` also satisfies a
    /// query coarser by up to 2x).
    pub fn raster(scale_x: f64, scale_y: f64) -> Self {
        Self {
            restype: ResolutionType::Pixels,
            pixel_scale_x: Interval::new(scale_x, 2.0 * scale_x),
            pixel_scale_y: Interval::new(scale_y, 2.0 * scale_y),
            actual_pixel_scale_x: scale_x,
            actual_pixel_scale_y: scale_y,
        }
    }

    /// Whether `query`'s actual scale lies within this entry's allowed range.
    pub fn matches(&self, query: &ResolutionInfo) -> bool {
        self.restype == query.restype
            && (self.restype == ResolutionType::None
                || (self.pixel_scale_x.contains_point(query.actual_pixel_scale_x)
                    && self.pixel_scale_y.contains_point(query.actual_pixel_scale_y)))
    }
}

/// A [`QueryCube`] paired with resolution constraints; the unit the cache
/// index both stores (as an entry's footprint) and matches against (as the
/// incoming query).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheCube {
    pub query: QueryCube,
    pub resolution: ResolutionInfo,
}

impl CacheCube {
    pub fn new(query: QueryCube, resolution: ResolutionInfo) -> Self {
        Self { query, resolution }
    }

    /// Whether `self` (an entry's footprint) matches `query` (the incoming
    /// query's footprint): equal epsg/timetype and compatible resolution.
    pub fn matches(&self, query: &CacheCube) -> bool {
        self.query.epsg == query.query.epsg
            && self.query.timetype == query.query.timetype
            && self.resolution.matches(&query.resolution)
    }
}

/// Outcome of querying the cache index for a `(semantic_id, QueryCube)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct STQueryResult {
    /// Union of the query volume actually matched by selected entries.
    pub covered: Cube3,
    /// Disjoint slabs of the query volume still uncovered.
    pub remainder: Vec<Cube3>,
    /// Entry ids selected to form `covered`, in selection order.
    pub ids: Vec<u64>,
    /// `covered.volume() / query.volume()`, in `[0, 1]`.
    pub coverage: f64,
}

impl STQueryResult {
    /// A single entry whose cube fully contains the query.
    pub fn is_full_hit(&self) -> bool {
        self.ids.len() == 1 && self.remainder.is_empty()
    }

    /// Enough combined coverage to be worth puzzling together, but not a
    /// full hit. Below the threshold, callers should treat this as a miss.
    pub fn is_partial_hit(&self) -> bool {
        self.coverage > crate::cache::index::PARTIAL_HIT_THRESHOLD && !self.remainder.is_empty()
    }

    pub fn is_full_miss(&self) -> bool {
        !self.is_full_hit() && !self.is_partial_hit()
    }
}

/// Discriminates the kind of client request that opens a `RASTER`/`FEATURE`
/// request on the frontend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Raster,
    Points,
    Lines,
    Polygons,
    Plot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_cube_widens_degenerate_time_interval() {
        let q = QueryCube::new(
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
            Interval::new(5.0, 5.0),
            4326,
            0,
        );
        assert_eq!(q.cube.dim(2), Interval::new(5.0, 5.25));
    }

    #[test]
    fn query_cube_leaves_wide_enough_time_interval_untouched() {
        let q = QueryCube::new(
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 10.0),
            4326,
            0,
        );
        assert_eq!(q.cube.dim(2), Interval::new(0.0, 10.0));
    }

    #[test]
    fn resolution_matches_requires_actual_scale_within_allowed_range() {
        let entry = ResolutionInfo::raster(1.0, 1.0);
        let fine_query = ResolutionInfo::raster(0.5, 0.5);
        let coarse_in_range = ResolutionInfo::raster(1.5, 1.5);
        let too_coarse = ResolutionInfo::raster(3.0, 3.0);

        assert!(!entry.matches(&fine_query));
        assert!(entry.matches(&coarse_in_range));
        assert!(!entry.matches(&too_coarse));
    }
}
