//! Operator graph execution boundary. Parsing, raster/feature decoding and
//! the GDAL/OpenCL/R bridges that actually produce pixels are out of scope
//! (spec.md §1) -- a node worker only ever sees this trait.

use crate::core::Cube3;
use crate::error::Result;
use crate::model::{ProfilingData, QueryCube};
use async_trait::async_trait;

/// Bytes per pixel assumed for every raster payload in this cache: a single
/// 32-bit float band, the simplest contract that still exercises real byte
/// arithmetic through the puzzle engine.
pub const RASTER_BPP: usize = 4;
pub const RASTER_NO_DATA: [u8; RASTER_BPP] = [0, 0, 0, 0];

/// What evaluating an operator graph over one spatio-temporal slab yields:
/// the raw row-major pixel bytes plus the cost profile a caching strategy
/// scores.
pub struct OperatorOutput {
    pub bytes: Vec<u8>,
    pub profile: ProfilingData,
}

/// The seam a node worker calls through to compute a raster for some
/// semantic id over some slab. Implementations own parsing, decoding and
/// whatever backend (GDAL, OpenCL, RasterDB tiles, an R bridge) the
/// semantic id's operator graph resolves to.
#[async_trait]
pub trait OperatorGraph: Send + Sync {
    /// Pixel dimensions the query's spatial extent maps to.
    fn pixel_dimensions(&self, cube: &Cube3) -> (usize, usize);

    async fn evaluate(&self, semantic_id: &str, query: &QueryCube) -> Result<OperatorOutput>;
}

/// Deterministic stand-in: every distinct slab maps to a distinct, stable
/// byte pattern, with no real decoding behind it. Used by tests and as the
/// default when no real operator graph is wired in.
pub struct DeterministicOperatorGraph {
    pub pixels_per_unit: f64,
}

impl Default for DeterministicOperatorGraph {
    fn default() -> Self {
        Self { pixels_per_unit: 1.0 }
    }
}

#[async_trait]
impl OperatorGraph for DeterministicOperatorGraph {
    fn pixel_dimensions(&self, cube: &Cube3) -> (usize, usize) {
        let width = (cube.dim(0).distance() * self.pixels_per_unit).round().max(1.0) as usize;
        let height = (cube.dim(1).distance() * self.pixels_per_unit).round().max(1.0) as usize;
        (width, height)
    }

    async fn evaluate(&self, _semantic_id: &str, query: &QueryCube) -> Result<OperatorOutput> {
        let (width, height) = self.pixel_dimensions(&query.cube);
        let seed = query.cube.dim(0).a.to_bits() ^ query.cube.dim(1).a.to_bits().rotate_left(17);
        let value = ((seed % 255) as u8).wrapping_add(1);
        let pixels = width * height;
        let mut bytes = Vec::with_capacity(pixels * RASTER_BPP);
        for _ in 0..pixels {
            bytes.extend_from_slice(&(value as f32).to_le_bytes());
        }
        let work = pixels as f64;
        Ok(OperatorOutput {
            bytes,
            profile: ProfilingData {
                own_cpu: work,
                own_gpu: 0.0,
                own_io: 0.0,
                subtree_cpu: work,
                subtree_gpu: 0.0,
                subtree_io: 0.0,
                uncached_cpu: work,
                uncached_gpu: 0.0,
                uncached_io: 0.0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;

    fn qcube(x: (f64, f64), y: (f64, f64)) -> QueryCube {
        QueryCube::new(
            Interval::new(x.0, x.1),
            Interval::new(y.0, y.1),
            Interval::new(0.0, 1.0),
            4326,
            0,
        )
    }

    #[tokio::test]
    async fn same_slab_produces_identical_bytes() {
        let op = DeterministicOperatorGraph::default();
        let a = op.evaluate("sem", &qcube((0.0, 4.0), (0.0, 4.0))).await.unwrap();
        let b = op.evaluate("sem", &qcube((0.0, 4.0), (0.0, 4.0))).await.unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[tokio::test]
    async fn distinct_slabs_produce_distinct_bytes() {
        let op = DeterministicOperatorGraph::default();
        let a = op.evaluate("sem", &qcube((0.0, 4.0), (0.0, 4.0))).await.unwrap();
        let b = op.evaluate("sem", &qcube((10.0, 14.0), (0.0, 4.0))).await.unwrap();
        assert_ne!(a.bytes, b.bytes);
    }

    #[tokio::test]
    async fn pixel_count_matches_buffer_size() {
        let op = DeterministicOperatorGraph::default();
        let out = op.evaluate("sem", &qcube((0.0, 4.0), (0.0, 2.0))).await.unwrap();
        assert_eq!(out.bytes.len(), 4 * 2 * RASTER_BPP);
    }
}
