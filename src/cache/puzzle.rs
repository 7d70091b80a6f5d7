//! Composes a target result from existing cache references plus
//! recomputed remainder slabs (C9).
//!
//! Raster decoding and operator execution are out of scope (see
//! `spec.md` §1); this module works against a [`RasterContribution`]
//! abstraction a node server's operator runner and delivery-connection
//! fetcher supply, and blits byte rows into an output buffer the way the
//! reference engine blits pixel regions.

use crate::error::{Error, Result};
use crate::model::QueryCube;

/// Pixel-space description of the output raster a puzzle call fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterGeometry {
    pub width: usize,
    pub height: usize,
    /// Bytes per pixel.
    pub bpp: usize,
}

impl RasterGeometry {
    pub fn row_bytes(&self) -> usize {
        self.width * self.bpp
    }

    pub fn buffer_bytes(&self) -> usize {
        self.row_bytes() * self.height
    }
}

/// One piece contributing to the puzzled output: its pixel-space placement
/// in the output buffer and its own raw bytes (row-major, `geometry`-shaped
/// to its own `width`/`height`).
pub struct RasterContribution {
    /// Pixel offset of this piece's top-left corner within the output.
    pub offset_x: usize,
    pub offset_y: usize,
    pub geometry: RasterGeometry,
    pub data: Vec<u8>,
}

/// Fill an output raster from remainders (recomputed slabs) and references
/// (fetched cached pieces), blitting remainders first and then references
/// in the order supplied -- the deterministic order the spec requires so
/// overlapping regions resolve the same way every run.
///
/// `no_data` is the byte pattern (one pixel's worth) used to fill any pixel
/// the contributions do not cover; if any pixel remains unfilled afterward,
/// this fails with [`Error::PuzzleFailure`].
pub fn puzzle_raster(
    target: RasterGeometry,
    no_data: &[u8],
    remainders: Vec<RasterContribution>,
    references: Vec<RasterContribution>,
) -> Result<Vec<u8>> {
    if no_data.len() != target.bpp {
        return Err(Error::PuzzleFailure(format!(
            "no_data pattern is {} bytes, expected {}",
            no_data.len(),
            target.bpp
        )));
    }

    let mut out = vec![0u8; target.buffer_bytes()];
    for chunk in out.chunks_mut(target.bpp) {
        chunk.copy_from_slice(no_data);
    }
    let mut filled = vec![false; target.width * target.height];

    for piece in remainders.into_iter().chain(references.into_iter()) {
        blit(&mut out, &mut filled, target, &piece)?;
    }

    if filled.iter().any(|f| !f) {
        return Err(Error::PuzzleFailure(
            "contributions do not cover the full query extent".to_string(),
        ));
    }

    Ok(out)
}

fn blit(
    out: &mut [u8],
    filled: &mut [bool],
    target: RasterGeometry,
    piece: &RasterContribution,
) -> Result<()> {
    if piece.data.len() != piece.geometry.buffer_bytes() {
        return Err(Error::PuzzleFailure(format!(
            "contribution payload is {} bytes, geometry expects {}",
            piece.data.len(),
            piece.geometry.buffer_bytes()
        )));
    }

    for row in 0..piece.geometry.height {
        let out_y = piece.offset_y + row;
        if out_y >= target.height {
            break;
        }
        let src_row_start = row * piece.geometry.row_bytes();
        let copy_width = piece
            .geometry
            .width
            .min(target.width.saturating_sub(piece.offset_x));
        let copy_bytes = copy_width * target.bpp;

        let dst_row_start = out_y * target.row_bytes() + piece.offset_x * target.bpp;
        out[dst_row_start..dst_row_start + copy_bytes]
            .copy_from_slice(&piece.data[src_row_start..src_row_start + copy_bytes]);

        let filled_row_start = out_y * target.width + piece.offset_x;
        for f in &mut filled[filled_row_start..filled_row_start + copy_width] {
            *f = true;
        }
    }
    Ok(())
}

/// Query-cube geometry of a remainder slab, handed to the operator runner
/// to recompute that piece before it becomes a [`RasterContribution`].
pub struct RemainderTask {
    pub cube: QueryCube,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(geometry: RasterGeometry, value: u8) -> Vec<u8> {
        vec![value; geometry.buffer_bytes()]
    }

    #[test]
    fn two_halves_tile_exactly_into_a_full_raster() {
        let target = RasterGeometry {
            width: 4,
            height: 2,
            bpp: 1,
        };
        let left = RasterContribution {
            offset_x: 0,
            offset_y: 0,
            geometry: RasterGeometry {
                width: 2,
                height: 2,
                bpp: 1,
            },
            data: solid(
                RasterGeometry {
                    width: 2,
                    height: 2,
                    bpp: 1,
                },
                1,
            ),
        };
        let right = RasterContribution {
            offset_x: 2,
            offset_y: 0,
            geometry: RasterGeometry {
                width: 2,
                height: 2,
                bpp: 1,
            },
            data: solid(
                RasterGeometry {
                    width: 2,
                    height: 2,
                    bpp: 1,
                },
                2,
            ),
        };

        let out = puzzle_raster(target, &[0], vec![left], vec![right]).unwrap();
        assert_eq!(out, vec![1, 1, 2, 2, 1, 1, 2, 2]);
    }

    #[test]
    fn gap_in_coverage_fails_with_puzzle_failure() {
        let target = RasterGeometry {
            width: 4,
            height: 2,
            bpp: 1,
        };
        let left = RasterContribution {
            offset_x: 0,
            offset_y: 0,
            geometry: RasterGeometry {
                width: 2,
                height: 2,
                bpp: 1,
            },
            data: solid(
                RasterGeometry {
                    width: 2,
                    height: 2,
                    bpp: 1,
                },
                1,
            ),
        };

        let result = puzzle_raster(target, &[0], vec![left], vec![]);
        assert!(matches!(result, Err(Error::PuzzleFailure(_))));
    }

    #[test]
    fn later_contribution_overwrites_earlier_overlap_deterministically() {
        let target = RasterGeometry {
            width: 2,
            height: 1,
            bpp: 1,
        };
        let remainder = RasterContribution {
            offset_x: 0,
            offset_y: 0,
            geometry: RasterGeometry {
                width: 2,
                height: 1,
                bpp: 1,
            },
            data: solid(
                RasterGeometry {
                    width: 2,
                    height: 1,
                    bpp: 1,
                },
                9,
            ),
        };
        let reference = RasterContribution {
            offset_x: 0,
            offset_y: 0,
            geometry: RasterGeometry {
                width: 2,
                height: 1,
                bpp: 1,
            },
            data: solid(
                RasterGeometry {
                    width: 2,
                    height: 1,
                    bpp: 1,
                },
                7,
            ),
        };

        // References are blitted after remainders, so they win the overlap.
        let out = puzzle_raster(target, &[0], vec![remainder], vec![reference]).unwrap();
        assert_eq!(out, vec![7, 7]);
    }
}
