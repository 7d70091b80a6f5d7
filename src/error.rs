//! Crate-wide error type.
//!
//! Mirrors the error taxonomy of the reference cache/index system: network
//! and framing failures mark a connection faulty, geometric precondition
//! violations are programming errors surfaced as results, and
//! `StrategyReject` is a control-flow signal rather than a failure.

use crate::model::CacheType;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("cache overflow: cannot free {needed} bytes for {cache_type:?}")]
    CacheOverflow { cache_type: CacheType, needed: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    DisjointIntervals(#[from] crate::core::DisjointIntervals),

    #[error("invalid dissection: {0}")]
    InvalidDissection(String),

    #[error("puzzle failure: {0}")]
    PuzzleFailure(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// I/O and framing failures on a connection. Any variant here marks the
/// owning connection faulty; the reactor tears it down on its next pass.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer closed the connection")]
    Eof,

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("framing mismatch: {0}")]
    Framing(String),

    #[error("unexpected magic number: {0:#x}")]
    UnexpectedMagic(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
