//! # strata-cache
//!
//! A distributed spatio-temporal cache and query-routing layer sitting in
//! front of raster/feature operator graphs.
//!
//! ## Architecture
//!
//! - `core`: cube/interval geometry the cache matching and dissection
//!   algorithms run on
//! - `model`: wire-level and catalog data types shared by every component
//! - `net`: binary wire framing and the control/worker/client protocols
//! - `cache`: per-node-type entry index, payload store, admission
//!   strategies and the raster puzzle engine
//! - `index`: the index server -- shadow catalog, job scheduler,
//!   reorganization planner
//! - `node`: the node server -- cache stores, operator graph execution,
//!   delivery serving
//! - `client`: the cache manager applications call instead of running
//!   their operator graph directly
//! - `config`: the configuration surface loaded by every binary
//! - `error`: crate-wide error type

#![warn(missing_docs)]

pub mod cache;
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod model;
pub mod net;
pub mod node;

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, from `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
