//! A node server: holds cached payloads, runs operator graphs for cache
//! misses, and puzzles cached pieces together for partial hits (C3, C6,
//! C9).

pub mod connection;
pub mod operator;
pub mod server;
pub mod state;
pub mod worker;

pub use operator::{DeterministicOperatorGraph, OperatorGraph, OperatorOutput};
pub use server::NodeServer;
pub use state::NodeState;
