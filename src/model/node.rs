//! Node identity as tracked by the index server.

use serde::{Deserialize, Serialize};

/// One cache-serving process. `id` is assigned by the index server when the
/// node's control connection registers and is valid only for the lifetime
/// of that connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(id: u32, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }
}
