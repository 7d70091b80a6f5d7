//! Configuration surface, loaded from JSON/env and handed to the index
//! server, node server and client cache manager at startup.
//!
//! Layout mirrors the recognized key namespaces (`indexserver.*`,
//! `cache.*`, `nodeserver.*`); defaults match the documented fallbacks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexServerConfig {
    pub host: String,
    pub port_frontend: u16,
    pub port_node: u16,
}

impl Default for IndexServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_frontend: 12345,
            port_node: 12346,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Never,
    Always,
    Simple,
    Twostep,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Simple
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleStrategyConfig {
    pub threshold: f64,
}

impl Default for SimpleStrategyConfig {
    fn default() -> Self {
        Self { threshold: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwostepStrategyConfig {
    pub stacked: f64,
    pub immediate: f64,
}

impl Default for TwostepStrategyConfig {
    fn default() -> Self {
        Self {
            stacked: 0.2,
            immediate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorgStrategyKind {
    Capacity,
    Graph,
    Geo,
}

impl Default for ReorgStrategyKind {
    fn default() -> Self {
        ReorgStrategyKind::Capacity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub raster_size: u64,
    pub points_size: u64,
    pub lines_size: u64,
    pub polygons_size: u64,
    pub plots_size: u64,
    pub strategy: StrategyKind,
    pub strategy_simple: SimpleStrategyConfig,
    pub strategy_twostep: TwostepStrategyConfig,
    pub reorg_strategy: ReorgStrategyKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            raster_size: 64 * 1024 * 1024,
            points_size: 16 * 1024 * 1024,
            lines_size: 16 * 1024 * 1024,
            polygons_size: 16 * 1024 * 1024,
            plots_size: 4 * 1024 * 1024,
            strategy: StrategyKind::default(),
            strategy_simple: SimpleStrategyConfig::default(),
            strategy_twostep: TwostepStrategyConfig::default(),
            reorg_strategy: ReorgStrategyKind::default(),
        }
    }
}

impl CacheConfig {
    pub fn size_for(&self, t: crate::model::CacheType) -> u64 {
        use crate::model::CacheType::*;
        match t {
            Raster => self.raster_size,
            Point => self.points_size,
            Line => self.lines_size,
            Polygon => self.polygons_size,
            Plot => self.plots_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeServerConfig {
    pub port: u16,
    pub threads: usize,
}

impl Default for NodeServerConfig {
    fn default() -> Self {
        Self {
            port: 12347,
            threads: 1,
        }
    }
}

/// Top-level configuration handed to every binary; constructed from
/// defaults and overridden by a JSON config file or environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub indexserver: IndexServerConfig,
    pub cache: CacheConfig,
    pub nodeserver: NodeServerConfig,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for
    /// any key the file omits.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(crate::error::Error::Io)?;
        serde_json::from_str(&text)
            .map_err(|e| crate::error::Error::Config(format!("invalid config json: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_fallbacks() {
        let cfg = Config::default();
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.nodeserver.threads, 1);
    }

    #[test]
    fn partial_json_overrides_fall_back_to_defaults() {
        let json = r#"{"cache": {"enabled": true}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.indexserver.port_frontend, 12345);
    }
}
