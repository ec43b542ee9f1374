//! Open-time configuration for nvkv engines.
//!
//! A configuration names the engine, the pool file path, and the pool size.
//! The size is honored only when the pool file does not exist yet; an
//! existing pool is opened at its recorded size regardless of the value
//! supplied here.

mod constants;

pub use constants::{
    DEFAULT_POOL_SIZE, HEAP_BASE, INNER_CAPACITY, INNER_MIDPOINT, INNER_UPPER, LEAF_CAPACITY,
    LEAF_MIDPOINT, MIN_POOL_SIZE, POOL_HEADER_SIZE, UNDO_LOG_SIZE,
};

use std::path::{Path, PathBuf};

use crate::pool::SyncMode;

/// Everything an engine needs to open its pool.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine name: `"tree3"` or `"vsmap"`.
    pub engine: String,
    /// Filesystem path of the pool file.
    pub path: PathBuf,
    /// Pool size in bytes, used only when creating a new pool file.
    pub size: u64,
    /// Flush policy applied at transaction commit.
    pub sync: SyncMode,
}

impl EngineConfig {
    pub fn new(engine: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            engine: engine.into(),
            path: path.as_ref().to_path_buf(),
            size: DEFAULT_POOL_SIZE,
            sync: SyncMode::Normal,
        }
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = EngineConfig::new("tree3", "/tmp/kv.pool");
        assert_eq!(config.engine, "tree3");
        assert_eq!(config.size, DEFAULT_POOL_SIZE);
        assert_eq!(config.sync, SyncMode::Normal);
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = EngineConfig::new("vsmap", "/tmp/kv.pool")
            .size(MIN_POOL_SIZE)
            .sync(SyncMode::Full);
        assert_eq!(config.size, MIN_POOL_SIZE);
        assert_eq!(config.sync, SyncMode::Full);
    }
}
