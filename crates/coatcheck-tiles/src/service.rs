use std::sync::Arc;

use anyhow::Result;
use coatcheck_core::{Service, ServiceContext};

use crate::cache::TileCache;

/// Ties a shared [`TileCache`] to the application lifecycle.
pub struct TileCacheService {
    cache: Arc<TileCache>,
}

impl TileCacheService {
    pub fn new(cache: Arc<TileCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }
}

impl Service for TileCacheService {
    fn id(&self) -> &str {
        "tile-cache"
    }

    fn name(&self) -> &str {
        "Tile Cache"
    }

    fn initialize(&mut self, _ctx: &ServiceContext) -> Result<()> {
        self.cache.init();
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cache.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use coatcheck_core::{App, Config, TileCacheConfig};

    #[test]
    fn test_app_drives_cache_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = TileCacheConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..TileCacheConfig::default()
        };
        let cache = Arc::new(TileCache::new(tiles.clone()));

        let mut app = App::with_config(Config {
            tiles,
            ..Config::default()
        });
        app.register_service(Box::new(TileCacheService::new(cache.clone())));

        app.initialize().unwrap();
        assert!(cache.has_store());
        assert!(cache.has_response_cache());

        app.shutdown().unwrap();
        assert!(!cache.has_store());
        assert!(!cache.has_response_cache());
    }
}
