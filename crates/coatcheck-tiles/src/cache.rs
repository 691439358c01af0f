//! Two-tier tile cache.
//!
//! Lookups try the response cache first, then the persistent store. Either
//! tier may be absent (never opened, failed to open, or shut down); every
//! tier failure is logged and read as a miss. Writes go through to both tiers
//! and are followed by a budget check on the store.

use std::sync::Arc;

use chrono::Duration;
use coatcheck_core::config::DEFAULT_RESPONSE_MAX_AGE_SECS;
use coatcheck_core::TileCacheConfig;
use parking_lot::RwLock;

use crate::error::{TileError, TileResult};
use crate::eviction::{EvictionManager, EvictionPolicy};
use crate::response::{CacheStorage, ResponseCache};
use crate::store::{SqliteTileStore, TileStore};
use crate::types::{CacheStats, CachedTile};

#[derive(Clone, Default)]
struct Tiers {
    response: Option<Arc<dyn ResponseCache>>,
    store: Option<Arc<dyn TileStore>>,
}

/// Process-wide tile cache with an explicit `init`/`shutdown` lifecycle.
///
/// Construct once, wrap in `Arc`, and hand it to the fetchers and displays
/// that need it.
pub struct TileCache {
    config: TileCacheConfig,
    storage: Arc<CacheStorage>,
    tiers: RwLock<Tiers>,
    eviction: EvictionManager,
}

impl TileCache {
    /// Create a cache with no tiers open. Every lookup misses until `init`.
    pub fn new(config: TileCacheConfig) -> Self {
        Self::with_storage(config, Arc::new(CacheStorage::new()))
    }

    /// Create a cache whose response buckets live in `storage`.
    pub fn with_storage(config: TileCacheConfig, storage: Arc<CacheStorage>) -> Self {
        let eviction = EvictionManager::new(EvictionPolicy::from_config(&config));
        Self {
            config,
            storage,
            tiers: RwLock::new(Tiers::default()),
            eviction,
        }
    }

    /// Create a cache around already opened tiers.
    pub fn with_tiers(
        config: TileCacheConfig,
        store: Option<Arc<dyn TileStore>>,
        response: Option<Arc<dyn ResponseCache>>,
    ) -> Self {
        let cache = Self::new(config);
        *cache.tiers.write() = Tiers { response, store };
        cache
    }

    /// Open both tiers.
    ///
    /// A tier that cannot be opened stays absent; the cache keeps working in
    /// whatever degraded mode remains.
    pub fn init(&self) {
        if !self.config.enabled {
            tracing::info!("Tile cache disabled by configuration");
            return;
        }

        let bucket = self.config.bucket_name();
        for stale in self.storage.prune_namespace(&self.config.namespace, &bucket) {
            tracing::info!("Deleted stale response bucket {}", stale);
        }
        let response: Arc<dyn ResponseCache> = self.storage.open(
            &bucket,
            &self.config.content_type,
            self.response_max_age(),
            self.config.max_cache_size_bytes,
        );

        let path = self.config.store_path();
        let store = match SqliteTileStore::open(&path, &self.config.version) {
            Ok(store) => Some(Arc::new(store) as Arc<dyn TileStore>),
            Err(e) => {
                tracing::warn!("Persistent tile store unavailable, continuing without it: {}", e);
                None
            }
        };

        tracing::info!(
            "Tile cache initialized (bucket {}, store {})",
            bucket,
            if store.is_some() { path.display().to_string() } else { "absent".to_string() }
        );

        *self.tiers.write() = Tiers {
            response: Some(response),
            store,
        };
    }

    /// Freshness lifetime for the response bucket, falling back to the
    /// default when the configured value does not fit a `Duration`.
    fn response_max_age(&self) -> Duration {
        let secs = self.config.response_max_age_secs;
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "Response max-age of {}s is out of range, using {}s",
                    secs,
                    DEFAULT_RESPONSE_MAX_AGE_SECS
                );
                Duration::seconds(DEFAULT_RESPONSE_MAX_AGE_SECS as i64)
            })
    }

    /// Release both tiers. Later lookups miss and writes are dropped.
    pub fn shutdown(&self) {
        *self.tiers.write() = Tiers::default();
        tracing::info!("Tile cache shut down");
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    pub fn has_response_cache(&self) -> bool {
        self.tiers.read().response.is_some()
    }

    pub fn has_store(&self) -> bool {
        self.tiers.read().store.is_some()
    }

    fn tiers(&self) -> Tiers {
        self.tiers.read().clone()
    }

    /// Look a tile up in the response cache, then the persistent store.
    ///
    /// Never fails: tier errors are logged and count as misses.
    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        let tiers = self.tiers();

        if let Some(response) = &tiers.response {
            match response.match_url(url) {
                Ok(Some(bytes)) => {
                    tracing::debug!("Response cache hit: {}", url);
                    return Some(bytes);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Response cache read failed for {}: {}", url, e),
            }
        }

        let store = tiers.store?;
        let key = url.to_string();
        let lookup = tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| TileError::read(e.to_string()))
            .and_then(|result| result);

        match lookup {
            Ok(Some(tile)) => {
                tracing::debug!("Tile store hit: {}", url);
                Some(tile.bytes)
            }
            Ok(None) => {
                tracing::debug!("Tile cache miss: {}", url);
                None
            }
            Err(e) => {
                tracing::warn!("Tile store read failed for {}: {}", url, e);
                None
            }
        }
    }

    /// Write a tile through to both tiers, then enforce the store budget.
    ///
    /// Both tiers are attempted even if one fails; the first failure is
    /// returned so callers can log it. Eviction problems are logged here and
    /// never returned.
    pub async fn put(&self, url: &str, bytes: Vec<u8>) -> TileResult<()> {
        let tiers = self.tiers();
        let mut first_error = None;

        if let Some(response) = &tiers.response {
            if let Err(e) = response.put(url, &bytes) {
                tracing::warn!("Response cache write failed for {}: {}", url, e);
                first_error = Some(e);
            }
        }

        if let Some(store) = tiers.store {
            let response = tiers.response.clone();
            let eviction = self.eviction;
            let tile = CachedTile::new(url, bytes);

            let written = tokio::task::spawn_blocking(move || -> TileResult<()> {
                store.put(&tile)?;
                if let Err(e) = eviction.enforce_budget(store.as_ref(), response.as_deref()) {
                    tracing::warn!("Tile budget enforcement failed: {}", e);
                }
                Ok(())
            })
            .await
            .map_err(|e| TileError::write(e.to_string()))
            .and_then(|result| result);

            if let Err(e) = written {
                tracing::warn!("Tile store write failed for {}: {}", url, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run a budget check outside of a write.
    pub async fn enforce_budget(&self) -> TileResult<()> {
        let tiers = self.tiers();
        let Some(store) = tiers.store else {
            return Ok(());
        };
        let response = tiers.response;
        let eviction = self.eviction;

        tokio::task::spawn_blocking(move || {
            eviction
                .enforce_budget(store.as_ref(), response.as_deref())
                .map(|_| ())
        })
        .await
        .map_err(|e| TileError::Eviction(e.to_string()))?
    }

    /// Remove every tile from both tiers.
    pub async fn clear(&self) -> TileResult<()> {
        let tiers = self.tiers();
        let mut first_error = None;

        if let Some(response) = &tiers.response {
            if let Err(e) = response.clear() {
                tracing::warn!("Failed to clear response cache: {}", e);
                first_error = Some(e);
            }
        }

        if let Some(store) = tiers.store {
            let cleared = tokio::task::spawn_blocking(move || store.clear())
                .await
                .map_err(|e| TileError::write(e.to_string()))
                .and_then(|result| result);
            if let Err(e) = cleared {
                tracing::warn!("Failed to clear tile store: {}", e);
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("Tile cache cleared");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Usage of the persistent tier. Zeroes when the store is absent or unreadable.
    pub async fn stats(&self) -> CacheStats {
        let budget_bytes = self.eviction.policy().max_cache_size;
        let Some(store) = self.tiers().store else {
            return CacheStats {
                budget_bytes,
                ..Default::default()
            };
        };

        let listing = tokio::task::spawn_blocking(move || store.list_oldest_first())
            .await
            .map_err(|e| TileError::read(e.to_string()))
            .and_then(|result| result);

        match listing {
            Ok(tiles) => CacheStats {
                tiles: tiles.len(),
                total_bytes: tiles.iter().map(|t| t.size).sum(),
                budget_bytes,
            },
            Err(e) => {
                tracing::warn!("Failed to read tile cache stats: {}", e);
                CacheStats {
                    budget_bytes,
                    ..Default::default()
                }
            }
        }
    }
}
