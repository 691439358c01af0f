//! Offline-capable map tile cache for Coat Check
//!
//! Tiles are served from an in-process response cache, then a persistent
//! SQLite store, then the network. Fetched tiles are written through to both
//! tiers and the store is kept under a byte budget by evicting the oldest
//! tiles first.

pub mod cache;
pub mod display;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod grid;
pub mod response;
pub mod service;
pub mod store;
pub mod types;

pub use cache::TileCache;
pub use display::{
    DirectLoader, DisplayObserver, DisplayState, HandleRegistry, TileDisplay, TileHandle,
    TileSource,
};
pub use error::{FetchFailure, TileError, TileResult};
pub use eviction::{EvictionManager, EvictionPlan, EvictionPolicy, EvictionResult};
pub use fetcher::{PrefetchReport, TileFetcher};
pub use grid::{lat_lon_to_tile, GridCell, TileCoord, TileGrid, TilePosition, TileTemplates};
pub use response::{CacheStorage, CachedResponse, MemoryResponseCache, ResponseCache};
pub use service::TileCacheService;
pub use store::{SqliteTileStore, TileStore};
pub use types::{CacheStats, CachedTile, TileEntry};
