use chrono::{DateTime, Utc};

/// One stored map tile, keyed by the URL it was fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTile {
    pub url: String,
    pub bytes: Vec<u8>,
    /// Last write time; drives oldest-first eviction.
    pub timestamp: DateTime<Utc>,
    /// Byte length of `bytes`, counted against the cache budget.
    pub size: u64,
}

impl CachedTile {
    /// Stamp a freshly fetched tile with the current time.
    pub fn new(url: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::with_timestamp(url, bytes, Utc::now())
    }

    pub fn with_timestamp(url: impl Into<String>, bytes: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        let size = bytes.len() as u64;
        Self {
            url: url.into(),
            bytes,
            timestamp,
            size,
        }
    }

    /// Metadata view used by budget accounting.
    pub fn entry(&self) -> TileEntry {
        TileEntry {
            url: self.url.clone(),
            timestamp: self.timestamp,
            size: self.size,
        }
    }
}

/// A stored tile without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
}

/// Snapshot of the persistent tier's usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tiles: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
}

impl CacheStats {
    /// Percentage of the budget in use.
    pub fn usage_percent(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.total_bytes as f64 / self.budget_bytes as f64 * 100.0
    }
}
