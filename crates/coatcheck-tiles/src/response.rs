//! Response cache layer.
//!
//! A fast mirror of the persistent store that remembers tile responses the
//! way an HTTP cache would: body plus `Content-Type` and a `max-age`
//! freshness lifetime. Entries past their lifetime read as misses. Buckets
//! are opened by name from a [`CacheStorage`], so a version bump simply
//! opens a new bucket.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TileResult;

/// Fast-path byte cache keyed by URL.
pub trait ResponseCache: Send + Sync {
    /// Return the cached body for `url`, or `None` on a miss.
    fn match_url(&self, url: &str) -> TileResult<Option<Vec<u8>>>;

    /// Store `bytes` as the response for `url`.
    fn put(&self, url: &str, bytes: &[u8]) -> TileResult<()>;

    /// Remove the entry for `url`; returns whether one existed.
    fn delete(&self, url: &str) -> TileResult<bool>;

    /// Remove every entry.
    fn clear(&self) -> TileResult<()>;
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Arc<[u8]>,
    pub content_type: String,
    pub max_age: Duration,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at < self.max_age
    }

    /// Headers this response would be served with.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Type", self.content_type.clone()),
            (
                "Cache-Control",
                format!("max-age={}", self.max_age.num_seconds()),
            ),
        ]
    }
}

#[derive(Debug)]
struct Slot {
    /// Write order, breaks ties between equal `stored_at`
    seq: u64,
    response: CachedResponse,
}

#[derive(Debug, Default)]
struct Entries {
    by_url: HashMap<String, Slot>,
    next_seq: u64,
    size_bytes: u64,
}

impl Entries {
    fn get(&self, url: &str) -> Option<&CachedResponse> {
        self.by_url.get(url).map(|slot| &slot.response)
    }

    fn insert(&mut self, url: String, response: CachedResponse) {
        self.size_bytes += response.body.len() as u64;
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(old) = self.by_url.insert(url, Slot { seq, response }) {
            self.size_bytes -= old.response.body.len() as u64;
        }
    }

    fn remove(&mut self, url: &str) -> Option<CachedResponse> {
        let removed = self.by_url.remove(url)?.response;
        self.size_bytes -= removed.body.len() as u64;
        Some(removed)
    }

    fn clear(&mut self) {
        self.by_url.clear();
        self.size_bytes = 0;
    }

    /// Drop every entry that is stale as of `now`.
    fn sweep_stale(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.by_url.len();
        self.by_url.retain(|_, slot| slot.response.is_fresh(now));
        self.size_bytes = self
            .by_url
            .values()
            .map(|slot| slot.response.body.len() as u64)
            .sum();
        before - self.by_url.len()
    }

    /// Drop the oldest entries until at most `limit` bytes remain.
    fn evict_oldest_until(&mut self, limit: u64) -> usize {
        let mut evicted = 0;
        while self.size_bytes > limit {
            let Some(oldest) = self
                .by_url
                .iter()
                .min_by_key(|(_, slot)| (slot.response.stored_at, slot.seq))
                .map(|(url, _)| url.clone())
            else {
                break;
            };
            self.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

/// In-process response bucket.
///
/// Holds at most `max_size_bytes` of bodies; a write that would go over the
/// limit first drops stale entries, then the oldest ones.
#[derive(Debug)]
pub struct MemoryResponseCache {
    name: String,
    content_type: String,
    max_age: Duration,
    max_size_bytes: u64,
    entries: RwLock<Entries>,
}

impl MemoryResponseCache {
    /// Create an unbounded bucket. Use [`with_max_size`](Self::with_max_size) to cap it.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            max_age,
            max_size_bytes: u64::MAX,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn with_max_size(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.read().by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().by_url.is_empty()
    }

    /// Total size of the bodies held.
    pub fn size_bytes(&self) -> u64 {
        self.entries.read().size_bytes
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Look up `url` as of `now`, dropping the entry if it has gone stale.
    pub fn lookup(&self, url: &str, now: DateTime<Utc>) -> Option<CachedResponse> {
        {
            let entries = self.entries.read();
            match entries.get(url) {
                None => return None,
                Some(response) if response.is_fresh(now) => return Some(response.clone()),
                Some(_) => {}
            }
        }

        tracing::debug!("Response cache entry stale: {}", url);
        let mut entries = self.entries.write();
        // A concurrent put may have refreshed the entry since the read lock
        if entries.get(url).is_some_and(|r| !r.is_fresh(now)) {
            entries.remove(url);
        }
        None
    }

    fn store(&self, url: &str, bytes: &[u8], now: DateTime<Utc>) {
        let size = bytes.len() as u64;
        let mut entries = self.entries.write();
        entries.remove(url);

        if size > self.max_size_bytes {
            tracing::debug!(
                "Response of {} bytes exceeds bucket limit {}, not cached: {}",
                size,
                self.max_size_bytes,
                url
            );
            return;
        }

        let limit = self.max_size_bytes - size;
        if entries.size_bytes > limit {
            let stale = entries.sweep_stale(now);
            let evicted = entries.evict_oldest_until(limit);
            tracing::debug!(
                "Response bucket {} trimmed: {} stale, {} oldest evicted",
                self.name,
                stale,
                evicted
            );
        }

        entries.insert(
            url.to_string(),
            CachedResponse {
                body: Arc::from(bytes),
                content_type: self.content_type.clone(),
                max_age: self.max_age,
                stored_at: now,
            },
        );
    }
}

impl ResponseCache for MemoryResponseCache {
    fn match_url(&self, url: &str) -> TileResult<Option<Vec<u8>>> {
        Ok(self.lookup(url, Utc::now()).map(|r| r.body.to_vec()))
    }

    fn put(&self, url: &str, bytes: &[u8]) -> TileResult<()> {
        self.store(url, bytes, Utc::now());
        Ok(())
    }

    fn delete(&self, url: &str) -> TileResult<bool> {
        Ok(self.entries.write().remove(url).is_some())
    }

    fn clear(&self) -> TileResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Registry of named response buckets.
#[derive(Debug, Default)]
pub struct CacheStorage {
    buckets: Mutex<HashMap<String, Arc<MemoryResponseCache>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the bucket called `name`, creating it on first use.
    ///
    /// An existing bucket keeps the settings it was created with.
    pub fn open(
        &self,
        name: &str,
        content_type: &str,
        max_age: Duration,
        max_size_bytes: u64,
    ) -> Arc<MemoryResponseCache> {
        self.buckets
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(
                    MemoryResponseCache::new(name, content_type, max_age)
                        .with_max_size(max_size_bytes),
                )
            })
            .clone()
    }

    /// Delete a bucket and everything in it.
    pub fn delete(&self, name: &str) -> bool {
        self.buckets.lock().remove(name).is_some()
    }

    /// Names of all open buckets, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.buckets.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Delete buckets in `namespace` other than `current`.
    ///
    /// Returns the names that were removed.
    pub fn prune_namespace(&self, namespace: &str, current: &str) -> Vec<String> {
        let prefix = format!("{}-", namespace);
        let mut buckets = self.buckets.lock();
        let stale: Vec<String> = buckets
            .keys()
            .filter(|name| name.starts_with(&prefix) && name.as_str() != current)
            .cloned()
            .collect();
        for name in &stale {
            buckets.remove(name);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn bucket() -> MemoryResponseCache {
        MemoryResponseCache::new("tiles-1.0", "image/png", Duration::seconds(86_400))
    }

    #[test]
    fn test_put_and_match() {
        let cache = bucket();
        cache.put("https://tiles.test/a.png", &[1, 2, 3]).unwrap();

        assert_eq!(
            cache.match_url("https://tiles.test/a.png").unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(cache.match_url("https://tiles.test/b.png").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = bucket();
        cache.put("a", &[1]).unwrap();
        cache.put("a", &[2, 2]).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_url("a").unwrap(), Some(vec![2, 2]));
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = bucket();
        cache.put("a", &[1]).unwrap();
        cache.put("b", &[2]).unwrap();

        assert!(cache.delete("a").unwrap());
        assert!(!cache.delete("a").unwrap());
        assert_eq!(cache.len(), 1);

        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_entry_is_a_miss() {
        let cache = bucket();
        cache.put("a", &[1]).unwrap();

        let later = Utc::now() + Duration::seconds(86_401);
        assert!(cache.lookup("a", later).is_none());
        // Stale entries are dropped on lookup
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_max_age_never_hits() {
        let cache = MemoryResponseCache::new("tiles-1.0", "image/png", Duration::zero());
        cache.put("a", &[1]).unwrap();
        assert_eq!(cache.match_url("a").unwrap(), None);
    }

    #[test]
    fn test_bucket_stays_within_size_limit() {
        let cache = bucket().with_max_size(1000);
        for i in 0..50 {
            cache.put(&format!("tile-{}", i), &[0u8; 400]).unwrap();
        }

        assert!(cache.size_bytes() <= 1000);
        assert_eq!(cache.len(), 2);
        // The newest writes survive
        assert!(cache.match_url("tile-49").unwrap().is_some());
        assert!(cache.match_url("tile-48").unwrap().is_some());
        assert!(cache.match_url("tile-0").unwrap().is_none());
    }

    #[test]
    fn test_limit_evicts_oldest_first() {
        let cache = bucket().with_max_size(1000);
        let start = Utc::now();
        cache.store("a", &[0u8; 400], start);
        cache.store("b", &[0u8; 400], start + Duration::seconds(1));
        cache.store("c", &[0u8; 400], start + Duration::seconds(2));

        assert_eq!(cache.size_bytes(), 800);
        assert!(cache.lookup("a", start + Duration::seconds(3)).is_none());
        assert!(cache.lookup("b", start + Duration::seconds(3)).is_some());
        assert!(cache.lookup("c", start + Duration::seconds(3)).is_some());
    }

    #[test]
    fn test_trim_sweeps_all_stale_entries() {
        let cache = MemoryResponseCache::new("tiles-1.0", "image/png", Duration::seconds(10))
            .with_max_size(1000);
        let start = Utc::now();
        cache.store("old-1", &[0u8; 100], start);
        cache.store("old-2", &[0u8; 100], start + Duration::seconds(1));
        cache.store("fresh", &[0u8; 400], start + Duration::seconds(30));

        // Dropping old-1 alone would make room; both stale entries go
        cache.store("new", &[0u8; 500], start + Duration::seconds(31));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_bytes(), 900);
    }

    #[test]
    fn test_oversized_body_is_not_cached() {
        let cache = bucket().with_max_size(100);
        cache.put("a", &[1u8; 50]).unwrap();
        cache.put("a", &[1u8; 101]).unwrap();

        // The old body is gone too, so the bucket never serves an outdated tile
        assert!(cache.match_url("a").unwrap().is_none());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_size_tracks_overwrite_and_delete() {
        let cache = bucket();
        cache.put("a", &[0u8; 10]).unwrap();
        cache.put("a", &[0u8; 30]).unwrap();
        cache.put("b", &[0u8; 5]).unwrap();
        assert_eq!(cache.size_bytes(), 35);

        cache.delete("a").unwrap();
        assert_eq!(cache.size_bytes(), 5);
        cache.clear().unwrap();
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_response_headers() {
        let cache = bucket();
        cache.put("a", &[1]).unwrap();
        let response = cache.lookup("a", Utc::now()).unwrap();

        let headers = response.headers();
        assert!(headers.contains(&("Content-Type", "image/png".to_string())));
        assert!(headers.contains(&("Cache-Control", "max-age=86400".to_string())));
    }

    #[test]
    fn test_storage_open_returns_same_bucket() {
        let storage = CacheStorage::new();
        let first = storage.open("tiles-1.0", "image/png", Duration::seconds(60), 1024);
        first.put("a", &[1]).unwrap();

        let second = storage.open("tiles-1.0", "image/png", Duration::seconds(60), 1024);
        assert_eq!(second.match_url("a").unwrap(), Some(vec![1]));
        assert_eq!(second.name(), "tiles-1.0");
    }

    #[test]
    fn test_storage_delete_drops_contents() {
        let storage = CacheStorage::new();
        storage.open("tiles-1.0", "image/png", Duration::seconds(60), 1024).put("a", &[1]).unwrap();

        assert!(storage.delete("tiles-1.0"));
        assert!(!storage.delete("tiles-1.0"));

        let reopened = storage.open("tiles-1.0", "image/png", Duration::seconds(60), 1024);
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_prune_namespace_keeps_current_and_foreign() {
        let storage = CacheStorage::new();
        for name in ["tiles-1.0", "tiles-2.0", "other-1.0"] {
            storage.open(name, "image/png", Duration::seconds(60), 1024);
        }

        let removed = storage.prune_namespace("tiles", "tiles-2.0");
        assert_eq!(removed, vec!["tiles-1.0"]);
        assert_eq!(storage.keys(), vec!["other-1.0", "tiles-2.0"]);
    }
}
