//! Display adapter: turns a tile URL into an observable render state.
//!
//! A [`TileDisplay`] shows one URL at a time. It asks the [`TileFetcher`]
//! once per distinct URL, wraps the bytes in a [`TileHandle`] for the UI to
//! draw, and publishes `Loading`, `Ready` or `Error` through a
//! `tokio::sync::watch` channel. When the fetcher fails, the URL is loaded
//! directly with no cache involvement, so a broken cache degrades to plain
//! uncached loading.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::watch;

use crate::error::{FetchFailure, TileError};
use crate::fetcher::{self, TileFetcher};

/// A transient in-memory reference to tile bytes, valid until revoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileHandle {
    pub id: u64,
    pub bytes: Arc<[u8]>,
}

/// Tracks live handles so none outlive the tile they were made for.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Arc<[u8]>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bytes: Vec<u8>) -> TileHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes: Arc<[u8]> = Arc::from(bytes);
        self.live.lock().insert(id, bytes.clone());
        TileHandle { id, bytes }
    }

    /// Release a handle; returns false if it was already gone.
    pub fn revoke(&self, handle: &TileHandle) -> bool {
        self.live.lock().remove(&handle.id).is_some()
    }

    pub fn resolve(&self, id: u64) -> Option<Arc<[u8]>> {
        self.live.lock().get(&id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

/// Where the bytes of a ready tile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    /// Through the cache-backed fetcher.
    Fetcher,
    /// Direct load after the fetcher failed.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    Idle,
    Loading {
        url: String,
    },
    Ready {
        url: String,
        handle: TileHandle,
        source: TileSource,
    },
    Error {
        url: String,
        failure: FetchFailure,
    },
}

impl DisplayState {
    pub fn url(&self) -> Option<&str> {
        match self {
            DisplayState::Idle => None,
            DisplayState::Loading { url }
            | DisplayState::Ready { url, .. }
            | DisplayState::Error { url, .. } => Some(url),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DisplayState::Ready { .. })
    }
}

/// Host notification hooks, fired once per resolved URL.
pub trait DisplayObserver: Send + Sync {
    fn on_load(&self, _url: &str, _handle: &TileHandle) {}

    fn on_error(&self, _url: &str, _failure: &FetchFailure) {}
}

/// Uncached tile loader used as the last resort.
#[derive(Clone)]
pub struct DirectLoader {
    client: Client,
}

impl DirectLoader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn load(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        fetcher::download(&self.client, url).await
    }
}

pub struct TileDisplay {
    fetcher: TileFetcher,
    direct: DirectLoader,
    handles: Arc<HandleRegistry>,
    observer: Option<Arc<dyn DisplayObserver>>,
    state: watch::Sender<DisplayState>,
    /// URL whose outcome has been published; cleared while a load is pending
    resolved_url: Option<String>,
    current_handle: Option<TileHandle>,
}

impl TileDisplay {
    pub fn new(fetcher: TileFetcher, handles: Arc<HandleRegistry>) -> Self {
        let direct = DirectLoader::new(fetcher.client().clone());
        let (state, _) = watch::channel(DisplayState::Idle);
        Self {
            fetcher,
            direct,
            handles,
            observer: None,
            state,
            resolved_url: None,
            current_handle: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DisplayObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DisplayState {
        self.state.borrow().clone()
    }

    /// Display `url`.
    ///
    /// Asking for the URL already shown is a no-op; each distinct URL is
    /// fetched once and its outcome is final. A load that is cancelled before
    /// it resolves leaves nothing resolved, so the next `show` starts over.
    pub async fn show(&mut self, url: &str) {
        if self.resolved_url.as_deref() == Some(url) {
            return;
        }
        self.resolved_url = None;
        self.state.send_replace(DisplayState::Loading {
            url: url.to_string(),
        });

        let failure = match self.fetcher.fetch(url).await {
            Ok(bytes) => {
                self.adopt(url, bytes, TileSource::Fetcher);
                return;
            }
            Err(TileError::FetchFailed(failure)) => failure,
            Err(e) => FetchFailure::Transport(e.to_string()),
        };

        tracing::warn!("Tile fetch failed for {}, loading directly: {}", url, failure);
        self.state.send_replace(DisplayState::Error {
            url: url.to_string(),
            failure,
        });

        match self.direct.load(url).await {
            Ok(bytes) => self.adopt(url, bytes, TileSource::Direct),
            Err(failure) => {
                tracing::warn!("Direct tile load failed for {}: {}", url, failure);
                self.release();
                self.resolved_url = Some(url.to_string());
                self.state.send_replace(DisplayState::Error {
                    url: url.to_string(),
                    failure: failure.clone(),
                });
                if let Some(observer) = &self.observer {
                    observer.on_error(url, &failure);
                }
            }
        }
    }

    fn adopt(&mut self, url: &str, bytes: Vec<u8>, source: TileSource) {
        let handle = self.handles.create(bytes);
        self.release();
        self.current_handle = Some(handle.clone());
        self.resolved_url = Some(url.to_string());
        self.state.send_replace(DisplayState::Ready {
            url: url.to_string(),
            handle: handle.clone(),
            source,
        });
        if let Some(observer) = &self.observer {
            observer.on_load(url, &handle);
        }
    }

    /// Revoke the handle currently held, if any.
    pub fn release(&mut self) {
        if let Some(handle) = self.current_handle.take() {
            self.handles.revoke(&handle);
        }
    }
}

impl Drop for TileDisplay {
    fn drop(&mut self) {
        self.release();
    }
}
