//! Tile fetcher: cache first, network second.

use std::sync::Arc;

use reqwest::Client;
use tracing::instrument;

use crate::cache::TileCache;
use crate::error::{FetchFailure, TileError, TileResult};

const USER_AGENT: &str = "CoatCheck/0.1.0 (map tile cache)";

/// Fetches tile bytes through a [`TileCache`].
///
/// Concurrent fetches of the same URL are not coalesced; each caller runs the
/// full lookup and may hit the network independently.
#[derive(Clone)]
pub struct TileFetcher {
    client: Client,
    cache: Arc<TileCache>,
}

/// Outcome of warming the cache with a batch of URLs.
#[derive(Debug, Default)]
pub struct PrefetchReport {
    pub fetched: usize,
    pub failed: Vec<(String, TileError)>,
}

impl TileFetcher {
    pub fn new(cache: Arc<TileCache>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client, cache))
    }

    pub fn with_client(client: Client, cache: Arc<TileCache>) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Return the bytes for `url`.
    ///
    /// Cache hits never touch the network. On a miss the tile is downloaded
    /// and written through to the cache before returning. The only error is
    /// [`TileError::FetchFailed`].
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch(&self, url: &str) -> TileResult<Vec<u8>> {
        if let Some(bytes) = self.cache.get(url).await {
            return Ok(bytes);
        }

        let bytes = download(&self.client, url)
            .await
            .map_err(TileError::FetchFailed)?;

        // The cache logs its own write failures; a tile we already hold in
        // memory is returned regardless.
        let _ = self.cache.put(url, bytes.clone()).await;

        Ok(bytes)
    }

    /// Fetch each URL in turn, collecting successes and failures.
    pub async fn prefetch<I, S>(&self, urls: I) -> PrefetchReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = PrefetchReport::default();
        for url in urls {
            let url = url.as_ref();
            match self.fetch(url).await {
                Ok(_) => report.fetched += 1,
                Err(e) => {
                    tracing::debug!("Prefetch of {} failed: {}", url, e);
                    report.failed.push((url.to_string(), e));
                }
            }
        }
        report
    }
}

/// Plain GET of a tile, bypassing every cache tier.
pub(crate) async fn download(client: &Client, url: &str) -> Result<Vec<u8>, FetchFailure> {
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        tracing::debug!("Tile request for {} returned status {}", url, status);
        return Err(FetchFailure::Status(status.as_u16()));
    }

    Ok(response.bytes().await?.to_vec())
}
