//! Place search: turn a typed city name into coordinates.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use crate::types::{Location, WeatherError};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "CoatCheck/0.1.0";

/// Queries shorter than this return no suggestions without a request
pub const MIN_QUERY_LEN: usize = 2;
/// Suggestions offered while typing
pub const SUGGESTION_COUNT: u8 = 5;

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    results: Option<Vec<Suggestion>>,
}

/// A place matching a search query
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Suggestion {
    pub name: String,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Suggestion {
    pub fn to_location(&self) -> Location {
        Location {
            name: self.name.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

impl std::fmt::Display for Suggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.country.as_deref().filter(|c| !c.is_empty()) {
            Some(country) => write!(f, "{}, {}", self.name, country),
            None => f.write_str(&self.name),
        }
    }
}

/// Open-Meteo place search client
#[derive(Debug, Clone)]
pub struct GeocodeClient {
    client: Arc<Client>,
    base_url: String,
}

impl GeocodeClient {
    pub fn new() -> Result<Self, WeatherError> {
        Self::new_with_base_url(GEOCODING_URL)
    }

    pub fn new_with_base_url(base_url: &str) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.to_string(),
        })
    }

    /// Up to `count` places matching `query`, best match first.
    ///
    /// A query under [`MIN_QUERY_LEN`] characters and a response without
    /// results both give an empty list.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, query: &str, count: u8) -> Result<Vec<Suggestion>, WeatherError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("name", query.to_string()), ("count", count.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Place search returned status {}", status);
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let parsed: GeocodingResponse =
            serde_json::from_str(&body).map_err(|e| WeatherError::Parse(e.to_string()))?;

        let results = parsed.results.unwrap_or_default();
        tracing::debug!("Place search found {} result(s)", results.len());
        Ok(results)
    }

    /// Suggestions to offer while the user types.
    pub async fn suggest(&self, query: &str) -> Result<Vec<Suggestion>, WeatherError> {
        self.search(query, SUGGESTION_COUNT).await
    }

    /// The single best match for `query`, or `None` when nothing matches.
    pub async fn resolve(&self, query: &str) -> Result<Option<Location>, WeatherError> {
        let results = self.search(query, 1).await?;
        let location = results.first().map(Suggestion::to_location);
        if let Some(location) = &location {
            tracing::info!("Resolved '{}' to {}", query, location.name);
        }
        Ok(location)
    }
}
