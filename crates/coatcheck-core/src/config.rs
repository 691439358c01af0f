use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::error::ConfigError;

/// Web Mercator cannot project latitudes beyond this bound.
const MAX_MERCATOR_LATITUDE: f64 = 85.0511;

/// Highest zoom level the public tile servers render.
const MAX_TILE_ZOOM: u8 = 19;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Map tile cache settings
    #[serde(default)]
    pub tiles: TileCacheConfig,

    /// Forecast settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Precipitation map settings
    #[serde(default)]
    pub map: MapConfig,
}

/// Offline tile cache settings.
///
/// Bumping `version` gives the response cache a fresh bucket and makes the
/// persistent store drop every tile written under the old version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileCacheConfig {
    /// Set to false to run every fetch straight against the network
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Byte budget of the persistent tile store
    #[serde(default = "default_max_cache_size_bytes")]
    pub max_cache_size_bytes: u64,

    /// Fraction of the budget an eviction sweep shrinks the store to
    #[serde(default = "default_low_water_ratio")]
    pub low_water_ratio: f64,

    /// Response cache bucket prefix
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Cache schema version
    #[serde(default = "default_cache_version")]
    pub version: String,

    /// Persistent store name (file stem of the SQLite database)
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// Freshness lifetime of response cache entries, in seconds
    #[serde(default = "default_response_max_age_secs")]
    pub response_max_age_secs: u64,

    /// Content type recorded on cached responses
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Directory for the persistent store (defaults to the platform cache dir)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_max_cache_size_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_low_water_ratio() -> f64 {
    0.8
}

fn default_namespace() -> String {
    "coat-check-map-tiles".to_string()
}

fn default_cache_version() -> String {
    "1.0".to_string()
}

fn default_store_name() -> String {
    "TileCacheDB".to_string()
}

/// Default freshness lifetime of response cache entries (one day)
pub const DEFAULT_RESPONSE_MAX_AGE_SECS: u64 = 86_400;

/// Longest accepted response cache lifetime (one year)
pub const MAX_RESPONSE_MAX_AGE_SECS: u64 = 365 * 86_400;

fn default_response_max_age_secs() -> u64 {
    DEFAULT_RESPONSE_MAX_AGE_SECS
}

fn default_content_type() -> String {
    "image/png".to_string()
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_cache_size_bytes: default_max_cache_size_bytes(),
            low_water_ratio: default_low_water_ratio(),
            namespace: default_namespace(),
            version: default_cache_version(),
            store_name: default_store_name(),
            response_max_age_secs: default_response_max_age_secs(),
            content_type: default_content_type(),
            cache_dir: None,
        }
    }
}

impl TileCacheConfig {
    /// Name of the response cache bucket, e.g. `coat-check-map-tiles-1.0`
    pub fn bucket_name(&self) -> String {
        format!("{}-{}", self.namespace, self.version)
    }

    /// Directory holding the persistent store
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("coatcheck")
        })
    }

    /// Full path of the persistent store database
    pub fn store_path(&self) -> PathBuf {
        self.effective_cache_dir()
            .join(format!("{}.sqlite3", self.store_name))
    }
}

/// A named place the dashboard reports on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for SavedLocation {
    fn default() -> Self {
        Self {
            name: "Cambridge".to_string(),
            latitude: 52.2053,
            longitude: 0.1218,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Location the forecast is fetched for
    #[serde(default)]
    pub location: SavedLocation,

    /// Open-Meteo forecast endpoint
    #[serde(default = "default_forecast_api_url")]
    pub forecast_api_url: String,

    /// Open-Meteo place search endpoint
    #[serde(default = "default_geocoding_api_url")]
    pub geocoding_api_url: String,
}

fn default_forecast_api_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_geocoding_api_url() -> String {
    "https://geocoding-api.open-meteo.com/v1/search".to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            location: SavedLocation::default(),
            forecast_api_url: default_forecast_api_url(),
            geocoding_api_url: default_geocoding_api_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Zoom level of the radar backdrop
    #[serde(default = "default_zoom")]
    pub zoom: u8,

    /// Grid width in tiles
    #[serde(default = "default_grid_width")]
    pub grid_width: u32,

    /// Grid height in tiles
    #[serde(default = "default_grid_height")]
    pub grid_height: u32,

    /// Base map tile template (`{z}`, `{x}`, `{y}` placeholders)
    #[serde(default = "default_base_tile_url")]
    pub base_tile_url: String,

    /// Precipitation overlay template (`{z}`, `{x}`, `{y}`, `{key}` placeholders)
    #[serde(default = "default_precipitation_tile_url")]
    pub precipitation_tile_url: String,

    /// OpenWeatherMap API key (can be set via the OWM_API_KEY environment variable)
    #[serde(default = "default_owm_api_key")]
    pub owm_api_key: Option<String>,
}

fn default_zoom() -> u8 {
    12
}

fn default_grid_width() -> u32 {
    16
}

fn default_grid_height() -> u32 {
    9
}

fn default_base_tile_url() -> String {
    "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string()
}

fn default_precipitation_tile_url() -> String {
    "https://tile.openweathermap.org/map/precipitation_new/{z}/{x}/{y}.png?appid={key}"
        .to_string()
}

fn default_owm_api_key() -> Option<String> {
    std::env::var("OWM_API_KEY").ok()
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            zoom: default_zoom(),
            grid_width: default_grid_width(),
            grid_height: default_grid_height(),
            base_tile_url: default_base_tile_url(),
            precipitation_tile_url: default_precipitation_tile_url(),
            owm_api_key: default_owm_api_key(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coatcheck");

        Self {
            config_dir,
            tiles: TileCacheConfig::default(),
            weather: WeatherConfig::default(),
            map: MapConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", config_path.display(), e)))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Tile cache budget
        if self.tiles.max_cache_size_bytes == 0 {
            result.add_error(
                "tiles.max_cache_size_bytes",
                "Cache budget must be greater than 0",
            );
        }
        if !(self.tiles.low_water_ratio > 0.0 && self.tiles.low_water_ratio <= 1.0) {
            result.add_error(
                "tiles.low_water_ratio",
                format!(
                    "Low-water ratio must be in (0, 1], got {}",
                    self.tiles.low_water_ratio
                ),
            );
        }
        if self.tiles.namespace.trim().is_empty() {
            result.add_error("tiles.namespace", "Cache namespace cannot be empty");
        }
        if self.tiles.version.trim().is_empty() {
            result.add_error("tiles.version", "Cache version cannot be empty");
        }
        if self.tiles.store_name.trim().is_empty() {
            result.add_error("tiles.store_name", "Store name cannot be empty");
        }
        if self.tiles.response_max_age_secs > MAX_RESPONSE_MAX_AGE_SECS {
            result.add_error(
                "tiles.response_max_age_secs",
                format!(
                    "Response max-age must be at most {} seconds, got {}",
                    MAX_RESPONSE_MAX_AGE_SECS, self.tiles.response_max_age_secs
                ),
            );
        }
        if !self.tiles.enabled {
            result.add_warning("tiles.enabled", "Tile cache disabled - every tile hits the network");
        }

        // Forecast
        self.validate_url(
            &self.weather.forecast_api_url,
            "weather.forecast_api_url",
            &mut result,
        );
        self.validate_url(
            &self.weather.geocoding_api_url,
            "weather.geocoding_api_url",
            &mut result,
        );

        let location = &self.weather.location;
        if location.latitude.abs() > MAX_MERCATOR_LATITUDE {
            result.add_error(
                "weather.location.latitude",
                format!("Latitude must be within ±{}", MAX_MERCATOR_LATITUDE),
            );
        }
        if location.longitude.abs() > 180.0 {
            result.add_error(
                "weather.location.longitude",
                "Longitude must be within ±180",
            );
        }

        // Map grid
        if self.map.zoom > MAX_TILE_ZOOM {
            result.add_error(
                "map.zoom",
                format!("Zoom must be at most {}", MAX_TILE_ZOOM),
            );
        }
        if self.map.grid_width == 0 || self.map.grid_height == 0 {
            result.add_error("map.grid", "Grid dimensions must be greater than 0");
        }

        self.validate_template(&self.map.base_tile_url, "map.base_tile_url", &mut result);
        self.validate_template(
            &self.map.precipitation_tile_url,
            "map.precipitation_tile_url",
            &mut result,
        );

        if self.map.owm_api_key.as_deref().map_or(true, str::is_empty) {
            result.add_warning(
                "map.owm_api_key",
                "OpenWeatherMap key not configured - precipitation overlay will be unavailable",
            );
        }

        result
    }

    /// Validate a tile URL template by substituting sample coordinates
    fn validate_template(&self, template: &str, field_name: &str, result: &mut ValidationResult) {
        let sample = template
            .replace("{z}", "0")
            .replace("{x}", "0")
            .replace("{y}", "0")
            .replace("{key}", "key");
        self.validate_url(&sample, field_name, result);
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                // Check scheme
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                // Check host
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(
                    field_name,
                    format!("Invalid URL: {}", e),
                );
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("coatcheck");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        // Default config should be valid (only warnings, no errors)
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_default_tile_budget() {
        let tiles = TileCacheConfig::default();
        assert_eq!(tiles.max_cache_size_bytes, 52_428_800);
        assert_eq!(tiles.low_water_ratio, 0.8);
        assert_eq!(tiles.bucket_name(), "coat-check-map-tiles-1.0");
    }

    #[test]
    fn test_store_path_uses_store_name() {
        let tiles = TileCacheConfig {
            cache_dir: Some(PathBuf::from("/tmp/tiles")),
            ..TileCacheConfig::default()
        };
        assert_eq!(tiles.store_path(), PathBuf::from("/tmp/tiles/TileCacheDB.sqlite3"));
    }

    #[test]
    fn test_zero_budget_is_error() {
        let mut config = Config::default();
        config.tiles.max_cache_size_bytes = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "tiles.max_cache_size_bytes"));
    }

    #[test]
    fn test_response_max_age_bounds() {
        let mut config = Config::default();
        config.tiles.response_max_age_secs = 10_u64.pow(16);
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "tiles.response_max_age_secs"));

        config.tiles.response_max_age_secs = MAX_RESPONSE_MAX_AGE_SECS;
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_low_water_ratio_bounds() {
        for ratio in [0.0, -0.5, 1.5] {
            let mut config = Config::default();
            config.tiles.low_water_ratio = ratio;
            assert!(!config.validate().is_valid(), "ratio {} should be rejected", ratio);
        }

        let mut config = Config::default();
        config.tiles.low_water_ratio = 1.0;
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_empty_version_is_error() {
        let mut config = Config::default();
        config.tiles.version = "  ".to_string();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "tiles.version"));
    }

    #[test]
    fn test_invalid_forecast_url_scheme() {
        let mut config = Config::default();
        config.weather.forecast_api_url = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_invalid_tile_template() {
        let mut config = Config::default();
        config.map.base_tile_url = "not a url/{z}/{x}/{y}".to_string();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "map.base_tile_url"));
    }

    #[test]
    fn test_latitude_beyond_mercator_is_error() {
        let mut config = Config::default();
        config.weather.location.latitude = 89.0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "weather.location.latitude"));
    }

    #[test]
    fn test_zoom_limit() {
        let mut config = Config::default();
        config.map.zoom = 20;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_missing_owm_key_is_warning() {
        let mut config = Config::default();
        config.map.owm_api_key = None;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "map.owm_api_key"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            config_dir = "/tmp/coatcheck"

            [tiles]
            max_cache_size_bytes = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.tiles.max_cache_size_bytes, 1000);
        assert_eq!(config.tiles.low_water_ratio, 0.8);
        assert_eq!(config.map.zoom, 12);
        assert_eq!(config.weather.location.name, "Cambridge");
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
