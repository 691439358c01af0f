use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use coatcheck_core::{AppError, Config, SavedLocation};
use coatcheck_tiles::{TileCache, TileCacheService, TileFetcher, TileGrid, TileTemplates};
use coatcheck_weather::{ForecastProvider, GeocodeClient, Location};

const CLEAR_CACHE_FLAG: &str = "--clear-tile-cache";
const LOCATION_FLAG: &str = "--location";

/// Look `query` up and save the best match as the configured location.
async fn change_location(config: &mut Config, query: &str) -> Result<()> {
    let geocoder = GeocodeClient::new_with_base_url(&config.weather.geocoding_api_url)
        .context("Failed to create geocoding client")?;

    match geocoder.resolve(query).await {
        Ok(Some(found)) => {
            config.weather.location = SavedLocation {
                name: found.name,
                latitude: found.latitude,
                longitude: found.longitude,
            };
            config.save()?;
            println!("Location set to {}", config.weather.location.name);
        }
        Ok(None) => println!("Location not found. Try another search."),
        Err(e) => {
            tracing::warn!("Place search failed: {}", e);
            println!("{}", AppError::from(e).user_message());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize core
    coatcheck_core::init()?;

    let args: Vec<String> = std::env::args().collect();
    let clear_cache = args.iter().any(|arg| arg == CLEAR_CACHE_FLAG);
    let location_query = args
        .iter()
        .position(|arg| arg == LOCATION_FLAG)
        .and_then(|i| args.get(i + 1))
        .map(|rest| rest.as_str());

    let (mut config, _) = Config::load_validated()?;
    if let Some(query) = location_query {
        change_location(&mut config, query).await?;
    }

    // Create and initialize application
    let mut app = coatcheck_core::App::with_config(config.clone());

    let cache = Arc::new(TileCache::new(config.tiles.clone()));
    app.register_service(Box::new(TileCacheService::new(cache.clone())));
    app.initialize()?;

    tracing::info!("Coat Check started");

    if clear_cache {
        if let Err(e) = cache.clear().await {
            tracing::warn!("Tile cache clear incomplete: {}", e);
        }
        println!("Tile cache cleared");
    }

    let saved = &config.weather.location;
    let location = Location {
        name: saved.name.clone(),
        latitude: saved.latitude,
        longitude: saved.longitude,
    };

    println!("Coat Check - {}", location.name);

    let provider = ForecastProvider::new_with_base_url(&config.weather.forecast_api_url)
        .context("Failed to create forecast client")?;
    match provider.fetch(&location).await {
        Ok(forecast) => {
            let now = Utc::now();
            match coatcheck_weather::current_hour(&forecast, now) {
                Ok(current) => println!(
                    "  Now ({}): {:.1}°C, {:.1} mm, {} - {}",
                    current.hour_label,
                    current.temperature_c,
                    current.precipitation_mm,
                    current.condition,
                    current.advice
                ),
                Err(e) => println!("  Now: unavailable ({})", e),
            }
            for (label, offset) in [("Today", 0), ("Tomorrow", 1)] {
                match coatcheck_weather::day_summary(&forecast, offset, now) {
                    Some(day) => println!(
                        "  {}: {:.1}°C / {:.1}°C - {}",
                        label, day.morning.temperature_c, day.afternoon.temperature_c, day.advice
                    ),
                    None => println!("  {}: no forecast", label),
                }
            }
        }
        Err(e) => {
            tracing::error!("Forecast fetch failed: {}", e);
            println!("  {}", AppError::from(e).user_message());
        }
    }

    // Warm the radar backdrop so it renders offline
    let grid = TileGrid::for_location(&config.map, location.latitude, location.longitude);
    let urls = TileTemplates::from_config(&config.map).urls(&grid);
    let fetcher = TileFetcher::new(cache.clone()).context("Failed to create tile client")?;
    let report = fetcher.prefetch(&urls).await;
    println!(
        "\nRadar tiles: {} ready, {} failed",
        report.fetched,
        report.failed.len()
    );
    if let Some((url, e)) = report.failed.first() {
        tracing::debug!("First radar tile failure: {} ({})", url, e);
        println!("  {}", e.user_message());
    }

    let stats = cache.stats().await;
    println!(
        "Tile cache: {} tiles, {} / {} bytes ({:.1}%)",
        stats.tiles,
        stats.total_bytes,
        stats.budget_bytes,
        stats.usage_percent()
    );

    // Graceful shutdown
    app.shutdown()?;

    Ok(())
}
