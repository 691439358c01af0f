//! Weather service for Coat Check
//!
//! Fetches hourly forecasts from Open-Meteo and turns them into coat advice
//! for the current hour, today and tomorrow. Places are found by name
//! through the Open-Meteo geocoding API.

pub mod advice;
pub mod geocode;
pub mod provider;
pub mod types;

pub use advice::{coat_advice, current_hour, day_advice, day_summary};
pub use geocode::{GeocodeClient, Suggestion};
pub use provider::ForecastProvider;
pub use types::*;
