use chrono::{NaiveDate, NaiveDateTime};
use coatcheck_core::error::{ReqwestErrorExt, WeatherError as AppWeatherError};
use coatcheck_core::{AppError, NetworkError};
use serde::{Deserialize, Serialize};

/// Sky condition buckets mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Clear,
    Cloudy,
    Fog,
    Rain,
    #[default]
    Other,
}

impl Condition {
    /// Convert a WMO weather code to a Condition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 | 61 | 63 | 65 => Self::Rain,
            _ => Self::Other,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Rain => "Rain",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Whether a coat is worth taking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoatAdvice {
    BringCoat,
    Recommended,
    NotNeeded,
}

impl CoatAdvice {
    pub fn message(&self) -> &'static str {
        match self {
            Self::BringCoat => "Bring a coat",
            Self::Recommended => "Coat recommended but not necessary",
            Self::NotNeeded => "No need to bring a coat",
        }
    }
}

impl std::fmt::Display for CoatAdvice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Geographic location the forecast is requested for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One hour of forecast, in the location's local time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyReading {
    pub time: NaiveDateTime,
    pub temperature_c: f64,
    pub precipitation_mm: f64,
    pub condition: Condition,
}

/// Hourly forecast series for a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Offset of the location's local time from UTC
    pub utc_offset_seconds: i32,
    pub hours: Vec<HourlyReading>,
}

impl Forecast {
    pub fn reading_at(&self, time: NaiveDateTime) -> Option<&HourlyReading> {
        self.hours.iter().find(|h| h.time == time)
    }
}

/// Conditions for the hour the user is in right now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentHourWeather {
    pub temperature_c: f64,
    pub precipitation_mm: f64,
    pub condition: Condition,
    /// Local hour as `HH:00`
    pub hour_label: String,
    pub advice: CoatAdvice,
}

/// Morning and afternoon readings for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub morning: HourlyReading,
    pub afternoon: HourlyReading,
    pub advice: CoatAdvice,
}

/// Weather provider errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Forecast service returned status {0}")]
    Status(u16),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Forecast has no reading for {0}")]
    MissingHour(String),
}

impl From<WeatherError> for AppError {
    fn from(e: WeatherError) -> Self {
        match e {
            WeatherError::Network(e) => AppError::Network(e.into_network_error()),
            WeatherError::Status(503) => AppError::Weather(AppWeatherError::ServiceUnavailable),
            WeatherError::Status(status) => AppError::Network(NetworkError::ServerError {
                status,
                message: "forecast request failed".to_string(),
            }),
            WeatherError::Parse(msg) => AppError::Weather(AppWeatherError::ApiError(msg)),
            WeatherError::MissingHour(hour) => {
                AppError::Weather(AppWeatherError::IncompleteForecast(hour))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wmo_code_clear() {
        assert_eq!(Condition::from_wmo_code(0), Condition::Clear);
    }

    #[test]
    fn test_wmo_code_cloudy() {
        for code in [1, 2, 3] {
            assert_eq!(Condition::from_wmo_code(code), Condition::Cloudy);
        }
    }

    #[test]
    fn test_wmo_code_fog() {
        assert_eq!(Condition::from_wmo_code(45), Condition::Fog);
        assert_eq!(Condition::from_wmo_code(48), Condition::Fog);
    }

    #[test]
    fn test_wmo_code_rain() {
        for code in [51, 53, 55, 61, 63, 65] {
            assert_eq!(Condition::from_wmo_code(code), Condition::Rain);
        }
    }

    #[test]
    fn test_wmo_code_unknown_is_other() {
        // Showers and snow fall outside the rain bucket
        assert_eq!(Condition::from_wmo_code(80), Condition::Other);
        assert_eq!(Condition::from_wmo_code(71), Condition::Other);
        assert_eq!(Condition::from_wmo_code(-1), Condition::Other);
    }

    #[test]
    fn test_app_error_mapping() {
        let app: AppError = WeatherError::Status(503).into();
        assert!(matches!(
            app,
            AppError::Weather(AppWeatherError::ServiceUnavailable)
        ));

        let app: AppError = WeatherError::MissingHour("08:00".into()).into();
        assert_eq!(app.user_message(), "The forecast is incomplete. Try refreshing.");

        let app: AppError = WeatherError::Status(500).into();
        assert!(matches!(
            app,
            AppError::Network(NetworkError::ServerError { status: 500, .. })
        ));
    }

    #[test]
    fn test_advice_messages() {
        assert_eq!(CoatAdvice::BringCoat.to_string(), "Bring a coat");
        assert_eq!(
            CoatAdvice::Recommended.to_string(),
            "Coat recommended but not necessary"
        );
        assert_eq!(CoatAdvice::NotNeeded.to_string(), "No need to bring a coat");
    }
}
