use crate::types::{Condition, Forecast, HourlyReading, Location, WeatherError};
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const HOURLY_FIELDS: &str = "temperature_2m,precipitation,weathercode";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    utc_offset_seconds: i32,
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
    weathercode: Vec<Option<i32>>,
}

/// Open-Meteo hourly forecast client
#[derive(Debug, Clone)]
pub struct ForecastProvider {
    client: Arc<Client>,
    base_url: String,
}

impl ForecastProvider {
    pub fn new() -> Result<Self, WeatherError> {
        Self::new_with_base_url(OPEN_METEO_URL)
    }

    /// Point the provider at another forecast endpoint (tests, mirrors)
    pub fn new_with_base_url(base_url: &str) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.to_string(),
        })
    }

    /// Fetch the hourly forecast for `location`, in the location's own timezone
    #[tracing::instrument(skip(self), fields(location = %location.name))]
    pub async fn fetch(&self, location: &Location) -> Result<Forecast, WeatherError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Forecast request failed with status {}", status);
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let parsed: OpenMeteoResponse =
            serde_json::from_str(&body).map_err(|e| WeatherError::Parse(e.to_string()))?;

        let forecast = parse_forecast(parsed)?;
        tracing::debug!("Fetched {} hourly readings", forecast.hours.len());
        Ok(forecast)
    }
}

fn parse_forecast(response: OpenMeteoResponse) -> Result<Forecast, WeatherError> {
    let hourly = response.hourly;
    let len = hourly.time.len();
    if hourly.temperature_2m.len() != len
        || hourly.precipitation.len() != len
        || hourly.weathercode.len() != len
    {
        return Err(WeatherError::Parse(format!(
            "hourly arrays differ in length (time={}, temperature_2m={}, precipitation={}, weathercode={})",
            len,
            hourly.temperature_2m.len(),
            hourly.precipitation.len(),
            hourly.weathercode.len()
        )));
    }

    let mut hours = Vec::with_capacity(len);
    for (i, time) in hourly.time.iter().enumerate() {
        let time = NaiveDateTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|e| WeatherError::Parse(format!("bad time '{}': {}", time, e)))?;

        // Open-Meteo reports gaps as null; an hour without a temperature is unusable
        let Some(temperature_c) = hourly.temperature_2m[i] else {
            continue;
        };

        hours.push(HourlyReading {
            time,
            temperature_c,
            precipitation_mm: hourly.precipitation[i].unwrap_or(0.0),
            condition: hourly.weathercode[i]
                .map(Condition::from_wmo_code)
                .unwrap_or_default(),
        });
    }

    Ok(Forecast {
        utc_offset_seconds: response.utc_offset_seconds,
        hours,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cambridge() -> Location {
        Location {
            name: "Cambridge".to_string(),
            latitude: 52.2053,
            longitude: 0.1218,
        }
    }

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "latitude": 52.2,
            "longitude": 0.12,
            "utc_offset_seconds": 3600,
            "timezone": "Europe/London",
            "hourly": {
                "time": ["2026-10-18T08:00", "2026-10-18T09:00", "2026-10-18T10:00"],
                "temperature_2m": [9.5, 12.1, null],
                "precipitation": [0.0, null, 0.0],
                "weathercode": [3, 61, 0]
            }
        })
    }

    #[tokio::test]
    async fn test_fetch_forecast() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("hourly", HOURLY_FIELDS))
            .and(query_param("timezone", "auto"))
            .and(query_param("latitude", "52.2053"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider =
            ForecastProvider::new_with_base_url(&format!("{}/v1/forecast", mock_server.uri()))
                .unwrap();
        let forecast = provider.fetch(&cambridge()).await.unwrap();

        assert_eq!(forecast.utc_offset_seconds, 3600);
        // The null-temperature hour is dropped
        assert_eq!(forecast.hours.len(), 2);
        assert_eq!(forecast.hours[0].condition, Condition::Cloudy);
        assert_eq!(forecast.hours[0].temperature_c, 9.5);
        assert_eq!(forecast.hours[1].condition, Condition::Rain);
        assert_eq!(forecast.hours[1].precipitation_mm, 0.0);
        assert_eq!(
            forecast.hours[1].time,
            NaiveDateTime::parse_from_str("2026-10-18T09:00", TIME_FORMAT).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let provider = ForecastProvider::new_with_base_url(&mock_server.uri()).unwrap();
        let err = provider.fetch(&cambridge()).await.unwrap_err();
        assert!(matches!(err, WeatherError::Status(429)));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let provider = ForecastProvider::new_with_base_url(&mock_server.uri()).unwrap();
        let err = provider.fetch(&cambridge()).await.unwrap_err();
        assert!(matches!(err, WeatherError::Parse(_)));
    }

    #[test]
    fn test_unequal_arrays_rejected() {
        let response: OpenMeteoResponse = serde_json::from_value(serde_json::json!({
            "utc_offset_seconds": 0,
            "hourly": {
                "time": ["2026-10-18T08:00", "2026-10-18T09:00"],
                "temperature_2m": [9.5],
                "precipitation": [0.0, 0.0],
                "weathercode": [3, 3]
            }
        }))
        .unwrap();

        assert!(matches!(parse_forecast(response), Err(WeatherError::Parse(_))));
    }

    #[test]
    fn test_bad_time_rejected() {
        let response: OpenMeteoResponse = serde_json::from_value(serde_json::json!({
            "utc_offset_seconds": 0,
            "hourly": {
                "time": ["yesterday"],
                "temperature_2m": [9.5],
                "precipitation": [0.0],
                "weathercode": [3]
            }
        }))
        .unwrap();

        assert!(matches!(parse_forecast(response), Err(WeatherError::Parse(_))));
    }
}
