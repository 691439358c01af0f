//! Coat advice derived from an hourly forecast.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};

use crate::types::{
    CoatAdvice, Condition, CurrentHourWeather, DaySummary, Forecast, HourlyReading, WeatherError,
};

const COLD_BELOW_C: f64 = 10.0;
const COOL_UP_TO_C: f64 = 15.0;
const MORNING_HOUR: u32 = 8;
const AFTERNOON_HOUR: u32 = 17;

fn is_cool_and_cloudy(reading: &HourlyReading) -> bool {
    (COLD_BELOW_C..=COOL_UP_TO_C).contains(&reading.temperature_c)
        && reading.condition == Condition::Cloudy
}

fn is_wet_or_cold(reading: &HourlyReading) -> bool {
    reading.precipitation_mm > 0.0 || reading.temperature_c < COLD_BELOW_C
}

/// Advice for a single hour.
pub fn coat_advice(reading: &HourlyReading) -> CoatAdvice {
    if is_wet_or_cold(reading) {
        CoatAdvice::BringCoat
    } else if is_cool_and_cloudy(reading) {
        CoatAdvice::Recommended
    } else {
        CoatAdvice::NotNeeded
    }
}

/// Advice for a day out, from its morning and afternoon readings.
pub fn day_advice(morning: &HourlyReading, afternoon: &HourlyReading) -> CoatAdvice {
    if is_wet_or_cold(morning) || is_wet_or_cold(afternoon) {
        CoatAdvice::BringCoat
    } else if is_cool_and_cloudy(morning) || is_cool_and_cloudy(afternoon) {
        CoatAdvice::Recommended
    } else {
        CoatAdvice::NotNeeded
    }
}

fn local_now(forecast: &Forecast, now: DateTime<Utc>) -> NaiveDateTime {
    now.naive_utc() + Duration::seconds(i64::from(forecast.utc_offset_seconds))
}

/// Conditions for the location's current hour.
///
/// Falls back to the middle of the series when the current hour is not in
/// the forecast window.
pub fn current_hour(
    forecast: &Forecast,
    now: DateTime<Utc>,
) -> Result<CurrentHourWeather, WeatherError> {
    let local = local_now(forecast, now);
    let hour_start = local
        .date()
        .and_hms_opt(local.hour(), 0, 0)
        .ok_or_else(|| WeatherError::MissingHour(local.to_string()))?;

    let reading = match forecast.reading_at(hour_start) {
        Some(reading) => reading,
        None => {
            tracing::debug!("No forecast for {}, using mid-series reading", hour_start);
            forecast
                .hours
                .get(forecast.hours.len() / 2)
                .ok_or_else(|| WeatherError::MissingHour(hour_start.to_string()))?
        }
    };

    Ok(CurrentHourWeather {
        temperature_c: reading.temperature_c,
        precipitation_mm: reading.precipitation_mm,
        condition: reading.condition,
        hour_label: format!("{:02}:00", local.hour()),
        advice: coat_advice(reading),
    })
}

/// Morning/afternoon summary for the local day `day_offset` days from today.
///
/// `None` when either reading is outside the forecast window.
pub fn day_summary(forecast: &Forecast, day_offset: i64, now: DateTime<Utc>) -> Option<DaySummary> {
    let date = local_now(forecast, now).date() + Duration::days(day_offset);

    let morning = forecast.reading_at(date.and_hms_opt(MORNING_HOUR, 0, 0)?)?;
    let afternoon = forecast.reading_at(date.and_hms_opt(AFTERNOON_HOUR, 0, 0)?)?;

    Some(DaySummary {
        date,
        morning: morning.clone(),
        afternoon: afternoon.clone(),
        advice: day_advice(morning, afternoon),
    })
}
