//! Current conditions and daily forecast for a coordinate pair.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    cache::ExpiringCache,
    clock::{Clock, add_duration},
    error::AppError,
    http::{self, HttpTransport, REQUEST_TIMEOUT},
    model::{CompleteWeather, CurrentWeather, ForecastDay, Timed, WeatherSnapshot},
    rate_limit::RateLimiter,
    retry::RetryExecutor,
};

pub const WEATHER_CACHE_NAMESPACE: &str = "weather";
pub const RATE_LIMIT_KEY: &str = "weather";

const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m,wind_direction_10m";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum";

const INVALID_WEATHER: &str = "Invalid weather data received";
const INVALID_FORECAST: &str = "Invalid forecast data received";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slice {
    Current,
    Forecast,
    Complete,
}

impl Slice {
    fn wants_current(self) -> bool {
        matches!(self, Slice::Current | Slice::Complete)
    }

    fn wants_forecast(self) -> bool {
        matches!(self, Slice::Forecast | Slice::Complete)
    }

    fn satisfied_by(self, snapshot: &WeatherSnapshot) -> bool {
        (!self.wants_current() || snapshot.current.is_some())
            && (!self.wants_forecast() || snapshot.forecast.is_some())
    }

    fn label(self) -> &'static str {
        match self {
            Slice::Current => "current weather",
            Slice::Forecast => "forecast",
            Slice::Complete => "weather data",
        }
    }
}

/// Cache key: both coordinates rounded to two decimals.
pub fn coordinate_key(latitude: f64, longitude: f64) -> String {
    // `+ 0.0` turns -0.0 into 0.0 so both print as "0.00".
    let round = |v: f64| (v * 100.0).round() / 100.0 + 0.0;
    format!("{:.2},{:.2}", round(latitude), round(longitude))
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(AppError::user("Latitude and longitude must be valid numbers."));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::user("Latitude must be between -90 and 90 degrees."));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::user("Longitude must be between -180 and 180 degrees."));
    }
    Ok(())
}

pub struct WeatherClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    forecast_days: u8,
    cache_ttl: Duration,
    cache: ExpiringCache<WeatherSnapshot>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
}

impl fmt::Debug for WeatherClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherClient")
            .field("base_url", &self.base_url)
            .field("forecast_days", &self.forecast_days)
            .field("cache_ttl", &self.cache_ttl)
            .field("retry", self.retry.policy())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct WeatherClientOptions {
    pub base_url: String,
    pub forecast_days: u8,
    pub cache_ttl: Duration,
}

impl WeatherClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        options: WeatherClientOptions,
        cache: ExpiringCache<WeatherSnapshot>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            transport,
            base_url: options.base_url,
            forecast_days: options.forecast_days,
            cache_ttl: options.cache_ttl,
            cache,
            clock,
            limiter,
            retry,
        }
    }

    pub fn cache(&self) -> &ExpiringCache<WeatherSnapshot> {
        &self.cache
    }

    pub async fn get_current_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentWeather, AppError> {
        self.snapshot(latitude, longitude, Slice::Current)
            .await?
            .current
            .map(|slice| slice.value)
            .ok_or_else(|| AppError::data(INVALID_WEATHER))
    }

    pub async fn get_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<ForecastDay>, AppError> {
        self.snapshot(latitude, longitude, Slice::Forecast)
            .await?
            .forecast
            .map(|slice| slice.value)
            .ok_or_else(|| AppError::data(INVALID_FORECAST))
    }

    pub async fn get_complete_weather_data(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CompleteWeather, AppError> {
        let snapshot = self.snapshot(latitude, longitude, Slice::Complete).await?;
        match (snapshot.current, snapshot.forecast) {
            (Some(current), Some(forecast)) => {
                Ok(CompleteWeather { current: current.value, forecast: forecast.value })
            }
            (None, _) => Err(AppError::data(INVALID_WEATHER)),
            (_, None) => Err(AppError::data(INVALID_FORECAST)),
        }
    }

    async fn snapshot(
        &self,
        latitude: f64,
        longitude: f64,
        slice: Slice,
    ) -> Result<WeatherSnapshot, AppError> {
        validate_coordinates(latitude, longitude)?;

        let key = coordinate_key(latitude, longitude);
        let now = self.clock.now();
        let cached = match self.cache.get(&key).map(|hit| hit.without_expired(now)) {
            Some(hit) if slice.satisfied_by(&hit) => return Ok(hit),
            other => other,
        };

        self.retry.ensure_online()?;
        self.limiter.acquire(RATE_LIMIT_KEY)?;

        let params = self.query_params(latitude, longitude, slice);
        let transport = self.transport.as_ref();
        let url = self.base_url.as_str();
        let params = &params[..];

        let fetched = self
            .retry
            .run(slice.label(), move || async move {
                let body = http::get_json(transport, url, params, REQUEST_TIMEOUT).await?;
                let fetched = parse_response(&body, slice, now)?;
                Ok::<_, anyhow::Error>(fetched)
            })
            .await?;

        info!(location = %key, slice = slice.label(), "weather fetched");

        // Only what this call fetched gets a new expiry; cached slices keep theirs.
        let fetched_at = self.clock.now();
        let expires_at = add_duration(fetched_at, self.cache_ttl);
        let fresh = WeatherSnapshot {
            current: fetched.current.map(|value| Timed::new(value, expires_at)),
            forecast: fetched.forecast.map(|value| Timed::new(value, expires_at)),
        };
        let merged = fresh.merged_with(cached);
        self.cache.set(&key, merged.clone(), self.cache_ttl);
        Ok(merged)
    }

    fn query_params(
        &self,
        latitude: f64,
        longitude: f64,
        slice: Slice,
    ) -> Vec<(&'static str, String)> {
        let mut params =
            vec![("latitude", latitude.to_string()), ("longitude", longitude.to_string())];
        if slice.wants_current() {
            params.push(("current", CURRENT_FIELDS.to_string()));
        }
        if slice.wants_forecast() {
            params.push(("daily", DAILY_FIELDS.to_string()));
            params.push(("forecast_days", self.forecast_days.to_string()));
        }
        params.push(("timezone", "auto".to_string()));
        params
    }
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    time: Option<String>,
    temperature_2m: f64,
    relative_humidity_2m: f64,
    weather_code: f64,
    wind_speed_10m: f64,
    wind_direction_10m: f64,
}

#[derive(Debug, Deserialize)]
struct RawDaily {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

#[derive(Debug)]
struct Fetched {
    current: Option<CurrentWeather>,
    forecast: Option<Vec<ForecastDay>>,
}

fn parse_response(body: &Value, slice: Slice, now: DateTime<Utc>) -> Result<Fetched, AppError> {
    let offset = body.get("utc_offset_seconds").and_then(Value::as_i64).unwrap_or(0);
    let section = |name: &str| body.get(name).filter(|v| v.is_object());

    let current = if slice.wants_current() {
        let raw = section("current").ok_or_else(|| AppError::data(INVALID_WEATHER))?;
        Some(parse_current(raw, offset, now)?)
    } else {
        section("current").and_then(|raw| parse_current(raw, offset, now).ok())
    };

    let forecast = if slice.wants_forecast() {
        let raw = section("daily").ok_or_else(|| AppError::data(INVALID_FORECAST))?;
        Some(parse_daily(raw)?)
    } else {
        section("daily").and_then(|raw| parse_daily(raw).ok())
    };

    Ok(Fetched { current, forecast })
}

fn parse_current(
    raw: &Value,
    utc_offset_seconds: i64,
    now: DateTime<Utc>,
) -> Result<CurrentWeather, AppError> {
    let raw = RawCurrent::deserialize(raw)
        .map_err(|e| AppError::data(INVALID_WEATHER).with_cause(e))?;

    Ok(CurrentWeather {
        temperature: raw.temperature_2m,
        weather_code: raw.weather_code.round() as i32,
        wind_speed: raw.wind_speed_10m,
        wind_direction: (raw.wind_direction_10m.round() as i64).rem_euclid(360) as u16,
        humidity: raw.relative_humidity_2m.clamp(0.0, 100.0),
        observed_at: parse_observed_at(raw.time.as_deref(), utc_offset_seconds, now),
    })
}

fn parse_daily(raw: &Value) -> Result<Vec<ForecastDay>, AppError> {
    let raw = RawDaily::deserialize(raw)
        .map_err(|e| AppError::data(INVALID_FORECAST).with_cause(e))?;

    if raw.time.is_empty() {
        return Err(AppError::data(INVALID_FORECAST));
    }

    let mut days: Vec<ForecastDay> = raw
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, date)| {
            let at = |column: &[Option<f64>]| column.get(i).copied().flatten();

            Some(ForecastDay {
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
                temperature_max: at(&raw.temperature_2m_max)?,
                temperature_min: at(&raw.temperature_2m_min)?,
                weather_code: at(&raw.weather_code)?.round() as i32,
                precipitation_sum: at(&raw.precipitation_sum).unwrap_or(0.0).max(0.0),
            })
        })
        .collect();

    let skipped = raw.time.len() - days.len();
    if skipped > 0 {
        debug!(skipped, "dropped incomplete forecast days");
    }

    days.sort_by_key(|d| d.date);
    Ok(days)
}

/// Parse the provider's local timestamp; falls back to `now` rather than failing.
fn parse_observed_at(
    raw: Option<&str>,
    utc_offset_seconds: i64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return now;
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }

    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|local| {
            local.checked_sub_signed(chrono::Duration::seconds(utc_offset_seconds))
        })
        .map(|utc| utc.and_utc())
        .unwrap_or_else(|| {
            debug!(raw, "unparseable observation time, using now");
            now
        })
}
