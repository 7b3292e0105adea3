use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A geocoded place that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub country: String,
    /// First-level administrative area (state, region).
    pub admin1: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// "Name, Region, Country", skipping the region when absent.
    pub fn display_name(&self) -> String {
        match &self.admin1 {
            Some(region) if !region.is_empty() => {
                format!("{}, {}, {}", self.name, region, self.country)
            }
            _ => format!("{}, {}", self.name, self.country),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    /// Degrees Celsius.
    pub temperature: f64,
    /// WMO weather interpretation code.
    pub weather_code: i32,
    /// km/h.
    pub wind_speed: f64,
    /// Degrees in `[0, 360)`.
    pub wind_direction: u16,
    /// Percent in `[0, 100]`.
    pub humidity: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub weather_code: i32,
    /// Millimetres, never negative.
    pub precipitation_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteWeather {
    pub current: CurrentWeather,
    /// Ascending by date; index 0 is today.
    pub forecast: Vec<ForecastDay>,
}

/// A cached value paired with the instant it stops being served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timed<T> {
    pub value: T,
    pub expires_at: DateTime<Utc>,
}

impl<T> Timed<T> {
    pub fn new(value: T, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What the weather cache holds per coordinate pair. Each slice keeps the
/// expiry of the fetch that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub current: Option<Timed<CurrentWeather>>,
    pub forecast: Option<Timed<Vec<ForecastDay>>>,
}

impl WeatherSnapshot {
    /// Fill whatever this snapshot lacks from `older`, keeping the older
    /// slice's own expiry.
    pub fn merged_with(self, older: Option<WeatherSnapshot>) -> Self {
        match older {
            Some(older) => Self {
                current: self.current.or(older.current),
                forecast: self.forecast.or(older.forecast),
            },
            None => self,
        }
    }

    /// Drop every slice that has expired by `now`.
    pub fn without_expired(self, now: DateTime<Utc>) -> Self {
        Self {
            current: self.current.filter(|slice| !slice.is_expired(now)),
            forecast: self.forecast.filter(|slice| !slice.is_expired(now)),
        }
    }
}
