//! Terminal output for the core's data types.

use chrono::Local;
use meteo_core::{CacheReport, CacheStats, CurrentWeather, ForecastDay, Location};

/// Short description of a WMO weather interpretation code.
/// See: https://open-meteo.com/en/docs#weathervariables
pub fn describe_weather_code(code: i32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 => "Rain",
        65 => "Heavy rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 | 77 => "Snow",
        80 => "Rain showers",
        81 | 82 => "Heavy rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown conditions",
    }
}

/// 16-point compass heading for a direction in degrees.
pub fn compass(degrees: u16) -> &'static str {
    const POINTS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
        "NNW",
    ];
    // Each point spans 22.5 degrees, centred on its heading.
    let index = ((u32::from(degrees % 360) * 10 + 112) / 225) % 16;
    POINTS[index as usize]
}

pub fn print_locations(locations: &[Location]) {
    if locations.is_empty() {
        println!("No places found.");
        return;
    }

    for loc in locations {
        println!("{:<50} {:>8.3} {:>9.3}", loc.display_name(), loc.latitude, loc.longitude);
    }
}

pub fn print_current(current: &CurrentWeather) {
    println!(
        "{:.1}°C, {} (observed {})",
        current.temperature,
        describe_weather_code(current.weather_code),
        current.observed_at.with_timezone(&Local).format("%H:%M")
    );
    println!(
        "Wind {:.0} km/h {}, humidity {:.0}%",
        current.wind_speed,
        compass(current.wind_direction),
        current.humidity
    );
}

pub fn print_forecast(days: &[ForecastDay]) {
    for day in days {
        println!(
            "{}  {:>5.1}° / {:>5.1}°  {:>5.1} mm  {}",
            day.date.format("%a %d %b"),
            day.temperature_max,
            day.temperature_min,
            day.precipitation_sum,
            describe_weather_code(day.weather_code)
        );
    }
}

pub fn print_cache_report(report: &CacheReport) {
    let line = |name: &str, stats: &CacheStats| {
        println!("{name:<16} {} entries ({} expired)", stats.entries, stats.expired);
    };
    line("location-search", &report.location_search);
    line("weather", &report.weather);
}
