use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Select, Text};
use meteo_core::{Config, Location, MeteoService};
use std::{fmt, time::Duration};
use tracing::debug;

use crate::render;

/// How often `--wait-online` re-probes connectivity.
const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "meteo", version, about = "Weather lookup backed by Open-Meteo")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively edit the configuration file.
    Configure,

    /// Search for places by name.
    Search {
        /// Place name, e.g. "Paris" or "New York".
        query: String,
    },

    /// Show current conditions at a coordinate pair.
    Current {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },

    /// Show the daily forecast at a coordinate pair.
    Forecast {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },

    /// Look up a place and show its current weather and forecast.
    Show {
        /// Place name; if several places match you will be asked to pick one.
        query: String,

        /// Wait for connectivity instead of failing while offline.
        #[arg(long)]
        wait_online: bool,
    },

    /// Inspect or clear the local caches.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Entry and expired counts per cache.
    Stats,
    /// Remove every cached entry.
    Clear,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure()?,
            Command::Cache { action: CacheAction::Stats } => {
                render::print_cache_report(&service()?.cache_stats());
            }
            Command::Cache { action: CacheAction::Clear } => {
                service()?.clear_all_caches();
                println!("Caches cleared.");
            }
            Command::Search { query } => {
                let service = connected_service().await?;
                let locations = service.search_locations(&query).await?;
                render::print_locations(&locations);
            }
            Command::Current { latitude, longitude } => {
                let service = connected_service().await?;
                let current = service.get_current_weather(latitude, longitude).await?;
                render::print_current(&current);
            }
            Command::Forecast { latitude, longitude } => {
                let service = connected_service().await?;
                let forecast = service.get_forecast(latitude, longitude).await?;
                render::print_forecast(&forecast);
            }
            Command::Show { query, wait_online } => {
                let service = connected_service().await?;
                show(&service, &query, wait_online).await?;
            }
        }

        Ok(())
    }
}

fn service() -> anyhow::Result<MeteoService> {
    let config = Config::load()?;
    MeteoService::builder(config).build().context("Failed to initialise the weather service")
}

/// The service starts out assuming connectivity; correct that with one probe.
async fn connected_service() -> anyhow::Result<MeteoService> {
    let service = service()?;
    if !service.network().probe().await {
        service.network().handle_offline();
    }
    Ok(service)
}

async fn show(service: &MeteoService, query: &str, wait_online: bool) -> anyhow::Result<()> {
    let watcher = if wait_online && !service.is_online() {
        eprintln!("You appear to be offline; waiting for connectivity...");
        Some(service.network().spawn_watcher(WATCH_INTERVAL))
    } else {
        None
    };

    let locations = if watcher.is_some() {
        service.search_locations_when_online(query).await?
    } else {
        service.search_locations(query).await?
    };

    let location = pick_location(query, locations)?;
    debug!(id = location.id, "location selected");

    let weather = if watcher.is_some() {
        service.complete_weather_when_online(location.latitude, location.longitude).await?
    } else {
        service.get_complete_weather_data(location.latitude, location.longitude).await?
    };

    if let Some(watcher) = watcher {
        watcher.abort();
    }

    println!("{}", location.display_name());
    render::print_current(&weather.current);
    println!();
    render::print_forecast(&weather.forecast);
    Ok(())
}

struct Choice(Location);

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}, {:.2})", self.0.display_name(), self.0.latitude, self.0.longitude)
    }
}

fn pick_location(query: &str, mut locations: Vec<Location>) -> anyhow::Result<Location> {
    match locations.len() {
        0 => bail!("No places found matching '{query}'."),
        1 => Ok(locations.remove(0)),
        _ => {
            let choices = locations.into_iter().map(Choice).collect();
            let picked = Select::new("Several places match, pick one:", choices)
                .prompt()
                .context("No place selected")?;
            Ok(picked.0)
        }
    }
}

fn configure() -> anyhow::Result<()> {
    let path = Config::config_file_path()?;
    let mut cfg = Config::load_from(&path)?;

    cfg.forecast_days = CustomType::<u8>::new("Forecast days (1-16):")
        .with_default(cfg.forecast_days)
        .with_error_message("Please enter a whole number")
        .prompt()?;

    cfg.max_location_results = CustomType::<usize>::new("Maximum search results:")
        .with_default(cfg.max_location_results)
        .with_error_message("Please enter a whole number")
        .prompt()?;

    cfg.cache_ttl_minutes = CustomType::<u64>::new("Weather cache lifetime in minutes:")
        .with_default(cfg.cache_ttl_minutes)
        .with_error_message("Please enter a whole number")
        .prompt()?;

    let weather_api_url =
        Text::new("Weather API URL:").with_default(&cfg.weather_api_url).prompt()?;
    let geocoding_api_url =
        Text::new("Geocoding API URL:").with_default(&cfg.geocoding_api_url).prompt()?;
    cfg.weather_api_url = weather_api_url;
    cfg.geocoding_api_url = geocoding_api_url;

    cfg.validate()?;
    cfg.save_to(&path)?;

    println!("Saved configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(id: i64) -> Location {
        Location {
            id,
            name: "Springfield".into(),
            country: "United States".into(),
            admin1: None,
            latitude: 39.8,
            longitude: -89.64,
        }
    }

    #[test]
    fn parses_negative_coordinates() {
        let cli = Cli::try_parse_from(["meteo", "current", "-33.87", "-151.21"]).unwrap();

        match cli.command {
            Command::Current { latitude, longitude } => {
                assert_eq!(latitude, -33.87);
                assert_eq!(longitude, -151.21);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_show_with_wait_flag() {
        let cli = Cli::try_parse_from(["meteo", "show", "New York", "--wait-online"]).unwrap();

        assert!(matches!(
            cli.command,
            Command::Show { ref query, wait_online: true } if query == "New York"
        ));
    }

    #[test]
    fn parses_cache_subcommands() {
        let cli = Cli::try_parse_from(["meteo", "cache", "clear"]).unwrap();
        assert!(matches!(cli.command, Command::Cache { action: CacheAction::Clear }));
    }

    #[test]
    fn no_match_is_an_error() {
        let err = pick_location("Atlantis", Vec::new()).unwrap_err();
        assert!(err.to_string().contains("Atlantis"));
    }

    #[test]
    fn single_match_needs_no_prompt() {
        let picked = pick_location("Springfield", vec![location(7)]).unwrap();
        assert_eq!(picked.id, 7);
    }

    #[test]
    fn choice_shows_coordinates() {
        assert_eq!(
            Choice(location(1)).to_string(),
            "Springfield, United States (39.80, -89.64)"
        );
    }
}
