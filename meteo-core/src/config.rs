use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_GEOCODING_API_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const DEFAULT_PROBE_URL: &str = "https://api.open-meteo.com";

/// Open-Meteo serves at most 16 forecast days.
pub const MAX_FORECAST_DAYS: u8 = 16;

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// forecast_days = 3
/// cache_ttl_minutes = 15
/// ```
/// Missing keys fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub weather_api_url: String,
    pub geocoding_api_url: String,
    pub max_location_results: usize,
    pub forecast_days: u8,
    pub cache_ttl_minutes: u64,
    /// URL hit by the connectivity probe.
    pub probe_url: String,
    /// Where cache blobs live; `None` means the platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weather_api_url: DEFAULT_WEATHER_API_URL.to_string(),
            geocoding_api_url: DEFAULT_GEOCODING_API_URL.to_string(),
            max_location_results: 10,
            forecast_days: 7,
            cache_ttl_minutes: 10,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load config from disk (defaults if absent), then apply `METEO_*`
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&Self::config_file_path()?)?;
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file yet.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "meteo", "meteo-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overwrite fields from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("METEO_WEATHER_API_URL") {
            self.weather_api_url = url;
        }
        if let Some(url) = lookup("METEO_GEOCODING_API_URL") {
            self.geocoding_api_url = url;
        }
        if let Some(url) = lookup("METEO_PROBE_URL") {
            self.probe_url = url;
        }
        if let Some(dir) = lookup("METEO_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("METEO_MAX_LOCATION_RESULTS") {
            self.max_location_results = parse_var("METEO_MAX_LOCATION_RESULTS", &raw)?;
        }
        if let Some(raw) = lookup("METEO_FORECAST_DAYS") {
            self.forecast_days = parse_var("METEO_FORECAST_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("METEO_CACHE_TTL_MINUTES") {
            self.cache_ttl_minutes = parse_var("METEO_CACHE_TTL_MINUTES", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.weather_api_url.trim().is_empty() || self.geocoding_api_url.trim().is_empty() {
            bail!("API base URLs must not be empty");
        }
        if self.max_location_results == 0 {
            bail!("max_location_results must be at least 1");
        }
        if !(1..=MAX_FORECAST_DAYS).contains(&self.forecast_days) {
            bail!(
                "forecast_days must be between 1 and {MAX_FORECAST_DAYS}, got {}",
                self.forecast_days
            );
        }
        if self.cache_ttl_minutes == 0 {
            bail!("cache_ttl_minutes must be at least 1");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60))
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim().parse().with_context(|| format!("Invalid value for {name}: '{raw}'"))
}
