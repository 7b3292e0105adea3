//! Composition root: wires the shared network monitor, rate limiter, caches
//! and both API clients together and exposes the operations a UI calls.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::{
    cache::{CacheStats, ExpiringCache},
    clock::{Clock, SystemClock},
    config::Config,
    error::AppError,
    geocoding::{GeocodingClient, LOCATION_CACHE_MAX_ENTRIES, LOCATION_CACHE_NAMESPACE},
    http::{HttpTransport, ReqwestTransport},
    model::{CompleteWeather, CurrentWeather, ForecastDay, Location},
    network::NetworkMonitor,
    offline_queue::OfflineQueue,
    rate_limit::RateLimiter,
    retry::{RetryExecutor, RetryPolicy},
    store::{FileStore, KeyValueStore},
    weather::{WEATHER_CACHE_NAMESPACE, WeatherClient, WeatherClientOptions},
};

/// Per-namespace cache counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub location_search: CacheStats,
    pub weather: CacheStats,
}

#[derive(Debug)]
pub struct MeteoService {
    geocoding: Arc<GeocodingClient>,
    weather: Arc<WeatherClient>,
    monitor: Arc<NetworkMonitor>,
    queue: OfflineQueue,
}

impl MeteoService {
    pub fn builder(config: Config) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub async fn search_locations(&self, query: &str) -> Result<Vec<Location>, AppError> {
        self.geocoding.search(query).await
    }

    pub async fn get_current_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentWeather, AppError> {
        self.weather.get_current_weather(latitude, longitude).await
    }

    pub async fn get_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<ForecastDay>, AppError> {
        self.weather.get_forecast(latitude, longitude).await
    }

    pub async fn get_complete_weather_data(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CompleteWeather, AppError> {
        self.weather.get_complete_weather_data(latitude, longitude).await
    }

    /// Like [`search_locations`](Self::search_locations), but waits for
    /// connectivity instead of failing while offline.
    pub async fn search_locations_when_online(
        &self,
        query: &str,
    ) -> Result<Vec<Location>, AppError> {
        let geocoding = Arc::clone(&self.geocoding);
        let query = query.to_string();
        self.queue
            .enqueue("location search", move || async move { geocoding.search(&query).await })
            .await
    }

    pub async fn complete_weather_when_online(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CompleteWeather, AppError> {
        let weather = Arc::clone(&self.weather);
        self.queue
            .enqueue("weather data", move || async move {
                weather.get_complete_weather_data(latitude, longitude).await
            })
            .await
    }

    pub fn clear_all_caches(&self) {
        self.geocoding.cache().clear();
        self.weather.cache().clear();
        info!("cleared all caches");
    }

    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            location_search: self.geocoding.cache().stats(),
            weather: self.weather.cache().stats(),
        }
    }

    /// Drop expired entries from both namespaces; returns how many went.
    pub fn sweep_caches(&self) -> usize {
        self.geocoding.cache().sweep() + self.weather.cache().sweep()
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.pending_len()
    }
}

/// Builds a [`MeteoService`]; every collaborator not supplied falls back to
/// the production implementation.
#[derive(Debug)]
pub struct ServiceBuilder {
    config: Config,
    transport: Option<Arc<dyn HttpTransport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    monitor: Option<Arc<NetworkMonitor>>,
    geocoding_policy: RetryPolicy,
    weather_policy: RetryPolicy,
}

impl ServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            clock: None,
            monitor: None,
            geocoding_policy: RetryPolicy::geocoding(),
            weather_policy: RetryPolicy::weather(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_retry_policies(mut self, geocoding: RetryPolicy, weather: RetryPolicy) -> Self {
        self.geocoding_policy = geocoding;
        self.weather_policy = weather;
        self
    }

    pub fn build(self) -> anyhow::Result<MeteoService> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let store: Arc<dyn KeyValueStore> = match (self.store, &config.cache_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileStore::new(dir)),
            (None, None) => Arc::new(FileStore::in_default_location()?),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let monitor = self.monitor.unwrap_or_else(|| {
            Arc::new(NetworkMonitor::new(true, Arc::clone(&transport), config.probe_url.clone()))
        });

        let limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));

        let geocoding = GeocodingClient::new(
            Arc::clone(&transport),
            config.geocoding_api_url.clone(),
            config.max_location_results,
            ExpiringCache::new(LOCATION_CACHE_NAMESPACE, Arc::clone(&store), Arc::clone(&clock))
                .with_max_entries(LOCATION_CACHE_MAX_ENTRIES),
            Arc::clone(&limiter),
            RetryExecutor::new(self.geocoding_policy, Arc::clone(&monitor)),
        );

        let weather = WeatherClient::new(
            transport,
            WeatherClientOptions {
                base_url: config.weather_api_url.clone(),
                forecast_days: config.forecast_days,
                cache_ttl: config.cache_ttl(),
            },
            ExpiringCache::new(WEATHER_CACHE_NAMESPACE, store, Arc::clone(&clock)),
            clock,
            limiter,
            RetryExecutor::new(self.weather_policy, Arc::clone(&monitor)),
        );

        Ok(MeteoService {
            geocoding: Arc::new(geocoding),
            weather: Arc::new(weather),
            queue: OfflineQueue::new(Arc::clone(&monitor)),
            monitor,
        })
    }
}
