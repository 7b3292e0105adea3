//! Place-name search against the geocoding API.

use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{
    cache::ExpiringCache,
    error::AppError,
    http::{self, HttpTransport, REQUEST_TIMEOUT},
    model::Location,
    rate_limit::RateLimiter,
    retry::RetryExecutor,
};

pub const LOCATION_CACHE_NAMESPACE: &str = "location-search";
pub const LOCATION_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const LOCATION_CACHE_MAX_ENTRIES: usize = 50;
pub const RATE_LIMIT_KEY: &str = "geocoding";

pub const MIN_QUERY_LEN: usize = 2;
pub const MAX_QUERY_LEN: usize = 100;

const STRIPPED_CHARS: &[char] = &['<', '>', '"', '\'', '&', '(', ')', '/'];

/// Trim, drop markup-ish characters and cap the length.
pub fn sanitize_query(raw: &str) -> String {
    let stripped: String = raw.trim().chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
    stripped.trim().chars().take(MAX_QUERY_LEN).collect()
}

/// Cache key for a query: lowercase, single-spaced.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn validate_query(query: &str) -> Result<(), AppError> {
    let len = query.chars().count();
    if len == 0 {
        return Err(AppError::user("Please enter a location to search for."));
    }
    if len < MIN_QUERY_LEN {
        return Err(AppError::user(format!(
            "Search query must be at least {MIN_QUERY_LEN} characters long."
        )));
    }
    if len > MAX_QUERY_LEN {
        return Err(AppError::user(format!(
            "Search query must be at most {MAX_QUERY_LEN} characters long."
        )));
    }
    Ok(())
}

pub struct GeocodingClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    max_results: usize,
    cache: ExpiringCache<Vec<Location>>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
}

impl fmt::Debug for GeocodingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodingClient")
            .field("base_url", &self.base_url)
            .field("max_results", &self.max_results)
            .field("retry", self.retry.policy())
            .finish_non_exhaustive()
    }
}

impl GeocodingClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        max_results: usize,
        cache: ExpiringCache<Vec<Location>>,
        limiter: Arc<RateLimiter>,
        retry: RetryExecutor,
    ) -> Self {
        Self { transport, base_url: base_url.into(), max_results, cache, limiter, retry }
    }

    pub fn cache(&self) -> &ExpiringCache<Vec<Location>> {
        &self.cache
    }

    /// Search for places matching `raw_query`.
    ///
    /// Invalid records in the response are dropped, not reported; an empty
    /// result is a valid (and cached) answer.
    pub async fn search(&self, raw_query: &str) -> Result<Vec<Location>, AppError> {
        let query = sanitize_query(raw_query);
        validate_query(&query)?;

        let key = normalize_query(&query);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        self.retry.ensure_online()?;
        self.limiter.acquire(RATE_LIMIT_KEY)?;

        let params = [
            ("name", query.clone()),
            ("count", self.max_results.to_string()),
            ("language", "en".to_string()),
            ("format", "json".to_string()),
        ];
        let transport = self.transport.as_ref();
        let url = self.base_url.as_str();
        let params = &params[..];
        let max_results = self.max_results;

        let locations = self
            .retry
            .run("location search", move || async move {
                let body = http::get_json(transport, url, params, REQUEST_TIMEOUT).await?;
                let locations = parse_locations(&body, max_results)?;
                Ok::<_, anyhow::Error>(locations)
            })
            .await?;

        info!(query = %key, results = locations.len(), "location search complete");
        self.cache.set(&key, locations.clone(), LOCATION_CACHE_TTL);
        Ok(locations)
    }
}

fn parse_locations(body: &Value, max_results: usize) -> Result<Vec<Location>, AppError> {
    let Some(object) = body.as_object() else {
        return Err(AppError::data("Invalid location data received"));
    };

    let items = match object.get("results") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(AppError::data("Invalid location data received")),
    };

    let locations: Vec<Location> =
        items.iter().filter_map(parse_location).take(max_results).collect();

    let dropped = items.len().saturating_sub(locations.len());
    if dropped > 0 {
        debug!(dropped, "skipped invalid or surplus location records");
    }

    Ok(locations)
}

fn parse_location(raw: &Value) -> Option<Location> {
    let record = raw.as_object()?;

    let text = |field: &str| {
        record
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let coordinate = |field: &str, bound: f64| {
        record.get(field).and_then(Value::as_f64).filter(|v| (-bound..=bound).contains(v))
    };

    Some(Location {
        id: record.get("id")?.as_i64()?,
        name: text("name")?,
        country: text("country")?,
        admin1: text("admin1"),
        latitude: coordinate("latitude", 90.0)?,
        longitude: coordinate("longitude", 180.0)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        error::ErrorKind,
        network::NetworkMonitor,
        rate_limit::RateLimiter,
        retry::RetryPolicy,
        store::MemoryStore,
        testing::MockTransport,
    };
    use serde_json::json;

    struct Fixture {
        transport: Arc<MockTransport>,
        monitor: Arc<NetworkMonitor>,
        client: GeocodingClient,
    }

    fn fixture(max_results: usize) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let clock = Arc::new(ManualClock::default());
        let monitor = Arc::new(NetworkMonitor::new(true, transport.clone(), "http://probe"));
        let store = Arc::new(MemoryStore::new());
        let cache = ExpiringCache::new(LOCATION_CACHE_NAMESPACE, store, clock.clone())
            .with_max_entries(LOCATION_CACHE_MAX_ENTRIES);
        let client = GeocodingClient::new(
            transport.clone(),
            "http://geo/search",
            max_results,
            cache,
            Arc::new(RateLimiter::new(clock)),
            RetryExecutor::new(RetryPolicy::geocoding(), monitor.clone()),
        );
        Fixture { transport, monitor, client }
    }

    fn record(id: i64, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "country": "France",
            "admin1": "Île-de-France",
            "latitude": 48.85,
            "longitude": 2.35,
        })
    }

    #[test]
    fn sanitize_strips_and_truncates() {
        assert_eq!(sanitize_query("  <Paris>  "), "Paris");
        assert_eq!(sanitize_query("Rock & Roll (Town)/x"), "Rock  Roll Townx");
        assert_eq!(sanitize_query(&"a".repeat(150)).len(), MAX_QUERY_LEN);
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        for q in ["  New York  ", "NEW YORK", "new    york", "New\tYork"] {
            assert_eq!(normalize_query(q.trim()), "new york");
        }
    }

    #[test]
    fn records_missing_fields_or_out_of_range_are_dropped() {
        let body = json!({ "results": [
            record(1, "Paris"),
            { "id": 2, "name": "", "country": "France", "latitude": 1.0, "longitude": 1.0 },
            { "id": 3, "name": "Nowhere", "country": "X", "latitude": 95.0, "longitude": 1.0 },
            { "id": "4", "name": "Typo", "country": "X", "latitude": 1.0, "longitude": 1.0 },
            { "id": 5, "name": "Lat", "country": "X", "latitude": "1.0", "longitude": 1.0 },
            "not an object",
            record(6, "Paris, TX"),
        ]});

        let parsed = parse_locations(&body, 10).unwrap();
        let ids: Vec<i64> = parsed.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 6]);
        assert_eq!(parsed[0].admin1.as_deref(), Some("Île-de-France"));
    }

    #[test]
    fn missing_results_is_empty_not_error() {
        assert!(parse_locations(&json!({ "generationtime_ms": 0.5 }), 10).unwrap().is_empty());
        assert!(parse_locations(&json!({ "results": null }), 10).unwrap().is_empty());
    }

    #[test]
    fn unusable_payload_is_data_error() {
        let err = parse_locations(&json!([1, 2]), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);

        let err = parse_locations(&json!({ "results": "oops" }), 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[tokio::test]
    async fn short_query_is_rejected_without_network() {
        let f = fixture(10);

        for q in ["a", "  b ", "<>", ""] {
            let err = f.client.search(q).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::User);
            assert!(!err.is_retryable());
        }
        assert_eq!(f.transport.calls(), 0);
    }

    #[tokio::test]
    async fn sends_expected_query_parameters() {
        let f = fixture(5);
        f.transport.push_json(200, r#"{"results": []}"#);

        f.client.search("  Paris ").await.unwrap();

        let req = &f.transport.requests()[0];
        assert_eq!(req.url, "http://geo/search");
        assert_eq!(req.param("name"), Some("Paris"));
        assert_eq!(req.param("count"), Some("5"));
        assert_eq!(req.param("language"), Some("en"));
        assert_eq!(req.param("format"), Some("json"));
    }

    #[tokio::test]
    async fn results_are_capped_and_cached() {
        let f = fixture(2);
        let body = json!({ "results": [record(1, "A"), record(2, "B"), record(3, "C")] });
        f.transport.push_json(200, &body.to_string());

        let first = f.client.search("Springfield").await.unwrap();
        let second = f.client.search("springfield").await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(f.transport.calls(), 1);
    }

    #[tokio::test]
    async fn empty_answer_is_cached_too() {
        let f = fixture(10);
        f.transport.push_json(200, "{}");

        assert!(f.client.search("Atlantis").await.unwrap().is_empty());
        assert!(f.client.search("atlantis").await.unwrap().is_empty());
        assert_eq!(f.transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_is_not_retried() {
        let f = fixture(10);
        f.transport.always(403, "{}");

        let err = f.client.search("Paris").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(f.transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_uses_the_geocoding_budget() {
        let f = fixture(10);
        f.transport.always(503, "");

        let err = f.client.search("Paris").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.is_retryable());
        assert_eq!(f.transport.calls(), 2);
    }

    #[tokio::test]
    async fn offline_search_makes_no_request() {
        let f = fixture(10);
        f.monitor.handle_offline();

        let err = f.client.search("Paris").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.message().contains("offline"));
        assert_eq!(f.transport.calls(), 0);
    }

    #[tokio::test]
    async fn rate_limit_denial_reports_wait_time() {
        let f = fixture(10);
        f.transport.always(200, r#"{"results": []}"#);

        for i in 0..60 {
            f.client.search(&format!("town {i}")).await.unwrap();
        }
        let err = f.client.search("one too many").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.message().contains("try again in 1 minute"));
        assert_eq!(f.transport.calls(), 60);
    }
}
