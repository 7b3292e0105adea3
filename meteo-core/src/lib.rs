//! Core library for the `meteo` CLI.
//!
//! This crate defines:
//! - A typed error taxonomy shared by every layer
//! - Connectivity tracking, rate limiting, retry and an offline queue
//! - Expiring caches persisted per namespace
//! - Geocoding and weather clients for the Open-Meteo APIs
//!
//! [`MeteoService`] wires these together and is the entry point for callers.

pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod geocoding;
pub mod http;
pub mod model;
pub mod network;
pub mod offline_queue;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod store;
pub mod weather;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, ExpiringCache};
pub use config::Config;
pub use error::{AppError, ErrorKind};
pub use model::{CompleteWeather, CurrentWeather, ForecastDay, Location};
pub use network::NetworkMonitor;
pub use service::{CacheReport, MeteoService, ServiceBuilder};
