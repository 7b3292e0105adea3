//! Outbound HTTP seam.
//!
//! Clients talk to the network only through [`HttpTransport`], so tests can
//! script responses and the production path stays a thin `reqwest` wrapper.

use async_trait::async_trait;
use reqwest::Client;
use std::{fmt::Debug, time::Duration};
use tracing::{debug, warn};

use crate::{classify, error::AppError};

/// Deadline applied to every upstream request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failures, typed wherever the HTTP client tells us what happened.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("name resolution failed: {0}")]
    Dns(String),

    /// Anything the client could not categorise; classified by message.
    #[error("{0}")]
    Opaque(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let detail = error_chain(&err);

        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            if detail.to_lowercase().contains("dns") {
                TransportError::Dns(detail)
            } else {
                TransportError::Connect(detail)
            }
        } else {
            TransportError::Opaque(detail)
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("meteo/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let res = self.http.get(url).query(query).timeout(timeout).send().await?;

        let status = res.status().as_u16();
        let body = res.text().await?;

        Ok(HttpResponse { status, body })
    }
}

/// Perform a GET and return the parsed JSON body.
///
/// Every failure leaves here already classified: transport errors and
/// timeouts as `network`, non-2xx statuses per [`classify::from_status`],
/// unparseable bodies as `data`.
pub async fn get_json(
    transport: &dyn HttpTransport,
    url: &str,
    query: &[(&str, String)],
    timeout: Duration,
) -> Result<serde_json::Value, AppError> {
    debug!(url, params = query.len(), "sending request");

    let res = match tokio::time::timeout(timeout, transport.get(url, query, timeout)).await {
        Ok(Ok(res)) => res,
        Ok(Err(err)) => {
            warn!(url, error = %err, "transport failure");
            return Err(classify::from_transport(&err));
        }
        Err(_) => {
            warn!(url, ?timeout, "request deadline elapsed");
            return Err(classify::from_transport(&TransportError::Timeout));
        }
    };

    if !res.is_success() {
        warn!(url, status = res.status, body = %truncate_body(&res.body), "request failed");
        return Err(classify::from_status(res.status));
    }

    serde_json::from_str(&res.body).map_err(|e| {
        AppError::data("Invalid response format received from the service").with_cause(e)
    })
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
