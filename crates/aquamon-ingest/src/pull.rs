//! Pull side of ingestion: the REST backend.
//!
//! The [`PullClient`] trait abstracts over the backend so the ingestor can be
//! driven by in-memory fakes in tests. [`HttpPullClient`] talks to the real
//! service with `reqwest`, wrapping every request in a deadline that yields
//! [`AquaError::Timeout`] rather than a transport error.
//!
//! Both endpoints answer either with an envelope
//! `{ success, data: [...], total, totalPage }` or with a bare array.

use std::time::Duration;

use aquamon_types::AquaError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Default deadline applied to each pull request.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30);

pub const READINGS_PATH: &str = "combined-readings";
pub const LOCATIONS_PATH: &str = "locations";

/// One-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

/// A page of raw, not yet normalised items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub total: Option<u64>,
    pub total_pages: Option<u32>,
}

impl RawPage {
    /// Accept either response shape.
    ///
    /// # Errors
    ///
    /// [`AquaError::Transport`] when the server reports `success: false`;
    /// [`AquaError::Validation`] when the body is neither shape.
    pub fn from_body(body: Value) -> Result<Self, AquaError> {
        match body {
            Value::Array(items) => Ok(Self {
                items,
                ..Self::default()
            }),
            Value::Object(mut obj) => {
                if obj.get("success").and_then(Value::as_bool) == Some(false) {
                    let reason = obj
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("no reason given");
                    return Err(AquaError::Transport(format!(
                        "server reported failure: {reason}"
                    )));
                }
                let Some(Value::Array(items)) = obj.remove("data") else {
                    return Err(AquaError::Validation(
                        "response object has no `data` array".into(),
                    ));
                };
                let total_pages = ["totalPage", "totalPages", "total_page"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_u64))
                    .map(|n| n.min(u64::from(u32::MAX)) as u32);
                Ok(Self {
                    items,
                    total: obj.get("total").and_then(Value::as_u64),
                    total_pages,
                })
            }
            other => Err(AquaError::Validation(format!(
                "unrecognised response shape: {other}"
            ))),
        }
    }
}

/// Access to the backend's pull endpoints.
#[async_trait]
pub trait PullClient: Send + Sync {
    /// `GET combined-readings[?locationId][&page=&limit=]`.
    async fn fetch_batch(
        &self,
        location_id: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<RawPage, AquaError>;

    /// `GET locations`.
    async fn fetch_locations(&self) -> Result<RawPage, AquaError>;
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP implementation
// ────────────────────────────────────────────────────────────────────────────

/// `reqwest`-backed [`PullClient`].
pub struct HttpPullClient {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    token: Option<String>,
}

impl HttpPullClient {
    /// # Errors
    ///
    /// [`AquaError::Config`] if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        token: Option<String>,
    ) -> Result<Self, AquaError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AquaError::Config(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            timeout,
            token,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, AquaError> {
        let url = format!("{}/{path}", self.base_url);
        let operation = format!("GET {path}");
        let timeout_secs = self.timeout.as_secs();

        let mut request = self.http.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let exchange = async {
            let response = request.send().await?.error_for_status()?;
            response.json::<Value>().await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => Err(AquaError::Timeout {
                operation,
                timeout_secs,
            }),
            Ok(Err(e)) if e.is_timeout() => Err(AquaError::Timeout {
                operation,
                timeout_secs,
            }),
            Ok(Err(e)) if e.is_decode() => {
                Err(AquaError::Validation(format!("{operation}: {e}")))
            }
            Ok(Err(e)) => Err(AquaError::Transport(format!("{operation}: {e}"))),
            Ok(Ok(body)) => {
                debug!(url = %url, "pull request completed");
                Ok(body)
            }
        }
    }
}

#[async_trait]
impl PullClient for HttpPullClient {
    async fn fetch_batch(
        &self,
        location_id: Option<&str>,
        page: Option<PageRequest>,
    ) -> Result<RawPage, AquaError> {
        let mut query = Vec::new();
        if let Some(id) = location_id {
            query.push(("locationId", id.to_string()));
        }
        if let Some(p) = page {
            query.push(("page", p.page.to_string()));
            query.push(("limit", p.limit.to_string()));
        }
        RawPage::from_body(self.get_json(READINGS_PATH, &query).await?)
    }

    async fn fetch_locations(&self) -> Result<RawPage, AquaError> {
        RawPage::from_body(self.get_json(LOCATIONS_PATH, &[]).await?)
    }
}
