use crate::types::ConnectionError;
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Proxy;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use url::Url;

/// Relay endpoint paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoints {
    pub stream: String,
    pub poll: String,
    pub response: String,
    /// `{code}` is replaced with the session code.
    pub metadata: String,
}

impl Default for RelayEndpoints {
    fn default() -> Self {
        Self {
            stream: "/api/stream".into(),
            poll: "/api/request".into(),
            response: "/api/response".into(),
            metadata: "/api/sessions/{code}/metadata".into(),
        }
    }
}

/// Body of a polling reply: `{requests, lastRequestId?, timestamp}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReply {
    #[serde(default)]
    pub requests: Vec<Value>,
    #[serde(default)]
    pub last_request_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Status and headers of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryReply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl DeliveryReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client for every relay endpoint.
///
/// No client-wide timeout is set because the push stream is long-lived;
/// polls and deliveries carry per-request timeouts instead.
#[derive(Clone)]
pub struct RelayHttpClient {
    client: reqwest::Client,
    base_url: Url,
    endpoints: RelayEndpoints,
}

impl RelayHttpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_endpoints(base_url, RelayEndpoints::default())
    }

    pub fn with_endpoints(base_url: &str, endpoints: RelayEndpoints) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(TransportError::Url)?;

        // Production-friendly defaults (env-overridable).
        let connect_timeout_secs = env::var("CODAP_RELAY_HTTP_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .pool_max_idle_per_host(
                env::var("CODAP_RELAY_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(8),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("CODAP_RELAY_PROXY_URL") {
            match Proxy::all(&proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => tracing::warn!(proxy = %proxy_url, error = %e, "ignoring invalid proxy url"),
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url,
            endpoints,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoints(&self) -> &RelayEndpoints {
        &self.endpoints
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// `{base}{path}`, so a base URL with a path prefix keeps it.
    pub(crate) fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path)).map_err(TransportError::Url)
    }

    pub fn stream_url(&self, session_code: &str) -> std::result::Result<Url, TransportError> {
        let mut url = self.url_for(&self.endpoints.stream)?;
        url.query_pairs_mut().append_pair("code", session_code);
        Ok(url)
    }

    pub fn poll_url(
        &self,
        session_code: &str,
        since: Option<&str>,
    ) -> std::result::Result<Url, TransportError> {
        let mut url = self.url_for(&self.endpoints.poll)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("code", session_code);
            if let Some(since) = since {
                q.append_pair("since", since);
            }
        }
        Ok(url)
    }

    pub fn response_url(&self) -> std::result::Result<Url, TransportError> {
        self.url_for(&self.endpoints.response)
    }

    pub fn metadata_url(&self, session_code: &str) -> std::result::Result<Url, TransportError> {
        let path = self.endpoints.metadata.replace("{code}", session_code);
        self.url_for(&path)
    }

    /// Open the push stream; non-2xx replies become typed connection errors.
    pub async fn open_stream(
        &self,
        session_code: &str,
    ) -> std::result::Result<reqwest::Response, ConnectionError> {
        let url = self
            .stream_url(session_code)
            .map_err(|e| ConnectionError::network(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header("cache-control", "no-cache")
            .send()
            .await
            .map_err(|e| ConnectionError::from_reqwest(&e))?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectionError::from_status(status, &body));
        }
        Ok(resp)
    }

    pub async fn poll(
        &self,
        session_code: &str,
        since: Option<&str>,
        timeout: Duration,
    ) -> std::result::Result<PollReply, ConnectionError> {
        let url = self
            .poll_url(session_code, since)
            .map_err(|e| ConnectionError::network(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ConnectionError::from_reqwest(&e))?;
        let status = resp.status().as_u16();
        if status == 204 {
            return Ok(PollReply::default());
        }
        let body = resp.text().await.map_err(|e| ConnectionError::from_reqwest(&e))?;
        if !(200..300).contains(&status) {
            return Err(ConnectionError::from_status(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(PollReply::default());
        }
        serde_json::from_str(&body)
            .map_err(|e| ConnectionError::parsing(format!("invalid polling reply: {}", e)))
    }

    /// POST a JSON body to the response endpoint.
    ///
    /// Any HTTP status is returned as a reply; only network-level failures
    /// (including the timeout) are errors.
    pub async fn post_json(
        &self,
        body: &Value,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> std::result::Result<DeliveryReply, TransportError> {
        let url = self.response_url()?;
        let mut req = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(body);
        for (k, v) in headers {
            match (HeaderName::try_from(k.as_str()), HeaderValue::from_str(v)) {
                (Ok(name), Ok(value)) => req = req.header(name, value),
                _ => tracing::warn!(header = %k, "skipping invalid custom header"),
            }
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        Ok(DeliveryReply {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for RelayHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Http(e) if e.is_timeout())
    }
}
