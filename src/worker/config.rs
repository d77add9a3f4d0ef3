use crate::connection::ConnectionConfig;
use crate::executor::DEFAULT_TOOL_TIMEOUT;
use crate::parser::ParserConfig;
use crate::resilience::BackoffPolicy;
use crate::response::ResponseHandlerConfig;
use crate::transport::DEFAULT_MAX_TRACKED_IDS;
use crate::{Error, ErrorContext, Result};
use std::env;
use std::time::Duration;

/// Configuration of one worker instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserWorkerConfig {
    pub relay_base_url: String,
    pub session_code: String,
    pub sse_timeout: Duration,
    pub polling_interval: Duration,
    pub max_retries: u32,
    /// Base of the reconnection backoff.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub connect_timeout: Duration,
    pub tool_timeout: Duration,
    /// Try the push stream first; when false only polling is used.
    pub prefer_sse: bool,
    pub max_tracked_ids: usize,
    /// Installs a debug-level log subscriber on start.
    pub debug: bool,
    pub parser: ParserConfig,
    pub response: ResponseHandlerConfig,
}

impl Default for BrowserWorkerConfig {
    fn default() -> Self {
        Self {
            relay_base_url: String::new(),
            session_code: String::new(),
            sse_timeout: Duration::from_secs(60),
            polling_interval: Duration::from_millis(1000),
            max_retries: 5,
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            prefer_sse: true,
            max_tracked_ids: DEFAULT_MAX_TRACKED_IDS,
            debug: false,
            parser: ParserConfig::default(),
            response: ResponseHandlerConfig::default(),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl BrowserWorkerConfig {
    pub fn new(relay_base_url: impl Into<String>, session_code: impl Into<String>) -> Self {
        Self {
            relay_base_url: relay_base_url.into(),
            session_code: session_code.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `CODAP_RELAY_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("CODAP_RELAY_BASE_URL") {
            cfg.relay_base_url = url;
        }
        if let Ok(code) = env::var("CODAP_RELAY_SESSION_CODE") {
            cfg.session_code = code;
        }
        if let Some(d) = env_millis("CODAP_RELAY_SSE_TIMEOUT_MS") {
            cfg.sse_timeout = d;
        }
        if let Some(d) = env_millis("CODAP_RELAY_POLLING_INTERVAL_MS") {
            cfg.polling_interval = d;
        }
        if let Some(n) = env::var("CODAP_RELAY_MAX_RETRIES")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
        {
            cfg.max_retries = n;
        }
        if let Some(d) = env_millis("CODAP_RELAY_RETRY_DELAY_MS") {
            cfg.retry_delay = d;
        }
        if let Ok(v) = env::var("CODAP_RELAY_DEBUG") {
            cfg.debug = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        cfg
    }

    pub fn with_sse_timeout(mut self, d: Duration) -> Self {
        self.sse_timeout = d;
        self
    }

    pub fn with_polling_interval(mut self, d: Duration) -> Self {
        self.polling_interval = d;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_retry_delay(mut self, d: Duration) -> Self {
        self.retry_delay = d;
        self
    }

    pub fn with_connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn with_tool_timeout(mut self, d: Duration) -> Self {
        self.tool_timeout = d;
        self
    }

    pub fn with_prefer_sse(mut self, prefer: bool) -> Self {
        self.prefer_sse = prefer;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_response(mut self, response: ResponseHandlerConfig) -> Self {
        self.response = response;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |field: &str, message: String| {
            Err(Error::configuration_with_context(
                message,
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("browser_worker_config"),
            ))
        };
        match url::Url::parse(&self.relay_base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            Ok(u) => {
                return fail(
                    "relay_base_url",
                    format!("unsupported scheme '{}'", u.scheme()),
                )
            }
            Err(e) => {
                return fail(
                    "relay_base_url",
                    format!("invalid relay base url '{}': {}", self.relay_base_url, e),
                )
            }
        }
        if self.session_code.trim().is_empty() {
            return fail("session_code", "session code must not be empty".into());
        }
        for (field, d) in [
            ("sse_timeout", self.sse_timeout),
            ("polling_interval", self.polling_interval),
            ("connect_timeout", self.connect_timeout),
            ("tool_timeout", self.tool_timeout),
        ] {
            if d.is_zero() {
                return fail(field, format!("{} must be non-zero", field));
            }
        }
        self.response.validate()
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.session_code.clone())
            .with_sse_timeout(self.sse_timeout)
            .with_polling_interval(self.polling_interval)
            .with_max_retries(self.max_retries)
            .with_backoff(BackoffPolicy::new(self.retry_delay, self.max_retry_delay))
            .with_connect_timeout(self.connect_timeout)
            .with_prefer_sse(self.prefer_sse)
            .with_max_tracked_ids(self.max_tracked_ids)
    }
}
