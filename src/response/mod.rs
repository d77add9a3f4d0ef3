//! 响应交付模块：批处理、限流并带重试地将工具响应发送回中继。
//!
//! # Response Module
//!
//! [`ResponseHandler`] takes completed [`ToolResponse`]s, groups them through
//! a [`BatchProcessor`], and delivers each closed batch to the relay as one
//! `POST {batchId, timestamp, responses}`.
//!
//! Each batch delivery:
//! 1. waits for a rate limiter slot
//! 2. posts the batch, bounded by the configured timeout
//! 3. feeds the reply's rate-limit headers back into the limiter
//! 4. on failure, retries up to `max_retries` times on the backoff schedule
//!
//! When retries run out the whole batch fails with [`Error::Delivery`] and
//! every response in it counts as a failed delivery. Batches are never split.

mod statistics;

pub use statistics::{DeliveryStatistics, DEFAULT_TIMING_WINDOW};

use crate::batch::{Batch, BatchConfig, BatchHandler, BatchProcessor};
use crate::resilience::{BackoffPolicy, RateLimiter, RateLimiterConfig};
use crate::transport::RelayHttpClient;
use crate::types::{ResponseBatch, ToolResponse};
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::json;
use statistics::DeliveryCounters;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHandlerConfig {
    /// When disabled, responses are dropped instead of delivered.
    pub enabled: bool,
    /// Extra attempts after the first failed one.
    pub max_retries: u32,
    pub retry_backoff: BackoffPolicy,
    /// Bound on each HTTP attempt.
    pub timeout: Duration,
    /// Custom headers sent with every delivery.
    pub headers: BTreeMap<String, String>,
    pub batch: BatchConfig,
    pub rate_limit: RateLimiterConfig,
    /// Number of recent deliveries the average time is computed over.
    pub timing_window: usize,
}

impl Default for ResponseHandlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_backoff: BackoffPolicy::new(Duration::from_millis(1000), Duration::from_secs(10)),
            timeout: Duration::from_secs(10),
            headers: BTreeMap::new(),
            batch: BatchConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            timing_window: DEFAULT_TIMING_WINDOW,
        }
    }
}

impl ResponseHandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::configuration_with_context(
                "delivery timeout must be non-zero",
                ErrorContext::new()
                    .with_field_path("response.timeout")
                    .with_source("response_handler"),
            ));
        }
        self.rate_limit.validate()
    }
}

/// Delivery half of the handler; the batch processor calls into it.
struct Delivery {
    client: RelayHttpClient,
    config: ArcSwap<ResponseHandlerConfig>,
    rate_limiter: RateLimiter,
    counters: Mutex<DeliveryCounters>,
}

impl Delivery {
    fn counters(&self) -> MutexGuard<'_, DeliveryCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_batch(&self, batch: ResponseBatch) -> Result<()> {
        let cfg = self.config.load_full();
        let size = batch.len() as u64;
        let body = json!({
            "batchId": batch.id,
            "timestamp": crate::types::now_iso(),
            "responses": batch.items,
        });
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            self.rate_limiter.wait_for_request().await;
            let (message, status) = match self.client.post_json(&body, &cfg.headers, cfg.timeout).await {
                Ok(reply) => {
                    self.rate_limiter.update_from_headers(&reply.headers).await;
                    if reply.is_success() {
                        let elapsed = started.elapsed();
                        let mut c = self.counters();
                        c.successful_deliveries += size;
                        c.record_timing(elapsed);
                        drop(c);
                        info!(
                            batch_id = %batch.id,
                            responses = size,
                            attempts = attempt + 1,
                            duration_ms = elapsed.as_millis() as u64,
                            "batch delivered"
                        );
                        return Ok(());
                    }
                    let body = reply.body.trim();
                    let message = if body.is_empty() {
                        format!("HTTP {}", reply.status)
                    } else {
                        format!("HTTP {}: {}", reply.status, body)
                    };
                    (message, Some(reply.status))
                }
                Err(e) if e.is_timeout() => (
                    format!("timed out after {} ms", cfg.timeout.as_millis()),
                    None,
                ),
                Err(e) => (e.to_string(), None),
            };

            if attempt >= cfg.max_retries {
                let elapsed = started.elapsed();
                let mut c = self.counters();
                c.failed_deliveries += size;
                c.record_timing(elapsed);
                drop(c);
                error!(
                    batch_id = %batch.id,
                    responses = size,
                    attempts = attempt + 1,
                    http_status = status,
                    error = %message,
                    "batch delivery failed"
                );
                return Err(Error::Delivery {
                    message,
                    attempts: attempt + 1,
                    status,
                    context: ErrorContext::new()
                        .with_details(format!("batch {} ({} responses)", batch.id, size))
                        .with_source("response_handler"),
                });
            }

            let delay = cfg.retry_backoff.delay(attempt);
            warn!(
                batch_id = %batch.id,
                attempt = attempt + 1,
                http_status = status,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "batch delivery failed; retrying"
            );
            attempt += 1;
            self.counters().total_retries += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BatchHandler<ToolResponse> for Delivery {
    async fn process_batch(&self, batch: Batch<ToolResponse>) -> Result<()> {
        self.send_batch(batch).await
    }
}

/// Batches, rate-limits and delivers tool responses to the relay.
pub struct ResponseHandler {
    delivery: Arc<Delivery>,
    batcher: BatchProcessor<ToolResponse>,
}

impl ResponseHandler {
    pub fn new(client: RelayHttpClient, config: ResponseHandlerConfig) -> Result<Self> {
        config.validate()?;
        let delivery = Arc::new(Delivery {
            client,
            rate_limiter: RateLimiter::new(config.rate_limit.clone())?,
            counters: Mutex::new(DeliveryCounters::new(config.timing_window)),
            config: ArcSwap::from_pointee(config.clone()),
        });
        let batcher = BatchProcessor::new(
            config.batch,
            Arc::clone(&delivery) as Arc<dyn BatchHandler<ToolResponse>>,
        );
        Ok(Self { delivery, batcher })
    }

    pub fn is_enabled(&self) -> bool {
        self.delivery.config.load().enabled
    }

    pub fn config(&self) -> Arc<ResponseHandlerConfig> {
        self.delivery.config.load_full()
    }

    /// Queue a response for delivery.
    ///
    /// Returns the delivery error when this call closed a batch whose
    /// delivery then failed; batches closed by the delay timer report
    /// failures through the log and statistics instead.
    pub async fn post_response(&self, response: ToolResponse) -> Result<()> {
        if !self.is_enabled() {
            debug!(request_id = %response.request_id(), "response delivery disabled; dropping");
            return Ok(());
        }
        self.delivery.counters().total_responses += 1;
        debug!(
            request_id = %response.request_id(),
            success = response.is_success(),
            "queued response"
        );
        self.batcher.add(response).await
    }

    /// Deliver a batch immediately, bypassing the batcher.
    pub async fn send_response(&self, batch: ResponseBatch) -> Result<()> {
        self.delivery.counters().total_responses += batch.len() as u64;
        self.delivery.send_batch(batch).await
    }

    /// Deliver whatever is pending now.
    pub async fn flush(&self) -> Result<()> {
        self.batcher.flush().await
    }

    pub fn pending(&self) -> usize {
        self.batcher.pending()
    }

    pub async fn get_statistics(&self) -> DeliveryStatistics {
        let rate_limit = self.delivery.rate_limiter.status().await;
        let c = self.delivery.counters();
        DeliveryStatistics {
            total_responses: c.total_responses,
            successful_deliveries: c.successful_deliveries,
            failed_deliveries: c.failed_deliveries,
            total_retries: c.total_retries,
            average_delivery_time_ms: c.average_ms(),
            batch: self.batcher.statistics(),
            rate_limit,
        }
    }

    pub fn reset_statistics(&self) {
        self.delivery.counters().reset();
        self.batcher.reset_statistics();
    }

    /// Swap in a new configuration. Batch bounds apply from the next batch;
    /// an in-flight delivery finishes under the settings it started with.
    pub async fn update_config(&self, config: ResponseHandlerConfig) -> Result<()> {
        config.validate()?;
        self.delivery
            .rate_limiter
            .reconfigure(config.rate_limit.clone())
            .await?;
        self.batcher.set_config(config.batch.clone());
        self.delivery.counters().resize(config.timing_window);
        self.delivery.config.store(Arc::new(config));
        info!("response handler configuration updated");
        Ok(())
    }
}
