use crate::batch::BatchStatistics;
use crate::resilience::RateLimitStatus;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_TIMING_WINDOW: usize = 100;

/// Delivery counters plus the batching and rate-limit views they depend on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatistics {
    pub total_responses: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub total_retries: u64,
    /// Mean over the most recent deliveries (bounded window), all attempts included.
    pub average_delivery_time_ms: f64,
    pub batch: BatchStatistics,
    pub rate_limit: RateLimitStatus,
}

#[derive(Debug)]
pub(super) struct DeliveryCounters {
    pub(super) total_responses: u64,
    pub(super) successful_deliveries: u64,
    pub(super) failed_deliveries: u64,
    pub(super) total_retries: u64,
    timings: VecDeque<Duration>,
    window: usize,
}

impl DeliveryCounters {
    pub(super) fn new(window: usize) -> Self {
        Self {
            total_responses: 0,
            successful_deliveries: 0,
            failed_deliveries: 0,
            total_retries: 0,
            timings: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
        }
    }

    pub(super) fn record_timing(&mut self, elapsed: Duration) {
        if self.timings.len() == self.window {
            self.timings.pop_front();
        }
        self.timings.push_back(elapsed);
    }

    pub(super) fn average_ms(&self) -> f64 {
        if self.timings.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.timings.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        sum / self.timings.len() as f64
    }

    pub(super) fn resize(&mut self, window: usize) {
        self.window = window.max(1);
        while self.timings.len() > self.window {
            self.timings.pop_front();
        }
    }

    pub(super) fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}
