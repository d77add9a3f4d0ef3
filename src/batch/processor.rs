//! Batch processor: closes batches on size or delay and hands them to a handler.

use super::collector::{BatchAddResult, BatchCollector, BatchConfig, BatchItem};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A closed batch, delivered to the handler exactly once.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub id: String,
    pub items: Vec<T>,
    pub created_at: Instant,
}

impl<T> Batch<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            items,
            created_at: Instant::now(),
        }
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Consumer of closed batches.
///
/// A returned error marks the batch as failed; the processor does not retry it.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    async fn process_batch(&self, batch: Batch<T>) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    pub total_batches: u64,
    pub total_items: u64,
    pub failed_batches: u64,
    pub average_batch_size: f64,
    /// Mean time between consecutive batch dispatches.
    pub average_batch_delay_ms: f64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct StatsState {
    total_batches: u64,
    total_items: u64,
    failed_batches: u64,
    delay_sum: Duration,
    delay_samples: u64,
    last_dispatch: Option<Instant>,
}

struct Inner<T> {
    collector: BatchCollector<T>,
    handler: Arc<dyn BatchHandler<T>>,
    stats: Mutex<StatsState>,
}

impl<T: Send + Sync + 'static> Inner<T> {
    async fn dispatch(&self, items: Vec<BatchItem<T>>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let batch = Batch::new(items.into_iter().map(|i| i.data).collect());
        {
            let mut st = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if let Some(prev) = st.last_dispatch {
                st.delay_sum += now.duration_since(prev);
                st.delay_samples += 1;
            }
            st.last_dispatch = Some(now);
            st.total_batches += 1;
            st.total_items += batch.len() as u64;
        }

        debug!(batch_id = batch.id.as_str(), size = batch.len(), "dispatching batch");
        let result = self.handler.process_batch(batch).await;
        if result.is_err() {
            self.stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .failed_batches += 1;
        }
        result
    }
}

/// Groups items into batches bounded by `max_batch_size` and `max_batch_delay`.
///
/// - size bound: the `add` call that fills the batch dispatches it and returns
///   the handler's result
/// - delay bound: a timer started by the first item dispatches whatever is
///   pending; a failure on that path is logged and counted
/// - batching disabled: each item is dispatched alone, through the same handler
pub struct BatchProcessor<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> BatchProcessor<T> {
    pub fn new(config: BatchConfig, handler: Arc<dyn BatchHandler<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                collector: BatchCollector::new(config),
                handler,
                stats: Mutex::new(StatsState::default()),
            }),
        }
    }

    pub fn config(&self) -> BatchConfig {
        self.inner.collector.config()
    }

    /// New bounds apply from the next batch that opens.
    pub fn set_config(&self, config: BatchConfig) {
        self.inner.collector.set_config(config);
    }

    pub async fn add(&self, item: T) -> Result<()> {
        let cfg = self.inner.collector.config();
        if !cfg.enabled {
            return self.inner.dispatch(vec![BatchItem::new(item)]).await;
        }

        match self.inner.collector.add_data(item) {
            BatchAddResult::ShouldFlush { .. } => {
                let items = self.inner.collector.drain();
                self.inner.dispatch(items).await
            }
            BatchAddResult::Opened { generation } => {
                self.spawn_timer(generation, cfg.max_batch_delay);
                Ok(())
            }
            BatchAddResult::Added { .. } => Ok(()),
        }
    }

    fn spawn_timer(&self, generation: u64, delay: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(items) = inner.collector.drain_generation(generation) {
                let size = items.len();
                if let Err(e) = inner.dispatch(items).await {
                    warn!(size, error = %e, "delayed batch failed");
                }
            }
        });
    }

    /// Dispatch the open batch now, if any.
    pub async fn flush(&self) -> Result<()> {
        let items = self.inner.collector.drain();
        self.inner.dispatch(items).await
    }

    pub fn pending(&self) -> usize {
        self.inner.collector.len()
    }

    pub fn statistics(&self) -> BatchStatistics {
        let st = self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner);
        BatchStatistics {
            total_batches: st.total_batches,
            total_items: st.total_items,
            failed_batches: st.failed_batches,
            average_batch_size: if st.total_batches == 0 {
                0.0
            } else {
                st.total_items as f64 / st.total_batches as f64
            },
            average_batch_delay_ms: if st.delay_samples == 0 {
                0.0
            } else {
                st.delay_sum.as_secs_f64() * 1000.0 / st.delay_samples as f64
            },
            pending: self.inner.collector.len(),
        }
    }

    pub fn reset_statistics(&self) {
        *self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner) = StatsState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, ErrorContext};

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<u32>>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchHandler<u32> for Recorder {
        async fn process_batch(&self, batch: Batch<u32>) -> Result<()> {
            self.batches.lock().unwrap().push(batch.items);
            if self.fail {
                return Err(Error::runtime_with_context(
                    "handler failed",
                    ErrorContext::new().with_source("test"),
                ));
            }
            Ok(())
        }
    }

    fn processor(cfg: BatchConfig, rec: &Arc<Recorder>) -> BatchProcessor<u32> {
        BatchProcessor::new(cfg, rec.clone() as Arc<dyn BatchHandler<u32>>)
    }

    #[tokio::test]
    async fn size_bound_dispatches_exactly_one_batch() {
        let rec = Arc::new(Recorder::default());
        let p = processor(
            BatchConfig::new()
                .with_max_batch_size(4)
                .with_max_batch_delay(Duration::from_secs(60)),
            &rec,
        );
        for i in 0..4 {
            p.add(i).await.unwrap();
        }
        assert_eq!(*rec.batches.lock().unwrap(), vec![vec![0, 1, 2, 3]]);
        assert_eq!(p.pending(), 0);
    }

    #[tokio::test]
    async fn delay_bound_dispatches_pending_once() {
        let rec = Arc::new(Recorder::default());
        let p = processor(
            BatchConfig::new()
                .with_max_batch_size(10)
                .with_max_batch_delay(Duration::from_millis(50)),
            &rec,
        );
        for i in 0..3 {
            p.add(i).await.unwrap();
        }
        assert!(rec.batches.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*rec.batches.lock().unwrap(), vec![vec![0, 1, 2]]);

        let stats = p.statistics();
        assert_eq!(stats.total_batches, 1);
        assert_eq!(stats.average_batch_size, 3.0);
    }

    #[tokio::test]
    async fn stale_timer_does_not_cut_next_batch_short() {
        let rec = Arc::new(Recorder::default());
        let p = processor(
            BatchConfig::new()
                .with_max_batch_size(2)
                .with_max_batch_delay(Duration::from_millis(80)),
            &rec,
        );
        p.add(1).await.unwrap();
        p.add(2).await.unwrap(); // size flush; first timer is now stale
        tokio::time::sleep(Duration::from_millis(40)).await;
        p.add(3).await.unwrap(); // opens a new batch with its own timer
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Old timer has fired by now but must not have taken [3].
        assert_eq!(rec.batches.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(*rec.batches.lock().unwrap(), vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test]
    async fn disabled_batching_uses_singletons() {
        let rec = Arc::new(Recorder::default());
        let p = processor(BatchConfig::new().with_enabled(false), &rec);
        p.add(7).await.unwrap();
        p.add(8).await.unwrap();
        assert_eq!(*rec.batches.lock().unwrap(), vec![vec![7], vec![8]]);
    }

    #[tokio::test]
    async fn flush_propagates_handler_failure() {
        let rec = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let p = processor(
            BatchConfig::new().with_max_batch_delay(Duration::from_secs(60)),
            &rec,
        );
        p.add(1).await.unwrap();
        assert!(p.flush().await.is_err());
        // The failed batch is gone; a second flush has nothing to send.
        assert!(p.flush().await.is_ok());
        assert_eq!(rec.batches.lock().unwrap().len(), 1);
        assert_eq!(p.statistics().failed_batches, 1);
    }
}
