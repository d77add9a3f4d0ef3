//! Batch collector.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub max_batch_delay: Duration,
    /// When disabled every item forms its own batch.
    pub enabled: bool,
}
impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_delay: Duration::from_millis(100),
            enabled: true,
        }
    }
}
impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_batch_size(mut self, s: usize) -> Self {
        self.max_batch_size = s.max(1);
        self
    }
    pub fn with_max_batch_delay(mut self, d: Duration) -> Self {
        self.max_batch_delay = d;
        self
    }
    pub fn with_enabled(mut self, e: bool) -> Self {
        self.enabled = e;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    pub data: T,
    pub added_at: Instant,
}
impl<T> BatchItem<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            added_at: Instant::now(),
        }
    }
}

struct CollectorState<T> {
    items: VecDeque<BatchItem<T>>,
    batch_start: Option<Instant>,
    /// Bumped every time the open batch is taken, so stale timers can tell.
    generation: u64,
}

/// Accumulates items for the open batch.
///
/// All mutations happen under one lock, so a batch is taken at most once no
/// matter how size-triggered and timer-triggered flushes interleave.
pub struct BatchCollector<T> {
    config: RwLock<BatchConfig>,
    state: Mutex<CollectorState<T>>,
}

impl<T> BatchCollector<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(CollectorState {
                items: VecDeque::new(),
                batch_start: None,
                generation: 0,
            }),
        }
    }

    pub fn config(&self) -> BatchConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_config(&self, config: BatchConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CollectorState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, item: BatchItem<T>) -> BatchAddResult {
        let max = self.config().max_batch_size;
        let mut st = self.lock();
        let opened = st.items.is_empty();
        if opened {
            st.batch_start = Some(Instant::now());
        }
        st.items.push_back(item);
        let count = st.items.len();
        if count >= max {
            BatchAddResult::ShouldFlush { count }
        } else if opened {
            BatchAddResult::Opened {
                generation: st.generation,
            }
        } else {
            BatchAddResult::Added { count }
        }
    }

    pub fn add_data(&self, data: T) -> BatchAddResult {
        self.add(BatchItem::new(data))
    }

    pub fn should_flush(&self) -> bool {
        let cfg = self.config();
        let st = self.lock();
        if st.items.is_empty() {
            return false;
        }
        if st.items.len() >= cfg.max_batch_size {
            return true;
        }
        st.batch_start
            .map_or(false, |s| s.elapsed() >= cfg.max_batch_delay)
    }

    /// Take the open batch (possibly empty) and start a new one.
    pub fn drain(&self) -> Vec<BatchItem<T>> {
        let mut st = self.lock();
        Self::take(&mut st)
    }

    /// Take the open batch only if it is still the one opened at `generation`.
    pub fn drain_generation(&self, generation: u64) -> Option<Vec<BatchItem<T>>> {
        let mut st = self.lock();
        if st.generation != generation || st.items.is_empty() {
            return None;
        }
        Some(Self::take(&mut st))
    }

    fn take(st: &mut CollectorState<T>) -> Vec<BatchItem<T>> {
        st.batch_start = None;
        st.generation = st.generation.wrapping_add(1);
        st.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAddResult {
    /// First item of a new batch; the delay timer should start.
    Opened { generation: u64 },
    Added { count: usize },
    /// The batch reached its size bound.
    ShouldFlush { count: usize },
}
impl BatchAddResult {
    pub fn should_flush(&self) -> bool {
        matches!(self, BatchAddResult::ShouldFlush { .. })
    }
}
