//! Bounded record of processed request ids.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_MAX_TRACKED_IDS: usize = 1000;

struct TrackerState {
    // Lookups use `contains`, which does not promote, so eviction is FIFO.
    ids: LruCache<String, ()>,
    last_processed_id: Option<String>,
}

/// Remembers the most recent `max_tracked_ids` request ids so a request
/// delivered more than once (across poll cycles or a transport switch) is
/// only accepted the first time.
pub struct RequestTracker {
    state: Mutex<TrackerState>,
    max_tracked_ids: usize,
}

impl RequestTracker {
    pub fn new(max_tracked_ids: usize) -> Self {
        let cap = NonZeroUsize::new(max_tracked_ids.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(TrackerState {
                ids: LruCache::new(cap),
                last_processed_id: None,
            }),
            max_tracked_ids: cap.get(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `id`; returns `false` if it was already seen.
    pub fn record(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.ids.contains(id) {
            return false;
        }
        state.ids.put(id.to_string(), ());
        state.last_processed_id = Some(id.to_string());
        true
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.lock().ids.contains(id)
    }

    pub fn last_processed_id(&self) -> Option<String> {
        self.lock().last_processed_id.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_tracked_ids(&self) -> usize {
        self.max_tracked_ids
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.ids.clear();
        state.last_processed_id = None;
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_IDS)
    }
}
