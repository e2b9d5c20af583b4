//! Debounce gate and payload accumulator for bursty event sources.
//!
//! `should_process` is an atomic first-one-wins gate: `true` at most once
//! per window per key. Denied events can be parked in an accumulator list
//! whose TTL is anchored to the first append, so worst-case consolidation
//! latency is bounded regardless of event rate. The coordinator never
//! blocks — batching policy belongs to the caller.

use crate::error::StoreError;
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;

/// `debounce:{event_type}:{user_id}`
pub fn debounce_key(event_type: &str, user_id: &str) -> String {
    format!("debounce:{event_type}:{user_id}")
}

/// `accumulator:{event_type}:{user_id}`
pub fn accumulator_key(event_type: &str, user_id: &str) -> String {
    format!("accumulator:{event_type}:{user_id}")
}

pub struct DebounceCoordinator {
    store: Arc<dyn KvStore>,
}

impl DebounceCoordinator {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// `true` for the first event in a fresh window, `false` for every
    /// subsequent event until the window elapses.
    pub async fn should_process(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<bool, StoreError> {
        self.store.set_if_absent(key, "1", window).await
    }

    /// Append a payload to the pending list, returning the new count.
    ///
    /// The TTL is set only when this append created the list; later appends
    /// never extend the deadline. Two near-simultaneous first appends can
    /// race the expire, so treat the count as approximate under very high
    /// contention.
    pub async fn accumulate(
        &self,
        key: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<usize, StoreError> {
        let count = self.store.rpush(key, payload).await?;
        if count == 1 {
            self.store.expire(key, ttl).await?;
        }
        Ok(count)
    }

    /// Return the accumulated payloads, clearing the list when `clear`.
    pub async fn drain(&self, key: &str, clear: bool) -> Result<Vec<String>, StoreError> {
        let items = self.store.lrange(key, 0, -1).await?;
        if clear && !items.is_empty() {
            self.store.del(&[key.to_string()]).await?;
        }
        Ok(items)
    }

    /// Pending count without draining.
    pub async fn pending(&self, key: &str) -> Result<usize, StoreError> {
        self.store.llen(key).await
    }
}
