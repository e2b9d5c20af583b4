//! Exactly-once marking with result replay.
//!
//! A unit of work is "done" once its key exists in the shared store. The
//! atomic `set_if_absent` guarantees that for any fixed key, at most one
//! caller across all processes ever observes `mark_processed` returning
//! `true`; everyone else replays the recorded result instead of repeating
//! side effects.

use crate::error::StoreError;
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;

/// Marker stored when a unit of work completes without a result payload.
const PROCESSED_SENTINEL: &str = "processed";

/// `idempotency:{task}:{session}:{turn}`
pub fn task_key(task: &str, session_id: &str, turn_id: &str) -> String {
    format!("idempotency:{task}:{session_id}:{turn_id}")
}

/// `idempotency:message:{message_id}`
pub fn message_key(message_id: &str) -> String {
    format!("idempotency:message:{message_id}")
}

pub struct IdempotencyGuard {
    store: Arc<dyn KvStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Existence check, no side effects.
    pub async fn is_processed(&self, key: &str) -> Result<bool, StoreError> {
        self.store.exists(key).await
    }

    /// Atomically claim the key. `false` means another caller already
    /// marked it — the unit of work is handled, not an error.
    ///
    /// Once set, the key is immutable until its TTL expires.
    pub async fn mark_processed(
        &self,
        key: &str,
        result: Option<&serde_json::Value>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let value = match result {
            Some(v) => serde_json::to_string(v)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => PROCESSED_SENTINEL.to_string(),
        };
        self.store.set_if_absent(key, &value, ttl).await
    }

    /// Recorded result for replay to a re-submitted delivery. `None` when
    /// the key is absent or was marked without a payload.
    pub async fn recorded_result(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(raw) if raw == PROCESSED_SENTINEL => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
        }
    }
}
