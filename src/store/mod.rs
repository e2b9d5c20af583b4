//! Shared key-value store contract.
//!
//! Every worker process coordinates exclusively through these primitives;
//! `set_if_absent` is the only mutual-exclusion mechanism in the crate.
//! Decision points that matter for correctness ("has this been processed?")
//! must go through it — never through a read followed by a blind write.

pub mod memory;
pub mod redis;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Atomic key-value primitives backing the guards and the response cache.
///
/// Implementations must be safe for concurrent callers across processes —
/// each operation maps to a single atomic store command.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `SET key value NX EX ttl` — create the key only if it does not
    /// exist. Returns whether this caller created it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn del(&self, keys: &[String]) -> Result<(), StoreError>;

    /// `RPUSH` — append to a list, returning the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// `LRANGE` with Redis index semantics (`-1` = last element).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// Returns whether the key existed and the TTL was applied.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime. `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Keys matching a glob pattern (`*` wildcard). Backs cache
    /// invalidation; not suitable for hot paths.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}
