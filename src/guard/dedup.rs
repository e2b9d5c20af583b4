//! Content-hash job deduplication.
//!
//! Keyed by what the job *is*, not by any externally supplied identifier:
//! equal logical jobs always hash equal, however the arguments were spelled
//! at the call site.

use crate::error::StoreError;
use crate::store::KvStore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// `job_hash:{sha256_hex}`
pub fn job_key(hash: &str) -> String {
    format!("job_hash:{hash}")
}

/// Canonical content hash of `(task_name, args, kwargs)`.
///
/// Keyword arguments are sorted before hashing (`BTreeMap` ordering), so
/// argument order never changes the digest; any value difference does.
pub fn job_hash(task: &str, args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
    let canonical = serde_json::json!([task, args, kwargs]);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct DedupGuard {
    store: Arc<dyn KvStore>,
}

impl DedupGuard {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Existence check, no side effects.
    pub async fn is_duplicate(&self, hash: &str) -> Result<bool, StoreError> {
        self.store.exists(&job_key(hash)).await
    }

    /// Atomically record the hash for `window`. `false` means another
    /// caller marked the same hash first — treat exactly like
    /// `is_duplicate` returning `true`.
    pub async fn mark_seen(&self, hash: &str, window: Duration) -> Result<bool, StoreError> {
        self.store.set_if_absent(&job_key(hash), "1", window).await
    }

    /// Release a hash marked by this caller whose job then failed, so the
    /// queue's retry is not mistaken for a duplicate request.
    pub async fn unmark(&self, hash: &str) -> Result<(), StoreError> {
        self.store.del(&[job_key(hash)]).await
    }
}
