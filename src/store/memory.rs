//! In-memory store used by tests and single-process runs.
//!
//! TTLs are tracked against `tokio::time::Instant`, so paused-clock tests
//! can drive expiry deterministically. Expired entries are purged lazily on
//! access, mirroring how the external store behaves from a client's point
//! of view.

use super::KvStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Slot>>,
}

struct Slot {
    data: Data,
    deadline: Option<Instant>,
}

enum Data {
    Text(String),
    List(Vec<String>),
}

impl Slot {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, Slot>) -> T) -> T {
        let mut map = self.inner.lock().expect("poisoned memory store");
        map.retain(|_, slot| !slot.expired());
        f(&mut map)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(self.with_map(|map| {
            if map.contains_key(key) {
                return false;
            }
            map.insert(
                key.to_string(),
                Slot {
                    data: Data::Text(value.to_string()),
                    deadline: Some(Instant::now() + ttl),
                },
            );
            true
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_map(|map| map.contains_key(key)))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_map(|map| match map.get(key) {
            None => Ok(None),
            Some(Slot {
                data: Data::Text(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::Command(format!(
                "WRONGTYPE: {key} holds a list"
            ))),
        })
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        self.with_map(|map| {
            for key in keys {
                map.remove(key);
            }
        });
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.with_map(|map| {
            let slot = map.entry(key.to_string()).or_insert_with(|| Slot {
                data: Data::List(Vec::new()),
                deadline: None,
            });
            match &mut slot.data {
                Data::List(items) => {
                    items.push(value.to_string());
                    Ok(items.len())
                }
                Data::Text(_) => Err(StoreError::Command(format!(
                    "WRONGTYPE: {key} holds a string"
                ))),
            }
        })
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.with_map(|map| match map.get(key) {
            None => Ok(Vec::new()),
            Some(Slot {
                data: Data::List(items),
                ..
            }) => {
                if items.is_empty() {
                    return Ok(Vec::new());
                }
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let norm = |idx: i64| -> i64 {
                    if idx < 0 { (len + idx).max(0) } else { idx.min(len) }
                };
                let from = usize::try_from(norm(start)).unwrap_or(0);
                let to = usize::try_from(norm(stop)).unwrap_or(0);
                if from > to || from >= items.len() {
                    return Ok(Vec::new());
                }
                Ok(items[from..=to.min(items.len() - 1)].to_vec())
            }
            Some(_) => Err(StoreError::Command(format!(
                "WRONGTYPE: {key} holds a string"
            ))),
        })
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.with_map(|map| match map.get(key) {
            None => Ok(0),
            Some(Slot {
                data: Data::List(items),
                ..
            }) => Ok(items.len()),
            Some(_) => Err(StoreError::Command(format!(
                "WRONGTYPE: {key} holds a string"
            ))),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.with_map(|map| match map.get_mut(key) {
            None => false,
            Some(slot) => {
                slot.deadline = Some(Instant::now() + ttl);
                true
            }
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self.with_map(|map| {
            map.get(key)
                .and_then(|slot| slot.deadline)
                .map(|d| d.saturating_duration_since(Instant::now()))
        }))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.with_map(|map| {
            map.keys()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect()
        }))
    }
}

/// Minimal glob matcher: only `*` (any run of characters) is supported,
/// which is the subset the cache invalidation patterns use.
fn glob_match(pattern: &str, input: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return input.is_empty();
    };
    if !input.starts_with(first) {
        return false;
    }
    let mut rest = &input[first.len()..];
    let mut last_len = 0;
    let mut had_wildcard = false;
    for part in parts {
        had_wildcard = true;
        if part.is_empty() {
            last_len = 0;
            continue;
        }
        match rest.find(part) {
            Some(idx) => {
                rest = &rest[idx + part.len()..];
                last_len = part.len();
            }
            None => return false,
        }
    }
    if !had_wildcard {
        return rest.is_empty();
    }
    // A trailing literal must sit at the very end of the input.
    if !pattern.ends_with('*') && last_len > 0 {
        return pattern
            .rsplit('*')
            .next()
            .is_some_and(|tail| input.ends_with(tail));
    }
    true
}
