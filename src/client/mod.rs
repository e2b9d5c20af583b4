//! Resilient client for the recommendation backend.
//!
//! Composes, in a fixed order: read-through cache, circuit breaker, and a
//! bounded retry loop with exponential backoff and jitter. On total failure
//! a still-cached response is served as a degraded-mode fallback rather
//! than surfacing an error to the conversation.

pub mod breaker;

use crate::error::ClientError;
use crate::store::KvStore;
use breaker::{BreakerConfig, CircuitBreaker};
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub http_timeout: Duration,
    /// Total attempts per call, including the first.
    pub retry_attempts: u32,
    pub retry_base_backoff: Duration,
    /// Wall-clock budget for one `request` call, sleeps included.
    pub call_budget: Duration,
    pub cache_ttl: Duration,
    pub breaker: BreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            http_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_base_backoff: Duration::from_millis(500),
            call_budget: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Fresh from the backend.
    Fresh,
    /// Cache hit, backend not contacted.
    Cache,
    /// Backend unavailable; a previously cached response served instead.
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub value: Value,
    pub provenance: Provenance,
}

impl BackendResponse {
    pub fn is_stale(&self) -> bool {
        self.provenance == Provenance::StaleCache
    }
}

/// `cache:{path}:{sha256_hex of canonical payload}`
///
/// The payload serializes with sorted object keys, so logically equal
/// requests share an entry regardless of field order at the call site.
fn cache_key(path: &str, payload: Option<&Value>) -> String {
    let canonical = payload.map_or_else(String::new, ToString::to_string);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("cache:{path}:{}", hex::encode(hasher.finalize()))
}

pub struct ResilientClient {
    config: ClientConfig,
    http: reqwest::Client,
    breaker: CircuitBreaker,
    store: Arc<dyn KvStore>,
}

impl ResilientClient {
    pub fn new(config: ClientConfig, store: Arc<dyn KvStore>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let breaker = CircuitBreaker::new(config.breaker.clone());
        Ok(Self {
            config: ClientConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            http,
            breaker,
            store,
        })
    }

    // ── Typed surface over the recommendation backend ───────────────────

    /// `POST /recommend` — recommendations for a user profile. Cached.
    pub async fn recommend(&self, profile: &Value) -> Result<BackendResponse, ClientError> {
        self.request(Method::POST, "/recommend", Some(profile), true)
            .await
    }

    /// `GET /cars/{id}` — car detail. Cached; a 404 surfaces as an
    /// application error.
    pub async fn car_detail(&self, car_id: &str) -> Result<BackendResponse, ClientError> {
        self.request(Method::GET, &format!("/cars/{car_id}"), None, true)
            .await
    }

    /// `POST /feedback` — mutating; recommendation cache entries are
    /// invalidated before returning so later reads never serve stale state.
    pub async fn submit_feedback(&self, feedback: &Value) -> Result<BackendResponse, ClientError> {
        let response = self
            .request(Method::POST, "/feedback", Some(feedback), false)
            .await?;
        let dropped = self.invalidate("cache:/recommend*").await?;
        tracing::debug!(dropped, "feedback accepted, recommendation cache invalidated");
        Ok(response)
    }

    /// `POST /refine-recommendations` — conversational refinement, never
    /// cached (each call depends on session state the key can't capture).
    pub async fn refine(&self, payload: &Value) -> Result<BackendResponse, ClientError> {
        self.request(Method::POST, "/refine-recommendations", Some(payload), false)
            .await
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<Value, ClientError> {
        let response = self.request(Method::GET, "/health", None, false).await?;
        Ok(response.value)
    }

    // ── Core call path ──────────────────────────────────────────────────

    /// Perform one backend call with cache read-through, circuit breaking,
    /// bounded retries, and stale-cache fallback, in that order.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        use_cache: bool,
    ) -> Result<BackendResponse, ClientError> {
        let key = cache_key(path, payload);
        if use_cache && let Some(hit) = self.cache_read(&key).await {
            tracing::debug!(path, "cache hit");
            return Ok(BackendResponse {
                value: hit,
                provenance: Provenance::Cache,
            });
        }

        let deadline = Instant::now() + self.config.call_budget;
        let mut backoff = self.config.retry_base_backoff;
        let attempts = self.config.retry_attempts.max(1);
        let mut last_err = ClientError::RetriesExhausted {
            attempts: 0,
            last: "no attempt made".to_string(),
        };

        for attempt in 1..=attempts {
            if Instant::now() >= deadline {
                last_err = ClientError::DeadlineExceeded {
                    budget: self.config.call_budget,
                };
                break;
            }

            match self
                .breaker
                .execute(|| self.send_once(method.clone(), path, payload))
                .await
            {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(path, attempt, "backend recovered after retries");
                    }
                    if use_cache {
                        self.cache_write(&key, &value).await;
                    }
                    return Ok(BackendResponse {
                        value,
                        provenance: Provenance::Fresh,
                    });
                }
                Err(err @ ClientError::Application { .. }) => {
                    // The backend answered; retrying will not change it and
                    // a cached copy would be the wrong answer.
                    return Err(err);
                }
                Err(err @ ClientError::CircuitOpen { .. }) => {
                    last_err = err;
                    break;
                }
                Err(err) if !err.is_transient() => {
                    last_err = err;
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        path,
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        "backend call failed"
                    );
                    last_err = err;
                    if attempt < attempts {
                        let sleep = jittered(backoff);
                        if Instant::now() + sleep >= deadline {
                            last_err = ClientError::DeadlineExceeded {
                                budget: self.config.call_budget,
                            };
                            break;
                        }
                        tokio::time::sleep(sleep).await;
                        backoff = backoff.saturating_mul(2).min(Duration::from_secs(10));
                    }
                }
            }
        }

        if use_cache && let Some(hit) = self.cache_read(&key).await {
            tracing::warn!(path, error = %last_err, "backend unavailable, serving cached response");
            return Ok(BackendResponse {
                value: hit,
                provenance: Provenance::StaleCache,
            });
        }

        match last_err {
            err @ (ClientError::CircuitOpen { .. }
            | ClientError::DeadlineExceeded { .. }
            | ClientError::Decode(_)) => Err(err),
            err => Err(ClientError::RetriesExhausted {
                attempts,
                last: err.to_string(),
            }),
        }
    }

    /// Remove all cache entries matching a glob pattern, returning how many
    /// were dropped.
    pub async fn invalidate(&self, pattern: &str) -> Result<usize, ClientError> {
        let keys = self.store.keys(pattern).await.map_err(ClientError::Cache)?;
        if !keys.is_empty() {
            self.store.del(&keys).await.map_err(ClientError::Cache)?;
        }
        Ok(keys.len())
    }

    pub fn breaker_state(&self) -> breaker::BreakerState {
        self.breaker.state()
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{path}", self.config.base_url);
        let mut request = self.http.request(method, &url);
        if let Some(body) = payload {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Connect(e.to_string())
            }
        })?;

        let status = response.status();
        let code = status.as_u16();
        // 408/429 are transient despite being 4xx; other 4xx are final.
        if status.is_client_error() && code != 408 && code != 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Application { status: code, body });
        }
        if !status.is_success() {
            return Err(ClientError::Status { status: code });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn cache_read(&self, key: &str) -> Option<Value> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key, error = %e, "dropping undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // The cache is an optimization; a broken store must not
                // fail an otherwise healthy call.
                tracing::warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn cache_write(&self, key: &str, value: &Value) {
        // Refresh = delete + set-if-absent: the store exposes no blind
        // overwrite. Losing the race just means a concurrent worker cached
        // an equally fresh response.
        let raw = value.to_string();
        let result = async {
            self.store.del(&[key.to_string()]).await?;
            self.store
                .set_if_absent(key, &raw, self.config.cache_ttl)
                .await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }
}

fn jittered(backoff: Duration) -> Duration {
    use rand::Rng;
    let quarter = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX) / 4;
    let jitter = if quarter == 0 {
        0
    } else {
        rand::rng().random_range(0..=quarter)
    };
    backoff + Duration::from_millis(jitter)
}
