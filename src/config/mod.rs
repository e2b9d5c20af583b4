//! Runtime configuration.
//!
//! Loaded from a TOML file with every field defaulted, so an empty file
//! (or none at all) yields a working local setup. The store URL can be
//! overridden from the environment for deployments.

use crate::client::ClientConfig;
use crate::client::breaker::BreakerConfig;
use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::pipeline::queue::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `[store] url`.
pub const STORE_URL_ENV: &str = "MOTORA_STORE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Replay protection for message-level deliveries.
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,
    /// Generic task/turn-level protection.
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Window per event type, seconds. Bounded to 2–86400.
    #[serde(default = "default_windows")]
    pub windows_secs: HashMap<String, u64>,
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
    #[serde(default = "default_accumulator_ttl_secs")]
    pub accumulator_ttl_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Seconds a job hash blocks identical jobs. Bounded to 60–3600.
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_call_budget_secs")]
    pub call_budget_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_retries")]
    pub max_retries: u32,
    #[serde(default = "default_queue_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_queue_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_message_ttl_secs() -> u64 {
    86_400
}

fn default_task_ttl_secs() -> u64 {
    3_600
}

fn default_windows() -> HashMap<String, u64> {
    HashMap::from([("message".to_string(), 2)])
}

fn default_window_secs() -> u64 {
    2
}

fn default_accumulator_ttl_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    3
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_call_budget_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_queue_retries() -> u32 {
    5
}

fn default_queue_base_delay_secs() -> u64 {
    2
}

fn default_queue_max_delay_secs() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            message_ttl_secs: default_message_ttl_secs(),
            task_ttl_secs: default_task_ttl_secs(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            windows_secs: default_windows(),
            default_window_secs: default_window_secs(),
            accumulator_ttl_secs: default_accumulator_ttl_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            http_timeout_secs: default_http_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            call_budget_secs: default_call_budget_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_queue_retries(),
            base_delay_secs: default_queue_base_delay_secs(),
            max_delay_secs: default_queue_max_delay_secs(),
        }
    }
}

const DEBOUNCE_WINDOW_BOUNDS: (u64, u64) = (2, 86_400);
const DEDUP_WINDOW_BOUNDS: (u64, u64) = (60, 3_600);

impl Config {
    /// Load from a TOML file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides; no file involved.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(STORE_URL_ENV)
            && !url.is_empty()
        {
            self.store.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = DEBOUNCE_WINDOW_BOUNDS;
        for (kind, secs) in &self.debounce.windows_secs {
            if !(lo..=hi).contains(secs) {
                return Err(ConfigError::Validation(format!(
                    "debounce window for {kind} must be {lo}-{hi}s, got {secs}"
                )));
            }
        }
        if !(lo..=hi).contains(&self.debounce.default_window_secs) {
            return Err(ConfigError::Validation(format!(
                "default debounce window must be {lo}-{hi}s"
            )));
        }
        let (lo, hi) = DEDUP_WINDOW_BOUNDS;
        if !(lo..=hi).contains(&self.dedup.window_secs) {
            return Err(ConfigError::Validation(format!(
                "dedup window must be {lo}-{hi}s, got {}",
                self.dedup.window_secs
            )));
        }
        if self.debounce.batch_size == 0 {
            return Err(ConfigError::Validation(
                "debounce batch_size must be at least 1".to_string(),
            ));
        }
        if self.backend.retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "backend retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    // ── Runtime views ───────────────────────────────────────────────────

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.backend.base_url.clone(),
            http_timeout: Duration::from_secs(self.backend.http_timeout_secs),
            retry_attempts: self.backend.retry_attempts,
            retry_base_backoff: Duration::from_millis(self.backend.retry_backoff_ms),
            call_budget: Duration::from_secs(self.backend.call_budget_secs),
            cache_ttl: Duration::from_secs(self.backend.cache_ttl_secs),
            breaker: BreakerConfig {
                failure_threshold: self.backend.failure_threshold,
                recovery_timeout: Duration::from_secs(self.backend.recovery_timeout_secs),
            },
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            message_idempotency_ttl: Duration::from_secs(self.idempotency.message_ttl_secs),
            windows: self
                .debounce
                .windows_secs
                .iter()
                .map(|(k, v)| (k.clone(), Duration::from_secs(*v)))
                .collect(),
            default_window: Duration::from_secs(self.debounce.default_window_secs),
            accumulator_ttl: Duration::from_secs(self.debounce.accumulator_ttl_secs),
            batch_size: self.debounce.batch_size,
            dedup_window: Duration::from_secs(self.dedup.window_secs),
            fallback_reply: PipelineConfig::default().fallback_reply,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.queue.max_retries,
            base_delay: Duration::from_secs(self.queue.base_delay_secs),
            max_delay: Duration::from_secs(self.queue.max_delay_secs),
        }
    }
}
