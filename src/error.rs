use std::time::Duration;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Motora.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` at collaborator boundaries.
#[derive(Debug, Error)]
pub enum MotoraError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Shared store ────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Recommendation backend client ───────────────────────────────────
    #[error("client: {0}")]
    Client(#[from] ClientError),

    // ── Message pipeline ────────────────────────────────────────────────
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Store errors ────────────────────────────────────────────────────────────

/// Failures talking to the shared key-value store.
///
/// Guards treat every variant as fatal for the current unit of work: a
/// message that cannot be checked for duplicates is parked (the error
/// propagates and the task queue retries), never processed blind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("serialization: {0}")]
    Serialization(String),
}

// ─── Backend client errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("backend returned {status}")]
    Status { status: u16 },

    #[error("application error {status}: {body}")]
    Application { status: u16, body: String },

    #[error("circuit open; retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("call budget of {budget:?} exceeded")]
    DeadlineExceeded { budget: Duration },

    #[error("cache: {0}")]
    Cache(#[from] StoreError),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transient failures are retried and count toward the circuit breaker.
    /// 4xx responses (minus 408/429, which surface as `Status`) are final:
    /// the backend answered, retrying will not change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connect(_) | Self::Status { .. }
        )
    }

    /// Whether this failure counts toward the breaker's failure threshold.
    pub fn counts_as_failure(&self) -> bool {
        self.is_transient()
    }
}

// ─── Pipeline errors ────────────────────────────────────────────────────────

/// All pipeline errors are retryable from the task queue's point of view:
/// the delivery is re-attempted under the queue's own backoff policy.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("engine failed: {0}")]
    Engine(String),

    #[error("reply transport failed: {0}")]
    Transport(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MotoraError>;
