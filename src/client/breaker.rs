//! Circuit breaker for the recommendation backend.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: testing whether the backend recovered
//!
//! # State transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: after recovery timeout, one probe allowed
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! State is process-local: a fleet of workers discovers backend failure and
//! recovery independently, each bounding its own load on the dependency to
//! one probe per recovery window.

use crate::error::ClientError;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive counting failures before the breaker opens.
    pub failure_threshold: u32,
    /// Cooldown before a single probe is allowed through.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("poisoned breaker state").state
    }

    /// Run one attempt through the breaker.
    ///
    /// While open and inside the cooldown this returns `CircuitOpen`
    /// without invoking `call`. The first caller past the cooldown takes
    /// the half-open probe; concurrent callers keep failing fast until the
    /// probe settles. Errors that don't count as failures (application
    /// 4xx) prove the backend reachable and settle the probe as a success.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.preflight()?;
        match call().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_failure() {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(err)
            }
        }
    }

    fn preflight(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().expect("poisoned breaker state");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                // A probe is already in flight.
                Err(ClientError::CircuitOpen {
                    retry_after: self.config.recovery_timeout,
                })
            }
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(Duration::MAX, |t| t.elapsed());
                if elapsed >= self.config.recovery_timeout {
                    tracing::info!("circuit half-open, probing backend");
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(ClientError::CircuitOpen {
                        retry_after: self.config.recovery_timeout - elapsed,
                    })
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("poisoned breaker state");
        if inner.state == BreakerState::HalfOpen {
            tracing::info!("backend recovered, circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("poisoned breaker state");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.state == BreakerState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            if inner.state != BreakerState::Open {
                tracing::warn!(
                    failures = inner.failure_count,
                    "circuit opened, failing fast for {:?}",
                    self.config.recovery_timeout
                );
            }
            inner.state = BreakerState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::advance;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
        })
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), ClientError> {
        b.execute(|| async { Err::<(), _>(ClientError::Timeout) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), ClientError> {
        b.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let b = breaker(3, 30);
        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(ClientError::Timeout)));
            assert_eq!(b.state(), BreakerState::Closed);
        }
        assert!(matches!(fail(&b).await, Err(ClientError::Timeout)));
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_without_invoking() {
        let b = breaker(1, 30);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let result = b
            .execute(|| async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ClientError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_probe_closes_after_recovery() {
        let b = breaker(1, 30);
        fail(&b).await.unwrap_err();
        advance(Duration::from_secs(31)).await;
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
        // Failure count reset: one new failure does not reopen a threshold-2 breaker.
        let b2 = breaker(2, 30);
        fail(&b2).await.unwrap_err();
        succeed(&b2).await.unwrap();
        fail(&b2).await.unwrap_err();
        assert_eq!(b2.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let b = breaker(1, 30);
        fail(&b).await.unwrap_err();
        advance(Duration::from_secs(31)).await;
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);
        // The fresh cooldown starts at the probe failure.
        advance(Duration::from_secs(15)).await;
        assert!(matches!(succeed(&b).await, Err(ClientError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_probe_per_recovery_window() {
        let b = Arc::new(breaker(1, 30));
        fail(b.as_ref()).await.unwrap_err();
        advance(Duration::from_secs(31)).await;

        // First caller takes the probe; while it is pending a second caller
        // must fail fast.
        let probe_breaker = Arc::clone(&b);
        let probe = tokio::spawn(async move {
            probe_breaker
                .execute(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(matches!(
            succeed(b.as_ref()).await,
            Err(ClientError::CircuitOpen { .. })
        ));

        advance(Duration::from_secs(2)).await;
        probe.await.unwrap().unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn application_errors_do_not_trip_the_breaker() {
        let b = breaker(1, 30);
        let result = b
            .execute(|| async {
                Err::<(), _>(ClientError::Application {
                    status: 404,
                    body: "no such car".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(ClientError::Application { .. })));
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
