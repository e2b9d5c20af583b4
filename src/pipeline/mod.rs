//! Inbound message processing pipeline.
//!
//! Orders the guards around the external collaborators: delivery-level
//! idempotency first (replay the recorded result for a redelivered
//! message), then the debounce gate with burst consolidation, then
//! content-level deduplication, and only then the conversation engine.
//! The reply is claimed through `mark_processed` before it is sent, so a
//! doubly delivered message produces at most one outbound reply across the
//! whole worker fleet.

pub mod queue;

use crate::error::{PipelineError, StoreError};
use crate::guard::{debounce, dedup, idempotency};
use crate::guard::{DebounceCoordinator, DedupGuard, IdempotencyGuard};
use crate::store::KvStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One unit delivered by the external task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub from: String,
    /// Event type, e.g. `"message"`. Selects the debounce window.
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl InboundMessage {
    /// Message from a transport that supplies no delivery id of its own;
    /// one is minted so idempotency still has a delivery identity. Such a
    /// message can never be *re*-delivered under the same id, so only the
    /// debounce and dedup guards protect it.
    pub fn synthetic(from: &str, kind: &str, content: &str, timestamp: u64) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            kind: kind.to_string(),
            content: content.to_string(),
            timestamp,
            media_id: None,
            media_url: None,
        }
    }
}

/// Produces a reply for a message the resilience layer has cleared.
/// External collaborator; everything conversational lives behind it.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    async fn respond(&self, message: &InboundMessage) -> anyhow::Result<String>;
}

/// Delivers a reply back to the user (WhatsApp, web socket, ...).
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()>;
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reply produced and sent by this worker. `consolidated` is the
    /// number of burst messages merged into the processed unit (1 = none).
    Replied { reply: String, consolidated: usize },
    /// Delivery id already handled; the recorded result replayed.
    Replayed { reply: Option<String> },
    /// Burst member parked in the accumulator; a later delivery in the
    /// burst will consolidate, or the window expires and the entries are
    /// abandoned.
    Deferred { pending: usize },
    /// Content-identical job already requested inside the dedup window.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub message_idempotency_ttl: Duration,
    /// Debounce window per event type; `default_window` covers the rest.
    pub windows: HashMap<String, Duration>,
    pub default_window: Duration,
    /// Cap on consolidation latency, anchored to the first parked payload.
    pub accumulator_ttl: Duration,
    /// Drain threshold for burst consolidation.
    pub batch_size: usize,
    pub dedup_window: Duration,
    /// Sent when the engine or transport fails; the queue then retries.
    pub fallback_reply: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            message_idempotency_ttl: Duration::from_secs(86_400),
            windows: HashMap::from([("message".to_string(), Duration::from_secs(2))]),
            default_window: Duration::from_secs(2),
            accumulator_ttl: Duration::from_secs(30),
            batch_size: 3,
            dedup_window: Duration::from_secs(300),
            fallback_reply: "Sorry, something went wrong on our side. Please try again in a moment.".to_string(),
        }
    }
}

impl PipelineConfig {
    fn window_for(&self, kind: &str) -> Duration {
        self.windows.get(kind).copied().unwrap_or(self.default_window)
    }
}

pub struct MessagePipeline {
    idempotency: IdempotencyGuard,
    debounce: DebounceCoordinator,
    dedup: DedupGuard,
    engine: Arc<dyn ConversationEngine>,
    transport: Arc<dyn ReplyTransport>,
    config: PipelineConfig,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn KvStore>,
        engine: Arc<dyn ConversationEngine>,
        transport: Arc<dyn ReplyTransport>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            idempotency: IdempotencyGuard::new(Arc::clone(&store)),
            debounce: DebounceCoordinator::new(Arc::clone(&store)),
            dedup: DedupGuard::new(store),
            engine,
            transport,
            config,
        }
    }

    /// Process one queue delivery.
    ///
    /// Store failures propagate: a delivery that cannot be checked for
    /// duplicates is parked for the queue's retry, never processed blind.
    pub async fn handle_delivery(&self, msg: &InboundMessage) -> Result<Outcome, PipelineError> {
        let idem_key = idempotency::message_key(&msg.message_id);
        if self.idempotency.is_processed(&idem_key).await? {
            let recorded = self.idempotency.recorded_result(&idem_key).await?;
            tracing::debug!(message_id = %msg.message_id, "redelivery, replaying recorded result");
            return Ok(Outcome::Replayed {
                reply: reply_of(recorded.as_ref()),
            });
        }

        let window = self.config.window_for(&msg.kind);
        let gate = debounce::debounce_key(&msg.kind, &msg.from);
        let (content, consolidated) = if self.debounce.should_process(&gate, window).await? {
            (msg.content.clone(), 1)
        } else {
            let acc = debounce::accumulator_key(&msg.kind, &msg.from);
            let pending = self
                .debounce
                .accumulate(&acc, &msg.content, self.config.accumulator_ttl)
                .await?;
            if pending < self.config.batch_size {
                tracing::debug!(
                    message_id = %msg.message_id,
                    pending,
                    batch = self.config.batch_size,
                    "burst member parked"
                );
                // The delivery itself is handled: a queue redelivery must
                // not park the same payload twice.
                self.idempotency
                    .mark_processed(&idem_key, None, self.config.message_idempotency_ttl)
                    .await?;
                return Ok(Outcome::Deferred { pending });
            }
            let parts = self.debounce.drain(&acc, true).await?;
            let merged = parts.len();
            tracing::info!(
                user = %msg.from,
                merged,
                "burst threshold reached, consolidating"
            );
            (parts.join(" "), merged)
        };

        // Content-level dedup, independent of delivery identity.
        let hash = dedup::job_hash(
            "process_message",
            &[],
            &[
                ("from".to_string(), json!(msg.from)),
                ("content".to_string(), json!(content)),
            ]
            .into_iter()
            .collect(),
        );
        if !self.dedup.mark_seen(&hash, self.config.dedup_window).await? {
            tracing::info!(user = %msg.from, "duplicate job suppressed");
            self.idempotency
                .mark_processed(&idem_key, None, self.config.message_idempotency_ttl)
                .await?;
            return Ok(Outcome::Duplicate);
        }

        let unit = InboundMessage {
            content,
            ..msg.clone()
        };
        let reply = match self.engine.respond(&unit).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(message_id = %msg.message_id, error = %e, "engine failed, sending fallback");
                // Release the hash: the queue's retry of this job is not a
                // duplicate request.
                if let Err(del_err) = self.dedup.unmark(&hash).await {
                    tracing::warn!(error = %del_err, "failed to release job hash");
                }
                // Best effort; the real answer comes from the retry.
                if let Err(send_err) = self
                    .transport
                    .send(&msg.from, &self.config.fallback_reply)
                    .await
                {
                    tracing::warn!(error = %send_err, "fallback reply failed");
                }
                return Err(PipelineError::Engine(e.to_string()));
            }
        };

        // Claim the reply before sending it: under double delivery only
        // the winner of the claim talks to the user.
        let recorded = json!({ "reply": reply });
        if self
            .idempotency
            .mark_processed(
                &idem_key,
                Some(&recorded),
                self.config.message_idempotency_ttl,
            )
            .await?
        {
            self.transport
                .send(&msg.from, &reply)
                .await
                .map_err(|e| PipelineError::Transport(e.to_string()))?;
            Ok(Outcome::Replied {
                reply,
                consolidated,
            })
        } else {
            let recorded = self.idempotency.recorded_result(&idem_key).await?;
            tracing::debug!(message_id = %msg.message_id, "lost the claim race, replaying");
            Ok(Outcome::Replayed {
                reply: reply_of(recorded.as_ref()),
            })
        }
    }

    /// Turn-level idempotency for engine-side tasks that want their own
    /// protection (e.g. a scheduled scrape keyed by session and turn).
    pub async fn run_once<F, Fut, T>(
        &self,
        task: &str,
        session_id: &str,
        turn_id: &str,
        ttl: Duration,
        work: F,
    ) -> Result<Option<T>, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let key = idempotency::task_key(task, session_id, turn_id);
        if self.idempotency.is_processed(&key).await? {
            return Ok(None);
        }
        let value = work()
            .await
            .map_err(|e| PipelineError::Engine(e.to_string()))?;
        if self.idempotency.mark_processed(&key, None, ttl).await? {
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }
}

fn reply_of(recorded: Option<&serde_json::Value>) -> Option<String> {
    recorded
        .and_then(|v| v.get("reply"))
        .and_then(|r| r.as_str())
        .map(ToString::to_string)
}
