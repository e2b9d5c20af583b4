//! End-to-end pipeline scenarios over the in-memory store: at-least-once
//! queue deliveries collapse to exactly-once processing, bursts
//! consolidate at the batch threshold, and store outages fail closed.

use async_trait::async_trait;
use motora::error::{PipelineError, StoreError};
use motora::pipeline::{
    ConversationEngine, InboundMessage, MessagePipeline, Outcome, PipelineConfig, ReplyTransport,
};
use motora::store::{KvStore, MemoryStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::advance;

struct EchoEngine {
    seen: Mutex<Vec<String>>,
}

impl EchoEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn contents(&self) -> Vec<String> {
        self.seen.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl ConversationEngine for EchoEngine {
    async fn respond(&self, message: &InboundMessage) -> anyhow::Result<String> {
        self.seen
            .lock()
            .expect("poisoned")
            .push(message.content.clone());
        Ok(format!("echo: {}", message.content))
    }
}

struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("poisoned").clone()
    }
}

#[async_trait]
impl ReplyTransport for RecordingTransport {
    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("poisoned")
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

fn message(id: &str, from: &str, content: &str) -> InboundMessage {
    InboundMessage {
        message_id: id.to_string(),
        from: from.to_string(),
        kind: "message".to_string(),
        content: content.to_string(),
        timestamp: 1_700_000_000,
        media_id: None,
        media_url: None,
    }
}

fn pipeline(
    store: Arc<dyn KvStore>,
    engine: Arc<EchoEngine>,
    transport: Arc<RecordingTransport>,
) -> MessagePipeline {
    MessagePipeline::new(store, engine, transport, PipelineConfig::default())
}

#[tokio::test(start_paused = true)]
async fn double_delivery_sends_one_reply_and_replays_the_result() {
    let engine = EchoEngine::new();
    let transport = RecordingTransport::new();
    let p = pipeline(
        Arc::new(MemoryStore::new()),
        Arc::clone(&engine),
        Arc::clone(&transport),
    );

    let msg = message("msg-1", "u1", "looking for a family car");
    let first = p.handle_delivery(&msg).await.unwrap();
    let second = p.handle_delivery(&msg).await.unwrap();

    let Outcome::Replied { reply, .. } = first else {
        panic!("first delivery should process: {first:?}");
    };
    assert_eq!(
        second,
        Outcome::Replayed {
            reply: Some(reply.clone())
        }
    );
    // Exactly one outbound reply across both deliveries.
    assert_eq!(
        transport.deliveries(),
        vec![("u1".to_string(), reply)]
    );
    assert_eq!(engine.contents().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rapid_burst_consolidates_at_the_batch_threshold() {
    let engine = EchoEngine::new();
    let transport = RecordingTransport::new();
    let p = pipeline(
        Arc::new(MemoryStore::new()),
        Arc::clone(&engine),
        Arc::clone(&transport),
    );

    // An admitted message arms the window for the burst that follows.
    let opener = p.handle_delivery(&message("m0", "sess", "hi")).await.unwrap();
    assert!(matches!(opener, Outcome::Replied { .. }));

    let burst: Vec<Outcome> = {
        let mut outcomes = Vec::new();
        for (id, content) in [("m1", "a"), ("m2", "b"), ("m3", "c")] {
            outcomes.push(p.handle_delivery(&message(id, "sess", content)).await.unwrap());
        }
        outcomes
    };

    assert_eq!(burst[0], Outcome::Deferred { pending: 1 });
    assert_eq!(burst[1], Outcome::Deferred { pending: 2 });
    assert_eq!(
        burst[2],
        Outcome::Replied {
            reply: "echo: a b c".to_string(),
            consolidated: 3
        }
    );
    // One consolidated unit, not three.
    assert_eq!(engine.contents(), vec!["hi", "a b c"]);
    assert_eq!(transport.deliveries().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn sub_threshold_burst_is_abandoned_when_the_window_expires() {
    let engine = EchoEngine::new();
    let transport = RecordingTransport::new();
    let p = pipeline(
        Arc::new(MemoryStore::new()),
        Arc::clone(&engine),
        Arc::clone(&transport),
    );

    p.handle_delivery(&message("m0", "sess", "hi")).await.unwrap();
    assert_eq!(
        p.handle_delivery(&message("m1", "sess", "x")).await.unwrap(),
        Outcome::Deferred { pending: 1 }
    );
    assert_eq!(
        p.handle_delivery(&message("m2", "sess", "y")).await.unwrap(),
        Outcome::Deferred { pending: 2 }
    );

    // Accumulator TTL (30s) passes with the burst below the threshold:
    // the parked payloads are gone for good.
    advance(Duration::from_secs(31)).await;
    let next = p.handle_delivery(&message("m3", "sess", "z")).await.unwrap();
    assert_eq!(
        next,
        Outcome::Replied {
            reply: "echo: z".to_string(),
            consolidated: 1
        }
    );
    assert_eq!(engine.contents(), vec!["hi", "z"]);
}

#[tokio::test(start_paused = true)]
async fn distinct_users_never_share_windows_or_accumulators() {
    let engine = EchoEngine::new();
    let transport = RecordingTransport::new();
    let p = pipeline(
        Arc::new(MemoryStore::new()),
        Arc::clone(&engine),
        Arc::clone(&transport),
    );

    let a = p.handle_delivery(&message("m1", "alice", "hello")).await.unwrap();
    let b = p.handle_delivery(&message("m2", "bob", "hello there")).await.unwrap();
    assert!(matches!(a, Outcome::Replied { .. }));
    assert!(matches!(b, Outcome::Replied { .. }));
    assert_eq!(transport.deliveries().len(), 2);
}

/// Store stand-in for an outage: every operation fails.
struct DownStore;

#[async_trait]
impl KvStore for DownStore {
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn exists(&self, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn del(&self, _: &[String]) -> Result<(), StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn rpush(&self, _: &str, _: &str) -> Result<usize, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn lrange(&self, _: &str, _: i64, _: i64) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn llen(&self, _: &str) -> Result<usize, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn ttl(&self, _: &str) -> Result<Option<Duration>, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
    async fn keys(&self, _: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Connection("connection refused".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn store_outage_fails_closed() {
    let engine = EchoEngine::new();
    let transport = RecordingTransport::new();
    let p = pipeline(Arc::new(DownStore), Arc::clone(&engine), Arc::clone(&transport));

    // A message that cannot be checked for duplicates is parked for the
    // queue's retry — never processed blind.
    let err = p
        .handle_delivery(&message("m1", "u1", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));
    assert!(engine.contents().is_empty());
    assert!(transport.deliveries().is_empty());
}
