//! Redis-backed store shared by all worker processes.
//!
//! One multiplexed connection per process; every trait method maps to a
//! single Redis command so atomicity comes from the server, not from any
//! client-side locking.

use super::KvStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::debug!(url, "connected to shared store");
        Ok(Self { conn })
    }

    /// Round-trip check used at worker startup.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Command(format!("unexpected PING reply: {pong}")))
        }
    }
}

fn command_error(e: redis::RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // EX takes whole seconds; never send 0, which Redis rejects.
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // SET key value NX EX ttl → "OK" when created, nil when the key existed.
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(created.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let n: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(n > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let _: u64 = cmd.query_async(&mut conn).await.map_err(command_error)?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let applied: u64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(applied > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let secs: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        // -2 = absent, -1 = no expiry.
        match u64::try_from(secs) {
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
            Err(_) => Ok(None),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        // SCAN instead of KEYS: bounded per-call work on a shared instance.
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }
}
