//! Per-request leases — at most one reconcile of a given request runs at a time.
//!
//! Inside a single controller the work queue already serializes keys; the lease
//! extends that across controller replicas. Leases expire on their own so a crashed
//! holder never blocks a request forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use uuid::Uuid;

use courier_common::types::ObjectKey;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Proof of holding a lease. Only the matching token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken(String);

impl LeaseToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait RequestLease: Send + Sync {
    /// Try to take the lease for `key`. Returns `None` if someone else holds it.
    async fn acquire(&self, key: &ObjectKey, ttl: Duration) -> Result<Option<LeaseToken>, LeaseError>;

    /// Give the lease back. A stale token (the lease expired and was re-taken) is a no-op.
    async fn release(&self, key: &ObjectKey, token: &LeaseToken) -> Result<(), LeaseError>;
}

struct LocalHold {
    token: LeaseToken,
    expires: Instant,
}

/// Process-local lease table.
#[derive(Default)]
pub struct LocalLease {
    held: Mutex<HashMap<ObjectKey, LocalHold>>,
}

impl LocalLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestLease for LocalLease {
    async fn acquire(&self, key: &ObjectKey, ttl: Duration) -> Result<Option<LeaseToken>, LeaseError> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.get(key).is_some_and(|hold| hold.expires > now) {
            return Ok(None);
        }
        let token = LeaseToken::generate();
        held.insert(
            key.clone(),
            LocalHold {
                token: token.clone(),
                expires: now + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, key: &ObjectKey, token: &LeaseToken) -> Result<(), LeaseError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.get(key).is_some_and(|hold| hold.token == *token) {
            held.remove(key);
        }
        Ok(())
    }
}

/// Deletes the lease key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis lease shared by all controller replicas.
///
/// Uses `SET key token NX PX ttl` with a fresh token per acquisition, so a lease
/// that expired and was re-taken elsewhere is never released by the old holder.
pub struct RedisLease {
    redis: ConnectionManager,
}

impl RedisLease {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn lease_key(key: &ObjectKey) -> String {
        format!("notification:lease:{}", key)
    }
}

#[async_trait]
impl RequestLease for RedisLease {
    async fn acquire(&self, key: &ObjectKey, ttl: Duration) -> Result<Option<LeaseToken>, LeaseError> {
        let mut redis = self.redis.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let token = LeaseToken::generate();

        // Some("OK") when set, None when the key already exists
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::lease_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut redis)
            .await?;

        if result.is_none() {
            tracing::debug!(key = %key, "Lease held elsewhere");
            return Ok(None);
        }
        Ok(Some(token))
    }

    async fn release(&self, key: &ObjectKey, token: &LeaseToken) -> Result<(), LeaseError> {
        let mut redis = self.redis.clone();
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::lease_key(key))
            .arg(token.as_str())
            .invoke_async(&mut redis)
            .await?;
        Ok(())
    }
}
