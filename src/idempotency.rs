use crate::models::MarketplaceResult;
use crate::pipeline::PipelineError;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

const KEY_PREFIX: &str = "relay:idempotency:";
const PENDING: &str = "pending";

/// What a caller holding an `Idempotency-Key` is allowed to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The key is now held by this caller, which must post and then
    /// [`complete`](IdempotencyStore::complete) it.
    Acquired,
    /// An earlier request with this key already posted successfully.
    Replay(MarketplaceResult),
    /// Another request with this key is still posting.
    InFlight,
}

enum Slot {
    Pending,
    Done(MarketplaceResult),
}

pub struct Entry {
    slot: Slot,
    expires_at: Instant,
}

/// Remembers postings by `Idempotency-Key` so a retried or duplicated
/// request cannot create a second listing. A key is reserved before the
/// post starts; only successful results are kept, failures free the key.
#[derive(Clone)]
pub enum IdempotencyStore {
    Redis {
        client: redis::Client,
        ttl_secs: u64,
    },
    Memory {
        entries: Arc<Mutex<HashMap<String, Entry>>>,
        ttl: Duration,
    },
}

impl IdempotencyStore {
    pub fn memory(ttl: Duration) -> Self {
        Self::Memory {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn from_env() -> Self {
        let ttl_secs = crate::http::env_u64("IDEMPOTENCY_TTL_SECS", 3600).max(1);
        match std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok())
        {
            Some(client) => Self::Redis { client, ttl_secs },
            None => Self::memory(Duration::from_secs(ttl_secs)),
        }
    }

    /// Atomically claims `key` unless it is already held or completed.
    pub async fn reserve(&self, key: &str) -> Reservation {
        match self {
            Self::Redis { client, ttl_secs } => redis_reserve(client, key, *ttl_secs).await,
            Self::Memory { entries, ttl } => {
                let now = Instant::now();
                let mut entries = entries.lock().await;
                entries.retain(|_, entry| entry.expires_at > now);
                match entries.get(key).map(|entry| &entry.slot) {
                    Some(Slot::Done(result)) => Reservation::Replay(result.clone()),
                    Some(Slot::Pending) => Reservation::InFlight,
                    None => {
                        entries.insert(
                            key.to_string(),
                            Entry {
                                slot: Slot::Pending,
                                expires_at: now + *ttl,
                            },
                        );
                        Reservation::Acquired
                    }
                }
            }
        }
    }

    /// Stores a successful result under a reserved key; any other result
    /// releases the key so the caller may retry.
    pub async fn complete(&self, key: &str, result: &MarketplaceResult) {
        if !result.success {
            self.release(key).await;
            return;
        }
        match self {
            Self::Redis { client, ttl_secs } => redis_set(client, key, result, *ttl_secs).await,
            Self::Memory { entries, ttl } => {
                entries.lock().await.insert(
                    key.to_string(),
                    Entry {
                        slot: Slot::Done(result.clone()),
                        expires_at: Instant::now() + *ttl,
                    },
                );
            }
        }
    }

    pub async fn release(&self, key: &str) {
        match self {
            Self::Redis { client, .. } => {
                if let Some(mut conn) = connect(client).await {
                    let _: Result<(), _> = conn.del(format!("{KEY_PREFIX}{key}")).await;
                }
            }
            Self::Memory { entries, .. } => {
                entries.lock().await.remove(key);
            }
        }
    }

    /// Runs `post` at most once per key. A concurrent duplicate is refused
    /// with a conflict instead of waiting.
    pub async fn once<F>(&self, key: &str, post: F) -> Result<MarketplaceResult, PipelineError>
    where
        F: Future<Output = Result<MarketplaceResult, PipelineError>>,
    {
        match self.reserve(key).await {
            Reservation::Replay(existing) => {
                info!(target = "relay.api", key = %key, "idempotent replay");
                Ok(existing)
            }
            Reservation::InFlight => {
                warn!(target = "relay.api", key = %key, "idempotency key in flight");
                Err(PipelineError::conflict(
                    "idempotency",
                    "a request with this Idempotency-Key is still in progress",
                ))
            }
            Reservation::Acquired => match post.await {
                Ok(result) => {
                    self.complete(key, &result).await;
                    Ok(result)
                }
                Err(err) => {
                    self.release(key).await;
                    Err(err)
                }
            },
        }
    }
}

async fn connect(client: &redis::Client) -> Option<MultiplexedConnection> {
    match client.get_multiplexed_async_connection().await {
        Ok(conn) => Some(conn),
        Err(err) => {
            warn!(target = "relay.api", error = %err, "idempotency_store_unavailable");
            None
        }
    }
}

/// `SET NX` claims the key; a lost race reads back whichever value won.
/// An unreachable store does not block posting.
async fn redis_reserve(client: &redis::Client, key: &str, ttl_secs: u64) -> Reservation {
    let Some(mut conn) = connect(client).await else {
        return Reservation::Acquired;
    };
    let full_key = format!("{KEY_PREFIX}{key}");
    let claimed: redis::RedisResult<Option<String>> = redis::cmd("SET")
        .arg(&full_key)
        .arg(PENDING)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs)
        .query_async(&mut conn)
        .await;
    match claimed {
        Ok(Some(_)) => Reservation::Acquired,
        Ok(None) => {
            let existing: redis::RedisResult<Option<String>> = conn.get(&full_key).await;
            match existing.ok().flatten().as_deref() {
                Some(PENDING) => Reservation::InFlight,
                Some(json) => serde_json::from_str(json)
                    .map(Reservation::Replay)
                    .unwrap_or(Reservation::InFlight),
                // Expired between the two calls.
                None => Reservation::InFlight,
            }
        }
        Err(err) => {
            warn!(target = "relay.api", error = %err, "idempotency_reserve_failed");
            Reservation::Acquired
        }
    }
}

async fn redis_set(client: &redis::Client, key: &str, value: &MarketplaceResult, ttl_secs: u64) {
    if let Some(mut conn) = connect(client).await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn
            .set_ex(format!("{KEY_PREFIX}{key}"), json, ttl_secs)
            .await;
    }
}
