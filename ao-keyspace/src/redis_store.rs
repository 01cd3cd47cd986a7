use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{aio::ConnectionManager, AsyncCommands, RedisResult};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::store::{ScoredMember, SharedStore, StoreError, StoreResult};

/// Redis-backed `SharedStore`.
///
/// Grounded in the pooled-client-plus-`ConnectionManager` pattern: a
/// `deadpool_redis::Pool` is kept for connection-count bookkeeping while the
/// actual commands go through a shared `ConnectionManager`, which reconnects
/// on its own. Every call is wrapped in `execute_with_retry`, which
/// re-establishes the connection manager once on failure before giving up.
pub struct RedisStore {
    #[allow(dead_code)]
    pool: Pool,
    conn: Arc<RwLock<Option<ConnectionManager>>>,
    url: String,
    max_retries: u32,
}

impl RedisStore {
    pub async fn new(url: impl Into<String>) -> StoreResult<Self> {
        let url = url.into();
        let cfg = Config::from_url(url.clone());
        let pool = cfg
            .builder()
            .map_err(|e| StoreError::Backend(format!("redis pool builder: {e}")))?
            .max_size(16)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Backend(format!("redis pool build: {e}")))?;

        let store = Self {
            pool,
            conn: Arc::new(RwLock::new(None)),
            url,
            max_retries: 2,
        };
        store.connect().await?;
        Ok(store)
    }

    async fn connect(&self) -> StoreResult<()> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| StoreError::Backend(format!("open client: {e}")))?;
        match ConnectionManager::new(client).await {
            Ok(manager) => {
                *self.conn.write().await = Some(manager);
                info!("connected to shared store at {}", self.url);
                Ok(())
            }
            Err(e) => {
                error!("failed to connect to shared store: {}", e);
                Err(StoreError::Backend(e.to_string()))
            }
        }
    }

    async fn execute_with_retry<F, Fut, T>(&self, f: F) -> StoreResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let mut attempts = 0;
        loop {
            let conn = {
                let guard = self.conn.read().await;
                guard.clone()
            };
            let Some(conn) = conn else {
                self.connect().await?;
                attempts += 1;
                if attempts > self.max_retries {
                    return Err(StoreError::Backend("no connection available".to_string()));
                }
                continue;
            };

            match f(conn).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("shared store command failed, retrying: {}", e);
                    *self.conn.write().await = None;
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(StoreError::Backend(e.to_string()));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn list_push(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let key = key.to_string();
        self.execute_with_retry(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            async move {
                let _: () = conn.rpush(key, value).await?;
                Ok(())
            }
        })
        .await
    }

    async fn list_remove(&self, key: &str, value: &[u8]) -> StoreResult<u64> {
        let key = key.to_string();
        let value = value.to_vec();
        self.execute_with_retry(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            async move {
                let removed: u64 = conn.lrem(key, 1, value).await?;
                Ok(removed)
            }
        })
        .await
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: Vec<u8>) -> StoreResult<()> {
        let key = key.to_string();
        self.execute_with_retry(move |mut conn| {
            let key = key.clone();
            let member = member.clone();
            async move {
                let _: () = conn.zadd(key, member, score).await?;
                Ok(())
            }
        })
        .await
    }

    async fn sorted_set_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>> {
        let key = key.to_string();
        let raw: Vec<(Vec<u8>, f64)> = self
            .execute_with_retry(move |mut conn| {
                let key = key.clone();
                async move { conn.zpopmin(key, 1).await }
            })
            .await?;
        Ok(raw
            .into_iter()
            .next()
            .map(|(member, score)| ScoredMember { member, score }))
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let key = key.to_string();
        let raw: Vec<(Vec<u8>, f64)> = self
            .execute_with_retry(move |mut conn| {
                let key = key.clone();
                async move {
                    conn.zrangebyscore_withscores(key, min_score, max_score)
                        .await
                }
            })
            .await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn sorted_set_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        let key = key.to_string();
        let member = member.to_vec();
        let removed: i64 = self
            .execute_with_retry(move |mut conn| {
                let key = key.clone();
                let member = member.clone();
                async move { conn.zrem(key, member).await }
            })
            .await?;
        Ok(removed > 0)
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> StoreResult<()> {
        let key = key.to_string();
        let field = field.to_string();
        self.execute_with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            let value = value.clone();
            async move {
                let _: () = conn.hset(key, field, value).await?;
                Ok(())
            }
        })
        .await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        let field = field.to_string();
        self.execute_with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            async move { conn.hget(key, field).await }
        })
        .await
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        let key = key.to_string();
        let field = field.to_string();
        let removed: i64 = self
            .execute_with_retry(move |mut conn| {
                let key = key.clone();
                let field = field.clone();
                async move { conn.hdel(key, field).await }
            })
            .await?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let key = key.to_string();
        let map: std::collections::HashMap<String, Vec<u8>> = self
            .execute_with_retry(move |mut conn| {
                let key = key.clone();
                async move { conn.hgetall(key).await }
            })
            .await?;
        Ok(map.into_iter().collect())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let key = key.to_string();
        let field = field.to_string();
        self.execute_with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            async move { conn.hincr(key, field, delta).await }
        })
        .await
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let pattern = pattern.to_string();
        self.execute_with_retry(move |mut conn| {
            let pattern = pattern.clone();
            async move { conn.keys(pattern).await }
        })
        .await
    }
}
