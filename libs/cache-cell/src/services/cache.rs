use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{CacheError, Freshness, SwrEntry};

/// Read-path cache shielding frequent lookups from store load. Every failure
/// mode (no pool, dead connection, bad payload) degrades to calling the
/// fetch closure directly; callers never see a cache error.
pub struct ReadCacheService {
    pool: Option<Pool>,
}

impl ReadCacheService {
    pub fn new(config: &AppConfig) -> Self {
        let pool = match &config.redis_url {
            Some(url) => match Config::from_url(url.clone()).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => {
                    debug!("Read-path cache pool created");
                    Some(pool)
                }
                Err(e) => {
                    warn!("Failed to create Redis pool, caching disabled: {}", e);
                    None
                }
            },
            None => {
                debug!("REDIS_URL not set, read-path caching disabled");
                None
            }
        };

        Self { pool }
    }

    pub fn disabled() -> Self {
        Self { pool: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Plain TTL cache: return the cached value on a hit, otherwise compute
    /// via `fetch`, store with the given TTL, and return the computed value.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: i64,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(pool) = &self.pool else {
            return fetch().await;
        };

        match Self::read_raw::<T>(pool, key).await {
            Ok(Some(value)) => {
                debug!("Cache hit for {}", key);
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}, falling back: {}", key, e),
        }

        let value = fetch().await?;

        if let Err(e) = Self::write_raw(pool, key, &value, ttl_seconds).await {
            warn!("Cache write failed for {}: {}", key, e);
        }

        Ok(value)
    }

    /// Stale-while-revalidate: entries younger than `fresh_ttl_seconds` are
    /// served as-is; entries younger than `stale_ttl_seconds` are served
    /// immediately while a background task recomputes them; anything older is
    /// a miss.
    pub async fn get_or_set_swr<T, E, F, Fut>(
        &self,
        key: &str,
        fresh_ttl_seconds: i64,
        stale_ttl_seconds: i64,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: std::fmt::Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let Some(pool) = &self.pool else {
            return fetch().await;
        };
        let fetch = Arc::new(fetch);

        match Self::read_entry::<T>(pool, key).await {
            Ok(Some(entry)) => {
                match entry.freshness(Utc::now(), fresh_ttl_seconds, stale_ttl_seconds) {
                    Freshness::Fresh => {
                        debug!("Cache hit (fresh) for {}", key);
                        return Ok(entry.value);
                    }
                    Freshness::Stale => {
                        debug!("Cache hit (stale) for {}, revalidating in background", key);
                        Self::spawn_revalidation(
                            pool.clone(),
                            key.to_string(),
                            stale_ttl_seconds,
                            Arc::clone(&fetch),
                        );
                        return Ok(entry.value);
                    }
                    Freshness::Expired => {}
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}, falling back: {}", key, e),
        }

        let value = fetch().await?;
        let entry = SwrEntry::new(value, Utc::now());

        if let Err(e) = Self::write_entry(pool, key, &entry, stale_ttl_seconds).await {
            warn!("Cache write failed for {}: {}", key, e);
        }

        Ok(entry.value)
    }

    // Fire-and-forget refresh; the request that observed staleness is not
    // blocked and revalidation failures only get logged.
    fn spawn_revalidation<T, E, F, Fut>(
        pool: Pool,
        key: String,
        stale_ttl_seconds: i64,
        fetch: Arc<F>,
    ) where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: std::fmt::Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        tokio::spawn(async move {
            match fetch().await {
                Ok(value) => {
                    let entry = SwrEntry::new(value, Utc::now());
                    match Self::write_entry(&pool, &key, &entry, stale_ttl_seconds).await {
                        Ok(()) => debug!("Background revalidation refreshed {}", key),
                        Err(e) => warn!("Background revalidation write failed for {}: {}", key, e),
                    }
                }
                Err(e) => warn!("Background revalidation fetch failed for {}: {}", key, e),
            }
        });
    }

    async fn connection(pool: &Pool) -> Result<deadpool_redis::Connection, CacheError> {
        pool.get()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    async fn read_raw<T: DeserializeOwned>(pool: &Pool, key: &str) -> Result<Option<T>, CacheError> {
        let mut conn = Self::connection(pool).await?;
        let cached: Option<String> = conn.get(key).await?;

        match cached {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn write_raw<T: Serialize>(
        pool: &Pool,
        key: &str,
        value: &T,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        let mut conn = Self::connection(pool).await?;
        let payload = serde_json::to_string(value)?;
        let _: () = conn.set_ex(key, payload, ttl_seconds.max(1) as u64).await?;
        Ok(())
    }

    async fn read_entry<T: DeserializeOwned>(
        pool: &Pool,
        key: &str,
    ) -> Result<Option<SwrEntry<T>>, CacheError> {
        Self::read_raw(pool, key).await
    }

    async fn write_entry<T: Serialize>(
        pool: &Pool,
        key: &str,
        entry: &SwrEntry<T>,
        ttl_seconds: i64,
    ) -> Result<(), CacheError> {
        Self::write_raw(pool, key, entry, ttl_seconds).await
    }
}
