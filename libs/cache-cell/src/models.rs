use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cached value together with its write timestamp, so readers can decide
/// between serving it as-is and revalidating in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwrEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl<T> SwrEntry<T> {
    pub fn new(value: T, cached_at: DateTime<Utc>) -> Self {
        Self { value, cached_at }
    }

    pub fn freshness(&self, now: DateTime<Utc>, fresh_ttl_seconds: i64, stale_ttl_seconds: i64) -> Freshness {
        let age = (now - self.cached_at).num_seconds();

        if age < fresh_ttl_seconds {
            Freshness::Fresh
        } else if age < stale_ttl_seconds {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// Internal cache failures. These never reach callers: every cache error
/// degrades to a direct fetch.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
