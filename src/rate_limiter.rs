use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::error::{CanvasError, Result};
use crate::token_bucket::TokenBucket;

/// Per-client token buckets, created on a client's first write attempt.
///
/// Each bucket holds `capacity` tokens and refills at `refill_rate` tokens
/// per second. Lookup, creation and consumption happen under a single write
/// lock, so an unseen client is never judged before its bucket exists.
#[derive(Clone)]
pub struct RateLimiter {
    capacity: u32,
    refill_rate: f64,
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
}

impl RateLimiter {
    /// A limiter whose buckets hold `per_second` tokens and refill at
    /// `per_second` tokens per second.
    pub fn new(per_second: u32) -> Self {
        Self::with_params(per_second, per_second as f64)
    }

    pub fn with_params(capacity: u32, refill_rate: f64) -> Self {
        RateLimiter {
            capacity,
            refill_rate,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Admit or deny one write from `key`.
    pub fn allow(&self, key: &str) -> Result<bool> {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> Result<bool> {
        let mut buckets = self.buckets.write()
            .map_err(|_| CanvasError::Internal("Failed to acquire write lock on buckets".to_string()))?;

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_rate, now));

        Ok(bucket.try_consume(1, now))
    }

    /// Tokens currently available to `key`; unseen keys have a full bucket.
    pub fn remaining(&self, key: &str) -> Result<u32> {
        let mut buckets = self.buckets.write()
            .map_err(|_| CanvasError::Internal("Failed to acquire write lock on buckets".to_string()))?;

        match buckets.get_mut(key) {
            Some(bucket) => Ok(bucket.available_tokens(Instant::now())),
            None => Ok(self.capacity),
        }
    }

    /// Drop buckets that have refilled to capacity since their last use.
    ///
    /// A full bucket behaves exactly like a freshly created one, so removing
    /// it never changes an admission decision.
    pub fn purge_idle(&self, now: Instant) -> Result<usize> {
        let mut buckets = self.buckets.write()
            .map_err(|_| CanvasError::Internal("Failed to acquire write lock on buckets".to_string()))?;

        let initial_count = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_idle(now));
        Ok(initial_count - buckets.len())
    }

    /// Number of tracked clients.
    pub fn len(&self) -> Result<usize> {
        let buckets = self.buckets.read()
            .map_err(|_| CanvasError::Internal("Failed to acquire read lock on buckets".to_string()))?;
        Ok(buckets.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}
