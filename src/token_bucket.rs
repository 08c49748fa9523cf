use std::time::{Duration, Instant};

/// A lazily refilled token bucket.
///
/// Refill is computed from the time elapsed since the last observation, so
/// the bucket needs no background task. All methods take the current instant
/// explicitly; callers pass `Instant::now()`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    pub fn try_consume(&mut self, tokens: u32, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= tokens as f64 {
            self.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    /// Whether enough time has passed since the last observation for the
    /// bucket to be full again.
    pub fn is_idle(&self, now: Instant) -> bool {
        match self.time_to_full() {
            Some(full_after) => now.saturating_duration_since(self.last_refill) >= full_after,
            None => false,
        }
    }

    pub fn time_until_available(&mut self, required_tokens: u32, now: Instant) -> Option<Duration> {
        self.refill(now);

        if self.tokens >= required_tokens as f64 {
            return None;
        }
        if self.refill_rate <= 0.0 {
            return Some(Duration::MAX);
        }

        let tokens_needed = required_tokens as f64 - self.tokens;
        Some(Duration::from_secs_f64(tokens_needed / self.refill_rate))
    }

    fn time_to_full(&self) -> Option<Duration> {
        let missing = self.capacity as f64 - self.tokens;
        if missing <= 0.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(missing / self.refill_rate))
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let tokens_to_add = self.refill_rate * elapsed.as_secs_f64();
        // Cap at capacity
        self.tokens = (self.tokens + tokens_to_add).min(self.capacity as f64);
        self.last_refill = now;
    }
}
