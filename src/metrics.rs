use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time copy of the canvas counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasMetrics {
    pub pixels_placed: u64,
    pub out_of_bounds: u64,
    pub rate_limited: u64,
    pub flushes_succeeded: u64,
    pub flushes_failed: u64,
    /// Unix seconds of the last successful flush, if any.
    pub last_flush: Option<u64>,
    /// Outcome of the most recent flush attempt, if any.
    pub last_flush_ok: Option<bool>,
}

/// Lock-free counters shared by the façade and the snapshot task.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    pixels_placed: AtomicU64,
    out_of_bounds: AtomicU64,
    rate_limited: AtomicU64,
    flushes_succeeded: AtomicU64,
    flushes_failed: AtomicU64,
    last_flush: AtomicU64,
    last_outcome: AtomicU8,
}

const OUTCOME_NONE: u8 = 0;
const OUTCOME_OK: u8 = 1;
const OUTCOME_FAILED: u8 = 2;

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_placed(&self, count: u64) {
        self.pixels_placed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_out_of_bounds(&self) {
        self.out_of_bounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, succeeded: bool) {
        if succeeded {
            self.flushes_succeeded.fetch_add(1, Ordering::Relaxed);
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            self.last_flush.store(now, Ordering::Relaxed);
            self.last_outcome.store(OUTCOME_OK, Ordering::Relaxed);
        } else {
            self.flushes_failed.fetch_add(1, Ordering::Relaxed);
            self.last_outcome.store(OUTCOME_FAILED, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CanvasMetrics {
        let last_flush = self.last_flush.load(Ordering::Relaxed);
        CanvasMetrics {
            pixels_placed: self.pixels_placed.load(Ordering::Relaxed),
            out_of_bounds: self.out_of_bounds.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            flushes_succeeded: self.flushes_succeeded.load(Ordering::Relaxed),
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
            last_flush: (last_flush != 0).then_some(last_flush),
            last_flush_ok: match self.last_outcome.load(Ordering::Relaxed) {
                OUTCOME_NONE => None,
                outcome => Some(outcome == OUTCOME_OK),
            },
        }
    }
}
