use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::canvas::Canvas;
use crate::error::Result;
use crate::metrics::CanvasMetrics;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub canvas: CanvasStatus,
    pub metrics: CanvasMetrics,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CanvasStatus {
    pub width: u32,
    pub height: u32,
    pub rate_limit: u32,
    pub tracked_clients: usize,
}

impl HealthResponse {
    pub fn collect(canvas: &Canvas, started: Instant) -> Result<Self> {
        let metrics = canvas.metrics();

        // Degraded while the most recent flush attempt failed.
        let status = if metrics.last_flush_ok == Some(false) {
            "degraded"
        } else {
            "healthy"
        };

        Ok(Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: started.elapsed().as_secs(),
            canvas: CanvasStatus {
                width: canvas.width(),
                height: canvas.height(),
                rate_limit: canvas.rate_limit(),
                tracked_clients: canvas.tracked_clients()?,
            },
            metrics,
        })
    }
}
