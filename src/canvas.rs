//! The governed entry point to the canvas.
//!
//! Every external caller (HTTP handlers, the admin console) goes through
//! [`Canvas`], which checks bounds and, for untrusted callers, admission
//! before touching the grid.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{ImageFormat, RgbaImage};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CanvasError, Result};
use crate::grid::{Color, GridStore};
use crate::metrics::{CanvasMetrics, MetricsCollector};
use crate::rate_limiter::RateLimiter;
use crate::snapshot::{self, SnapshotManager};

/// Who is asking for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// An untrusted remote client, keyed by its origin address.
    Client(String),
    /// The trusted operator console. Never rate limited.
    Admin,
}

impl Caller {
    pub fn client(key: impl Into<String>) -> Self {
        Caller::Client(key.into())
    }
}

pub struct Canvas {
    grid: Arc<GridStore>,
    limiter: RateLimiter,
    snapshots: Arc<SnapshotManager>,
    metrics: Arc<MetricsCollector>,
}

impl Canvas {
    pub fn new(
        base: RgbaImage,
        limiter: RateLimiter,
        snapshot_path: impl AsRef<Path>,
        backup_path: impl AsRef<Path>,
    ) -> Self {
        let grid = Arc::new(GridStore::new(base));
        let metrics = Arc::new(MetricsCollector::new());
        let snapshots = Arc::new(SnapshotManager::new(
            Arc::clone(&grid),
            Arc::clone(&metrics),
            snapshot_path.as_ref(),
            backup_path.as_ref(),
        ));

        Self {
            grid,
            limiter,
            snapshots,
            metrics,
        }
    }

    /// Load the base image named by `config` and, if enabled, seed the
    /// overlay from the last flushed snapshot.
    pub fn open(config: &Config) -> Result<Self> {
        let base = snapshot::load_base(&config.base_image)?;
        info!(
            path = %config.base_image.display(),
            width = base.width(),
            height = base.height(),
            "Loaded base image"
        );

        let canvas = Self::new(
            base,
            RateLimiter::new(config.rate_limit),
            &config.snapshot_path,
            &config.backup_path,
        );

        if config.restore_snapshot {
            canvas.restore_from_disk();
        }
        Ok(canvas)
    }

    fn restore_from_disk(&self) {
        let path = self.snapshots.snapshot_path();
        let restored = snapshot::load_snapshot(path)
            .and_then(|snap| snap.map(|img| self.grid.restore(&img)).transpose());

        match restored {
            Ok(Some(cells)) => info!(path = %path.display(), cells, "Restored canvas from snapshot"),
            Ok(None) => debug!(path = %path.display(), "No snapshot to restore"),
            Err(e) => warn!(error = %e, "Ignoring unusable snapshot, starting from base image"),
        }
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    pub fn get_pixel(&self, x: i64, y: i64) -> Result<Color> {
        self.grid.get(x, y).inspect_err(|e| self.note_rejection(e))
    }

    /// Write one pixel.
    ///
    /// Coordinates are validated before admission so a rejected coordinate
    /// never costs the client a token.
    pub fn place_pixel(&self, x: i64, y: i64, color: Color, caller: &Caller) -> Result<()> {
        self.grid.check_bounds(x, y).inspect_err(|e| self.note_rejection(e))?;

        if let Caller::Client(key) = caller {
            if !self.limiter.allow(key)? {
                let err = CanvasError::RateLimited { client: key.clone() };
                self.note_rejection(&err);
                return Err(err);
            }
        }

        self.grid.set(x, y, color)?;
        self.metrics.record_placed(1);
        debug!(x, y, ?color, ?caller, "Pixel placed");
        Ok(())
    }

    /// Fill the half-open rectangle `[x1, x2) × [y1, y2)` cell by cell.
    ///
    /// Corners may be given in any order. Both must lie within
    /// `0..=width` × `0..=height`. The fill is not atomic: concurrent readers
    /// may observe it partially applied. Returns the number of cells written.
    pub fn fill_rectangle(&self, x1: i64, y1: i64, x2: i64, y2: i64, color: Color) -> Result<u64> {
        let (w, h) = (i64::from(self.width()), i64::from(self.height()));
        for (x, y) in [(x1, y1), (x2, y2)] {
            if !(0..=w).contains(&x) || !(0..=h).contains(&y) {
                let err = CanvasError::OutOfBounds {
                    x,
                    y,
                    width: self.width(),
                    height: self.height(),
                };
                self.note_rejection(&err);
                return Err(err);
            }
        }

        let (min_x, max_x) = (x1.min(x2), x1.max(x2));
        let (min_y, max_y) = (y1.min(y2), y1.max(y2));

        let mut written = 0;
        for y in min_y..max_y {
            for x in min_x..max_x {
                self.grid.set(x, y, color)?;
                written += 1;
            }
        }

        self.metrics.record_placed(written);
        info!(x1 = min_x, y1 = min_y, x2 = max_x, y2 = max_y, written, "Rectangle filled");
        Ok(written)
    }

    /// The base with every committed write drawn over it.
    pub fn render_canvas(&self) -> Result<RgbaImage> {
        self.grid.compose()
    }

    /// Composed canvas encoded as PNG bytes.
    pub fn render_png(&self) -> Result<Vec<u8>> {
        let image = self.render_canvas()?;
        let mut buf = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| CanvasError::Internal(format!("failed to encode canvas: {}", e)))?;
        Ok(buf.into_inner())
    }

    pub async fn flush(&self) -> Result<()> {
        self.snapshots.flush().await
    }

    /// Write the backup artifact from the last flushed snapshot.
    pub async fn trigger_backup(&self) -> Result<std::path::PathBuf> {
        let path = self.snapshots.backup().await?;
        info!(path = %path.display(), "Backup complete");
        Ok(path)
    }

    pub fn spawn_snapshot_task(&self, interval: Duration) -> JoinHandle<()> {
        Arc::clone(&self.snapshots).schedule(interval)
    }

    /// Periodically drop rate-limiter buckets that have refilled completely.
    pub fn spawn_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.purge_idle(Instant::now()) {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "Purged idle rate limiter buckets"),
                    Err(e) => warn!(error = %e, "Rate limiter cleanup failed"),
                }
            }
        })
    }

    pub fn tracked_clients(&self) -> Result<usize> {
        self.limiter.len()
    }

    pub fn rate_limit(&self) -> u32 {
        self.limiter.capacity()
    }

    pub fn metrics(&self) -> CanvasMetrics {
        self.metrics.snapshot()
    }

    fn note_rejection(&self, err: &CanvasError) {
        match err {
            CanvasError::OutOfBounds { .. } => self.metrics.record_out_of_bounds(),
            CanvasError::RateLimited { .. } => self.metrics.record_rate_limited(),
            _ => {}
        }
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("grid", &self.grid)
            .field("limiter", &self.limiter)
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}
