//! PNG persistence of the composed canvas.
//!
//! Files are never deleted before their replacement is complete: every write
//! goes to a uniquely named temporary file next to the destination, is synced,
//! and is then renamed over the destination.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{imageops, ImageFormat, RgbaImage};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CanvasError, Result};
use crate::grid::GridStore;
use crate::metrics::MetricsCollector;

/// Load the immutable base image. Any failure is fatal to startup.
pub fn load_base(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path).map_err(|source| CanvasError::Startup {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgba8())
}

/// Load a previously written snapshot, or `None` if there is none yet.
pub fn load_snapshot(path: &Path) -> Result<Option<RgbaImage>> {
    if !path.exists() {
        return Ok(None);
    }
    let img = image::open(path).map_err(|e| CanvasError::persistence(path, e))?;
    Ok(Some(img.to_rgba8()))
}

/// Write `img` as PNG to `path` via temp file + rename.
pub fn write_png_atomic(img: &RgbaImage, path: &Path) -> Result<()> {
    let tmp = temp_path_for(path);

    let result = (|| -> std::result::Result<(), image::ImageError> {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        img.write_to(&mut writer, ImageFormat::Png)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(CanvasError::persistence(path, e));
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

pub struct SnapshotManager {
    grid: Arc<GridStore>,
    metrics: Arc<MetricsCollector>,
    snapshot_path: PathBuf,
    backup_path: PathBuf,
    // Held from compose until rename, so flushes commit in composition order.
    flush_lock: Arc<Mutex<()>>,
}

impl SnapshotManager {
    pub fn new(
        grid: Arc<GridStore>,
        metrics: Arc<MetricsCollector>,
        snapshot_path: impl Into<PathBuf>,
        backup_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            grid,
            metrics,
            snapshot_path: snapshot_path.into(),
            backup_path: backup_path.into(),
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Write the composed canvas to the primary snapshot path.
    ///
    /// Flushes are serialized: a flush composes only after the previous one
    /// has renamed its file, so the snapshot never goes backwards. The guard
    /// moves into the blocking write, which keeps it held even if the
    /// calling task is aborted mid-write.
    pub async fn flush(&self) -> Result<()> {
        let guard = Arc::clone(&self.flush_lock).lock_owned().await;
        let composed = self.grid.compose()?;
        let path = self.snapshot_path.clone();

        let metrics = Arc::clone(&self.metrics);

        let result = tokio::task::spawn_blocking(move || {
            let written = write_png_atomic(&composed, &path);
            metrics.record_flush(written.is_ok());
            drop(guard);
            written
        })
        .await
        .map_err(|e| {
            self.metrics.record_flush(false);
            CanvasError::Internal(format!("flush task failed: {}", e))
        })
        .and_then(|r| r);

        if result.is_ok() {
            debug!(path = %self.snapshot_path.display(), "Canvas flushed");
        }
        result
    }

    /// Compose the base beneath the most recent durable snapshot and write
    /// it to the backup path. Memory and the primary snapshot are untouched.
    pub async fn backup(&self) -> Result<PathBuf> {
        let mut composed = self.grid.base().clone();
        let snapshot_path = self.snapshot_path.clone();
        let backup_path = self.backup_path.clone();

        tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let snapshot = load_snapshot(&snapshot_path)?.ok_or_else(|| {
                CanvasError::persistence(
                    &snapshot_path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no snapshot has been flushed yet"),
                )
            })?;
            if snapshot.dimensions() != composed.dimensions() {
                warn!(
                    snapshot = ?snapshot.dimensions(),
                    base = ?composed.dimensions(),
                    "Snapshot dimensions differ from base, backup will be clipped"
                );
            }
            imageops::overlay(&mut composed, &snapshot, 0, 0);
            write_png_atomic(&composed, &backup_path)?;
            Ok(backup_path)
        })
        .await
        .map_err(|e| CanvasError::Internal(format!("backup task failed: {}", e)))?
    }

    /// Flush every `interval`, forever. Failures are logged and retried on
    /// the next tick; they never stop the task.
    pub fn schedule(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Starting snapshot task");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.flush().await {
                    error!(error = %e, "Scheduled flush failed, in-memory canvas remains authoritative");
                }
            }
        })
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("snapshot_path", &self.snapshot_path)
            .field("backup_path", &self.backup_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Color;
    use image::Rgba;

    fn manager(dir: &Path, base: RgbaImage) -> SnapshotManager {
        SnapshotManager::new(
            Arc::new(GridStore::new(base)),
            Arc::new(MetricsCollector::new()),
            dir.join("main.png"),
            dir.join("backup.png"),
        )
    }

    fn base() -> RgbaImage {
        RgbaImage::from_fn(6, 4, |x, y| Rgba([x as u8 * 10, y as u8 * 20, 50, 255]))
    }

    #[test]
    fn test_load_base_missing_file_is_startup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_base(&dir.path().join("nope.png"));
        assert!(matches!(result, Err(CanvasError::Startup { .. })));
    }

    #[test]
    fn test_load_base_garbage_is_startup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvas.png");
        fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(load_base(&path), Err(CanvasError::Startup { .. })));
    }

    #[test]
    fn test_load_snapshot_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_snapshot(&dir.path().join("main.png")).unwrap().is_none());
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.png");

        write_png_atomic(&RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])), &path).unwrap();
        let second = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        write_png_atomic(&second, &path).unwrap();

        assert_eq!(load_snapshot(&path).unwrap().unwrap(), second);
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.png");
        let first = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]));
        write_png_atomic(&first, &path).unwrap();

        // Zero-sized images cannot be encoded as PNG.
        let result = write_png_atomic(&RgbaImage::new(0, 0), &path);
        assert!(matches!(result, Err(CanvasError::Persistence { .. })));
        assert_eq!(load_snapshot(&path).unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_flush_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = manager(dir.path(), base());
        snapshots.grid.set(0, 0, Color::new(255, 0, 0)).unwrap();
        snapshots.grid.set(5, 3, Color::WHITE).unwrap();

        snapshots.flush().await.unwrap();

        let reloaded = load_snapshot(snapshots.snapshot_path()).unwrap().unwrap();
        assert_eq!(reloaded, snapshots.grid.compose().unwrap());
        assert_eq!(snapshots.metrics.snapshot().flushes_succeeded, 1);
    }

    #[tokio::test]
    async fn test_flush_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = manager(&dir.path().join("missing"), base());
        let result = snapshots.flush().await;
        assert!(matches!(result, Err(CanvasError::Persistence { .. })));
        assert_eq!(snapshots.metrics.snapshot().flushes_failed, 1);
    }

    #[tokio::test]
    async fn test_backup_uses_durable_snapshot_not_memory() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = manager(dir.path(), base());
        snapshots.grid.set(1, 1, Color::BLACK).unwrap();
        snapshots.flush().await.unwrap();
        let flushed = snapshots.grid.compose().unwrap();

        // Written after the flush, so absent from the backup.
        snapshots.grid.set(2, 2, Color::WHITE).unwrap();

        let path = snapshots.backup().await.unwrap();
        assert_eq!(path, dir.path().join("backup.png"));
        let backup = load_snapshot(&path).unwrap().unwrap();
        assert_eq!(backup, flushed);
        assert_eq!(load_snapshot(snapshots.snapshot_path()).unwrap().unwrap(), flushed);
    }

    #[tokio::test]
    async fn test_backup_without_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = manager(dir.path(), base());
        let result = snapshots.backup().await;
        assert!(matches!(result, Err(CanvasError::Persistence { .. })));
        assert!(!dir.path().join("backup.png").exists());
    }

    #[tokio::test]
    async fn test_schedule_flushes_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(manager(dir.path(), base()));
        let handle = Arc::clone(&snapshots).schedule(Duration::from_millis(50));

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if snapshots.metrics.snapshot().flushes_succeeded >= 2 {
                break;
            }
        }
        assert!(snapshots.metrics.snapshot().flushes_succeeded >= 2);
        assert!(snapshots.snapshot_path().exists());
        handle.abort();
    }

    #[tokio::test]
    async fn test_scheduled_flush_retries_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("later");
        let snapshots = Arc::new(manager(&target, base()));
        let handle = Arc::clone(&snapshots).schedule(Duration::from_millis(50));

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if snapshots.metrics.snapshot().flushes_failed >= 1 {
                break;
            }
        }
        assert!(snapshots.metrics.snapshot().flushes_failed >= 1);
        assert_eq!(snapshots.metrics.snapshot().flushes_succeeded, 0);

        fs::create_dir(&target).unwrap();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if snapshots.metrics.snapshot().flushes_succeeded >= 1 {
                break;
            }
        }
        assert!(snapshots.metrics.snapshot().flushes_succeeded >= 1);
        assert_eq!(snapshots.metrics.snapshot().last_flush_ok, Some(true));
        assert!(target.join("main.png").exists());
        handle.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_flushes_keep_newest_composition() {
        let dir = tempfile::tempdir().unwrap();
        let large = RgbaImage::from_pixel(512, 512, Rgba([0, 0, 0, 255]));
        let snapshots = Arc::new(manager(dir.path(), large));

        for i in 0..40u8 {
            snapshots.grid.set(0, 0, Color::new(i, 0, 0)).unwrap();
            let first = tokio::spawn({
                let snapshots = Arc::clone(&snapshots);
                async move { snapshots.flush().await }
            });

            let newest = Color::new(i, 1, 1);
            snapshots.grid.set(0, 0, newest).unwrap();
            let second = tokio::spawn({
                let snapshots = Arc::clone(&snapshots);
                async move { snapshots.flush().await }
            });

            first.await.unwrap().unwrap();
            second.await.unwrap().unwrap();

            let on_disk = load_snapshot(snapshots.snapshot_path()).unwrap().unwrap();
            assert_eq!(
                on_disk.get_pixel(0, 0),
                &Rgba([newest.r, newest.g, newest.b, 255]),
                "round {} committed an older composition",
                i
            );
        }
    }

    #[tokio::test]
    async fn test_aborted_flush_still_finishes_before_next() {
        let dir = tempfile::tempdir().unwrap();
        let large = RgbaImage::from_pixel(512, 512, Rgba([0, 0, 0, 255]));
        let snapshots = Arc::new(manager(dir.path(), large));

        snapshots.grid.set(0, 0, Color::new(1, 0, 0)).unwrap();
        let stale = tokio::spawn({
            let snapshots = Arc::clone(&snapshots);
            async move { snapshots.flush().await }
        });
        tokio::task::yield_now().await;
        stale.abort();

        snapshots.grid.set(0, 0, Color::new(2, 0, 0)).unwrap();
        snapshots.flush().await.unwrap();

        // Give any detached blocking write time to land.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let on_disk = load_snapshot(snapshots.snapshot_path()).unwrap().unwrap();
        assert_eq!(on_disk.get_pixel(0, 0), &Rgba([2, 0, 0, 255]));
    }
}
