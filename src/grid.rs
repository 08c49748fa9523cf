//! In-memory pixel storage: an immutable base layer and a mutable overlay.
//!
//! Every write lands in the overlay with full opacity. Overlay cells that were
//! never written stay fully transparent and let the base show through.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, Result};

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, u8::MAX])
    }

    fn from_rgba(px: &Rgba<u8>) -> Self {
        Self::new(px[0], px[1], px[2])
    }
}

pub struct GridStore {
    base: RgbaImage,
    overlay: RwLock<RgbaImage>,
}

impl GridStore {
    /// Create a store over `base` with an empty overlay of the same size.
    pub fn new(base: RgbaImage) -> Self {
        let (width, height) = base.dimensions();
        Self {
            base,
            overlay: RwLock::new(RgbaImage::new(width, height)),
        }
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }

    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    /// Validate a coordinate pair, rejecting negative and out-of-range values.
    pub fn check_bounds(&self, x: i64, y: i64) -> Result<(u32, u32)> {
        let out_of_bounds = || CanvasError::OutOfBounds {
            x,
            y,
            width: self.width(),
            height: self.height(),
        };

        let cx = u32::try_from(x).map_err(|_| out_of_bounds())?;
        let cy = u32::try_from(y).map_err(|_| out_of_bounds())?;
        if cx >= self.width() || cy >= self.height() {
            return Err(out_of_bounds());
        }
        Ok((cx, cy))
    }

    /// Current color at (x, y): the overlay if written, else the base.
    pub fn get(&self, x: i64, y: i64) -> Result<Color> {
        let (x, y) = self.check_bounds(x, y)?;
        let overlay = self.read_overlay()?;
        let px = overlay.get_pixel(x, y);
        if px[3] == 0 {
            Ok(Color::from_rgba(self.base.get_pixel(x, y)))
        } else {
            Ok(Color::from_rgba(px))
        }
    }

    pub fn set(&self, x: i64, y: i64, color: Color) -> Result<()> {
        let (x, y) = self.check_bounds(x, y)?;
        let mut overlay = self.write_overlay()?;
        overlay.put_pixel(x, y, color.to_rgba());
        Ok(())
    }

    /// Base with the overlay drawn over it.
    ///
    /// The overlay is copied under a single read lock and merged after the
    /// lock is released, so writers are only blocked for the copy.
    pub fn compose(&self) -> Result<RgbaImage> {
        let overlay = self.read_overlay()?.clone();
        let mut out = self.base.clone();
        for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
            if src[3] != 0 {
                *dst = *src;
            }
        }
        Ok(out)
    }

    /// Seed the overlay from a previously composed snapshot.
    ///
    /// Only cells that differ from the base are copied, so composing right
    /// after a restore reproduces `snapshot` exactly. Returns the number of
    /// restored cells.
    pub fn restore(&self, snapshot: &RgbaImage) -> Result<usize> {
        if snapshot.dimensions() != self.base.dimensions() {
            return Err(CanvasError::InvalidRequest(format!(
                "snapshot is {}x{}, canvas is {}x{}",
                snapshot.width(),
                snapshot.height(),
                self.width(),
                self.height()
            )));
        }

        let mut overlay = self.write_overlay()?;
        let mut restored = 0;
        for ((dst, base), src) in overlay
            .pixels_mut()
            .zip(self.base.pixels())
            .zip(snapshot.pixels())
        {
            if src != base {
                *dst = *src;
                restored += 1;
            }
        }
        Ok(restored)
    }

    fn read_overlay(&self) -> Result<RwLockReadGuard<'_, RgbaImage>> {
        self.overlay
            .read()
            .map_err(|_| CanvasError::Internal("Failed to acquire read lock on overlay".to_string()))
    }

    fn write_overlay(&self) -> Result<RwLockWriteGuard<'_, RgbaImage>> {
        self.overlay
            .write()
            .map_err(|_| CanvasError::Internal("Failed to acquire write lock on overlay".to_string()))
    }
}

impl std::fmt::Debug for GridStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridStore")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}
