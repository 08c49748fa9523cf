use serde::{Deserialize, Serialize};

use crate::grid::Color;

/// Color of a single pixel, keyed `R`, `G`, `B` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelResponse {
    #[serde(rename = "R")]
    pub r: u8,
    #[serde(rename = "G")]
    pub g: u8,
    #[serde(rename = "B")]
    pub b: u8,
}

impl From<Color> for PixelResponse {
    fn from(color: Color) -> Self {
        Self {
            r: color.r,
            g: color.g,
            b: color.b,
        }
    }
}

/// JSON form of a pixel placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacePixelRequest {
    pub x: i64,
    pub y: i64,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PlacePixelRequest {
    pub fn color(&self) -> Color {
        Color::new(self.r, self.g, self.b)
    }

    pub fn placed_message(&self) -> String {
        format!("Pixel successfully placed at: {},{}", self.x, self.y)
    }
}
