//! Core data types for tile streaming

use crate::core::geo::MapId;
use crate::prelude::Arc;
use serde::{Deserialize, Serialize};

/// Identifies one tile of one map's image pyramid
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub map_id: MapId,
    pub level: u32,
    pub column: u32,
    pub row: u32,
}

impl TileKey {
    pub fn new(map_id: impl Into<MapId>, level: u32, column: u32, row: u32) -> Self {
        Self {
            map_id: map_id.into(),
            level,
            column,
            row,
        }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.map_id, self.level, self.column, self.row
        )
    }
}

/// Resource-space rectangle covered by a tile and the pixel size it is served at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl TileRegion {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64
            && x <= (self.x + self.width) as f64
            && y >= self.y as f64
            && y <= (self.y + self.height) as f64
    }
}

/// A tile requested for the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct NeededTile {
    pub key: TileKey,
    pub region: TileRegion,
    pub service_url: String,
}

/// Decoded RGBA8 tile pixels
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TileImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Image of a single repeated RGBA color, mostly useful for tests
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::new(width, height, pixels)
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Residency state of a tile as seen from outside the cache
#[derive(Debug, Clone, PartialEq)]
pub enum TileStatus {
    Loaded(Arc<TileImage>),
    Pending,
    Failed,
    Absent,
}

impl TileStatus {
    pub fn image(&self) -> Option<&Arc<TileImage>> {
        match self {
            Self::Loaded(image) => Some(image),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}
