//! Per-map and global visual overrides.

use crate::core::constants::{REMOVE_BACKGROUND_HARDNESS, REMOVE_BACKGROUND_THRESHOLD};
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};

/// Linear RGB color with channels in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbColor {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        hex_to_rgb(hex)
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

/// Parses `#rrggbb` (or `rrggbb`) into channels in `[0, 1]`
pub fn hex_to_rgb(hex: &str) -> Result<RgbColor> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MapError::Validation(format!("invalid hex color '{}'", hex)));
    }

    let channel = |range: std::ops::Range<usize>| -> Result<f32> {
        u8::from_str_radix(&digits[range], 16)
            .map(|v| v as f32 / 255.0)
            .map_err(|e| MapError::Validation(format!("invalid hex color '{}': {}", hex, e)))
    };

    Ok(RgbColor::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Colorize {
    pub color: RgbColor,
}

/// Makes pixels close to `color` transparent.
///
/// Pixels within `threshold` of the color are fully removed, the ramp back to
/// opaque is controlled by `hardness` (1 is a hard edge).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemoveBackground {
    pub color: RgbColor,
    pub threshold: f32,
    pub hardness: f32,
}

impl RemoveBackground {
    pub fn new(color: RgbColor) -> Self {
        Self {
            color,
            threshold: REMOVE_BACKGROUND_THRESHOLD,
            hardness: REMOVE_BACKGROUND_HARDNESS,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_hardness(mut self, hardness: f32) -> Self {
        self.hardness = hardness.clamp(0.0, 1.0);
        self
    }
}

/// Optional overrides; `None` means "not set" and falls back to the global value
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MapStyle {
    pub opacity: Option<f32>,
    pub colorize: Option<Colorize>,
    pub remove_background: Option<RemoveBackground>,
}

impl MapStyle {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Style actually used to draw one map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveStyle {
    pub opacity: f32,
    pub colorize: Option<Colorize>,
    pub remove_background: Option<RemoveBackground>,
}

impl EffectiveStyle {
    /// Opacity multiplies, the map's colorize and background removal win over the global ones
    pub fn resolve(global: &MapStyle, map: &MapStyle) -> Self {
        Self {
            opacity: global.opacity.unwrap_or(1.0) * map.opacity.unwrap_or(1.0),
            colorize: map.colorize.or(global.colorize),
            remove_background: map.remove_background.or(global.remove_background),
        }
    }
}

impl Default for EffectiveStyle {
    fn default() -> Self {
        Self::resolve(&MapStyle::default(), &MapStyle::default())
    }
}
