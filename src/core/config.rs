//! Configuration system for rendering and tile streaming
//!
//! Options are grouped per concern and resolved from a profile preset, or
//! given as a fully custom set (which can also be loaded from JSON).

use crate::core::constants::{
    MAX_CONCURRENT_FETCHES, MAX_SUBDIVISIONS, THROTTLE_WAIT_MS, TRANSITION_DURATION_MS,
    TRIANGULATION_DENSITY,
};
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderProfile {
    Balanced,
    LowQuality,
    HighQuality,
    Custom(RenderOptions),
}

impl RenderProfile {
    pub fn resolve(&self) -> RenderOptions {
        match self {
            Self::Balanced => RenderOptions {
                viewport: ViewportUpdateConfig {
                    throttle_wait_ms: THROTTLE_WAIT_MS,
                },
                tiles: TileFetchConfig {
                    max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
                },
                transition: TransitionConfig {
                    enabled: true,
                    duration_ms: TRANSITION_DURATION_MS,
                },
                mesh: MeshConfig {
                    triangulation_density: TRIANGULATION_DENSITY,
                    max_subdivisions: MAX_SUBDIVISIONS,
                },
                rendering: GpuRenderingConfig {
                    texture_filter: TextureFilterMode::Linear,
                    clear_color: [0.0, 0.0, 0.0, 0.0],
                },
            },
            Self::LowQuality => RenderOptions {
                viewport: ViewportUpdateConfig {
                    throttle_wait_ms: 1000,
                },
                tiles: TileFetchConfig {
                    max_concurrent_fetches: 4,
                },
                transition: TransitionConfig {
                    enabled: false,
                    duration_ms: 0,
                },
                mesh: MeshConfig {
                    triangulation_density: 4,
                    max_subdivisions: 8,
                },
                rendering: GpuRenderingConfig {
                    texture_filter: TextureFilterMode::Nearest,
                    clear_color: [0.0, 0.0, 0.0, 0.0],
                },
            },
            Self::HighQuality => RenderOptions {
                viewport: ViewportUpdateConfig {
                    throttle_wait_ms: 250,
                },
                tiles: TileFetchConfig {
                    max_concurrent_fetches: 32,
                },
                transition: TransitionConfig {
                    enabled: true,
                    duration_ms: 1000,
                },
                mesh: MeshConfig {
                    triangulation_density: 32,
                    max_subdivisions: 64,
                },
                rendering: GpuRenderingConfig {
                    texture_filter: TextureFilterMode::Linear,
                    clear_color: [0.0, 0.0, 0.0, 0.0],
                },
            },
            Self::Custom(options) => options.clone(),
        }
    }
}

impl Default for RenderProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub viewport: ViewportUpdateConfig,
    pub tiles: TileFetchConfig,
    pub transition: TransitionConfig,
    pub mesh: MeshConfig,
    pub rendering: GpuRenderingConfig,
}

impl RenderOptions {
    /// Parses options from JSON; missing sections fall back to the balanced preset
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderProfile::default().resolve()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportUpdateConfig {
    /// Minimum delay between two need-set recomputations
    pub throttle_wait_ms: u64,
}

impl ViewportUpdateConfig {
    pub fn throttle_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.throttle_wait_ms)
    }
}

impl Default for ViewportUpdateConfig {
    fn default() -> Self {
        Self {
            throttle_wait_ms: THROTTLE_WAIT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileFetchConfig {
    pub max_concurrent_fetches: usize,
}

impl Default for TileFetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub enabled: bool,
    pub duration_ms: u64,
}

impl TransitionConfig {
    /// Effective duration, zero when transitions are disabled
    pub fn duration(&self) -> std::time::Duration {
        if self.enabled {
            std::time::Duration::from_millis(self.duration_ms)
        } else {
            std::time::Duration::ZERO
        }
    }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ms: TRANSITION_DURATION_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Subdivisions along the diagonal of the resource mask bounds
    pub triangulation_density: u32,
    pub max_subdivisions: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            triangulation_density: TRIANGULATION_DENSITY,
            max_subdivisions: MAX_SUBDIVISIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuRenderingConfig {
    pub texture_filter: TextureFilterMode,
    /// Premultiplied RGBA
    pub clear_color: [f64; 4],
}

impl Default for GpuRenderingConfig {
    fn default() -> Self {
        Self {
            texture_filter: TextureFilterMode::Linear,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureFilterMode {
    Nearest,
    Linear,
}

impl TextureFilterMode {
    #[cfg(feature = "render")]
    pub fn to_wgpu_filter(&self) -> (wgpu::FilterMode, wgpu::FilterMode) {
        match self {
            Self::Nearest => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Nearest),
            Self::Linear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Linear),
        }
    }
}

impl Default for TextureFilterMode {
    fn default() -> Self {
        Self::Linear
    }
}
