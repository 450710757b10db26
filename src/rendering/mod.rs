pub mod backend;
pub mod headless;
pub mod renderer;
pub mod style;
pub mod transition;
#[cfg(feature = "render")]
pub mod wgpu_backend;

// Re-export main types
pub use backend::{FrameStats, GpuBackend, MapDrawCall, Vertex};
pub use headless::{DrawCommand, HeadlessBackend, RecordedDraw};
pub use renderer::Renderer;
pub use style::{Colorize, EffectiveStyle, MapStyle, RemoveBackground, RgbColor};
pub use transition::{AnimatedGeometry, TransitionState};
#[cfg(feature = "render")]
pub use wgpu_backend::WgpuBackend;

#[cfg(feature = "render")]
pub mod shaders {
    pub const WARPED_MAP: &str = include_str!("shaders/warped_map.wgsl");
}
