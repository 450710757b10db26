//! # warpmap
//!
//! Rendering core for georeferenced historical maps.
//!
//! Each map image is warped onto the viewer's coordinate space through a
//! triangulated mesh derived from its ground control points. Only the image
//! tiles the current viewport needs are streamed, and maps are composited
//! back to front with per-map opacity and color filters.
//!
//! The entry point is [`WarpedMapLayer`], driven by the host once per frame
//! with a [`FrameState`].

pub mod core;
pub mod events;
pub mod layer;
pub mod prelude;
pub mod rendering;
pub mod runtime;
pub mod spatial;
pub mod throttle;
pub mod tiles;
pub mod transform;
pub mod viewport;
pub mod warped;
pub mod world;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    bounds::Bounds,
    config::{RenderOptions, RenderProfile},
    geo::{MapId, Point, Ring},
    matrix::ProjectionTransform,
};

pub use events::{EventQueue, WarpedMapEvent};

pub use layer::WarpedMapLayer;

pub use rendering::{FrameStats, GpuBackend, HeadlessBackend, MapStyle, Renderer};

#[cfg(feature = "render")]
pub use rendering::WgpuBackend;

pub use spatial::SpatialIndex;

pub use throttle::Throttle;

pub use tiles::{HttpTileFetcher, TileCache, TileFetcher, TileKey};

pub use transform::{Gcp, TransformationType, Transformer};

pub use viewport::{FrameState, ViewportTracker};

pub use warped::{ImageInfo, MapDescriptor, WarpedMap};

pub use world::World;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Map not found: {0}")]
    NotFound(String),

    #[error("Transformation error: {0}")]
    Transformation(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Graphics backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error type alias for convenience
pub type Error = MapError;
