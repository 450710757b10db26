//! Prelude module for common warpmap types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use warpmap::prelude::*;`

pub use crate::core::{
    bounds::Bounds,
    config::{
        GpuRenderingConfig, MeshConfig, RenderOptions, RenderProfile, TextureFilterMode,
        TileFetchConfig, TransitionConfig, ViewportUpdateConfig,
    },
    geo::{MapId, Point, Ring},
    matrix::ProjectionTransform,
};

pub use crate::events::{EventQueue, WarpedMapEvent};

pub use crate::layer::WarpedMapLayer;

pub use crate::rendering::{
    Colorize, EffectiveStyle, FrameStats, GpuBackend, HeadlessBackend, MapStyle, RemoveBackground,
    Renderer, RgbColor,
};

#[cfg(feature = "render")]
pub use crate::rendering::WgpuBackend;

pub use crate::runtime::{spawn, AsyncSpawner, QueuedSpawner};

#[cfg(feature = "tokio-runtime")]
pub use crate::runtime::TokioSpawner;

pub use crate::tiles::{
    HttpTileFetcher, MemoryTileFetcher, NeededTile, TileCache, TileFetcher, TileImage, TileKey,
    TileStatus,
};

pub use crate::transform::{Gcp, TransformationType, Transformer};

pub use crate::viewport::{FrameState, ViewportTracker};

pub use crate::warped::{ImageInfo, MapDescriptor, WarpedMap};

pub use crate::world::{ReorderOp, StyleTarget, World};

pub use crate::{Error as MapError, Result};

pub use std::{
    pin::Pin,
    sync::{Arc, Mutex},
};

pub use instant::{Duration, Instant};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};

pub use futures::Future;
