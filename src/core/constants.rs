//! Core constants shared by the registry, viewport and renderer.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in resource pixels (IIIF default).
pub const TILE_SIZE: u32 = 256;

/// Minimum time between two need-set recomputations while the view moves.
pub const THROTTLE_WAIT_MS: u64 = 500;

/// Duration of the animated transition after a transformation change.
pub const TRANSITION_DURATION_MS: u64 = 750;

/// Number of triangle subdivisions along the diagonal of a resource mask.
pub const TRIANGULATION_DENSITY: u32 = 16;

/// Upper bound for the per-triangle subdivision count.
pub const MAX_SUBDIVISIONS: u32 = 32;

/// Samples per edge when inverse-mapping the visible extent to resource space.
pub const EXTENT_SAMPLES_PER_EDGE: usize = 8;

/// Concurrent tile fetches allowed by default.
pub const MAX_CONCURRENT_FETCHES: usize = 16;

/// Background removal defaults when only a color is given.
pub const REMOVE_BACKGROUND_THRESHOLD: f32 = 0.0;
pub const REMOVE_BACKGROUND_HARDNESS: f32 = 0.7;
