pub mod cache;
pub mod source;
pub mod types;

// Re-exports for convenience
pub use cache::{CachedTile, TileCache};
pub use source::{HttpTileFetcher, MemoryTileFetcher, TileFetcher};
pub use types::{NeededTile, TileImage, TileKey, TileRegion, TileStatus};
