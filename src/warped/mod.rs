//! The warped map entity and its mesh.

pub mod map;
pub mod triangulation;

pub use map::{ImageInfo, MapDescriptor, WarpedMap};
pub use triangulation::Triangulation;
