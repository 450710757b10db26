use crate::core::geo::MapId;
use crate::rendering::style::EffectiveStyle;
use crate::tiles::CachedTile;
use crate::Result;

/// Mesh vertex: clip-space position plus the resource pixel it samples
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "render", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct Vertex {
    pub position: [f32; 2],
    pub resource: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 2], resource: [f32; 2]) -> Self {
        Self { position, resource }
    }
}

/// One map to draw in the current frame
#[derive(Debug, Clone)]
pub struct MapDrawCall<'a> {
    pub map_id: &'a MapId,
    pub z_index: usize,
    pub style: EffectiveStyle,
    /// Loaded tiles; the mesh is drawn once per tile, clipped to the tile region
    pub tiles: &'a [CachedTile],
}

/// Per-frame counters returned by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub maps_drawn: usize,
    pub tiles_drawn: usize,
    pub buffers_uploaded: usize,
}

/// Graphics back end the renderer drives.
///
/// Draw calls arrive between `begin_frame` and `end_frame` in ascending
/// z-index order and must be composited with premultiplied-alpha blending.
pub trait GpuBackend {
    fn upload_vertices(&mut self, map_id: &MapId, vertices: &[Vertex]) -> Result<()>;

    /// Frees every resource held for `map_id`
    fn release(&mut self, map_id: &MapId);

    fn begin_frame(&mut self) -> Result<()>;

    fn draw_map(&mut self, call: &MapDrawCall<'_>) -> Result<()>;

    fn end_frame(&mut self) -> Result<()>;
}
