use crate::core::geo::MapId;
use crate::prelude::HashMap;
use crate::rendering::backend::{GpuBackend, MapDrawCall, Vertex};
use crate::rendering::style::EffectiveStyle;
use crate::tiles::TileKey;
use crate::{MapError, Result};

/// Commands recorded by the headless back end
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Upload { map_id: MapId, vertex_count: usize },
    Release { map_id: MapId },
    BeginFrame,
    DrawMap(RecordedDraw),
    EndFrame,
}

/// A recorded map draw, including the vertices bound at draw time
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub map_id: MapId,
    pub z_index: usize,
    pub style: EffectiveStyle,
    pub tiles: Vec<TileKey>,
    pub vertices: Vec<Vertex>,
}

/// Back end without a GPU: keeps vertex buffers in memory and records every
/// command, which makes the renderer observable in tests.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    buffers: HashMap<MapId, Vec<Vertex>>,
    commands: Vec<DrawCommand>,
    in_frame: bool,
    fail_next_draw: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Makes the next `draw_map` fail, as a broken tile upload would
    pub fn fail_next_draw(&mut self) {
        self.fail_next_draw = true;
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn buffer(&self, map_id: &str) -> Option<&[Vertex]> {
        self.buffers.get(map_id).map(Vec::as_slice)
    }

    pub fn upload_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Upload { .. }))
            .count()
    }

    /// Draws of the most recently completed frame, in submission order
    pub fn last_frame(&self) -> Vec<&RecordedDraw> {
        let end = self
            .commands
            .iter()
            .rposition(|c| *c == DrawCommand::EndFrame);
        let Some(end) = end else {
            return Vec::new();
        };
        let begin = self.commands[..end]
            .iter()
            .rposition(|c| *c == DrawCommand::BeginFrame)
            .unwrap_or(0);

        self.commands[begin..end]
            .iter()
            .filter_map(|c| match c {
                DrawCommand::DrawMap(draw) => Some(draw),
                _ => None,
            })
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| **c == DrawCommand::EndFrame)
            .count()
    }
}

impl GpuBackend for HeadlessBackend {
    fn upload_vertices(&mut self, map_id: &MapId, vertices: &[Vertex]) -> Result<()> {
        self.buffers.insert(map_id.clone(), vertices.to_vec());
        self.commands.push(DrawCommand::Upload {
            map_id: map_id.clone(),
            vertex_count: vertices.len(),
        });
        Ok(())
    }

    fn release(&mut self, map_id: &MapId) {
        if self.buffers.remove(map_id).is_some() {
            self.commands.push(DrawCommand::Release {
                map_id: map_id.clone(),
            });
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.in_frame {
            return Err(MapError::Render("frame already started".to_string()));
        }
        self.in_frame = true;
        self.commands.push(DrawCommand::BeginFrame);
        Ok(())
    }

    fn draw_map(&mut self, call: &MapDrawCall<'_>) -> Result<()> {
        if !self.in_frame {
            return Err(MapError::Render("draw outside of a frame".to_string()));
        }
        if std::mem::take(&mut self.fail_next_draw) {
            return Err(MapError::Render(format!("injected failure for {}", call.map_id)));
        }
        let vertices = self
            .buffers
            .get(call.map_id)
            .ok_or_else(|| MapError::Render(format!("no vertex buffer for {}", call.map_id)))?;

        self.commands.push(DrawCommand::DrawMap(RecordedDraw {
            map_id: call.map_id.clone(),
            z_index: call.z_index,
            style: call.style,
            tiles: call.tiles.iter().map(|t| t.key.clone()).collect(),
            vertices: vertices.clone(),
        }));
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.in_frame = false;
        self.commands.push(DrawCommand::EndFrame);
        Ok(())
    }
}
