//! GPU resource manager: per-map meshes, transitions, styles and drawing.

use crate::core::geo::{MapId, Point};
use crate::core::matrix::ProjectionTransform;
use crate::prelude::HashMap;
use crate::rendering::backend::{FrameStats, GpuBackend, MapDrawCall, Vertex};
use crate::rendering::style::{Colorize, EffectiveStyle, MapStyle, RemoveBackground};
use crate::rendering::transition::AnimatedGeometry;
use crate::tiles::TileCache;
use crate::warped::WarpedMap;
use crate::{MapError, Result};
use instant::{Duration, Instant};

#[derive(Debug)]
struct MapRenderState {
    resource_vertices: Vec<Point>,
    geometry: AnimatedGeometry,
    style: MapStyle,
    z_index: usize,
    /// Geometry changed since the last upload
    dirty: bool,
    /// Projection of the last upload
    uploaded_with: Option<ProjectionTransform>,
}

impl MapRenderState {
    fn from_map(map: &WarpedMap) -> Self {
        let triangulation = map.triangulation();
        Self {
            resource_vertices: triangulation.resource_vertices.clone(),
            geometry: AnimatedGeometry::new(triangulation.geo_vertices.clone()),
            style: map.style,
            z_index: map.z_index,
            dirty: true,
            uploaded_with: None,
        }
    }

    fn vertices(&self, projection: &ProjectionTransform, now: Instant) -> Vec<Vertex> {
        self.geometry
            .at(now)
            .iter()
            .zip(&self.resource_vertices)
            .map(|(geo, resource)| {
                let clip = projection.apply(geo);
                Vertex::new(
                    [clip.x as f32, clip.y as f32],
                    [resource.x as f32, resource.y as f32],
                )
            })
            .collect()
    }
}

pub struct Renderer<B: GpuBackend> {
    backend: B,
    maps: HashMap<MapId, MapRenderState>,
    global_style: MapStyle,
    transition_duration: Duration,
    last_visible: Vec<MapId>,
}

impl<B: GpuBackend> Renderer<B> {
    pub fn new(backend: B, transition_duration: Duration) -> Self {
        Self {
            backend,
            maps: HashMap::default(),
            global_style: MapStyle::default(),
            transition_duration,
            last_visible: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn add_map(&mut self, map: &WarpedMap) {
        self.maps
            .insert(map.id.clone(), MapRenderState::from_map(map));
    }

    pub fn remove_map(&mut self, map_id: &MapId) {
        if self.maps.remove(map_id).is_some() {
            self.backend.release(map_id);
        }
        self.last_visible.retain(|id| id != map_id);
    }

    pub fn clear(&mut self) {
        for (id, _) in self.maps.drain() {
            self.backend.release(&id);
        }
        self.last_visible.clear();
    }

    pub fn contains(&self, map_id: &str) -> bool {
        self.maps.contains_key(map_id)
    }

    /// Picks up a new triangulation of `map`.
    ///
    /// With `animate` the geo vertices move to the new positions over the
    /// transition duration; otherwise (or when the mesh changed shape) the new
    /// geometry is used right away.
    pub fn update_triangulation(&mut self, map: &WarpedMap, animate: bool, now: Instant) {
        let Some(state) = self.maps.get_mut(&map.id) else {
            self.add_map(map);
            return;
        };

        let triangulation = map.triangulation();
        let same_mesh = state.resource_vertices == triangulation.resource_vertices;
        if animate && same_mesh {
            state
                .geometry
                .start(triangulation.geo_vertices.clone(), now, self.transition_duration);
        } else {
            state.resource_vertices = triangulation.resource_vertices.clone();
            state.geometry.commit(triangulation.geo_vertices.clone());
        }
        state.dirty = true;
    }

    /// Rebuilds vertex buffers of the visible maps that need it.
    ///
    /// A buffer is rebuilt when the projection changed since its last upload,
    /// its geometry changed or it is transitioning. Returns true when a redraw
    /// is needed.
    pub fn update_vertex_buffers(
        &mut self,
        projection: &ProjectionTransform,
        visible_ids: &[MapId],
        now: Instant,
    ) -> Result<bool> {
        let changed = visible_ids != self.last_visible.as_slice();
        let uploads = self.sync_buffers(projection, visible_ids, now)?;
        Ok(changed || uploads > 0)
    }

    fn sync_buffers(
        &mut self,
        projection: &ProjectionTransform,
        visible_ids: &[MapId],
        now: Instant,
    ) -> Result<usize> {
        // Off-screen maps settle too; their final geometry uploads once visible
        for (id, state) in self.maps.iter_mut() {
            if state.geometry.is_transitioning() {
                state.dirty = true;
            }
            if state.geometry.advance(now) {
                log::debug!("transition of map {} finished", id);
            }
        }

        let mut uploads = 0;
        for id in visible_ids {
            let Some(state) = self.maps.get_mut(id) else {
                continue;
            };
            if state.dirty || state.uploaded_with.as_ref() != Some(projection) {
                let vertices = state.vertices(projection, now);
                self.backend.upload_vertices(id, &vertices)?;
                state.dirty = false;
                state.uploaded_with = Some(*projection);
                uploads += 1;
            }
        }

        if uploads > 0 {
            log::trace!("uploaded {} vertex buffers", uploads);
        }
        self.last_visible = visible_ids.to_vec();
        Ok(uploads)
    }

    /// Draws the visible maps back to front using their loaded tiles.
    ///
    /// A map whose draw fails is skipped; the frame is still completed and
    /// the first draw error is returned after it.
    pub fn render(
        &mut self,
        projection: &ProjectionTransform,
        visible_ids: &[MapId],
        tiles: &TileCache,
        now: Instant,
    ) -> Result<FrameStats> {
        let mut stats = FrameStats {
            buffers_uploaded: self.sync_buffers(projection, visible_ids, now)?,
            ..FrameStats::default()
        };

        let mut ordered: Vec<(&MapId, &MapRenderState)> = visible_ids
            .iter()
            .filter_map(|id| self.maps.get(id).map(|state| (id, state)))
            .collect();
        ordered.sort_by_key(|(_, state)| state.z_index);

        self.backend.begin_frame()?;
        let mut draw_error = None;
        for (id, state) in ordered {
            let style = EffectiveStyle::resolve(&self.global_style, &state.style);
            if style.opacity <= 0.0 {
                continue;
            }
            let loaded = tiles.loaded_tiles_for_map(id);
            if loaded.is_empty() {
                continue;
            }

            let drawn = self.backend.draw_map(&MapDrawCall {
                map_id: id,
                z_index: state.z_index,
                style,
                tiles: &loaded,
            });
            match drawn {
                Ok(()) => {
                    stats.maps_drawn += 1;
                    stats.tiles_drawn += loaded.len();
                }
                Err(e) => {
                    log::warn!("failed to draw map {}: {}", id, e);
                    if draw_error.is_none() {
                        draw_error = Some(e);
                    }
                }
            }
        }
        self.backend.end_frame()?;

        match draw_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    pub fn is_transitioning(&self) -> bool {
        self.maps.values().any(|s| s.geometry.is_transitioning())
    }

    pub fn set_z_index(&mut self, map_id: &str, z_index: usize) {
        if let Some(state) = self.maps.get_mut(map_id) {
            state.z_index = z_index;
        }
    }

    pub fn z_index(&self, map_id: &str) -> Option<usize> {
        self.maps.get(map_id).map(|s| s.z_index)
    }

    pub fn global_style(&self) -> &MapStyle {
        &self.global_style
    }

    pub fn set_global_style(&mut self, style: MapStyle) {
        self.global_style = style;
    }

    pub fn map_style(&self, map_id: &str) -> Option<&MapStyle> {
        self.maps.get(map_id).map(|s| &s.style)
    }

    pub fn set_map_style(&mut self, map_id: &str, style: MapStyle) -> Result<()> {
        self.state_mut(map_id)?.style = style;
        Ok(())
    }

    pub fn effective_style(&self, map_id: &str) -> Option<EffectiveStyle> {
        self.maps
            .get(map_id)
            .map(|s| EffectiveStyle::resolve(&self.global_style, &s.style))
    }

    pub fn set_opacity(&mut self, opacity: Option<f32>) {
        self.global_style.opacity = opacity.map(|o| o.clamp(0.0, 1.0));
    }

    pub fn set_map_opacity(&mut self, map_id: &str, opacity: Option<f32>) -> Result<()> {
        self.state_mut(map_id)?.style.opacity = opacity.map(|o| o.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn set_colorize(&mut self, colorize: Option<Colorize>) {
        self.global_style.colorize = colorize;
    }

    pub fn set_map_colorize(&mut self, map_id: &str, colorize: Option<Colorize>) -> Result<()> {
        self.state_mut(map_id)?.style.colorize = colorize;
        Ok(())
    }

    pub fn set_remove_background(&mut self, remove_background: Option<RemoveBackground>) {
        self.global_style.remove_background = remove_background;
    }

    pub fn set_map_remove_background(
        &mut self,
        map_id: &str,
        remove_background: Option<RemoveBackground>,
    ) -> Result<()> {
        self.state_mut(map_id)?.style.remove_background = remove_background;
        Ok(())
    }

    fn state_mut(&mut self, map_id: &str) -> Result<&mut MapRenderState> {
        self.maps
            .get_mut(map_id)
            .ok_or_else(|| MapError::NotFound(map_id.to_string()))
    }
}

impl<B: GpuBackend + std::fmt::Debug> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend)
            .field("maps", &self.maps.len())
            .field("global_style", &self.global_style)
            .finish()
    }
}
