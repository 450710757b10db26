//! The warped map layer: wires the registry, the viewport tracker, the tile
//! cache and the renderer together.
//!
//! Mutations go to the [`World`], whose events are dispatched in order to the
//! other components and then to external subscribers. The host drives the
//! layer with [`render`](WarpedMapLayer::render) once per frame and
//! [`tick`](WarpedMapLayer::tick) in between.

use crate::core::config::{RenderOptions, RenderProfile};
use crate::core::geo::{MapId, Ring};
use crate::events::{EventQueue, WarpedMapEvent};
use crate::prelude::Arc;
use crate::rendering::backend::{FrameStats, GpuBackend};
use crate::rendering::renderer::Renderer;
use crate::rendering::style::{hex_to_rgb, Colorize, RemoveBackground};
use crate::runtime::{default_spawner, AsyncSpawner};
use crate::throttle::Throttle;
use crate::tiles::{HttpTileFetcher, NeededTile, TileCache, TileFetcher};
use crate::transform::TransformationType;
use crate::viewport::{FrameState, ViewportTracker};
use crate::warped::{MapDescriptor, WarpedMap};
use crate::world::{StyleTarget, World};
use crate::Result;
use crossbeam_channel::Receiver;
use instant::Instant;

pub struct WarpedMapLayer<B: GpuBackend> {
    world: World,
    tracker: ViewportTracker,
    tiles: TileCache,
    renderer: Renderer<B>,
    throttle: Throttle,
    events: EventQueue,
    options: RenderOptions,
    /// Latest frame passed to `render`
    frame: Option<FrameState>,
    /// The registry changed in a way that affects the need-set
    update_requested: bool,
    redraw_requested: bool,
}

impl<B: GpuBackend> WarpedMapLayer<B> {
    pub fn new(
        backend: B,
        fetcher: Arc<dyn TileFetcher>,
        spawner: Arc<dyn AsyncSpawner>,
        options: RenderOptions,
    ) -> Self {
        Self {
            world: World::new(options.mesh.clone()),
            tracker: ViewportTracker::new(),
            tiles: TileCache::new(fetcher, spawner, options.tiles.max_concurrent_fetches),
            renderer: Renderer::new(backend, options.transition.duration()),
            throttle: Throttle::new(options.viewport.throttle_wait()),
            events: EventQueue::new(),
            options,
            frame: None,
            update_requested: false,
            redraw_requested: false,
        }
    }

    /// Layer fetching tiles over HTTP on the default spawner
    pub fn from_profile(backend: B, profile: RenderProfile) -> Self {
        Self::new(
            backend,
            Arc::new(HttpTileFetcher::new()),
            default_spawner(),
            profile.resolve(),
        )
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn renderer(&self) -> &Renderer<B> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer<B> {
        &mut self.renderer
    }

    pub fn tile_cache(&self) -> &TileCache {
        &self.tiles
    }

    pub fn get_map(&self, id: &str) -> Option<&WarpedMap> {
        self.world.get_map(id)
    }

    /// Ids of the maps in the viewport as of the last need-set computation
    pub fn maps_in_viewport(&self) -> &[MapId] {
        self.tracker.maps_in_viewport()
    }

    /// Receives every event after the layer's components have handled it
    pub fn subscribe(&mut self) -> Receiver<WarpedMapEvent> {
        self.events.subscribe()
    }

    pub fn needs_redraw(&self) -> bool {
        self.redraw_requested || self.renderer.is_transitioning()
    }

    /// When a throttled need-set update becomes due, for hosts that schedule
    /// their next `tick`
    pub fn next_update_at(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    // Registry

    pub fn add_map(&mut self, descriptor: MapDescriptor) -> Result<MapId> {
        let result = self.world.add_map(descriptor);
        self.dispatch(Instant::now());
        result
    }

    pub fn add_map_json(&mut self, json: &str) -> Result<MapId> {
        self.add_map(MapDescriptor::from_json(json)?)
    }

    pub fn add_maps<I>(&mut self, descriptors: I) -> Vec<Result<MapId>>
    where
        I: IntoIterator<Item = MapDescriptor>,
    {
        let results = self.world.add_maps(descriptors);
        self.dispatch(Instant::now());
        results
    }

    pub fn remove_map(&mut self, id: &str) -> Result<MapId> {
        let result = self.world.remove_map(id);
        self.dispatch(Instant::now());
        result
    }

    pub fn remove_maps(&mut self, ids: &[MapId]) -> Vec<Result<MapId>> {
        let results = self.world.remove_maps(ids);
        self.dispatch(Instant::now());
        results
    }

    pub fn clear(&mut self) {
        self.world.clear();
        self.dispatch(Instant::now());
    }

    pub fn show_maps(&mut self, ids: &[MapId]) -> Vec<Result<MapId>> {
        let results = self.world.show_maps(ids);
        self.dispatch(Instant::now());
        results
    }

    pub fn hide_maps(&mut self, ids: &[MapId]) -> Vec<Result<MapId>> {
        let results = self.world.hide_maps(ids);
        self.dispatch(Instant::now());
        results
    }

    pub fn set_resource_mask(&mut self, id: &str, ring: Ring) -> Result<()> {
        let result = self.world.set_resource_mask(id, ring);
        self.dispatch(Instant::now());
        result
    }

    /// Refits the transformation of `ids`; the geometry change is animated
    /// when transitions are enabled.
    pub fn set_transformation(
        &mut self,
        ids: &[MapId],
        kind: TransformationType,
    ) -> Vec<Result<MapId>> {
        let results = self.world.set_transformation(ids, kind);
        self.dispatch(Instant::now());
        results
    }

    pub fn bring_maps_to_front(&mut self, ids: &[MapId]) -> bool {
        let changed = self.world.bring_maps_to_front(ids);
        self.dispatch(Instant::now());
        changed
    }

    pub fn send_maps_to_back(&mut self, ids: &[MapId]) -> bool {
        let changed = self.world.send_maps_to_back(ids);
        self.dispatch(Instant::now());
        changed
    }

    pub fn bring_maps_forward(&mut self, ids: &[MapId]) -> bool {
        let changed = self.world.bring_maps_forward(ids);
        self.dispatch(Instant::now());
        changed
    }

    pub fn send_maps_backward(&mut self, ids: &[MapId]) -> bool {
        let changed = self.world.send_maps_backward(ids);
        self.dispatch(Instant::now());
        changed
    }

    // Styles

    pub fn set_opacity(&mut self, opacity: f32) {
        self.style_op(|world| world.set_opacity(StyleTarget::Global, Some(opacity)))
            .ok();
    }

    pub fn reset_opacity(&mut self) {
        self.style_op(|world| world.set_opacity(StyleTarget::Global, None))
            .ok();
    }

    pub fn set_map_opacity(&mut self, id: &str, opacity: f32) -> Result<()> {
        self.style_op(|world| world.set_opacity(StyleTarget::Map(id.to_string()), Some(opacity)))
    }

    pub fn reset_map_opacity(&mut self, id: &str) -> Result<()> {
        self.style_op(|world| world.set_opacity(StyleTarget::Map(id.to_string()), None))
    }

    /// Tints every map with a `#rrggbb` color
    pub fn set_colorize(&mut self, hex: &str) -> Result<()> {
        let colorize = Colorize {
            color: hex_to_rgb(hex)?,
        };
        self.style_op(|world| world.set_colorize(StyleTarget::Global, Some(colorize)))
    }

    pub fn reset_colorize(&mut self) {
        self.style_op(|world| world.set_colorize(StyleTarget::Global, None))
            .ok();
    }

    pub fn set_map_colorize(&mut self, id: &str, hex: &str) -> Result<()> {
        let colorize = Colorize {
            color: hex_to_rgb(hex)?,
        };
        self.style_op(|world| world.set_colorize(StyleTarget::Map(id.to_string()), Some(colorize)))
    }

    pub fn reset_map_colorize(&mut self, id: &str) -> Result<()> {
        self.style_op(|world| world.set_colorize(StyleTarget::Map(id.to_string()), None))
    }

    /// Makes pixels close to the `#rrggbb` color transparent on every map
    pub fn set_remove_background(&mut self, hex: &str, threshold: f32, hardness: f32) -> Result<()> {
        let remove = remove_background(hex, threshold, hardness)?;
        self.style_op(|world| world.set_remove_background(StyleTarget::Global, Some(remove)))
    }

    pub fn reset_remove_background(&mut self) {
        self.style_op(|world| world.set_remove_background(StyleTarget::Global, None))
            .ok();
    }

    pub fn set_map_remove_background(
        &mut self,
        id: &str,
        hex: &str,
        threshold: f32,
        hardness: f32,
    ) -> Result<()> {
        let remove = remove_background(hex, threshold, hardness)?;
        self.style_op(|world| {
            world.set_remove_background(StyleTarget::Map(id.to_string()), Some(remove))
        })
    }

    pub fn reset_map_remove_background(&mut self, id: &str) -> Result<()> {
        self.style_op(|world| world.set_remove_background(StyleTarget::Map(id.to_string()), None))
    }

    fn style_op(&mut self, op: impl FnOnce(&mut World) -> Result<()>) -> Result<()> {
        let result = op(&mut self.world);
        self.dispatch(Instant::now());
        result
    }

    // Frame loop

    /// Renders `frame`.
    ///
    /// Vertex buffers are brought up to date first. The need-set is
    /// recomputed when the frame or the registry changed, subject to the
    /// throttle; enter and leave events are delivered before the tile cache
    /// sees the new need-set.
    pub fn render(&mut self, frame: FrameState, now: Instant) -> Result<FrameStats> {
        self.dispatch(now);

        let frame_changed = self.frame.as_ref() != Some(&frame);
        self.frame = Some(frame);
        if frame_changed || self.update_requested {
            self.update_requested = false;
            if self.throttle.call(now) {
                self.update_need_set(&frame, now);
            } else {
                log::trace!("need-set update throttled");
            }
        } else if self.throttle.poll_trailing(now) {
            log::debug!("running trailing need-set update");
            self.update_need_set(&frame, now);
        }

        self.poll_tiles(now);
        self.draw(&frame, now)
    }

    /// Applies finished fetches and fires a due trailing update. Redraws the
    /// latest frame when anything changed and returns its stats.
    pub fn tick(&mut self, now: Instant) -> Result<Option<FrameStats>> {
        self.dispatch(now);
        self.poll_tiles(now);

        let Some(frame) = self.frame else {
            return Ok(None);
        };
        if self.throttle.poll_trailing(now) {
            log::debug!("running trailing need-set update");
            self.update_need_set(&frame, now);
        } else if self.update_requested && self.throttle.call(now) {
            self.update_requested = false;
            self.update_need_set(&frame, now);
        }

        if !self.needs_redraw() {
            return Ok(None);
        }
        self.draw(&frame, now).map(Some)
    }

    fn update_need_set(&mut self, frame: &FrameState, now: Instant) {
        let needed: Vec<NeededTile> = self.tracker.compute_frame(&self.world, frame);
        self.events.extend(self.tracker.take_events());
        self.dispatch(now);

        if needed.is_empty() {
            log::debug!("empty need-set, keeping cached tiles");
        } else {
            self.tiles.set_needed(&needed);
        }
        self.events.extend(self.tiles.take_events());
        self.dispatch(now);
    }

    fn poll_tiles(&mut self, now: Instant) {
        if self.tiles.poll() > 0 {
            self.redraw_requested = true;
        }
        self.events.extend(self.tiles.take_events());
        self.dispatch(now);
    }

    fn draw(&mut self, frame: &FrameState, now: Instant) -> Result<FrameStats> {
        let visible: Vec<MapId> = self
            .tracker
            .maps_in_viewport()
            .iter()
            .filter(|id| self.world.get_map(id).map(|m| m.visible).unwrap_or(false))
            .cloned()
            .collect();

        let stats = self
            .renderer
            .render(&frame.projection, &visible, &self.tiles, now)?;
        self.redraw_requested = false;
        Ok(stats)
    }

    /// Hands pending registry events to the components, then to subscribers
    fn dispatch(&mut self, now: Instant) {
        self.events.extend(self.world.take_events());
        while let Some(event) = self.events.pop() {
            if event.needs_redraw() {
                self.redraw_requested = true;
            }
            self.handle(&event, now);
        }
    }

    fn handle(&mut self, event: &WarpedMapEvent, now: Instant) {
        match event {
            WarpedMapEvent::Added(id) => {
                if let Some(map) = self.world.get_map(id) {
                    self.renderer.add_map(map);
                }
                self.update_requested = true;
            }
            WarpedMapEvent::Removed(id) => {
                self.renderer.remove_map(id);
                self.tracker.forget(id);
                self.tiles.remove_map(id);
                self.sync_z_indices();
                self.update_requested = true;
            }
            WarpedMapEvent::Cleared => {
                self.throttle.cancel();
                self.renderer.clear();
                self.tracker.clear();
                self.tiles.clear();
            }
            WarpedMapEvent::VisibilityChanged(_) => {
                self.update_requested = true;
            }
            WarpedMapEvent::StackingChanged(_) => {
                self.sync_z_indices();
                self.update_requested = true;
            }
            WarpedMapEvent::MaskUpdated(id) => {
                if let Some(map) = self.world.get_map(id) {
                    self.renderer.update_triangulation(map, false, now);
                }
                self.update_requested = true;
            }
            WarpedMapEvent::TransformationChanged(ids) => {
                let animate = self.options.transition.enabled;
                for id in ids {
                    if let Some(map) = self.world.get_map(id) {
                        self.renderer.update_triangulation(map, animate, now);
                    }
                }
                self.update_requested = true;
            }
            WarpedMapEvent::Changed(ids) => {
                if ids.is_empty() {
                    self.renderer.set_global_style(*self.world.global_style());
                }
                for id in ids {
                    if let Some(map) = self.world.get_map(id) {
                        if let Err(e) = self.renderer.set_map_style(id, map.style) {
                            log::warn!("style of map {} not synced: {}", id, e);
                        }
                    }
                }
            }
            WarpedMapEvent::MapEntered(_)
            | WarpedMapEvent::MapLeft(_)
            | WarpedMapEvent::TileLoaded(_)
            | WarpedMapEvent::AllTilesLoaded => {}
        }
    }

    fn sync_z_indices(&mut self) {
        for map in self.world.maps() {
            self.renderer.set_z_index(&map.id, map.z_index);
        }
    }
}

fn remove_background(hex: &str, threshold: f32, hardness: f32) -> Result<RemoveBackground> {
    Ok(RemoveBackground::new(hex_to_rgb(hex)?)
        .with_threshold(threshold)
        .with_hardness(hardness))
}

impl<B: GpuBackend + std::fmt::Debug> std::fmt::Debug for WarpedMapLayer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarpedMapLayer")
            .field("maps", &self.world.len())
            .field("in_viewport", &self.tracker.maps_in_viewport())
            .field("tiles", &self.tiles.len())
            .field("renderer", &self.renderer)
            .finish()
    }
}
