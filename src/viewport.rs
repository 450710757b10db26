//! Turns the current view into the set of maps it shows and the tiles it needs.

use crate::core::bounds::Bounds;
use crate::core::constants::EXTENT_SAMPLES_PER_EDGE;
use crate::core::geo::{MapId, Point};
use crate::core::matrix::ProjectionTransform;
use crate::events::WarpedMapEvent;
use crate::prelude::HashSet;
use crate::tiles::types::{NeededTile, TileKey};
use crate::warped::WarpedMap;
use crate::world::World;
use geo::Intersects;
use serde::{Deserialize, Serialize};

/// What the host is showing for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameState {
    /// Viewport size in device pixels
    pub size_px: Point,
    /// Axis-aligned view-space bounds of the visible area
    pub extent: Bounds,
    /// View space to clip space
    pub projection: ProjectionTransform,
}

impl FrameState {
    /// Frame for a view of `size_px` device pixels centered on `center`,
    /// at `resolution` view units per device pixel and rotated by `rotation` radians.
    pub fn new(size_px: Point, center: Point, resolution: f64, rotation: f64) -> Self {
        let projection = ProjectionTransform::from_view(size_px, resolution, rotation, center);
        let half = Point::new(size_px.x * resolution / 2.0, size_px.y * resolution / 2.0);
        let extent = match projection.invert() {
            Some(inverse) => {
                let clip = Bounds::from_coords(-1.0, -1.0, 1.0, 1.0).corners();
                let corners: Vec<Point> = clip.iter().map(|p| inverse.apply(p)).collect();
                Bounds::from_points(corners.iter())
                    .unwrap_or_else(|| Bounds::new(center.subtract(&half), center.add(&half)))
            }
            None => Bounds::new(center.subtract(&half), center.add(&half)),
        };

        Self {
            size_px,
            extent,
            projection,
        }
    }

    /// View units covered by one device pixel
    pub fn view_units_per_device_pixel(&self) -> f64 {
        let pixels = (self.size_px.x * self.size_px.y).abs().sqrt();
        let scale = self.projection.scale_factor();
        if scale > 0.0 && scale.is_finite() && pixels > 0.0 {
            // clip space spans two units across the viewport
            return 2.0 / (scale * pixels);
        }
        if pixels > 0.0 {
            (self.extent.area() / (pixels * pixels)).sqrt()
        } else {
            0.0
        }
    }
}

/// Tracks which maps intersect the viewport and derives the tile need-set
#[derive(Debug)]
pub struct ViewportTracker {
    /// Members of the last computed frame, ascending z index
    members: Vec<MapId>,
    events: Vec<WarpedMapEvent>,
    samples_per_edge: usize,
}

impl ViewportTracker {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            events: Vec::new(),
            samples_per_edge: EXTENT_SAMPLES_PER_EDGE,
        }
    }

    /// Updates membership (emitting enter/leave events) and returns the tiles
    /// needed for `frame`, ordered by z index, level, row and column.
    pub fn compute_frame(&mut self, world: &World, frame: &FrameState) -> Vec<NeededTile> {
        let extent_polygon = frame.extent.to_rect();
        let mut visible: Vec<&WarpedMap> = world
            .query(&frame.extent)
            .iter()
            .filter_map(|id| world.get_map(id))
            .filter(|map| map.visible && !map.is_degenerate())
            .filter(|map| map.geo_polygon().intersects(&extent_polygon))
            .collect();
        visible.sort_by_key(|map| map.z_index);

        self.update_membership(visible.iter().map(|map| map.id.clone()).collect());

        let view_per_device = frame.view_units_per_device_pixel();
        let needed: Vec<NeededTile> = visible
            .iter()
            .flat_map(|map| self.tiles_for_map(map, frame, view_per_device))
            .collect();

        log::debug!(
            "frame: {} maps in viewport, {} tiles needed",
            self.members.len(),
            needed.len()
        );
        needed
    }

    fn update_membership(&mut self, next: Vec<MapId>) {
        let next_set: HashSet<&MapId> = next.iter().collect();
        let current: HashSet<&MapId> = self.members.iter().collect();

        let mut left: Vec<MapId> = self
            .members
            .iter()
            .filter(|id| !next_set.contains(id))
            .cloned()
            .collect();
        left.sort();
        let entered: Vec<MapId> = next
            .iter()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();

        self.events
            .extend(left.into_iter().map(WarpedMapEvent::MapLeft));
        self.events
            .extend(entered.into_iter().map(WarpedMapEvent::MapEntered));
        self.members = next;
    }

    fn tiles_for_map(
        &self,
        map: &WarpedMap,
        frame: &FrameState,
        view_per_device: f64,
    ) -> Vec<NeededTile> {
        let view_per_resource = map.geo_units_per_resource_pixel();
        if !(view_per_resource > 0.0 && view_per_device > 0.0) {
            return Vec::new();
        }

        let image = &map.image;
        let level = image.select_level(view_per_device / view_per_resource);
        log::debug!(
            "map {}: {:.3} resource px per device px, level {}",
            map.id,
            view_per_device / view_per_resource,
            level
        );

        let Some(resource_bounds) = self.visible_resource_bounds(map, frame) else {
            return Vec::new();
        };

        let span = image.tile_span(level) as f64;
        let columns = image.columns(level);
        let rows = image.rows(level);
        if columns == 0 || rows == 0 {
            return Vec::new();
        }
        let first_column = ((resource_bounds.min.x / span).floor().max(0.0) as u32).min(columns - 1);
        let last_column = ((resource_bounds.max.x / span).floor().max(0.0) as u32).min(columns - 1);
        let first_row = ((resource_bounds.min.y / span).floor().max(0.0) as u32).min(rows - 1);
        let last_row = ((resource_bounds.max.y / span).floor().max(0.0) as u32).min(rows - 1);

        let mut tiles = Vec::new();
        for row in first_row..=last_row {
            for column in first_column..=last_column {
                tiles.push(NeededTile {
                    key: TileKey::new(map.id.clone(), level, column, row),
                    region: image.tile_region(level, column, row),
                    service_url: image.service_url.clone(),
                });
            }
        }
        tiles
    }

    /// The visible part of the map mapped back to resource space, clipped to
    /// the mask and the image.
    fn visible_resource_bounds(&self, map: &WarpedMap, frame: &FrameState) -> Option<Bounds> {
        let visible = frame.extent.intersection(&map.bounding_box())?;
        let mut samples = visible.border_samples(self.samples_per_edge);
        samples.push(visible.center());

        let transformer = map.transformer();
        let resource: Vec<Point> = samples
            .iter()
            .map(|p| transformer.to_resource(p))
            .filter(Point::is_finite)
            .collect();

        let image_bounds =
            Bounds::from_coords(0.0, 0.0, map.image.width as f64, map.image.height as f64);
        Bounds::from_points(resource.iter())?
            .intersection(&map.resource_mask_bounds())?
            .intersection(&image_bounds)
    }

    /// Ids of the maps in the viewport as of the last frame, ascending z index
    pub fn maps_in_viewport(&self) -> &[MapId] {
        &self.members
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// Drops a removed map without emitting a leave event
    pub fn forget(&mut self, id: &str) {
        self.members.retain(|m| m != id);
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn take_events(&mut self) -> Vec<WarpedMapEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Default for ViewportTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MeshConfig;
    use crate::warped::map::test_support::descriptor;

    fn world() -> World {
        let mut world = World::new(MeshConfig::default());
        world
            .add_map(descriptor("a", Point::new(0.0, 0.0), 1.0))
            .unwrap();
        world
            .add_map(descriptor("b", Point::new(5000.0, 0.0), 1.0))
            .unwrap();
        world.take_events();
        world
    }

    fn frame_at(center: Point, resolution: f64) -> FrameState {
        FrameState::new(Point::new(600.0, 400.0), center, resolution, 0.0)
    }

    #[test]
    fn test_frame_state_extent() {
        let frame = frame_at(Point::new(500.0, 400.0), 2.0);
        assert!(frame.extent.min.distance_to(&Point::new(-100.0, 0.0)) < 1e-9);
        assert!(frame.extent.max.distance_to(&Point::new(1100.0, 800.0)) < 1e-9);
        assert!((frame.view_units_per_device_pixel() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_enter_and_leave_once() {
        let world = world();
        let mut tracker = ViewportTracker::new();

        let needed = tracker.compute_frame(&world, &frame_at(Point::new(500.0, 400.0), 2.0));
        assert!(!needed.is_empty());
        assert!(needed.iter().all(|t| t.key.map_id == "a"));
        assert_eq!(
            tracker.take_events(),
            vec![WarpedMapEvent::MapEntered("a".into())]
        );

        tracker.compute_frame(&world, &frame_at(Point::new(510.0, 400.0), 2.0));
        assert!(tracker.take_events().is_empty());

        tracker.compute_frame(&world, &frame_at(Point::new(5500.0, 400.0), 2.0));
        assert_eq!(
            tracker.take_events(),
            vec![
                WarpedMapEvent::MapLeft("a".into()),
                WarpedMapEvent::MapEntered("b".into()),
            ]
        );
        assert_eq!(tracker.maps_in_viewport(), &["b".to_string()]);
    }

    #[test]
    fn test_level_and_tile_range() {
        let world = world();
        let mut tracker = ViewportTracker::new();

        // two resource pixels per device pixel: level 1 (512px tiles), 2x2 tiles
        let needed = tracker.compute_frame(&world, &frame_at(Point::new(500.0, 400.0), 2.0));
        let keys: Vec<(u32, u32, u32)> = needed
            .iter()
            .map(|t| (t.key.level, t.key.column, t.key.row))
            .collect();
        assert_eq!(keys, vec![(1, 0, 0), (1, 1, 0), (1, 0, 1), (1, 1, 1)]);

        // zoomed into the top left corner at full resolution
        let needed = tracker.compute_frame(&world, &frame_at(Point::new(100.0, 100.0), 0.5));
        assert!(needed.iter().all(|t| t.key.level == 0));
        assert_eq!(needed.len(), 1);
        assert_eq!(needed[0].region.x, 0);
    }

    #[test]
    fn test_hidden_maps_leave_viewport() {
        let mut world = world();
        let mut tracker = ViewportTracker::new();
        let frame = frame_at(Point::new(500.0, 400.0), 2.0);

        tracker.compute_frame(&world, &frame);
        tracker.take_events();

        world.hide_maps(&["a".to_string()]);
        let needed = tracker.compute_frame(&world, &frame);
        assert!(needed.is_empty());
        assert_eq!(
            tracker.take_events(),
            vec![WarpedMapEvent::MapLeft("a".into())]
        );
    }

    #[test]
    fn test_need_set_follows_z_order() {
        let mut world = World::new(MeshConfig::default());
        world
            .add_map(descriptor("low", Point::new(0.0, 0.0), 1.0))
            .unwrap();
        world
            .add_map(descriptor("high", Point::new(0.0, 0.0), 1.0))
            .unwrap();
        world.send_maps_to_back(&["high".to_string()]);

        let mut tracker = ViewportTracker::new();
        let needed = tracker.compute_frame(&world, &frame_at(Point::new(500.0, 400.0), 4.0));
        let first_low = needed.iter().position(|t| t.key.map_id == "low").unwrap();
        let last_high = needed.iter().rposition(|t| t.key.map_id == "high").unwrap();
        assert!(last_high < first_low);
    }

    #[test]
    fn test_degenerate_mask_is_not_needed() {
        let mut world = world();
        let mut flat = descriptor("flat", Point::new(0.0, 0.0), 1.0);
        flat.resource_mask = vec![
            Point::new(0.0, 0.0),
            Point::new(500.0, 400.0),
            Point::new(1000.0, 800.0),
        ];
        world.add_map(flat).unwrap();
        assert!(world.get_map("flat").unwrap().is_degenerate());

        let mut tracker = ViewportTracker::new();
        let needed = tracker.compute_frame(&world, &frame_at(Point::new(500.0, 400.0), 2.0));
        assert!(!needed.is_empty());
        assert!(needed.iter().all(|t| t.key.map_id == "a"));
        assert!(!tracker.contains("flat"));
    }
}
