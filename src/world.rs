//! Registry of warped maps: identity, stacking order, visibility and styles.

use crate::core::bounds::Bounds;
use crate::core::config::MeshConfig;
use crate::core::geo::{MapId, Ring};
use crate::events::WarpedMapEvent;
use crate::prelude::{HashMap, HashSet};
use crate::rendering::style::{Colorize, MapStyle, RemoveBackground};
use crate::spatial::SpatialIndex;
use crate::transform::TransformationType;
use crate::warped::{MapDescriptor, WarpedMap};
use crate::{MapError, Result};

/// Whom a style override applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleTarget {
    Global,
    Map(MapId),
}

/// Stacking moves; the front of the stack is drawn last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOp {
    ToFront,
    ToBack,
    Forward,
    Backward,
}

#[derive(Debug, Default)]
pub struct World {
    maps: HashMap<MapId, WarpedMap>,
    /// Map ids by ascending z index
    order: Vec<MapId>,
    index: SpatialIndex,
    global_style: MapStyle,
    mesh: MeshConfig,
    events: Vec<WarpedMapEvent>,
    next_id: u64,
}

impl World {
    pub fn new(mesh: MeshConfig) -> Self {
        Self {
            mesh,
            ..Self::default()
        }
    }

    pub fn add_map(&mut self, descriptor: MapDescriptor) -> Result<MapId> {
        let id = match descriptor.id.clone() {
            Some(id) => id,
            None => self.generate_id(),
        };
        if self.maps.contains_key(&id) {
            return Err(MapError::Validation(format!("map {} already exists", id)));
        }

        let map = WarpedMap::new(id.clone(), descriptor, self.order.len(), &self.mesh)?;
        self.index.insert(id.clone(), map.bounding_box());
        self.order.push(id.clone());
        self.maps.insert(id.clone(), map);

        log::info!("added map {} at z index {}", id, self.order.len() - 1);
        self.events.push(WarpedMapEvent::Added(id.clone()));
        Ok(id)
    }

    pub fn add_maps<I>(&mut self, descriptors: I) -> Vec<Result<MapId>>
    where
        I: IntoIterator<Item = MapDescriptor>,
    {
        descriptors.into_iter().map(|d| self.add_map(d)).collect()
    }

    pub fn remove_map(&mut self, id: &str) -> Result<MapId> {
        let map = self
            .maps
            .remove(id)
            .ok_or_else(|| MapError::NotFound(id.to_string()))?;
        self.index.remove(id);
        self.order.retain(|other| other != id);
        self.renumber();

        log::info!("removed map {}", map.id);
        self.events.push(WarpedMapEvent::Removed(map.id.clone()));
        Ok(map.id)
    }

    pub fn remove_maps(&mut self, ids: &[MapId]) -> Vec<Result<MapId>> {
        ids.iter().map(|id| self.remove_map(id)).collect()
    }

    pub fn clear(&mut self) {
        self.maps.clear();
        self.order.clear();
        self.index.clear();
        log::info!("cleared all maps");
        self.events.push(WarpedMapEvent::Cleared);
    }

    pub fn set_visible(&mut self, ids: &[MapId], visible: bool) -> Vec<Result<MapId>> {
        let results: Vec<Result<MapId>> = ids
            .iter()
            .map(|id| match self.maps.get_mut(id) {
                Some(map) => {
                    map.visible = visible;
                    Ok(id.clone())
                }
                None => Err(MapError::NotFound(id.clone())),
            })
            .collect();

        let changed = ok_ids(&results);
        if !changed.is_empty() {
            self.events.push(WarpedMapEvent::VisibilityChanged(changed));
        }
        results
    }

    pub fn show_maps(&mut self, ids: &[MapId]) -> Vec<Result<MapId>> {
        self.set_visible(ids, true)
    }

    pub fn hide_maps(&mut self, ids: &[MapId]) -> Vec<Result<MapId>> {
        self.set_visible(ids, false)
    }

    pub fn set_resource_mask(&mut self, id: &str, ring: Ring) -> Result<()> {
        let map = self
            .maps
            .get_mut(id)
            .ok_or_else(|| MapError::NotFound(id.to_string()))?;
        map.set_resource_mask(ring, &self.mesh)?;
        self.index.update(id.to_string(), map.bounding_box());
        self.events.push(WarpedMapEvent::MaskUpdated(id.to_string()));
        Ok(())
    }

    pub fn set_transformation(
        &mut self,
        ids: &[MapId],
        kind: TransformationType,
    ) -> Vec<Result<MapId>> {
        let results: Vec<Result<MapId>> = ids
            .iter()
            .map(|id| {
                let map = self
                    .maps
                    .get_mut(id)
                    .ok_or_else(|| MapError::NotFound(id.clone()))?;
                map.set_transformation(kind, &self.mesh)?;
                self.index.update(id.clone(), map.bounding_box());
                Ok(id.clone())
            })
            .collect();

        let changed = ok_ids(&results);
        if !changed.is_empty() {
            self.events
                .push(WarpedMapEvent::TransformationChanged(changed));
        }
        results
    }

    /// Sets (or with `None` resets) an opacity override in `[0, 1]`
    pub fn set_opacity(&mut self, target: StyleTarget, opacity: Option<f32>) -> Result<()> {
        let opacity = opacity.map(|o| o.clamp(0.0, 1.0));
        self.update_style(target, |style| style.opacity = opacity)
    }

    pub fn set_colorize(&mut self, target: StyleTarget, colorize: Option<Colorize>) -> Result<()> {
        self.update_style(target, |style| style.colorize = colorize)
    }

    pub fn set_remove_background(
        &mut self,
        target: StyleTarget,
        remove_background: Option<RemoveBackground>,
    ) -> Result<()> {
        self.update_style(target, |style| style.remove_background = remove_background)
    }

    fn update_style(&mut self, target: StyleTarget, f: impl FnOnce(&mut MapStyle)) -> Result<()> {
        match target {
            StyleTarget::Global => {
                f(&mut self.global_style);
                self.events.push(WarpedMapEvent::Changed(Vec::new()));
            }
            StyleTarget::Map(id) => {
                let map = self
                    .maps
                    .get_mut(&id)
                    .ok_or_else(|| MapError::NotFound(id.clone()))?;
                f(&mut map.style);
                self.events.push(WarpedMapEvent::Changed(vec![id]));
            }
        }
        Ok(())
    }

    pub fn global_style(&self) -> &MapStyle {
        &self.global_style
    }

    /// Applies a stacking move and returns whether the order changed
    pub fn reorder(&mut self, ids: &[MapId], op: ReorderOp) -> bool {
        let selected: HashSet<&str> = ids
            .iter()
            .filter(|id| {
                let known = self.maps.contains_key(*id);
                if !known {
                    log::warn!("ignoring unknown map {} in reorder", id);
                }
                known
            })
            .map(String::as_str)
            .collect();
        if selected.is_empty() {
            return false;
        }

        let is_selected = |id: &MapId| selected.contains(id.as_str());
        let mut order = self.order.clone();
        match op {
            ReorderOp::ToFront => {
                let (moved, rest): (Vec<MapId>, Vec<MapId>) =
                    order.into_iter().partition(|id| is_selected(id));
                order = rest.into_iter().chain(moved).collect();
            }
            ReorderOp::ToBack => {
                let (moved, rest): (Vec<MapId>, Vec<MapId>) =
                    order.into_iter().partition(|id| is_selected(id));
                order = moved.into_iter().chain(rest).collect();
            }
            ReorderOp::Forward => {
                for i in (0..order.len().saturating_sub(1)).rev() {
                    if is_selected(&order[i]) && !is_selected(&order[i + 1]) {
                        order.swap(i, i + 1);
                    }
                }
            }
            ReorderOp::Backward => {
                for i in 1..order.len() {
                    if is_selected(&order[i]) && !is_selected(&order[i - 1]) {
                        order.swap(i, i - 1);
                    }
                }
            }
        }

        if order == self.order {
            return false;
        }

        let moved: Vec<MapId> = self
            .order
            .iter()
            .filter(|id| is_selected(id))
            .cloned()
            .collect();
        self.order = order;
        self.renumber();
        log::debug!("stacking changed ({:?}) for {:?}", op, moved);
        self.events.push(WarpedMapEvent::StackingChanged(moved));
        true
    }

    pub fn bring_maps_to_front(&mut self, ids: &[MapId]) -> bool {
        self.reorder(ids, ReorderOp::ToFront)
    }

    pub fn send_maps_to_back(&mut self, ids: &[MapId]) -> bool {
        self.reorder(ids, ReorderOp::ToBack)
    }

    pub fn bring_maps_forward(&mut self, ids: &[MapId]) -> bool {
        self.reorder(ids, ReorderOp::Forward)
    }

    pub fn send_maps_backward(&mut self, ids: &[MapId]) -> bool {
        self.reorder(ids, ReorderOp::Backward)
    }

    pub fn get_map(&self, id: &str) -> Option<&WarpedMap> {
        self.maps.get(id)
    }

    /// Maps in stacking order, back to front
    pub fn maps(&self) -> impl Iterator<Item = &WarpedMap> + '_ {
        self.order.iter().filter_map(|id| self.maps.get(id))
    }

    /// Map ids in stacking order, back to front
    pub fn map_ids(&self) -> &[MapId] {
        &self.order
    }

    pub fn z_index(&self, id: &str) -> Option<usize> {
        self.maps.get(id).map(|m| m.z_index)
    }

    pub fn bounding_box_of_all(&self) -> Option<Bounds> {
        self.index.bounds()
    }

    /// Ids whose bounding box intersects `bounds`
    pub fn query(&self, bounds: &Bounds) -> Vec<MapId> {
        self.index.query(bounds)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    pub fn take_events(&mut self) -> Vec<WarpedMapEvent> {
        std::mem::take(&mut self.events)
    }

    fn renumber(&mut self) {
        for (z, id) in self.order.iter().enumerate() {
            if let Some(map) = self.maps.get_mut(id) {
                map.z_index = z;
            }
        }
    }

    fn generate_id(&mut self) -> MapId {
        loop {
            self.next_id += 1;
            let id = format!("map-{}", self.next_id);
            if !self.maps.contains_key(&id) {
                return id;
            }
        }
    }
}

fn ok_ids(results: &[Result<MapId>]) -> Vec<MapId> {
    results
        .iter()
        .filter_map(|r| r.as_ref().ok().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::Point;
    use crate::warped::map::test_support::descriptor;

    fn world_with(ids: &[&str]) -> World {
        let mut world = World::new(MeshConfig::default());
        for (i, id) in ids.iter().enumerate() {
            world
                .add_map(descriptor(id, Point::new(i as f64 * 5000.0, 0.0), 1.0))
                .unwrap();
        }
        world.take_events();
        world
    }

    fn ids(list: &[&str]) -> Vec<MapId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_map() {
        let mut world = World::new(MeshConfig::default());
        let id = world
            .add_map(descriptor("a", Point::new(0.0, 0.0), 1.0))
            .unwrap();

        assert_eq!(id, "a");
        assert_eq!(world.z_index("a"), Some(0));
        assert!(world.get_map("a").unwrap().visible);
        assert_eq!(world.take_events(), vec![WarpedMapEvent::Added(id)]);
        assert_eq!(
            world.query(&Bounds::from_coords(10.0, 10.0, 20.0, 20.0)),
            ids(&["a"])
        );
    }

    #[test]
    fn test_invalid_descriptors_leave_registry_unchanged() {
        let mut world = world_with(&["a"]);

        let duplicate = world.add_map(descriptor("a", Point::new(0.0, 0.0), 1.0));
        assert!(matches!(duplicate, Err(MapError::Validation(_))));

        let mut few_gcps = descriptor("b", Point::new(0.0, 0.0), 1.0);
        few_gcps.gcps.truncate(2);
        assert!(matches!(
            world.add_map(few_gcps),
            Err(MapError::Validation(_))
        ));

        let mut bad_mask = descriptor("c", Point::new(0.0, 0.0), 1.0);
        bad_mask.resource_mask.push(Point::new(0.0, 0.0));
        assert!(world.add_map(bad_mask).is_err());

        assert_eq!(world.len(), 1);
        assert!(world.take_events().is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let mut world = World::new(MeshConfig::default());
        let mut first = descriptor("x", Point::new(0.0, 0.0), 1.0);
        first.id = None;
        let second = first.clone();

        let a = world.add_map(first).unwrap();
        let b = world.add_map(second).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_map_renumbers() {
        let mut world = world_with(&["a", "b", "c"]);

        assert_eq!(world.remove_map("b").unwrap(), "b");
        assert_eq!(world.z_index("c"), Some(1));
        assert!(matches!(world.remove_map("b"), Err(MapError::NotFound(_))));
        assert_eq!(world.take_events(), vec![WarpedMapEvent::Removed("b".into())]);
        assert!(world
            .query(&Bounds::from_coords(5000.0, 0.0, 6000.0, 800.0))
            .iter()
            .all(|id| id != "b"));
    }

    #[test]
    fn test_reorder_operations() {
        let mut world = world_with(&["a", "b", "c", "d"]);

        assert!(world.bring_maps_to_front(&ids(&["a", "c"])));
        assert_eq!(world.map_ids(), ids(&["b", "d", "a", "c"]).as_slice());

        assert!(world.send_maps_to_back(&ids(&["c"])));
        assert_eq!(world.map_ids(), ids(&["c", "b", "d", "a"]).as_slice());

        assert!(world.bring_maps_forward(&ids(&["c", "b"])));
        assert_eq!(world.map_ids(), ids(&["d", "c", "b", "a"]).as_slice());

        assert!(world.send_maps_backward(&ids(&["b"])));
        assert_eq!(world.map_ids(), ids(&["d", "b", "c", "a"]).as_slice());

        for (z, id) in world.map_ids().iter().enumerate() {
            assert_eq!(world.z_index(id), Some(z));
        }
    }

    #[test]
    fn test_stacking_event_only_on_change() {
        let mut world = world_with(&["a", "b"]);

        assert!(!world.bring_maps_to_front(&ids(&["b"])));
        assert!(!world.send_maps_backward(&ids(&["a"])));
        assert!(!world.bring_maps_forward(&ids(&["missing"])));
        assert!(world.take_events().is_empty());

        assert!(world.bring_maps_forward(&ids(&["a"])));
        assert_eq!(
            world.take_events(),
            vec![WarpedMapEvent::StackingChanged(ids(&["a"]))]
        );
    }

    #[test]
    fn test_set_resource_mask_updates_index() {
        let mut world = world_with(&["a"]);
        let small = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
        ];

        world.set_resource_mask("a", small).unwrap();
        let bbox = world.get_map("a").unwrap().bounding_box();
        assert!(bbox.max.distance_to(&Point::new(100.0, 100.0)) < 1e-6);
        assert!(world
            .query(&Bounds::from_coords(500.0, 500.0, 600.0, 600.0))
            .is_empty());
        assert_eq!(
            world.take_events(),
            vec![WarpedMapEvent::MaskUpdated("a".into())]
        );

        assert!(matches!(
            world.set_resource_mask("missing", vec![]),
            Err(MapError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_transformation_reports_per_id() {
        let mut world = world_with(&["a"]);
        let results = world.set_transformation(&ids(&["a", "missing"]), TransformationType::Helmert);

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(MapError::NotFound(_))));
        assert_eq!(
            world.get_map("a").unwrap().transformation_type(),
            TransformationType::Helmert
        );
        assert_eq!(
            world.take_events(),
            vec![WarpedMapEvent::TransformationChanged(ids(&["a"]))]
        );
    }

    #[test]
    fn test_style_changes_emit_changed() {
        let mut world = world_with(&["a"]);

        world.set_opacity(StyleTarget::Global, Some(0.5)).unwrap();
        world
            .set_opacity(StyleTarget::Map("a".into()), Some(1.5))
            .unwrap();
        world.set_opacity(StyleTarget::Map("a".into()), None).unwrap();
        assert!(world
            .set_colorize(StyleTarget::Map("missing".into()), None)
            .is_err());

        assert_eq!(world.global_style().opacity, Some(0.5));
        assert_eq!(world.get_map("a").unwrap().style.opacity, None);
        assert_eq!(
            world.take_events(),
            vec![
                WarpedMapEvent::Changed(vec![]),
                WarpedMapEvent::Changed(ids(&["a"])),
                WarpedMapEvent::Changed(ids(&["a"])),
            ]
        );
    }

    #[test]
    fn test_visibility_and_clear() {
        let mut world = world_with(&["a", "b"]);

        let results = world.hide_maps(&ids(&["a", "missing"]));
        assert!(results[0].is_ok() && results[1].is_err());
        assert!(!world.get_map("a").unwrap().visible);

        world.clear();
        assert!(world.is_empty());
        assert!(world.bounding_box_of_all().is_none());
        assert_eq!(
            world.take_events(),
            vec![
                WarpedMapEvent::VisibilityChanged(ids(&["a"])),
                WarpedMapEvent::Cleared,
            ]
        );
    }
}
