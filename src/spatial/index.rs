use crate::core::{bounds::Bounds, geo::MapId};
use crate::prelude::HashMap;

use rstar::{RTree, RTreeObject, AABB};

/// A map id together with its indexed bounding box
#[derive(Debug, Clone)]
pub struct SpatialItem {
    pub id: MapId,
    pub bounds: Bounds,
}

impl SpatialItem {
    pub fn new(id: MapId, bounds: Bounds) -> Self {
        Self { id, bounds }
    }
}

impl PartialEq for SpatialItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// --- rstar integration -------------------------------------------------------------------------

impl RTreeObject for SpatialItem {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bounds.to_aabb()
    }
}

/// R-tree based bounding box index keyed by map id.
///
/// The id to bounds table mirrors the tree so removal can locate the exact
/// envelope without scanning.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    rtree: RTree<SpatialItem>,
    entries: HashMap<MapId, Bounds>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, replacing its previous bounds if it was already indexed
    pub fn insert(&mut self, id: MapId, bounds: Bounds) {
        self.remove(&id);
        self.entries.insert(id.clone(), bounds);
        self.rtree.insert(SpatialItem::new(id, bounds));
    }

    /// Same as [`insert`](Self::insert); unknown ids are inserted
    pub fn update(&mut self, id: MapId, bounds: Bounds) {
        self.insert(id, bounds);
    }

    /// Removes `id`, returning its bounds. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Bounds> {
        let bounds = self.entries.remove(id)?;
        let removed = self
            .rtree
            .remove(&SpatialItem::new(id.to_string(), bounds));
        if removed.is_none() {
            log::warn!("spatial index out of sync for map {}", id);
        }
        Some(bounds)
    }

    /// Ids whose bounds intersect `bounds` (touching counts), in arbitrary order
    pub fn query(&self, bounds: &Bounds) -> Vec<MapId> {
        self.rtree
            .locate_in_envelope_intersecting(&bounds.to_aabb())
            .map(|item| item.id.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Bounds> {
        self.entries.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Union of all indexed bounds
    pub fn bounds(&self) -> Option<Bounds> {
        if self.entries.is_empty() {
            return None;
        }
        let envelope = self.rtree.root().envelope();
        Some(Bounds::from_coords(
            envelope.lower()[0],
            envelope.lower()[1],
            envelope.upper()[0],
            envelope.upper()[1],
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.rtree = RTree::new();
        self.entries.clear();
    }
}
