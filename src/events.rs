use crate::core::geo::MapId;
use crate::tiles::types::TileKey;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Notifications emitted by the registry, the viewport tracker and the tile cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarpedMapEvent {
    /// A map was registered
    Added(MapId),
    /// A map was removed
    Removed(MapId),
    /// Every map was removed at once
    Cleared,
    VisibilityChanged(Vec<MapId>),
    /// The stacking order changed; carries the ids that were asked to move
    StackingChanged(Vec<MapId>),
    MaskUpdated(MapId),
    TransformationChanged(Vec<MapId>),
    /// A map started intersecting the viewport
    MapEntered(MapId),
    /// A map stopped intersecting the viewport
    MapLeft(MapId),
    TileLoaded(TileKey),
    /// Every fetch started for the latest need-set has resolved
    AllTilesLoaded,
    /// Style change; empty for global changes
    Changed(Vec<MapId>),
}

impl WarpedMapEvent {
    /// Whether handling the event may change the next frame
    pub fn needs_redraw(&self) -> bool {
        !matches!(self, Self::Added(_))
    }
}

/// FIFO queue of pending events with fan-out to external subscribers
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<WarpedMapEvent>,
    subscribers: Vec<Sender<WarpedMapEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: WarpedMapEvent) {
        self.pending.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = WarpedMapEvent>) {
        self.pending.extend(events);
    }

    /// Next event in emission order; subscribers receive it as it is popped
    pub fn pop(&mut self) -> Option<WarpedMapEvent> {
        let event = self.pending.pop_front()?;
        self.publish(&event);
        Some(event)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribe(&mut self) -> Receiver<WarpedMapEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: &WarpedMapEvent) {
        // Dropped receivers unsubscribe themselves
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
