use crate::core::geo::MapId;
use crate::events::WarpedMapEvent;
use crate::prelude::{Arc, HashMap, HashSet};
use crate::runtime::AsyncSpawner;
use crate::tiles::source::TileFetcher;
use crate::tiles::types::{NeededTile, TileImage, TileKey, TileRegion, TileStatus};
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;

/// Result of a fetch, delivered back to the cache through its channel
#[derive(Debug)]
struct FetchOutcome {
    key: TileKey,
    fetch_id: u64,
    result: Result<TileImage>,
}

#[derive(Debug, Clone)]
enum EntryState {
    /// Waiting for a free fetch slot
    Queued,
    Pending,
    Loaded(Arc<TileImage>),
    Failed,
}

#[derive(Debug, Clone)]
struct Entry {
    tile: NeededTile,
    state: EntryState,
    /// Only an outcome carrying this id may resolve the entry
    fetch_id: u64,
}

/// A loaded tile ready for drawing
#[derive(Debug, Clone)]
pub struct CachedTile {
    pub key: TileKey,
    pub region: TileRegion,
    pub image: Arc<TileImage>,
}

/// Demand-driven tile store.
///
/// After [`set_needed`](TileCache::set_needed) the cache holds exactly the
/// tiles of the new need-set. Fetches run on the spawner and report back over
/// a channel; their results are applied by [`poll`](TileCache::poll).
pub struct TileCache {
    entries: HashMap<TileKey, Entry>,
    queue: VecDeque<TileKey>,
    /// Fetches started and not yet reported, stale ones included
    in_flight: usize,
    max_concurrent_fetches: usize,
    /// Keys of the latest need-set still waiting for a result
    outstanding: HashSet<TileKey>,
    awaiting_all_loaded: bool,
    next_fetch_id: u64,
    fetcher: Arc<dyn TileFetcher>,
    spawner: Arc<dyn AsyncSpawner>,
    tx: Sender<FetchOutcome>,
    rx: Receiver<FetchOutcome>,
    events: Vec<WarpedMapEvent>,
}

impl TileCache {
    pub fn new(
        fetcher: Arc<dyn TileFetcher>,
        spawner: Arc<dyn AsyncSpawner>,
        max_concurrent_fetches: usize,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            entries: HashMap::default(),
            queue: VecDeque::new(),
            in_flight: 0,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
            outstanding: HashSet::default(),
            awaiting_all_loaded: false,
            next_fetch_id: 0,
            fetcher,
            spawner,
            tx,
            rx,
            events: Vec::new(),
        }
    }

    /// Replaces the working set with `needed`.
    ///
    /// Tiles outside the new set are evicted (their in-flight results will be
    /// discarded), pending ones are kept, failed ones are retried and missing
    /// ones are queued in need-set order. `AllTilesLoaded` follows only when
    /// this call left fetches outstanding.
    pub fn set_needed(&mut self, needed: &[NeededTile]) {
        let wanted: HashSet<&TileKey> = needed.iter().map(|t| &t.key).collect();
        let before = self.entries.len();
        self.entries.retain(|key, _| wanted.contains(key));
        let evicted = before - self.entries.len();

        self.outstanding.clear();
        for tile in needed {
            match self.entries.get_mut(&tile.key) {
                Some(Entry {
                    state: EntryState::Loaded(_),
                    ..
                }) => {}
                Some(Entry {
                    state: EntryState::Queued | EntryState::Pending,
                    ..
                }) => {
                    self.outstanding.insert(tile.key.clone());
                }
                Some(entry) => {
                    // Failed tiles are only retried when requested again
                    self.next_fetch_id += 1;
                    entry.fetch_id = self.next_fetch_id;
                    entry.state = EntryState::Queued;
                    entry.tile = tile.clone();
                    self.outstanding.insert(tile.key.clone());
                }
                None => {
                    self.next_fetch_id += 1;
                    self.entries.insert(
                        tile.key.clone(),
                        Entry {
                            tile: tile.clone(),
                            state: EntryState::Queued,
                            fetch_id: self.next_fetch_id,
                        },
                    );
                    self.outstanding.insert(tile.key.clone());
                }
            }
        }

        self.queue = needed
            .iter()
            .filter(|t| {
                matches!(
                    self.entries.get(&t.key),
                    Some(Entry {
                        state: EntryState::Queued,
                        ..
                    })
                )
            })
            .map(|t| t.key.clone())
            .collect();
        self.awaiting_all_loaded = !self.outstanding.is_empty();

        log::debug!(
            "need-set of {} tiles: {} evicted, {} outstanding",
            needed.len(),
            evicted,
            self.outstanding.len()
        );
        self.start_queued();
    }

    /// Applies every fetch result received so far and starts queued fetches
    /// as slots free up. Returns the number of tiles that became loaded.
    pub fn poll(&mut self) -> usize {
        let mut loaded = 0;
        while let Ok(outcome) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            if self.apply(outcome) {
                loaded += 1;
            }
            self.start_queued();
        }
        self.check_all_loaded();
        loaded
    }

    fn apply(&mut self, outcome: FetchOutcome) -> bool {
        let entry = match self.entries.get_mut(&outcome.key) {
            Some(entry)
                if entry.fetch_id == outcome.fetch_id
                    && matches!(entry.state, EntryState::Pending) =>
            {
                entry
            }
            _ => {
                log::debug!("discarding stale result for tile {}", outcome.key);
                return false;
            }
        };

        self.outstanding.remove(&outcome.key);
        match outcome.result {
            Ok(image) => {
                entry.state = EntryState::Loaded(Arc::new(image));
                self.events.push(WarpedMapEvent::TileLoaded(outcome.key));
                true
            }
            Err(e) => {
                log::warn!("failed to fetch tile {}: {}", outcome.key, e);
                entry.state = EntryState::Failed;
                false
            }
        }
    }

    fn start_queued(&mut self) {
        while self.in_flight < self.max_concurrent_fetches {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if !matches!(entry.state, EntryState::Queued) {
                continue;
            }

            entry.state = EntryState::Pending;
            self.in_flight += 1;

            let tile = entry.tile.clone();
            let fetch_id = entry.fetch_id;
            let fetcher = self.fetcher.clone();
            let tx = self.tx.clone();
            self.spawner.spawn_boxed(Box::pin(async move {
                let result = fetcher.fetch(&tile).await;
                // The cache may be gone already
                let _ = tx.send(FetchOutcome {
                    key: tile.key,
                    fetch_id,
                    result,
                });
            }));
        }
    }

    fn check_all_loaded(&mut self) {
        if self.awaiting_all_loaded && self.outstanding.is_empty() {
            self.awaiting_all_loaded = false;
            log::debug!("all tiles of the current need-set resolved");
            self.events.push(WarpedMapEvent::AllTilesLoaded);
        }
    }

    pub fn get(&self, key: &TileKey) -> TileStatus {
        match self.entries.get(key).map(|e| &e.state) {
            Some(EntryState::Loaded(image)) => TileStatus::Loaded(image.clone()),
            Some(EntryState::Queued | EntryState::Pending) => TileStatus::Pending,
            Some(EntryState::Failed) => TileStatus::Failed,
            None => TileStatus::Absent,
        }
    }

    /// Drops every tile of `map_id`, e.g. after the map was removed
    pub fn remove_map(&mut self, map_id: &str) {
        self.entries.retain(|key, _| key.map_id != map_id);
        self.queue.retain(|key| key.map_id != map_id);
        self.outstanding.retain(|key| key.map_id != map_id);
        self.check_all_loaded();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
        self.outstanding.clear();
        self.awaiting_all_loaded = false;
    }

    /// Loaded tiles of one map, sorted by key
    pub fn loaded_tiles_for_map(&self, map_id: &MapId) -> Vec<CachedTile> {
        let mut tiles: Vec<CachedTile> = self
            .entries
            .iter()
            .filter(|(key, _)| &key.map_id == map_id)
            .filter_map(|(key, entry)| match &entry.state {
                EntryState::Loaded(image) => Some(CachedTile {
                    key: key.clone(),
                    region: entry.tile.region,
                    image: image.clone(),
                }),
                _ => None,
            })
            .collect();
        tiles.sort_by(|a, b| a.key.cmp(&b.key));
        tiles
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn take_events(&mut self) -> Vec<WarpedMapEvent> {
        std::mem::take(&mut self.events)
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("entries", &self.entries.len())
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}
