//! End-to-end scenarios driving a `WarpedMapLayer` with the headless back end,
//! an in-memory fetcher and a queued spawner.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use warpmap::prelude::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const CORNERS: [(f64, f64); 4] = [(0.0, 0.0), (1000.0, 0.0), (1000.0, 800.0), (0.0, 800.0)];

/// 1000x800 image whose geo position is the resource position shifted by `offset`
fn descriptor(id: &str, offset: Point) -> MapDescriptor {
    let corners: Vec<Point> = CORNERS.iter().map(|(x, y)| Point::new(*x, *y)).collect();
    MapDescriptor {
        id: Some(id.to_string()),
        image: ImageInfo::new(format!("https://iiif.example.org/{}", id), 1000, 800),
        resource_mask: corners.clone(),
        gcps: corners.iter().map(|p| Gcp::new(*p, p.add(&offset))).collect(),
        transformation: TransformationType::Polynomial { order: 1 },
    }
}

/// Frame of 100x80 device pixels showing the 1000x800 geo area around `center`
fn frame(center: Point) -> FrameState {
    FrameState::new(Point::new(100.0, 80.0), center, 10.0, 0.0)
}

fn home() -> FrameState {
    frame(Point::new(500.0, 400.0))
}

struct Harness {
    layer: WarpedMapLayer<HeadlessBackend>,
    spawner: QueuedSpawner,
    fetcher: Arc<MemoryTileFetcher>,
    events: Receiver<WarpedMapEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(RenderOptions::default())
    }

    fn with_options(options: RenderOptions) -> Self {
        init_logger();
        let spawner = QueuedSpawner::new();
        let fetcher = Arc::new(MemoryTileFetcher::new([200, 180, 150, 255]));
        let mut layer = WarpedMapLayer::new(
            HeadlessBackend::new(),
            fetcher.clone(),
            Arc::new(spawner.clone()),
            options,
        );
        let events = layer.subscribe();
        Self {
            layer,
            spawner,
            fetcher,
            events,
        }
    }

    /// Runs finished fetches and applies them
    fn load(&mut self, now: Instant) -> Option<FrameStats> {
        self.spawner.run_pending();
        self.layer.tick(now).unwrap()
    }

    fn drain(&self) -> Vec<WarpedMapEvent> {
        self.events.try_iter().collect()
    }
}

fn tile(id: &str) -> TileKey {
    // 100 device px over 1000 resource px selects scale factor 4, a single tile
    TileKey::new(id, 2, 0, 0)
}

fn drawn_ids(layer: &WarpedMapLayer<HeadlessBackend>) -> Vec<String> {
    layer
        .renderer()
        .backend()
        .last_frame()
        .iter()
        .map(|d| d.map_id.clone())
        .collect()
}

#[test]
fn test_add_map_scenario() {
    let mut h = Harness::new();
    let t0 = Instant::now();

    let id = h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    assert_eq!(id, "a");
    assert_eq!(h.drain(), vec![WarpedMapEvent::Added("a".to_string())]);

    let map = h.layer.get_map("a").unwrap();
    assert_eq!(map.z_index, 0);
    assert!(map.visible);

    h.layer.render(home(), t0).unwrap();
    assert_eq!(h.layer.maps_in_viewport(), ["a".to_string()]);
    assert_eq!(h.layer.tile_cache().get(&tile("a")), TileStatus::Pending);
    assert_eq!(h.drain(), vec![WarpedMapEvent::MapEntered("a".to_string())]);

    let stats = h.load(t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(stats.maps_drawn, 1);
    assert_eq!(stats.tiles_drawn, 1);
    assert!(h.layer.tile_cache().get(&tile("a")).is_loaded());
    assert_eq!(
        h.drain(),
        vec![
            WarpedMapEvent::TileLoaded(tile("a")),
            WarpedMapEvent::AllTilesLoaded
        ]
    );
    assert_eq!(h.fetcher.requests(), 1);
}

#[test]
fn test_add_helmert_map() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    let mut helmert = descriptor("a", Point::new(0.0, 0.0));
    helmert.transformation = TransformationType::Helmert;

    h.layer.add_map(helmert).unwrap();
    assert_eq!(
        h.layer.get_map("a").unwrap().transformation_type(),
        TransformationType::Helmert
    );

    h.layer.render(home(), t0).unwrap();
    assert_eq!(h.layer.maps_in_viewport(), ["a".to_string()]);
    let stats = h.load(t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(stats.maps_drawn, 1);
    assert!(h.layer.tile_cache().get(&tile("a")).is_loaded());
}

#[test]
fn test_generated_ids_and_json_descriptors() {
    let mut h = Harness::new();
    let mut unnamed = descriptor("x", Point::new(0.0, 0.0));
    unnamed.id = None;
    let generated = h.layer.add_map(unnamed).unwrap();
    assert!(generated.starts_with("map-"));

    let json = serde_json::json!({
        "id": "from-json",
        "image": {
            "service_url": "https://iiif.example.org/from-json",
            "width": 1000,
            "height": 800
        },
        "resource_mask": [
            {"x": 0.0, "y": 0.0}, {"x": 1000.0, "y": 0.0},
            {"x": 1000.0, "y": 800.0}, {"x": 0.0, "y": 800.0}
        ],
        "gcps": [
            {"resource": {"x": 0.0, "y": 0.0}, "geo": {"x": 0.0, "y": 0.0}},
            {"resource": {"x": 1000.0, "y": 0.0}, "geo": {"x": 1000.0, "y": 0.0}},
            {"resource": {"x": 0.0, "y": 800.0}, "geo": {"x": 0.0, "y": 800.0}}
        ]
    });
    let id = h.layer.add_map_json(&json.to_string()).unwrap();
    assert_eq!(id, "from-json");
    assert_eq!(h.layer.world().z_index("from-json"), Some(1));

    assert!(matches!(
        h.layer.add_map(descriptor("from-json", Point::new(0.0, 0.0))),
        Err(MapError::Validation(_))
    ));
}

#[test]
fn test_pan_away_scenario() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10));
    h.drain();

    let away = frame(Point::new(20_000.0, 20_000.0));
    h.layer.render(away, t0 + Duration::from_millis(600)).unwrap();
    h.layer.render(away, t0 + Duration::from_millis(1200)).unwrap();
    h.layer.tick(t0 + Duration::from_millis(1800)).unwrap();

    let left: Vec<WarpedMapEvent> = h
        .drain()
        .into_iter()
        .filter(|e| matches!(e, WarpedMapEvent::MapLeft(_)))
        .collect();
    assert_eq!(left, vec![WarpedMapEvent::MapLeft("a".to_string())]);
    assert!(h.layer.maps_in_viewport().is_empty());

    // An empty need-set leaves the cache alone
    assert!(h.layer.tile_cache().get(&tile("a")).is_loaded());

    // The next non-empty need-set evicts it
    h.layer.add_map(descriptor("b", Point::new(20_000.0, 20_000.0))).unwrap();
    h.layer
        .render(frame(Point::new(20_500.0, 20_400.0)), t0 + Duration::from_millis(2400))
        .unwrap();
    assert_eq!(h.layer.tile_cache().get(&tile("a")), TileStatus::Absent);
    assert_eq!(h.layer.tile_cache().get(&tile("b")), TileStatus::Pending);
}

#[test]
fn test_mask_update_scenario() {
    let mut h = Harness::new();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.drain();

    let ring = vec![
        Point::new(100.0, 100.0),
        Point::new(500.0, 100.0),
        Point::new(500.0, 400.0),
        Point::new(100.0, 400.0),
    ];
    h.layer.set_resource_mask("a", ring).unwrap();
    assert_eq!(h.drain(), vec![WarpedMapEvent::MaskUpdated("a".to_string())]);
    assert!(!h.layer.renderer().is_transitioning());

    let bbox = h.layer.get_map("a").unwrap().bounding_box();
    assert!((bbox.min.x - 100.0).abs() < 1e-6);
    assert!((bbox.min.y - 100.0).abs() < 1e-6);
    assert!((bbox.max.x - 500.0).abs() < 1e-6);
    assert!((bbox.max.y - 400.0).abs() < 1e-6);

    // The index follows the new bounding box
    let outside = Bounds::from_coords(600.0, 500.0, 900.0, 700.0);
    assert!(h.layer.world().query(&outside).is_empty());

    let invalid = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
    assert!(matches!(
        h.layer.set_resource_mask("a", invalid),
        Err(MapError::Validation(_))
    ));
    assert!(matches!(
        h.layer.set_resource_mask("missing", Vec::new()),
        Err(MapError::NotFound(_))
    ));
}

#[test]
fn test_transformation_scenario() {
    let mut h = Harness::new();
    let mut skewed = descriptor("a", Point::new(0.0, 0.0));
    skewed.gcps[2] = Gcp::new(Point::new(1000.0, 800.0), Point::new(1040.0, 760.0));
    h.layer.add_map(skewed).unwrap();

    let t0 = Instant::now();
    h.layer.render(home(), t0).unwrap();
    let initial = h.layer.renderer().backend().buffer("a").unwrap().to_vec();
    h.drain();

    let results = h
        .layer
        .set_transformation(&["a".to_string()], TransformationType::Helmert);
    assert!(results[0].is_ok());
    assert_eq!(
        h.drain(),
        vec![WarpedMapEvent::TransformationChanged(vec!["a".to_string()])]
    );
    assert!(h.layer.renderer().is_transitioning());

    let projection = home().projection;
    let expected: Vec<[f32; 2]> = h
        .layer
        .get_map("a")
        .unwrap()
        .triangulation()
        .geo_vertices
        .iter()
        .map(|p| {
            let clip = projection.apply(p);
            [clip.x as f32, clip.y as f32]
        })
        .collect();
    let positions = |h: &Harness| -> Vec<[f32; 2]> {
        h.layer
            .renderer()
            .backend()
            .buffer("a")
            .unwrap()
            .iter()
            .map(|v| v.position)
            .collect()
    };
    let initial: Vec<[f32; 2]> = initial.iter().map(|v| v.position).collect();
    assert_ne!(initial, expected);

    h.layer
        .render(home(), Instant::now() + Duration::from_millis(375))
        .unwrap();
    let midway = positions(&h);
    assert_ne!(midway, initial);
    assert_ne!(midway, expected);
    assert!(h.layer.renderer().is_transitioning());

    h.layer
        .render(home(), Instant::now() + Duration::from_millis(1000))
        .unwrap();
    assert_eq!(positions(&h), expected);
    assert!(!h.layer.renderer().is_transitioning());
}

#[test]
fn test_transformation_without_transitions_commits() {
    let mut options = RenderOptions::default();
    options.transition.enabled = false;
    let mut h = Harness::with_options(options);
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();

    h.layer
        .set_transformation(&["a".to_string()], TransformationType::Helmert);
    assert!(!h.layer.renderer().is_transitioning());

    let results = h
        .layer
        .set_transformation(&["missing".to_string()], TransformationType::Projective);
    assert!(matches!(results[0], Err(MapError::NotFound(_))));
}

#[test]
fn test_opacity_scenario() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.add_map(descriptor("b", Point::new(0.0, 0.0))).unwrap();
    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10)).unwrap();
    h.drain();

    h.layer.set_opacity(0.5);
    h.layer.set_map_opacity("a", 0.5).unwrap();
    assert_eq!(
        h.drain(),
        vec![
            WarpedMapEvent::Changed(vec![]),
            WarpedMapEvent::Changed(vec!["a".to_string()])
        ]
    );

    let stats = h.layer.tick(t0 + Duration::from_millis(20)).unwrap().unwrap();
    assert_eq!(stats.maps_drawn, 2);
    let frame = h.layer.renderer().backend().last_frame();
    assert_eq!(frame[0].map_id, "a");
    assert_eq!(frame[0].style.opacity, 0.25);
    assert_eq!(frame[1].style.opacity, 0.5);

    h.layer.reset_map_opacity("a").unwrap();
    assert!(h.layer.needs_redraw());
    h.layer.tick(t0 + Duration::from_millis(30)).unwrap().unwrap();
    let frame = h.layer.renderer().backend().last_frame();
    assert_eq!(frame[0].style.opacity, 0.5);

    h.layer.reset_opacity();
    h.layer.tick(t0 + Duration::from_millis(40)).unwrap().unwrap();
    let frame = h.layer.renderer().backend().last_frame();
    assert_eq!(frame[0].style.opacity, 1.0);

    assert!(matches!(
        h.layer.set_map_opacity("missing", 0.5),
        Err(MapError::NotFound(_))
    ));
}

#[test]
fn test_color_filters_accept_hex() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10)).unwrap();

    h.layer.set_colorize("#ff0000").unwrap();
    h.layer
        .set_map_remove_background("a", "#ffffff", 0.1, 0.8)
        .unwrap();
    h.layer.tick(t0 + Duration::from_millis(20)).unwrap().unwrap();

    let style = h.layer.renderer().backend().last_frame()[0].style;
    assert_eq!(
        style.colorize,
        Some(Colorize {
            color: RgbColor::new(1.0, 0.0, 0.0)
        })
    );
    let remove = style.remove_background.unwrap();
    assert_eq!(remove.color, RgbColor::new(1.0, 1.0, 1.0));
    assert_eq!(remove.threshold, 0.1);
    assert_eq!(remove.hardness, 0.8);

    h.layer.reset_colorize();
    h.layer.reset_map_remove_background("a").unwrap();
    h.layer.tick(t0 + Duration::from_millis(30)).unwrap().unwrap();
    let style = h.layer.renderer().backend().last_frame()[0].style;
    assert_eq!(style.colorize, None);
    assert_eq!(style.remove_background, None);

    assert!(matches!(
        h.layer.set_colorize("not a color"),
        Err(MapError::Validation(_))
    ));
}

#[test]
fn test_stacking_changes_draw_order() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    for id in ["a", "b", "c"] {
        h.layer.add_map(descriptor(id, Point::new(0.0, 0.0))).unwrap();
    }
    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(drawn_ids(&h.layer), vec!["a", "b", "c"]);
    h.drain();

    assert!(h.layer.bring_maps_to_front(&["a".to_string()]));
    assert_eq!(
        h.drain(),
        vec![WarpedMapEvent::StackingChanged(vec!["a".to_string()])]
    );
    h.layer.tick(t0 + Duration::from_millis(20)).unwrap().unwrap();
    assert_eq!(drawn_ids(&h.layer), vec!["b", "c", "a"]);

    // Already at the front
    assert!(!h.layer.bring_maps_to_front(&["a".to_string()]));
    assert!(h.drain().is_empty());

    assert!(h.layer.send_maps_backward(&["a".to_string()]));
    h.layer.tick(t0 + Duration::from_millis(30)).unwrap().unwrap();
    assert_eq!(drawn_ids(&h.layer), vec!["b", "a", "c"]);
}

#[test]
fn test_hidden_maps_are_not_drawn_or_fetched() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.add_map(descriptor("b", Point::new(0.0, 0.0))).unwrap();
    h.layer.hide_maps(&["b".to_string()]);

    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(drawn_ids(&h.layer), vec!["a"]);
    assert_eq!(h.layer.tile_cache().get(&tile("b")), TileStatus::Absent);

    h.layer.show_maps(&["b".to_string()]);
    h.layer.render(home(), t0 + Duration::from_millis(600)).unwrap();
    h.load(t0 + Duration::from_millis(610)).unwrap();
    assert_eq!(drawn_ids(&h.layer), vec!["a", "b"]);
}

#[test]
fn test_remove_and_clear_purge_everything() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.add_map(descriptor("b", Point::new(0.0, 0.0))).unwrap();
    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10)).unwrap();
    h.drain();

    h.layer.remove_map("a").unwrap();
    assert_eq!(h.drain(), vec![WarpedMapEvent::Removed("a".to_string())]);
    assert_eq!(h.layer.tile_cache().get(&tile("a")), TileStatus::Absent);
    assert!(h.layer.renderer().backend().buffer("a").is_none());
    assert_eq!(h.layer.world().z_index("b"), Some(0));
    assert!(h.layer.world().query(&home().extent) == vec!["b".to_string()]);
    assert!(matches!(
        h.layer.remove_map("a"),
        Err(MapError::NotFound(_))
    ));

    h.layer.clear();
    assert_eq!(h.drain(), vec![WarpedMapEvent::Cleared]);
    assert!(h.layer.world().is_empty());
    assert!(h.layer.tile_cache().is_empty());
    assert!(h.layer.maps_in_viewport().is_empty());
    assert!(h.layer.renderer().backend().buffer("b").is_none());
}

#[test]
fn test_failed_tiles_are_retried_on_request() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.fetcher.fail(tile("a"));

    h.layer.render(home(), t0).unwrap();
    h.load(t0 + Duration::from_millis(10));
    assert_eq!(h.layer.tile_cache().get(&tile("a")), TileStatus::Failed);
    assert!(!h
        .drain()
        .iter()
        .any(|e| matches!(e, WarpedMapEvent::TileLoaded(_))));

    h.fetcher.recover(&tile("a"));
    // A new need-set requests the failed tile again
    h.layer
        .render(frame(Point::new(510.0, 400.0)), t0 + Duration::from_millis(600))
        .unwrap();
    h.load(t0 + Duration::from_millis(610)).unwrap();
    assert!(h.layer.tile_cache().get(&tile("a")).is_loaded());
    assert_eq!(h.fetcher.requests(), 2);
}

#[test]
fn test_viewport_updates_are_throttled() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.add_map(descriptor("b", Point::new(5_000.0, 0.0))).unwrap();

    h.layer.render(home(), t0).unwrap();
    assert_eq!(h.layer.maps_in_viewport(), ["a".to_string()]);

    // Inside the throttle window the need-set is not recomputed
    let over_b = frame(Point::new(5_500.0, 400.0));
    h.layer.render(over_b, t0 + Duration::from_millis(100)).unwrap();
    assert_eq!(h.layer.maps_in_viewport(), ["a".to_string()]);

    // The trailing edge uses the latest frame
    assert!(h.layer.tick(t0 + Duration::from_millis(300)).unwrap().is_none());
    h.layer.tick(t0 + Duration::from_millis(500)).unwrap();
    assert_eq!(h.layer.maps_in_viewport(), ["b".to_string()]);
    assert_eq!(h.layer.tile_cache().get(&tile("b")), TileStatus::Pending);
}

#[test]
fn test_render_only_host_converges() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();
    h.layer.add_map(descriptor("b", Point::new(5_000.0, 0.0))).unwrap();

    h.layer.render(home(), t0).unwrap();
    let over_b = frame(Point::new(5_500.0, 400.0));
    h.layer.render(over_b, t0 + Duration::from_millis(100)).unwrap();
    assert_eq!(h.layer.next_update_at(), Some(t0 + Duration::from_millis(500)));

    // The host never ticks; repeated renders of the settled frame catch up
    for step in 3..=12u64 {
        h.layer
            .render(over_b, t0 + Duration::from_millis(step * 50))
            .unwrap();
    }
    assert_eq!(h.layer.maps_in_viewport(), ["b".to_string()]);
    assert_eq!(h.layer.tile_cache().get(&tile("b")), TileStatus::Pending);
    assert!(h.layer.next_update_at().is_none());
}

#[test]
fn test_clear_cancels_pending_update() {
    let mut h = Harness::new();
    let t0 = Instant::now();
    h.layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();

    h.layer.render(home(), t0).unwrap();
    h.layer
        .render(frame(Point::new(600.0, 400.0)), t0 + Duration::from_millis(100))
        .unwrap();
    assert!(h.layer.next_update_at().is_some());

    h.layer.clear();
    assert!(h.layer.next_update_at().is_none());
    assert!(h.layer.maps_in_viewport().is_empty());
}

/// Tiles fetched on a tokio runtime come back through the same channel
#[cfg(feature = "tokio-runtime")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_layer_on_tokio_runtime() {
    init_logger();
    let mut layer = WarpedMapLayer::new(
        HeadlessBackend::new(),
        Arc::new(MemoryTileFetcher::new([10, 20, 30, 255])),
        Arc::new(TokioSpawner::current().unwrap()),
        RenderOptions::default(),
    );
    layer.add_map(descriptor("a", Point::new(0.0, 0.0))).unwrap();

    let t0 = Instant::now();
    layer.render(home(), t0).unwrap();

    let mut stats = None;
    for step in 1..=200u64 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(s) = layer.tick(t0 + Duration::from_millis(step)).unwrap() {
            stats = Some(s);
            break;
        }
    }
    assert_eq!(stats.map(|s| s.maps_drawn), Some(1));
    assert!(layer.tile_cache().get(&tile("a")).is_loaded());
}
