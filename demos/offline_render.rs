//! Renders two overlapping warped maps off-screen and writes the result to a PNG.
//!
//! Tiles come from an in-memory fetcher, so no network access is needed.
//! Run with `RUST_LOG=debug` to follow the frame loop.

use std::sync::Arc;
use std::time::Duration;

use warpmap::prelude::*;

fn descriptor(id: &str, offset: Point, skew: f64) -> MapDescriptor {
    let corners = [
        Point::new(0.0, 0.0),
        Point::new(1000.0, 0.0),
        Point::new(1000.0, 800.0),
        Point::new(0.0, 800.0),
    ];
    MapDescriptor {
        id: Some(id.to_string()),
        image: ImageInfo::new(format!("memory://{}", id), 1000, 800),
        resource_mask: corners.to_vec(),
        gcps: corners
            .iter()
            .map(|p| Gcp::new(*p, Point::new(p.x + p.y * skew, p.y).add(&offset)))
            .collect(),
        transformation: TransformationType::Polynomial { order: 1 },
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let options = RenderProfile::Balanced.resolve();
    let backend = WgpuBackend::new_blocking(512, 512, &options.rendering)?;
    let spawner = QueuedSpawner::new();
    let mut layer = WarpedMapLayer::new(
        backend,
        Arc::new(MemoryTileFetcher::new([190, 160, 110, 255])),
        Arc::new(spawner.clone()),
        options,
    );

    layer.add_map(descriptor("base", Point::new(0.0, 0.0), 0.0))?;
    layer.add_map(descriptor("overlay", Point::new(300.0, 200.0), 0.25))?;
    layer.set_map_opacity("overlay", 0.6)?;
    layer.set_map_colorize("overlay", "#203080")?;

    let frame = FrameState::new(Point::new(512.0, 512.0), Point::new(800.0, 600.0), 3.0, 0.1);
    let start = Instant::now();
    layer.render(frame, start)?;

    spawner.run_pending();
    let stats = layer.tick(start + Duration::from_millis(16))?;
    println!("frame stats: {:?}", stats);

    let (width, height) = layer.renderer().backend().size();
    let pixels = layer.renderer().backend().read_pixels()?;
    let image = image::RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| MapError::Render("pixel buffer size mismatch".to_string()))?;
    image.save("warped.png")?;
    println!("wrote warped.png");

    Ok(())
}
