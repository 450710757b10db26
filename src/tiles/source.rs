use crate::prelude::{HashSet, Mutex};
use crate::tiles::types::{NeededTile, TileImage, TileKey, TileRegion};
use crate::{MapError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared async HTTP client for tile fetching
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent("warpmap/0.1.0")
        .timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build reqwest async client")
});

/// Anything that can turn a tile request into decoded pixels
#[async_trait]
pub trait TileFetcher: Send + Sync + 'static {
    async fn fetch(&self, tile: &NeededTile) -> Result<TileImage>;
}

/// IIIF Image API URL of a tile region scaled to its output size
pub fn iiif_tile_url(service_url: &str, region: &TileRegion) -> String {
    format!(
        "{}/{},{},{},{}/{},{}/0/default.jpg",
        service_url.trim_end_matches('/'),
        region.x,
        region.y,
        region.width,
        region.height,
        region.output_width,
        region.output_height
    )
}

/// Decodes any format supported by `image` into RGBA8
pub fn decode_tile(bytes: &[u8]) -> Result<TileImage> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = image.dimensions();
    Ok(TileImage::new(width, height, image.into_raw()))
}

/// Fetches tiles from IIIF image services over HTTP
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new() -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTileFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, tile: &NeededTile) -> Result<TileImage> {
        let url = iiif_tile_url(&tile.service_url, &tile.region);
        log::debug!("fetching tile {} from {}", tile.key, url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MapError::Fetch(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        decode_tile(&bytes)
    }
}

/// In-memory fetcher serving a solid color for every tile, with optional
/// failures. Counts requests, which makes it handy for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryTileFetcher {
    color: [u8; 4],
    failing: Mutex<HashSet<TileKey>>,
    requests: AtomicUsize,
}

impl MemoryTileFetcher {
    pub fn new(color: [u8; 4]) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }

    pub fn fail(&self, key: TileKey) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(key);
        }
    }

    pub fn recover(&self, key: &TileKey) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(key);
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TileFetcher for MemoryTileFetcher {
    async fn fetch(&self, tile: &NeededTile) -> Result<TileImage> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let fails = self
            .failing
            .lock()
            .map(|failing| failing.contains(&tile.key))
            .unwrap_or(false);
        if fails {
            return Err(MapError::Fetch(format!("tile {} unavailable", tile.key)));
        }
        Ok(TileImage::solid(
            tile.region.output_width.max(1),
            tile.region.output_height.max(1),
            self.color,
        ))
    }
}
