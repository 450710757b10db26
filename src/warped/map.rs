use crate::core::bounds::Bounds;
use crate::core::config::MeshConfig;
use crate::core::constants::TILE_SIZE;
use crate::core::geo::{ring_to_polygon, signed_ring_area, validate_ring, MapId, Point, Ring};
use crate::rendering::style::MapStyle;
use crate::tiles::types::TileRegion;
use crate::transform::{Gcp, TransformationType, Transformer};
use crate::warped::triangulation::Triangulation;
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};

const DEGENERATE_AREA_EPSILON: f64 = 1e-9;

fn default_tile_size() -> u32 {
    TILE_SIZE
}

/// Tiled image pyramid of a map, as served by a IIIF image service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub service_url: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    /// Downscale factor per level, finest first. Filled with powers of two when empty.
    #[serde(default)]
    pub scale_factors: Vec<u32>,
}

impl ImageInfo {
    pub fn new(service_url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            service_url: service_url.into(),
            width,
            height,
            tile_size: TILE_SIZE,
            scale_factors: Vec::new(),
        }
        .normalized()
    }

    /// Sorted, deduplicated scale factors; powers of two up to the first level
    /// fitting the whole image in a single tile when none were given.
    pub fn normalized(mut self) -> Self {
        if self.tile_size == 0 {
            self.tile_size = TILE_SIZE;
        }
        self.scale_factors.retain(|s| *s > 0);
        if self.scale_factors.is_empty() {
            let longest = self.width.max(self.height).max(1) as u64;
            let mut factor = 1u32;
            self.scale_factors.push(factor);
            while (self.tile_size as u64) * (factor as u64) < longest {
                factor *= 2;
                self.scale_factors.push(factor);
            }
        }
        self.scale_factors.sort_unstable();
        self.scale_factors.dedup();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn level_count(&self) -> usize {
        self.scale_factors.len()
    }

    pub fn scale_factor(&self, level: u32) -> u32 {
        self.scale_factors.get(level as usize).copied().unwrap_or(1)
    }

    /// Resource pixels covered by one tile side at `level`
    pub fn tile_span(&self, level: u32) -> u32 {
        self.tile_size * self.scale_factor(level)
    }

    pub fn columns(&self, level: u32) -> u32 {
        self.width.div_ceil(self.tile_span(level))
    }

    pub fn rows(&self, level: u32) -> u32 {
        self.height.div_ceil(self.tile_span(level))
    }

    /// Level whose scale factor is the largest one not exceeding
    /// `resource_px_per_device_px`; the finest level when every factor exceeds it.
    pub fn select_level(&self, resource_px_per_device_px: f64) -> u32 {
        self.scale_factors
            .iter()
            .enumerate()
            .filter(|(_, s)| **s as f64 <= resource_px_per_device_px)
            .map(|(i, _)| i as u32)
            .last()
            .unwrap_or(0)
    }

    pub fn tile_region(&self, level: u32, column: u32, row: u32) -> TileRegion {
        let span = self.tile_span(level);
        let scale = self.scale_factor(level);
        let x = column * span;
        let y = row * span;
        let width = span.min(self.width.saturating_sub(x));
        let height = span.min(self.height.saturating_sub(y));
        TileRegion {
            x,
            y,
            width,
            height,
            output_width: width.div_ceil(scale),
            output_height: height.div_ceil(scale),
        }
    }
}

/// Everything needed to register a warped map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDescriptor {
    #[serde(default)]
    pub id: Option<MapId>,
    pub image: ImageInfo,
    pub resource_mask: Ring,
    pub gcps: Vec<Gcp>,
    #[serde(default)]
    pub transformation: TransformationType,
}

impl MapDescriptor {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Geometry derived from the mask and the transformer
#[derive(Debug, Clone)]
struct Derived {
    geo_mask: Ring,
    bounding_box: Bounds,
    resource_mask_bounds: Bounds,
    triangulation: Triangulation,
}

impl Derived {
    fn compute(mask: &[Point], transformer: &Transformer, mesh: &MeshConfig) -> Result<Self> {
        let geo_mask = transformer.ring_to_geo(mask);
        if geo_mask.iter().any(|p| !p.is_finite()) {
            return Err(MapError::Transformation(
                "resource mask maps to non-finite geo coordinates".to_string(),
            ));
        }
        let bounding_box = Bounds::from_points(geo_mask.iter())
            .ok_or_else(|| MapError::Validation("empty resource mask".to_string()))?;
        let resource_mask_bounds = Bounds::from_points(mask.iter())
            .ok_or_else(|| MapError::Validation("empty resource mask".to_string()))?;

        Ok(Self {
            triangulation: Triangulation::new(mask, transformer, mesh),
            geo_mask,
            bounding_box,
            resource_mask_bounds,
        })
    }
}

/// A georeferenced map image together with its derived geometry
#[derive(Debug, Clone)]
pub struct WarpedMap {
    pub id: MapId,
    pub image: ImageInfo,
    resource_mask: Ring,
    gcps: Vec<Gcp>,
    transformer: Transformer,
    derived: Derived,
    pub visible: bool,
    pub z_index: usize,
    pub style: MapStyle,
}

impl WarpedMap {
    pub fn new(
        id: MapId,
        descriptor: MapDescriptor,
        z_index: usize,
        mesh: &MeshConfig,
    ) -> Result<Self> {
        validate_ring(&descriptor.resource_mask).map_err(MapError::Validation)?;
        let image = descriptor.image.normalized();
        if image.is_empty() {
            return Err(MapError::Validation(format!(
                "map {} has an empty image ({}x{})",
                id, image.width, image.height
            )));
        }

        let transformer = Transformer::new(&descriptor.gcps, descriptor.transformation)?;
        let derived = Derived::compute(&descriptor.resource_mask, &transformer, mesh)?;

        Ok(Self {
            id,
            image,
            resource_mask: descriptor.resource_mask,
            gcps: descriptor.gcps,
            transformer,
            derived,
            visible: true,
            z_index,
            style: MapStyle::default(),
        })
    }

    /// Replaces the mask; the map is unchanged when the ring is invalid
    pub fn set_resource_mask(&mut self, ring: Ring, mesh: &MeshConfig) -> Result<()> {
        validate_ring(&ring).map_err(MapError::Validation)?;
        self.derived = Derived::compute(&ring, &self.transformer, mesh)?;
        self.resource_mask = ring;
        Ok(())
    }

    /// Refits the transformer; the map is unchanged when fitting fails
    pub fn set_transformation(&mut self, kind: TransformationType, mesh: &MeshConfig) -> Result<()> {
        let transformer = Transformer::new(&self.gcps, kind)?;
        self.derived = Derived::compute(&self.resource_mask, &transformer, mesh)?;
        self.transformer = transformer;
        Ok(())
    }

    pub fn resource_mask(&self) -> &[Point] {
        &self.resource_mask
    }

    pub fn gcps(&self) -> &[Gcp] {
        &self.gcps
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn transformation_type(&self) -> TransformationType {
        self.transformer.kind()
    }

    pub fn geo_mask(&self) -> &[Point] {
        &self.derived.geo_mask
    }

    pub fn geo_polygon(&self) -> geo_types::Polygon<f64> {
        ring_to_polygon(&self.derived.geo_mask)
    }

    pub fn bounding_box(&self) -> Bounds {
        self.derived.bounding_box
    }

    pub fn resource_mask_bounds(&self) -> Bounds {
        self.derived.resource_mask_bounds
    }

    pub fn triangulation(&self) -> &Triangulation {
        &self.derived.triangulation
    }

    pub fn geo_mask_area(&self) -> f64 {
        signed_ring_area(&self.derived.geo_mask).abs()
    }

    /// A geo mask without area cannot be drawn or intersected. Areas
    /// vanishing relative to the bounding box count as none.
    pub fn is_degenerate(&self) -> bool {
        let area = self.geo_mask_area();
        let bounds = self.bounding_box();
        let extent = bounds.width() + bounds.height();
        !(area.is_finite() && area > extent * extent * DEGENERATE_AREA_EPSILON)
    }

    /// View units per resource pixel, from the ratio of mask areas
    pub fn geo_units_per_resource_pixel(&self) -> f64 {
        let resource_area = signed_ring_area(&self.resource_mask).abs();
        if resource_area > 0.0 {
            (self.geo_mask_area() / resource_area).sqrt()
        } else {
            0.0
        }
    }
}
