use serde::{Deserialize, Serialize};

/// Opaque identifier of a warped map, stable for the lifetime of the entity
pub type MapId = String;

/// Represents a point in resource (image pixel) or geo/view coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn multiply(&self, scalar: f64) -> Point {
        Point::new(self.x * scalar, self.y * scalar)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Linear interpolation towards `other`, `t = 0` yields `self`
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl From<[f64; 2]> for Point {
    fn from(value: [f64; 2]) -> Self {
        Point::new(value[0], value[1])
    }
}

impl From<Point> for geo_types::Coord<f64> {
    fn from(p: Point) -> Self {
        geo_types::Coord { x: p.x, y: p.y }
    }
}

/// Closed polygon boundary given as an unclosed list of points
/// (the last point is not a repetition of the first).
pub type Ring = Vec<Point>;

/// Checks the ring invariants: at least three points and no duplicates.
///
/// A closed ring (first point repeated at the end) is rejected as well since
/// that is a duplicate.
pub fn validate_ring(ring: &[Point]) -> std::result::Result<(), String> {
    if ring.len() < 3 {
        return Err(format!("ring needs at least 3 points, got {}", ring.len()));
    }

    if let Some(p) = ring.iter().find(|p| !p.is_finite()) {
        return Err(format!("ring contains a non-finite point {:?}", p));
    }

    for (i, a) in ring.iter().enumerate() {
        if ring[i + 1..].iter().any(|b| a == b) {
            return Err(format!("ring contains duplicate point ({}, {})", a.x, a.y));
        }
    }

    Ok(())
}

/// Signed area of a ring (shoelace); positive for counter-clockwise rings
/// in a y-up coordinate system.
pub fn signed_ring_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Converts a ring into a `geo` polygon for exact intersection tests
pub fn ring_to_polygon(ring: &[Point]) -> geo_types::Polygon<f64> {
    let coords: Vec<geo_types::Coord<f64>> = ring.iter().map(|p| (*p).into()).collect();
    // Polygon::new closes the exterior
    geo_types::Polygon::new(geo_types::LineString::from(coords), vec![])
}
