//! Resource to geo transformations fitted from ground control points.

pub mod fit;
pub mod types;

use crate::core::geo::Point;
use crate::{MapError, Result};
use fit::FittedModel;

pub use types::{Gcp, TransformationType};

/// Forward (resource to geo) and backward (geo to resource) models fitted from
/// the same control points.
///
/// The backward model is fitted independently rather than inverted, so the two
/// directions agree exactly only at the control points for non-invertible
/// families such as higher-order polynomials.
#[derive(Debug, Clone)]
pub struct Transformer {
    kind: TransformationType,
    forward: FittedModel,
    backward: FittedModel,
}

impl Transformer {
    pub fn new(gcps: &[Gcp], kind: TransformationType) -> Result<Self> {
        if !kind.is_supported() {
            return Err(MapError::Validation(format!(
                "unsupported transformation {:?}",
                kind
            )));
        }
        if gcps.len() < kind.min_gcps() {
            return Err(MapError::Validation(format!(
                "{:?} needs at least {} control points, got {}",
                kind,
                kind.min_gcps(),
                gcps.len()
            )));
        }
        if gcps
            .iter()
            .any(|g| !g.resource.is_finite() || !g.geo.is_finite())
        {
            return Err(MapError::Validation(
                "control points must be finite".to_string(),
            ));
        }

        let resource: Vec<Point> = gcps.iter().map(|g| g.resource).collect();
        let geo: Vec<Point> = gcps.iter().map(|g| g.geo).collect();

        Ok(Self {
            kind,
            forward: FittedModel::fit(&resource, &geo, kind)?,
            backward: FittedModel::fit(&geo, &resource, kind)?,
        })
    }

    pub fn kind(&self) -> TransformationType {
        self.kind
    }

    /// Resource pixel to geo (view) coordinates
    pub fn to_geo(&self, p: &Point) -> Point {
        self.forward.evaluate(p)
    }

    /// Geo (view) coordinates to resource pixel
    pub fn to_resource(&self, p: &Point) -> Point {
        self.backward.evaluate(p)
    }

    pub fn ring_to_geo(&self, ring: &[Point]) -> Vec<Point> {
        ring.iter().map(|p| self.to_geo(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point, b: Point, tolerance: f64) {
        assert!(
            a.distance_to(&b) < tolerance,
            "{:?} is not close to {:?}",
            a,
            b
        );
    }

    fn gcps_from(resource: &[Point], f: impl Fn(&Point) -> Point) -> Vec<Gcp> {
        resource.iter().map(|p| Gcp::new(*p, f(p))).collect()
    }

    fn grid() -> Vec<Point> {
        let mut points = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                points.push(Point::new(i as f64 * 300.0 + j as f64 * 7.0, j as f64 * 250.0));
            }
        }
        points
    }

    #[test]
    fn test_helmert_recovers_similarity() {
        let similarity = |p: &Point| {
            let (s, c) = (0.3f64.sin() * 2.0, 0.3f64.cos() * 2.0);
            Point::new(c * p.x - s * p.y + 1000.0, s * p.x + c * p.y - 500.0)
        };
        let gcps = gcps_from(&[Point::new(0.0, 0.0), Point::new(100.0, 50.0)], similarity);
        let t = Transformer::new(&gcps, TransformationType::Helmert).unwrap();

        let p = Point::new(42.0, 17.0);
        assert_close(t.to_geo(&p), similarity(&p), 1e-6);
        assert_close(t.to_resource(&similarity(&p)), p, 1e-6);
    }

    #[test]
    fn test_affine_polynomial_is_exact() {
        let affine = |p: &Point| Point::new(2.0 * p.x + 0.5 * p.y + 10.0, -p.x + 3.0 * p.y);
        let gcps = gcps_from(&grid(), affine);
        let t = Transformer::new(&gcps, TransformationType::Polynomial { order: 1 }).unwrap();

        let p = Point::new(123.0, 456.0);
        assert_close(t.to_geo(&p), affine(&p), 1e-6);
        assert_close(t.to_resource(&affine(&p)), p, 1e-6);
    }

    #[test]
    fn test_quadratic_polynomial_fits_quadratic() {
        let quadratic =
            |p: &Point| Point::new(p.x + 0.001 * p.x * p.y, p.y + 0.0005 * p.x * p.x);
        let gcps = gcps_from(&grid(), quadratic);
        let t = Transformer::new(&gcps, TransformationType::Polynomial { order: 2 }).unwrap();

        let p = Point::new(400.0, 300.0);
        assert_close(t.to_geo(&p), quadratic(&p), 1e-6);
    }

    #[test]
    fn test_projective_recovers_homography() {
        let homography = |p: &Point| {
            let w = 0.0001 * p.x + 0.0002 * p.y + 1.0;
            Point::new((1.5 * p.x + 0.2 * p.y + 30.0) / w, (0.1 * p.x + 1.2 * p.y - 20.0) / w)
        };
        let resource = [
            Point::new(0.0, 0.0),
            Point::new(1000.0, 0.0),
            Point::new(1000.0, 800.0),
            Point::new(0.0, 800.0),
        ];
        let gcps = gcps_from(&resource, homography);
        let t = Transformer::new(&gcps, TransformationType::Projective).unwrap();

        let p = Point::new(250.0, 600.0);
        assert_close(t.to_geo(&p), homography(&p), 1e-6);
        assert_close(t.to_resource(&homography(&p)), p, 1e-6);
    }

    #[test]
    fn test_thin_plate_spline_interpolates_control_points() {
        let warp = |p: &Point| Point::new(p.x + (p.y / 100.0).sin() * 20.0, p.y * 1.1);
        let gcps = gcps_from(&grid(), warp);
        let t = Transformer::new(&gcps, TransformationType::ThinPlateSpline).unwrap();

        for gcp in &gcps {
            assert_close(t.to_geo(&gcp.resource), gcp.geo, 1e-6);
            assert_close(t.to_resource(&gcp.geo), gcp.resource, 1e-6);
        }
    }

    #[test]
    fn test_too_few_control_points() {
        let gcps = gcps_from(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0)], |p| *p);
        let result = Transformer::new(&gcps, TransformationType::Polynomial { order: 1 });
        assert!(matches!(result, Err(MapError::Validation(_))));
    }

    #[test]
    fn test_collinear_control_points_are_rejected() {
        let resource = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ];
        let gcps = gcps_from(&resource, |p| *p);
        assert!(Transformer::new(&gcps, TransformationType::Polynomial { order: 1 }).is_err());
    }
}
