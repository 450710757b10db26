use crate::core::geo::Point;
use serde::{Deserialize, Serialize};

/// 2-D affine transform stored CSS-style as `[a, b, c, d, e, f]`:
///
/// ```text
/// x' = a * x + c * y + e
/// y' = b * x + d * y + f
/// ```
///
/// Used for the view-space to clip-space projection handed to the renderer
/// and for the view-space to device-pixel transform of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionTransform(pub [f64; 6]);

impl ProjectionTransform {
    pub fn identity() -> Self {
        Self([1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    }

    /// Translate by `(dx2, dy2)`, rotate by `angle`, scale by `(sx, sy)`
    /// and finally translate by `(dx1, dy1)`.
    pub fn compose(dx1: f64, dy1: f64, sx: f64, sy: f64, angle: f64, dx2: f64, dy2: f64) -> Self {
        let sin = angle.sin();
        let cos = angle.cos();
        Self([
            sx * cos,
            sy * sin,
            -sx * sin,
            sy * cos,
            dx2 * sx * cos - dy2 * sx * sin + dx1,
            dx2 * sy * sin + dy2 * sy * cos + dy1,
        ])
    }

    /// View space to clip space (`[-1, 1]` on both axes) for a viewport of
    /// `size` pixels showing `center` at `resolution` view units per pixel.
    pub fn from_view(size: Point, resolution: f64, rotation: f64, center: Point) -> Self {
        Self::compose(
            0.0,
            0.0,
            2.0 / (resolution * size.x),
            2.0 / (resolution * size.y),
            -rotation,
            -center.x,
            -center.y,
        )
    }

    pub fn apply(&self, p: &Point) -> Point {
        let m = &self.0;
        Point::new(
            m[0] * p.x + m[2] * p.y + m[4],
            m[1] * p.x + m[3] * p.y + m[5],
        )
    }

    pub fn determinant(&self) -> f64 {
        self.0[0] * self.0[3] - self.0[1] * self.0[2]
    }

    /// Average linear scale of the transform (output units per input unit)
    pub fn scale_factor(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let [a, b, c, d, e, f] = self.0;
        Some(Self([
            d / det,
            -b / det,
            -c / det,
            a / det,
            (c * f - d * e) / det,
            -(a * f - b * e) / det,
        ]))
    }

    /// `self` applied after `other`
    pub fn multiply(&self, other: &ProjectionTransform) -> Self {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Self([
            a1 * a2 + c1 * b2,
            b1 * a2 + d1 * b2,
            a1 * c2 + c1 * d2,
            b1 * c2 + d1 * d2,
            a1 * e2 + c1 * f2 + e1,
            b1 * e2 + d1 * f2 + f1,
        ])
    }
}

impl Default for ProjectionTransform {
    fn default() -> Self {
        Self::identity()
    }
}
