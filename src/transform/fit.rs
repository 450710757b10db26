//! Least-squares and interpolating fits between two point sets.
//!
//! Every model is fitted on normalized coordinates (centered on the centroid,
//! scaled to unit mean distance) so the linear systems stay well conditioned
//! for pixel and web-mercator magnitudes alike.

use crate::core::geo::Point;
use crate::transform::types::TransformationType;
use crate::{MapError, Result};
use nalgebra::{DMatrix, DVector};

const RANK_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Normalizer {
    center: Point,
    scale: f64,
}

impl Normalizer {
    fn fit(points: &[Point]) -> Self {
        let n = points.len().max(1) as f64;
        let sum = points.iter().fold(Point::default(), |acc, p| acc.add(p));
        let center = sum.multiply(1.0 / n);
        let mean_distance = points.iter().map(|p| p.distance_to(&center)).sum::<f64>() / n;
        let scale = if mean_distance > 0.0 && mean_distance.is_finite() {
            mean_distance
        } else {
            1.0
        };
        Self { center, scale }
    }

    fn apply(&self, p: &Point) -> Point {
        p.subtract(&self.center).multiply(1.0 / self.scale)
    }

    fn undo(&self, p: &Point) -> Point {
        p.multiply(self.scale).add(&self.center)
    }
}

#[derive(Debug, Clone)]
enum Model {
    /// `[a, b, tx, ty]` with `x' = a x - b y + tx`, `y' = b x + a y + ty`
    Helmert([f64; 4]),
    Polynomial {
        order: u8,
        x: DVector<f64>,
        y: DVector<f64>,
    },
    /// Row-major homography
    Projective([f64; 9]),
    ThinPlateSpline {
        centers: Vec<Point>,
        x: DVector<f64>,
        y: DVector<f64>,
    },
}

/// A model fitted in one direction (source to destination)
#[derive(Debug, Clone)]
pub(crate) struct FittedModel {
    source: Normalizer,
    destination: Normalizer,
    model: Model,
}

impl FittedModel {
    pub(crate) fn fit(
        source: &[Point],
        destination: &[Point],
        kind: TransformationType,
    ) -> Result<Self> {
        let source_norm = Normalizer::fit(source);
        let destination_norm = Normalizer::fit(destination);
        let src: Vec<Point> = source.iter().map(|p| source_norm.apply(p)).collect();
        let dst: Vec<Point> = destination
            .iter()
            .map(|p| destination_norm.apply(p))
            .collect();

        let model = match kind {
            TransformationType::Helmert => fit_helmert(&src, &dst)?,
            TransformationType::Polynomial { order } => fit_polynomial(&src, &dst, order)?,
            TransformationType::Projective => fit_projective(&src, &dst)?,
            TransformationType::ThinPlateSpline => fit_thin_plate_spline(&src, &dst)?,
        };

        Ok(Self {
            source: source_norm,
            destination: destination_norm,
            model,
        })
    }

    pub(crate) fn evaluate(&self, p: &Point) -> Point {
        let q = self.source.apply(p);
        let out = match &self.model {
            Model::Helmert([a, b, tx, ty]) => {
                Point::new(a * q.x - b * q.y + tx, b * q.x + a * q.y + ty)
            }
            Model::Polynomial { order, x, y } => {
                let terms = polynomial_terms(&q, *order);
                Point::new(dot(&terms, x), dot(&terms, y))
            }
            Model::Projective(h) => {
                let w = h[6] * q.x + h[7] * q.y + h[8];
                Point::new(
                    (h[0] * q.x + h[1] * q.y + h[2]) / w,
                    (h[3] * q.x + h[4] * q.y + h[5]) / w,
                )
            }
            Model::ThinPlateSpline { centers, x, y } => {
                let n = centers.len();
                let mut px = x[n] + x[n + 1] * q.x + x[n + 2] * q.y;
                let mut py = y[n] + y[n + 1] * q.x + y[n + 2] * q.y;
                for (i, c) in centers.iter().enumerate() {
                    let u = tps_kernel(squared_distance(&q, c));
                    px += x[i] * u;
                    py += y[i] * u;
                }
                Point::new(px, py)
            }
        };
        self.destination.undo(&out)
    }
}

fn singular(kind: &str) -> MapError {
    MapError::Transformation(format!(
        "{} system is singular for the given control points",
        kind
    ))
}

fn dot(terms: &[f64], coefficients: &DVector<f64>) -> f64 {
    terms
        .iter()
        .zip(coefficients.iter())
        .map(|(t, c)| t * c)
        .sum()
}

fn squared_distance(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// `r² ln r²`, the 2-D biharmonic radial basis
fn tps_kernel(r2: f64) -> f64 {
    if r2 <= 0.0 {
        0.0
    } else {
        r2 * r2.ln()
    }
}

/// Monomials `x^i y^j` with `i + j <= order`, lowest degree first
fn polynomial_terms(p: &Point, order: u8) -> Vec<f64> {
    let mut terms = Vec::with_capacity(10);
    for degree in 0..=order as i32 {
        for j in 0..=degree {
            let i = degree - j;
            terms.push(p.x.powi(i) * p.y.powi(j));
        }
    }
    terms
}

/// Least-squares solve of `a * x = b`, rejecting rank-deficient systems
fn least_squares(a: DMatrix<f64>, b: DVector<f64>, kind: &str) -> Result<DVector<f64>> {
    let unknowns = a.ncols();
    let svd = a.svd(true, true);
    if svd.rank(RANK_EPSILON) < unknowns {
        return Err(singular(kind));
    }
    svd.solve(&b, RANK_EPSILON)
        .map_err(|e| MapError::Transformation(format!("{} solve failed: {}", kind, e)))
}

fn fit_helmert(src: &[Point], dst: &[Point]) -> Result<Model> {
    let n = src.len();
    let mut a = DMatrix::zeros(2 * n, 4);
    let mut b = DVector::zeros(2 * n);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        a[(2 * i, 0)] = s.x;
        a[(2 * i, 1)] = -s.y;
        a[(2 * i, 2)] = 1.0;
        b[2 * i] = d.x;

        a[(2 * i + 1, 0)] = s.y;
        a[(2 * i + 1, 1)] = s.x;
        a[(2 * i + 1, 3)] = 1.0;
        b[2 * i + 1] = d.y;
    }

    let solution = least_squares(a, b, "helmert")?;
    Ok(Model::Helmert([
        solution[0],
        solution[1],
        solution[2],
        solution[3],
    ]))
}

fn fit_polynomial(src: &[Point], dst: &[Point], order: u8) -> Result<Model> {
    let rows: Vec<Vec<f64>> = src.iter().map(|p| polynomial_terms(p, order)).collect();
    let columns = rows.first().map(Vec::len).unwrap_or(0);
    let a = DMatrix::from_fn(src.len(), columns, |r, c| rows[r][c]);
    let bx = DVector::from_iterator(dst.len(), dst.iter().map(|p| p.x));
    let by = DVector::from_iterator(dst.len(), dst.iter().map(|p| p.y));

    let x = least_squares(a.clone(), bx, "polynomial")?;
    let y = least_squares(a, by, "polynomial")?;
    Ok(Model::Polynomial { order, x, y })
}

/// Direct linear transform; the homography is the right singular vector of
/// the smallest singular value.
fn fit_projective(src: &[Point], dst: &[Point]) -> Result<Model> {
    // Pad to a square system so the null vector is part of V^T
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::zeros(rows, 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let r = 2 * i;
        a[(r, 0)] = -s.x;
        a[(r, 1)] = -s.y;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = d.x * s.x;
        a[(r, 7)] = d.x * s.y;
        a[(r, 8)] = d.x;

        a[(r + 1, 3)] = -s.x;
        a[(r + 1, 4)] = -s.y;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = d.y * s.x;
        a[(r + 1, 7)] = d.y * s.y;
        a[(r + 1, 8)] = d.y;
    }

    let svd = a.svd(false, true);
    if svd.rank(RANK_EPSILON) < 8 {
        return Err(singular("projective"));
    }
    let v_t = svd.v_t.as_ref().ok_or_else(|| singular("projective"))?;

    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, s)| {
            if *s < best.1 {
                (i, *s)
            } else {
                best
            }
        });

    let mut h = [0.0; 9];
    for (k, value) in h.iter_mut().enumerate() {
        *value = v_t[(smallest, k)];
    }
    if h[8].abs() > f64::EPSILON {
        let scale = h[8];
        h.iter_mut().for_each(|v| *v /= scale);
    }
    Ok(Model::Projective(h))
}

fn fit_thin_plate_spline(src: &[Point], dst: &[Point]) -> Result<Model> {
    let n = src.len();
    let size = n + 3;
    let mut l = DMatrix::zeros(size, size);
    for i in 0..n {
        for j in 0..n {
            l[(i, j)] = tps_kernel(squared_distance(&src[i], &src[j]));
        }
        l[(i, n)] = 1.0;
        l[(i, n + 1)] = src[i].x;
        l[(i, n + 2)] = src[i].y;
        l[(n, i)] = 1.0;
        l[(n + 1, i)] = src[i].x;
        l[(n + 2, i)] = src[i].y;
    }

    let mut bx = DVector::zeros(size);
    let mut by = DVector::zeros(size);
    for (i, d) in dst.iter().enumerate() {
        bx[i] = d.x;
        by[i] = d.y;
    }

    let lu = l.lu();
    let x = lu.solve(&bx).ok_or_else(|| singular("thin plate spline"))?;
    let y = lu.solve(&by).ok_or_else(|| singular("thin plate spline"))?;
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(singular("thin plate spline"));
    }

    Ok(Model::ThinPlateSpline {
        centers: src.to_vec(),
        x,
        y,
    })
}
