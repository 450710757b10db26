//! Resource mask triangulation.
//!
//! The mask is ear-clipped into a coarse triangulation which is then refined
//! by a uniform barycentric subdivision. A single subdivision count is used
//! for every triangle so that edges shared by two triangles are split at the
//! same points and the mesh stays conforming after being warped.

use crate::core::bounds::Bounds;
use crate::core::config::MeshConfig;
use crate::core::geo::{signed_ring_area, Point};
use crate::transform::Transformer;

const COLLINEAR_EPSILON: f64 = 1e-12;

pub type Triangle = [Point; 3];

/// Triangles of a map mesh as flat vertex lists, three vertices per triangle
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Triangulation {
    pub resource_vertices: Vec<Point>,
    pub geo_vertices: Vec<Point>,
}

impl Triangulation {
    pub fn new(ring: &[Point], transformer: &Transformer, mesh: &MeshConfig) -> Self {
        let max_edge = Bounds::from_points(ring.iter())
            .map(|b| (b.width().powi(2) + b.height().powi(2)).sqrt())
            .unwrap_or(0.0)
            / mesh.triangulation_density.max(1) as f64;

        let triangles = subdivide(&ear_clip(ring), max_edge, mesh.max_subdivisions);
        let resource_vertices: Vec<Point> = triangles.into_iter().flatten().collect();
        let geo_vertices = resource_vertices
            .iter()
            .map(|p| transformer.to_geo(p))
            .collect();

        Self {
            resource_vertices,
            geo_vertices,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.resource_vertices.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.resource_vertices.len()
    }
}

fn cross(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn in_triangle(p: &Point, a: &Point, b: &Point, c: &Point) -> bool {
    cross(a, b, p) >= 0.0 && cross(b, c, p) >= 0.0 && cross(c, a, p) >= 0.0
}

/// Ear clipping of a simple polygon, output triangles are counter-clockwise
pub fn ear_clip(ring: &[Point]) -> Vec<Triangle> {
    let mut polygon: Vec<Point> = ring.to_vec();
    if signed_ring_area(&polygon) < 0.0 {
        polygon.reverse();
    }

    let mut triangles = Vec::with_capacity(polygon.len().saturating_sub(2));
    while polygon.len() > 3 {
        let n = polygon.len();
        let ear = (0..n).find(|&i| {
            let (a, b, c) = (&polygon[(i + n - 1) % n], &polygon[i], &polygon[(i + 1) % n]);
            cross(a, b, c) > COLLINEAR_EPSILON
                && polygon
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i && *j != (i + n - 1) % n && *j != (i + 1) % n)
                    .all(|(_, p)| p == a || p == c || !in_triangle(p, a, b, c))
        });

        match ear {
            Some(i) => {
                triangles.push([polygon[(i + n - 1) % n], polygon[i], polygon[(i + 1) % n]]);
                polygon.remove(i);
            }
            None => {
                // Self-touching or collinear leftovers: drop the flattest vertex
                let flattest = (0..n)
                    .min_by(|&i, &j| {
                        let ci = cross(&polygon[(i + n - 1) % n], &polygon[i], &polygon[(i + 1) % n]);
                        let cj = cross(&polygon[(j + n - 1) % n], &polygon[j], &polygon[(j + 1) % n]);
                        ci.abs().total_cmp(&cj.abs())
                    })
                    .unwrap_or(0);
                let (a, b, c) = (
                    polygon[(flattest + n - 1) % n],
                    polygon[flattest],
                    polygon[(flattest + 1) % n],
                );
                if cross(&a, &b, &c) > COLLINEAR_EPSILON {
                    triangles.push([a, b, c]);
                }
                polygon.remove(flattest);
            }
        }
    }

    if polygon.len() == 3 && cross(&polygon[0], &polygon[1], &polygon[2]) > COLLINEAR_EPSILON {
        triangles.push([polygon[0], polygon[1], polygon[2]]);
    }
    triangles
}

/// Subdivision count so that no refined edge is longer than `max_edge`
pub fn subdivision_count(triangles: &[Triangle], max_edge: f64, max_subdivisions: u32) -> u32 {
    if max_edge.is_nan() || max_edge <= 0.0 {
        return 1;
    }

    let longest = triangles
        .iter()
        .flat_map(|t| {
            [
                t[0].distance_to(&t[1]),
                t[1].distance_to(&t[2]),
                t[2].distance_to(&t[0]),
            ]
        })
        .fold(0.0, f64::max);

    ((longest / max_edge).ceil() as u32).clamp(1, max_subdivisions.max(1))
}

/// Splits every triangle into `n²` congruent triangles, `n` from [`subdivision_count`]
pub fn subdivide(triangles: &[Triangle], max_edge: f64, max_subdivisions: u32) -> Vec<Triangle> {
    let n = subdivision_count(triangles, max_edge, max_subdivisions);
    if n == 1 {
        return triangles.to_vec();
    }

    let steps = n as f64;
    let mut out = Vec::with_capacity(triangles.len() * (n * n) as usize);
    for [a, b, c] in triangles {
        let ab = b.subtract(a);
        let ac = c.subtract(a);
        let at = |i: u32, j: u32| {
            a.add(&ab.multiply(i as f64 / steps))
                .add(&ac.multiply(j as f64 / steps))
        };

        for i in 0..n {
            for j in 0..n - i {
                out.push([at(i, j), at(i + 1, j), at(i, j + 1)]);
                if i + j + 1 < n {
                    out.push([at(i + 1, j), at(i + 1, j + 1), at(i, j + 1)]);
                }
            }
        }
    }
    out
}
