use crate::core::geo::Point;
use serde::{Deserialize, Serialize};

/// Family of the resource to geo transformation fitted from the GCPs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransformationType {
    /// Similarity: uniform scale, rotation and translation
    Helmert,
    /// Polynomial of order 1 (affine), 2 or 3
    Polynomial { order: u8 },
    /// Homography
    Projective,
    ThinPlateSpline,
}

impl TransformationType {
    /// Smallest number of ground control points that determines the model
    pub fn min_gcps(&self) -> usize {
        match self {
            Self::Helmert => 2,
            Self::Polynomial { order } => {
                let k = *order as usize;
                (k + 1) * (k + 2) / 2
            }
            Self::Projective => 4,
            Self::ThinPlateSpline => 3,
        }
    }

    pub fn is_supported(&self) -> bool {
        match self {
            Self::Polynomial { order } => (1..=3).contains(order),
            _ => true,
        }
    }
}

impl Default for TransformationType {
    fn default() -> Self {
        Self::Polynomial { order: 1 }
    }
}

/// Ground control point pairing a resource pixel with a geo (view) position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gcp {
    pub resource: Point,
    pub geo: Point,
}

impl Gcp {
    pub fn new(resource: Point, geo: Point) -> Self {
        Self { resource, geo }
    }
}
