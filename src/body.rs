use serde::{Deserialize, Serialize};

use crate::vecmath::Vec3;

/// A single point mass. The body array is created once at startup and its
/// length never changes for the lifetime of the run; only `position` and
/// `velocity` are mutated by the integrator.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Mass, always positive.
    pub mass: f64,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Opaque display tag (RGBA). Carried through snapshots for the
    /// renderer, never interpreted by the core.
    pub color: [u8; 4],
}

impl Body {
    pub fn new(mass: f64, position: Vec3, velocity: Vec3) -> Self {
        Self {
            mass,
            position,
            velocity,
            color: [255, 255, 255, 255],
        }
    }
}
