use serde::{Deserialize, Serialize};

/// Runtime parameters derived from the configuration. Cloned into every
/// worker thread at pool startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Physics
    pub gravitational_constant: f64,
    pub dt: f64,
    pub collision_threshold: f64,
    pub min_distance: f64, // Singularity guard floor for pair distances
    pub max_speed: f64,

    // Escape containment
    pub escape_radius: Option<f64>,
    pub respawn_half_width: f64,
    pub secondary_speed_cap: f64,

    // Layout
    pub worker_count: usize,
    /// Total body array length, anchor included.
    pub body_count: usize,

    /// Base seed for deterministic per-worker RNG streams.
    pub seed: u64,
}
