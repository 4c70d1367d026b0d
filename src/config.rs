use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::sim_params::SimParams;

// Worker pool and run-level settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationSection {
    /// Number of persistent worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of randomly spawned bodies (the anchor, if enabled, is extra).
    #[serde(default = "default_bodies")]
    pub bodies: usize,
    /// Seed for body placement and the per-worker containment RNG streams.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Physical constants for the force and integration passes.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PhysicsSection {
    #[serde(default = "default_gravitational_constant")]
    pub gravitational_constant: f64,
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    /// Separation below which a pair is treated as a collision instead of
    /// contributing force.
    #[serde(default = "default_collision_threshold")]
    pub collision_threshold: f64,
    /// Floor applied to pair distances before the force computation, so a
    /// near-zero separation can never produce an infinite acceleration.
    #[serde(default = "default_min_distance")]
    pub min_distance: f64,
    /// Hard cap on velocity magnitude after the velocity pass.
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
}

// Initial placement ranges. Positions and velocities are drawn uniformly
// from [-half_width, half_width] per axis; masses from (0, 2 * mass_range].
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpawnSection {
    #[serde(default = "default_spawn_half_width")]
    pub half_width: f64,
    #[serde(default = "default_velocity_range")]
    pub velocity_range: f64,
    #[serde(default = "default_mass_range")]
    pub mass_range: f64,
    /// Seed one dominant gravity well at the origin with zero velocity.
    #[serde(default = "default_anchor")]
    pub anchor: bool,
    #[serde(default = "default_anchor_mass")]
    pub anchor_mass: f64,
}

// Escape containment ("backwarp"): bodies that drift past `escape_radius`
// are relocated into a small box near the origin with a reduced speed cap.
// Purely cosmetic drift control, not physics.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ContainmentSection {
    /// Radius beyond which a body is recalled. `None` disables containment.
    #[serde(default = "default_escape_radius")]
    pub escape_radius: Option<f64>,
    #[serde(default = "default_respawn_half_width")]
    pub respawn_half_width: f64,
    #[serde(default = "default_secondary_speed_cap")]
    pub secondary_speed_cap: f64,
}

/// Main simulation configuration, loaded from a TOML file or built from
/// defaults plus CLI overrides. Immutable once the simulation is running.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub physics: PhysicsSection,
    #[serde(default)]
    pub spawn: SpawnSection,
    #[serde(default)]
    pub containment: ContainmentSection,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            bodies: default_bodies(),
            seed: default_seed(),
        }
    }
}

impl Default for PhysicsSection {
    fn default() -> Self {
        Self {
            gravitational_constant: default_gravitational_constant(),
            timestep: default_timestep(),
            collision_threshold: default_collision_threshold(),
            min_distance: default_min_distance(),
            max_speed: default_max_speed(),
        }
    }
}

impl Default for SpawnSection {
    fn default() -> Self {
        Self {
            half_width: default_spawn_half_width(),
            velocity_range: default_velocity_range(),
            mass_range: default_mass_range(),
            anchor: default_anchor(),
            anchor_mass: default_anchor_mass(),
        }
    }
}

impl Default for ContainmentSection {
    fn default() -> Self {
        Self {
            escape_radius: default_escape_radius(),
            respawn_half_width: default_respawn_half_width(),
            secondary_speed_cap: default_secondary_speed_cap(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationSection::default(),
            physics: PhysicsSection::default(),
            spawn: SpawnSection::default(),
            containment: ContainmentSection::default(),
        }
    }
}

impl SimulationConfig {
    /// Loads and validates the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config: SimulationConfig = toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant the simulation relies on. Called by `load` and
    /// again by the simulation constructor for configs built in code.
    pub fn validate(&self) -> Result<()> {
        if self.simulation.workers == 0 {
            anyhow::bail!("simulation.workers must be greater than 0");
        }
        if self.simulation.bodies == 0 && !self.spawn.anchor {
            anyhow::bail!("simulation.bodies must be greater than 0 when no anchor is seeded");
        }
        if self.physics.timestep <= 0.0 {
            anyhow::bail!("physics.timestep must be positive");
        }
        if self.physics.min_distance <= 0.0 {
            anyhow::bail!("physics.min_distance must be positive");
        }
        if self.physics.collision_threshold < 0.0 {
            anyhow::bail!("physics.collision_threshold must not be negative");
        }
        if self.physics.max_speed <= 0.0 {
            anyhow::bail!("physics.max_speed must be positive");
        }
        if self.spawn.half_width <= 0.0 {
            anyhow::bail!("spawn.half_width must be positive");
        }
        if self.spawn.velocity_range < 0.0 {
            anyhow::bail!("spawn.velocity_range must not be negative");
        }
        if self.spawn.mass_range <= 0.0 {
            anyhow::bail!("spawn.mass_range must be positive");
        }
        if self.spawn.anchor && self.spawn.anchor_mass <= 0.0 {
            anyhow::bail!("spawn.anchor_mass must be positive");
        }
        if let Some(radius) = self.containment.escape_radius {
            if radius <= 0.0 {
                anyhow::bail!("containment.escape_radius must be positive when set");
            }
            if self.containment.respawn_half_width <= 0.0 {
                anyhow::bail!("containment.respawn_half_width must be positive");
            }
            if self.containment.secondary_speed_cap <= 0.0 {
                anyhow::bail!("containment.secondary_speed_cap must be positive");
            }
        }
        Ok(())
    }

    /// Converts the configuration into the flat parameter struct handed to
    /// every worker. `body_count` here is the total array length, including
    /// the anchor body when one is seeded.
    pub fn get_sim_params(&self) -> SimParams {
        let body_count = self.simulation.bodies + usize::from(self.spawn.anchor);

        SimParams {
            gravitational_constant: self.physics.gravitational_constant,
            dt: self.physics.timestep,
            collision_threshold: self.physics.collision_threshold,
            min_distance: self.physics.min_distance,
            max_speed: self.physics.max_speed,
            escape_radius: self.containment.escape_radius,
            respawn_half_width: self.containment.respawn_half_width,
            secondary_speed_cap: self.containment.secondary_speed_cap,
            worker_count: self.simulation.workers,
            body_count,
            seed: self.simulation.seed,
        }
    }
}

// Defaults follow the original interactive tuning of this system: G = 3,
// dt = 0.1, unit collision radius, cap 300, 50-unit spawn box.
fn default_workers() -> usize { 1 }
fn default_bodies() -> usize { 1000 }
fn default_seed() -> u64 { 0 }
fn default_gravitational_constant() -> f64 { 3.0 }
fn default_timestep() -> f64 { 0.1 }
fn default_collision_threshold() -> f64 { 1.0 }
fn default_min_distance() -> f64 { 1e-6 }
fn default_max_speed() -> f64 { 300.0 }
fn default_spawn_half_width() -> f64 { 50.0 }
fn default_velocity_range() -> f64 { 1.5 }
fn default_mass_range() -> f64 { 5.0 }
fn default_anchor() -> bool { true }
fn default_anchor_mass() -> f64 { 500_000.0 }
fn default_escape_radius() -> Option<f64> { Some(1000.0) }
fn default_respawn_half_width() -> f64 { 50.0 }
fn default_secondary_speed_cap() -> f64 { 10.0 }
