use anyhow::Result;
use log::{debug, info, warn};
use rand::distr::Uniform;
use rand::prelude::*;
use std::sync::Arc;

use crate::backend::ComputeBackend;
use crate::body::Body;
use crate::config::SimulationConfig;
use crate::integrator;
use crate::pool::WorkerPool;
use crate::sim_params::SimParams;
use crate::vecmath::Vec3;

/// A quiescent snapshot of the body array handed to the renderer once per
/// tick. The `Arc` is never mutated after construction, so the caller may
/// hold or draw from it for as long as it likes while the next tick's
/// velocity pass runs concurrently.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Number of fully completed ticks this snapshot reflects.
    pub tick: u64,
    pub bodies: Arc<Vec<Body>>,
}

/// What the workers are currently doing between two `tick()` calls.
enum InFlight {
    /// The pool is computing the velocity pass; collision reconciliation and
    /// phase 2 still have to happen.
    PoolVelocity,
    /// A compute backend already produced reconciled velocities; only
    /// phase 2 remains.
    VelocitiesApplied,
}

/// The simulation driver. Owns the body array for the lifetime of the run
/// and coordinates the two-phase tick protocol.
///
/// `tick()` is organized so that the most expensive work, the O(n²)
/// velocity pass, runs while the caller renders the frame returned by the
/// previous call: it first completes the in-flight tick, snapshots the
/// result, broadcasts the next tick's phase 1, and returns the snapshot
/// without waiting. This trades one tick of visual latency for throughput.
pub struct Simulation {
    config: SimulationConfig,
    params: SimParams,
    bodies: Vec<Body>,
    pool: WorkerPool,
    backend: Option<Box<dyn ComputeBackend>>,
    in_flight: Option<InFlight>,
    completed_ticks: u64,
}

impl Simulation {
    /// Creates a simulation with randomly seeded bodies per the config's
    /// spawn section.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let bodies = seed_bodies(&config, &mut rng)?;
        Self::from_bodies(config, bodies)
    }

    /// Creates a simulation over an explicit initial body array, bypassing
    /// random seeding. The spawn section of the config is ignored; worker
    /// count, physics and containment settings still apply.
    pub fn from_bodies(config: SimulationConfig, bodies: Vec<Body>) -> Result<Self> {
        if bodies.is_empty() {
            anyhow::bail!("body array must not be empty");
        }
        if bodies.iter().any(|b| b.mass <= 0.0) {
            anyhow::bail!("every body mass must be positive");
        }
        if config.simulation.workers == 0 {
            anyhow::bail!("simulation.workers must be greater than 0");
        }

        let mut params = config.get_sim_params();
        params.body_count = bodies.len();
        let pool = WorkerPool::start(&params)?;

        info!(
            "simulation ready: {} bodies, {} workers, dt {}",
            bodies.len(),
            params.worker_count,
            params.dt
        );

        Ok(Self {
            config,
            params,
            bodies,
            pool,
            backend: None,
            in_flight: None,
            completed_ticks: 0,
        })
    }

    /// Attaches a compute backend that replaces the built-in velocity pass.
    /// Backend construction failures should be surfaced by the caller before
    /// this point; a backend that fails at tick time is retried once and
    /// then bypassed for that tick.
    pub fn with_backend(config: SimulationConfig, backend: Box<dyn ComputeBackend>) -> Result<Self> {
        let mut sim = Self::new(config)?;
        info!("compute backend '{}' attached", backend.name());
        sim.backend = Some(backend);
        Ok(sim)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn completed_ticks(&self) -> u64 {
        self.completed_ticks
    }

    /// Advances the simulation by one tick and returns a stable snapshot for
    /// rendering.
    ///
    /// The returned frame reflects the *previous* tick's fully barriered
    /// state; this tick's velocity pass is already running when the call
    /// returns. The first call returns the initial seeding.
    pub fn tick(&mut self) -> Result<Frame> {
        self.finish_in_flight()?;
        let frame = self.frame();
        self.begin_tick(&frame.bodies)?;
        Ok(frame)
    }

    /// Completes any in-flight tick and returns the final quiescent state.
    /// Used at shutdown, or wherever latency hiding is not wanted.
    pub fn settle(&mut self) -> Result<Frame> {
        self.finish_in_flight()?;
        Ok(self.frame())
    }

    fn frame(&self) -> Frame {
        Frame {
            tick: self.completed_ticks,
            bodies: Arc::new(self.bodies.clone()),
        }
    }

    /// Runs the in-flight tick to completion: phase-1 barrier, collision
    /// reconciliation, then the position pass across all workers.
    fn finish_in_flight(&mut self) -> Result<()> {
        let stage = match self.in_flight.take() {
            None => return Ok(()),
            Some(stage) => stage,
        };

        if let InFlight::PoolVelocity = stage {
            let collisions = self.pool.collect_velocity(&mut self.bodies)?;
            let resolved = integrator::apply_collisions(&mut self.bodies, collisions, &self.params);
            if resolved > 0 {
                debug!("tick {}: resolved {} collision pairs", self.completed_ticks, resolved);
            }
        }

        self.pool.dispatch_position(&self.bodies, self.completed_ticks)?;
        self.pool.collect_position(&mut self.bodies)?;
        self.completed_ticks += 1;
        Ok(())
    }

    /// Starts the next tick's velocity pass, preferring the compute backend
    /// when one is attached. A backend failure aborts only this tick's
    /// offload: after one retry the built-in pool pass takes over.
    fn begin_tick(&mut self, snapshot: &Arc<Vec<Body>>) -> Result<()> {
        if let Some(backend) = self.backend.as_mut() {
            let result = match run_backend_once(backend.as_mut(), snapshot) {
                Ok(updated) => Ok(updated),
                Err(e) => {
                    warn!("compute backend '{}' failed, retrying once: {:#}", backend.name(), e);
                    run_backend_once(backend.as_mut(), snapshot)
                }
            };
            match result {
                Ok(updated) => {
                    for (body, upd) in self.bodies.iter_mut().zip(updated) {
                        body.velocity = upd.velocity;
                    }
                    self.in_flight = Some(InFlight::VelocitiesApplied);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "compute backend failed twice; using built-in velocity pass this tick: {:#}",
                        e
                    );
                }
            }
        }

        self.pool.dispatch_velocity(snapshot)?;
        self.in_flight = Some(InFlight::PoolVelocity);
        Ok(())
    }
}

fn run_backend_once(backend: &mut dyn ComputeBackend, snapshot: &Arc<Vec<Body>>) -> Result<Vec<Body>> {
    let handle = backend.upload(snapshot)?;
    let updated = backend.execute_phase1(handle)?;
    if updated.len() != snapshot.len() {
        anyhow::bail!(
            "compute backend returned {} bodies, expected {}",
            updated.len(),
            snapshot.len()
        );
    }
    Ok(updated)
}

/// Places the initial body array: one optional anchor at the origin, then
/// uniform draws for position, velocity and mass. The anchor is a dominant
/// gravity well, so it gets zero initial velocity.
fn seed_bodies(config: &SimulationConfig, rng: &mut StdRng) -> Result<Vec<Body>> {
    let spawn = &config.spawn;
    let mut bodies = Vec::with_capacity(config.simulation.bodies + usize::from(spawn.anchor));

    if spawn.anchor {
        bodies.push(Body::new(spawn.anchor_mass, Vec3::zero(), Vec3::zero()));
    }

    let pos_dist = Uniform::new(-spawn.half_width, spawn.half_width)?;
    let vel_dist = if spawn.velocity_range > 0.0 {
        Some(Uniform::new(-spawn.velocity_range, spawn.velocity_range)?)
    } else {
        None
    };
    // Masses are drawn from (0, 2 * mass_range]; zero mass is excluded so
    // the collision rule can always divide by it.
    let mass_dist = Uniform::new_inclusive(f64::MIN_POSITIVE, 2.0 * spawn.mass_range)?;

    for _ in 0..config.simulation.bodies {
        let position = Vec3::new(rng.sample(pos_dist), rng.sample(pos_dist), rng.sample(pos_dist));
        let velocity = match vel_dist {
            Some(dist) => Vec3::new(rng.sample(dist), rng.sample(dist), rng.sample(dist)),
            None => Vec3::zero(),
        };
        let mut body = Body::new(rng.sample(mass_dist), position, velocity);
        body.color = [
            rng.random_range(64..=255),
            rng.random_range(64..=255),
            rng.random_range(64..=255),
            255,
        ];
        bodies.push(body);
    }

    Ok(bodies)
}
