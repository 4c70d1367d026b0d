use anyhow::Result;
use clap::Parser;
use log::{debug, info, trace};
use std::path::PathBuf;
use std::time::Instant;

use nbody_sim::{Body, Frame, Simulation, SimulationConfig};

/// Command-line arguments. The short flags mirror the knobs this simulator
/// has always exposed: threads, particles, spawn box, velocity, mass.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional path to a TOML config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Number of bodies to spawn
    #[arg(short = 'p', long)]
    particles: Option<usize>,

    /// Half-width of the spawn box
    #[arg(short = 'd', long)]
    spawn_range: Option<f64>,

    /// Range of initial velocity per axis
    #[arg(short = 'v', long)]
    spawn_vel: Option<f64>,

    /// Range of body mass
    #[arg(short = 'm', long)]
    spawn_mass: Option<f64>,

    /// RNG seed override
    #[arg(long)]
    seed: Option<u64>,

    /// Number of ticks to run before exiting
    #[arg(long, default_value_t = 2000)]
    ticks: u64,

    /// Viewport scale (world units per screen unit)
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Viewport pan offset, X
    #[arg(long, default_value_t = 0.0)]
    offset_x: f64,

    /// Viewport pan offset, Y
    #[arg(long, default_value_t = 0.0)]
    offset_y: f64,

    /// Half-extent of the viewport in screen units
    #[arg(long, default_value_t = 800.0)]
    view_half: f64,
}

/// Pan/zoom transform for the reporting side. This is renderer state: the
/// simulation core never reads it.
struct Viewport {
    offset_x: f64,
    offset_y: f64,
    scale: f64,
    half_extent: f64,
}

impl Viewport {
    fn project(&self, body: &Body) -> (f64, f64) {
        (
            body.position.x / self.scale + self.offset_x,
            body.position.y / self.scale + self.offset_y,
        )
    }

    fn contains(&self, body: &Body) -> bool {
        let (x, y) = self.project(body);
        x.abs() <= self.half_extent && y.abs() <= self.half_extent
    }
}

/// Headless stand-in for the renderer: summarizes the frame it was handed.
/// Runs against the quiescent snapshot while the next tick's velocity pass
/// is already in flight.
fn report(frame: &Frame, viewport: &Viewport) {
    let visible = frame.bodies.iter().filter(|b| viewport.contains(b)).count();
    let mut max_speed = 0.0f64;
    let mut total_speed = 0.0f64;
    for body in frame.bodies.iter() {
        let speed = body.velocity.length();
        total_speed += speed;
        max_speed = max_speed.max(speed);
    }
    info!(
        "tick {} | {}/{} bodies in view | speed mean {:.2} max {:.2}",
        frame.tick,
        visible,
        frame.bodies.len(),
        total_speed / frame.bodies.len() as f64,
        max_speed
    );
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    info!("Starting N-body simulation...");

    // --- Load Configuration ---
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.simulation.workers = threads;
    }
    if let Some(particles) = args.particles {
        config.simulation.bodies = particles;
    }
    if let Some(range) = args.spawn_range {
        config.spawn.half_width = range;
    }
    if let Some(vel) = args.spawn_vel {
        config.spawn.velocity_range = vel;
    }
    if let Some(mass) = args.spawn_mass {
        config.spawn.mass_range = mass;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }
    config.validate()?;
    debug!("Configuration: {:#?}", config);

    let viewport = Viewport {
        offset_x: args.offset_x,
        offset_y: args.offset_y,
        scale: args.scale,
        half_extent: args.view_half,
    };

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(config)?;
    info!(
        "Seeded {} bodies across {} workers.",
        sim.body_count(),
        sim.params().worker_count
    );

    // --- Simulation Loop ---
    info!("Running for {} ticks...", args.ticks);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let mut frames_since_print = 0u64;
    let print_interval_secs = 5.0;

    for _ in 0..args.ticks {
        let frame = sim.tick()?;
        frames_since_print += 1;

        let now = Instant::now();
        let since_print = now.duration_since(previous_print_time).as_secs_f64();
        if since_print >= print_interval_secs {
            info!("{:.1} fps", frames_since_print as f64 / since_print);
            report(&frame, &viewport);
            previous_print_time = now;
            frames_since_print = 0;
        } else {
            trace!("tick {} handed to renderer", frame.tick);
        }
    }

    // --- Drain the in-flight tick and summarize ---
    let final_frame = sim.settle()?;
    let total_duration = start_time.elapsed();
    report(&final_frame, &viewport);
    info!(
        "Completed {} ticks in {:.3} s ({:.2} ms/tick).",
        final_frame.tick,
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() * 1000.0 / final_frame.tick.max(1) as f64
    );

    Ok(())
}
