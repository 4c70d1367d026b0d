use nbody_sim::backend::{ComputeBackend, ReferenceBackend, UploadHandle};
use nbody_sim::pool::PhaseBarrier;
use nbody_sim::{Body, Simulation, SimulationConfig, Vec3};
use std::sync::{Arc, Mutex};

/// Config with randomness and limits tamed: no anchor, no containment, and
/// a speed cap far above anything these scenarios produce.
fn quiet_config(workers: usize, bodies: usize) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.simulation.workers = workers;
    config.simulation.bodies = bodies;
    config.simulation.seed = 42;
    config.spawn.anchor = false;
    config.physics.max_speed = 1e12;
    config.containment.escape_radius = None;
    config
}

/// Runs one full tick and returns its settled frame. The first `tick()`
/// call only starts the velocity pass; `settle` drains it.
fn one_settled_tick(sim: &mut Simulation) -> nbody_sim::Frame {
    sim.tick().unwrap();
    let frame = sim.settle().unwrap();
    assert_eq!(frame.tick, 1);
    frame
}

// ==================================================================================
// Collision tests
// ==================================================================================

#[test]
fn collision_uses_the_literal_momentum_average() {
    let mut config = quiet_config(2, 2);
    config.physics.collision_threshold = 1.0;
    let bodies = vec![
        Body::new(10.0, Vec3::zero(), Vec3::new(1.0, 0.0, 0.0)),
        Body::new(20.0, Vec3::new(0.5, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0)),
    ];

    let mut sim = Simulation::from_bodies(config, bodies).unwrap();
    let frame = one_settled_tick(&mut sim);

    // distance 0.5 < threshold 1.0, so the collision path triggers:
    // combined = (v1*m1 + v2*m2) / 2 = (10 - 20) / 2 = -5 on x.
    assert_eq!(frame.bodies[0].velocity, Vec3::new(-0.5, 0.0, 0.0));
    assert_eq!(frame.bodies[1].velocity, Vec3::new(-0.25, 0.0, 0.0));
}

#[test]
fn colliding_pair_straddling_worker_ranges_resolves_once() {
    // Two workers, one body each; the pair is visible from both ranges and
    // must still be resolved exactly once by the reconciliation pass.
    let mut config = quiet_config(2, 2);
    config.physics.collision_threshold = 2.0;
    let bodies = vec![
        Body::new(4.0, Vec3::zero(), Vec3::new(2.0, 0.0, 0.0)),
        Body::new(8.0, Vec3::new(1.0, 0.0, 0.0), Vec3::zero()),
    ];

    let mut sim = Simulation::from_bodies(config, bodies).unwrap();
    let frame = one_settled_tick(&mut sim);

    // combined = (2*4 + 0*8) / 2 = 4 on x.
    assert_eq!(frame.bodies[0].velocity, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(frame.bodies[1].velocity, Vec3::new(0.5, 0.0, 0.0));
}

// ==================================================================================
// Gravity tests
// ==================================================================================

#[test]
fn anchor_scenario_matches_first_order_euler() {
    let mut config = quiet_config(2, 2);
    config.physics.gravitational_constant = 3.0;
    config.physics.timestep = 0.1;
    config.physics.collision_threshold = 1.0;
    let bodies = vec![
        Body::new(500_000.0, Vec3::zero(), Vec3::zero()),
        Body::new(1.0, Vec3::new(10.0, 0.0, 0.0), Vec3::zero()),
    ];

    let mut sim = Simulation::from_bodies(config, bodies).unwrap();
    let frame = one_settled_tick(&mut sim);

    let light = &frame.bodies[1];
    let expected = 3.0 * 500_000.0 / (10.0 * 10.0) * 0.1;
    assert!((light.velocity.length() - expected).abs() < 1e-9);
    assert!(light.velocity.x < 0.0, "light body must fall toward the anchor");
    // Phase 2 integrates the freshly updated velocity.
    assert!((light.position.x - (10.0 + light.velocity.x * 0.1)).abs() < 1e-9);
}

#[test]
fn coincident_bodies_never_produce_nan() {
    let mut config = quiet_config(2, 3);
    config.physics.collision_threshold = 0.0; // force path even at zero range
    config.physics.max_speed = 300.0;
    let bodies = vec![
        Body::new(5.0, Vec3::zero(), Vec3::zero()),
        Body::new(5.0, Vec3::zero(), Vec3::zero()),
        Body::new(5.0, Vec3::new(1e-9, 0.0, 0.0), Vec3::zero()),
    ];

    let mut sim = Simulation::from_bodies(config, bodies).unwrap();
    for _ in 0..3 {
        sim.tick().unwrap();
    }
    let frame = sim.settle().unwrap();

    for body in frame.bodies.iter() {
        assert!(body.position.is_finite());
        assert!(body.velocity.is_finite());
        assert!(body.velocity.length() <= 300.0 + 1e-9);
    }
}

#[test]
fn speed_cap_bounds_every_body() {
    let mut config = quiet_config(3, 30);
    config.spawn.anchor = true; // strong well to drive speeds upward
    config.physics.max_speed = 50.0;
    config.containment.escape_radius = None;

    let mut sim = Simulation::new(config).unwrap();
    for _ in 0..5 {
        sim.tick().unwrap();
    }
    let frame = sim.settle().unwrap();

    for body in frame.bodies.iter() {
        assert!(
            body.velocity.length() <= 50.0 + 1e-9,
            "body exceeds the speed cap: {}",
            body.velocity.length()
        );
    }
}

// ==================================================================================
// Partition & barrier tests
// ==================================================================================

#[test]
fn remainder_bodies_are_integrated() {
    // 5 bodies over 2 workers: 5 / 2 leaves a trailing index that belongs to
    // the last worker's range and must still move.
    let mut config = quiet_config(2, 5);
    config.physics.gravitational_constant = 0.0;
    config.physics.collision_threshold = 0.0;

    let bodies: Vec<Body> = (0..5)
        .map(|i| Body::new(1.0, Vec3::new(i as f64, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)))
        .collect();
    let mut sim = Simulation::from_bodies(config, bodies).unwrap();
    let frame = one_settled_tick(&mut sim);

    for (i, body) in frame.bodies.iter().enumerate() {
        assert!(
            (body.position.x - (i as f64 + 0.1)).abs() < 1e-12,
            "body {} was not integrated",
            i
        );
    }
}

#[test]
fn no_position_work_before_all_velocity_arrivals() {
    const WORKERS: usize = 4;
    let barrier = Arc::new(PhaseBarrier::new(WORKERS));
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (go_tx, go_rx) = crossbeam_channel::unbounded::<()>();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let events = Arc::clone(&events);
            let go_rx = go_rx.clone();
            std::thread::spawn(move || {
                events.lock().unwrap().push(format!("velocity-{}", i));
                barrier.arrive_velocity();
                // Parked until the driver releases phase 2.
                go_rx.recv().unwrap();
                events.lock().unwrap().push(format!("position-{}", i));
                barrier.arrive_position();
            })
        })
        .collect();

    // Driver side: the reconciliation point sits between the two stages.
    barrier.await_velocity();
    events.lock().unwrap().push("reconcile".to_string());
    for _ in 0..WORKERS {
        go_tx.send(()).unwrap();
    }
    barrier.await_position();
    for handle in handles {
        handle.join().unwrap();
    }

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2 * WORKERS + 1);
    let reconcile_at = events.iter().position(|e| e == "reconcile").unwrap();
    for (at, event) in events.iter().enumerate() {
        if event.starts_with("velocity") {
            assert!(at < reconcile_at, "{} recorded after reconciliation", event);
        }
        if event.starts_with("position") {
            assert!(at > reconcile_at, "{} recorded before reconciliation", event);
        }
    }
}

// ==================================================================================
// Containment tests
// ==================================================================================

#[test]
fn escaped_body_is_recalled_and_slowed() {
    let mut config = quiet_config(2, 2);
    config.physics.gravitational_constant = 0.0;
    config.physics.collision_threshold = 0.0;
    config.containment.escape_radius = Some(100.0);
    config.containment.respawn_half_width = 5.0;
    config.containment.secondary_speed_cap = 2.0;

    let bodies = vec![
        Body::new(1.0, Vec3::new(500.0, 0.0, 0.0), Vec3::new(50.0, 0.0, 0.0)),
        Body::new(1.0, Vec3::new(1.0, 0.0, 0.0), Vec3::zero()),
    ];
    let mut sim = Simulation::from_bodies(config, bodies).unwrap();
    let frame = one_settled_tick(&mut sim);

    let escaped = &frame.bodies[0];
    assert!(escaped.position.length() <= (3.0f64).sqrt() * 5.0);
    assert!(escaped.velocity.length() <= 2.0 + 1e-12);

    // The in-range body just drifted normally.
    assert_eq!(frame.bodies[1].position, Vec3::new(1.0, 0.0, 0.0));
}

// ==================================================================================
// Compute backend tests
// ==================================================================================

struct FailingBackend;

impl ComputeBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }
    fn upload(&mut self, _bodies: &[Body]) -> anyhow::Result<UploadHandle> {
        anyhow::bail!("device unavailable")
    }
    fn execute_phase1(&mut self, _handle: UploadHandle) -> anyhow::Result<Vec<Body>> {
        anyhow::bail!("device unavailable")
    }
}

/// Wraps the reference backend but drops a body from every result, breaking
/// the count contract.
struct TruncatingBackend(ReferenceBackend);

impl ComputeBackend for TruncatingBackend {
    fn name(&self) -> &str {
        "truncating"
    }
    fn upload(&mut self, bodies: &[Body]) -> anyhow::Result<UploadHandle> {
        self.0.upload(bodies)
    }
    fn execute_phase1(&mut self, handle: UploadHandle) -> anyhow::Result<Vec<Body>> {
        let mut bodies = self.0.execute_phase1(handle)?;
        bodies.pop();
        Ok(bodies)
    }
}

fn contained_config() -> SimulationConfig {
    let mut config = quiet_config(3, 24);
    config.spawn.anchor = true;
    config.physics.max_speed = 300.0;
    config.containment.escape_radius = Some(1000.0);
    config
}

#[test]
fn reference_backend_matches_pool_path() {
    let config = contained_config();
    let mut cpu = Simulation::new(config.clone()).unwrap();
    let backend = ReferenceBackend::new(cpu.params().clone()).unwrap();
    let mut offload = Simulation::with_backend(config, Box::new(backend)).unwrap();

    for _ in 0..5 {
        let a = cpu.tick().unwrap();
        let b = offload.tick().unwrap();
        assert_eq!(a.tick, b.tick);
        assert_eq!(*a.bodies, *b.bodies, "offload path diverged at tick {}", a.tick);
    }
}

#[test]
fn failing_backend_falls_back_to_builtin_pass() {
    let config = contained_config();
    let mut cpu = Simulation::new(config.clone()).unwrap();
    let mut flaky = Simulation::with_backend(config, Box::new(FailingBackend)).unwrap();

    for _ in 0..3 {
        let a = cpu.tick().unwrap();
        let b = flaky.tick().unwrap();
        assert_eq!(*a.bodies, *b.bodies);
    }
}

#[test]
fn count_mismatch_counts_as_backend_failure() {
    let config = contained_config();
    let mut cpu = Simulation::new(config.clone()).unwrap();
    let inner = ReferenceBackend::new(cpu.params().clone()).unwrap();
    let mut mangled = Simulation::with_backend(config, Box::new(TruncatingBackend(inner))).unwrap();

    for _ in 0..3 {
        let a = cpu.tick().unwrap();
        let b = mangled.tick().unwrap();
        assert_eq!(a.bodies.len(), b.bodies.len());
        assert_eq!(*a.bodies, *b.bodies);
    }
}

// ==================================================================================
// Determinism & configuration tests
// ==================================================================================

#[test]
fn identical_seeds_give_identical_runs() {
    let config = contained_config();
    let mut first = Simulation::new(config.clone()).unwrap();
    let mut second = Simulation::new(config).unwrap();

    for _ in 0..4 {
        let a = first.tick().unwrap();
        let b = second.tick().unwrap();
        assert_eq!(*a.bodies, *b.bodies);
    }
}

#[test]
fn zero_workers_is_a_configuration_error() {
    let mut config = quiet_config(1, 10);
    config.simulation.workers = 0;
    assert!(Simulation::new(config).is_err());
}

#[test]
fn empty_body_array_is_a_configuration_error() {
    let config = quiet_config(1, 10);
    assert!(Simulation::from_bodies(config, Vec::new()).is_err());
}

#[test]
fn non_positive_mass_is_rejected() {
    let config = quiet_config(1, 1);
    let bodies = vec![Body::new(0.0, Vec3::zero(), Vec3::zero())];
    assert!(Simulation::from_bodies(config, bodies).is_err());
}
