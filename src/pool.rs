use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};
use rand::prelude::*;
use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::body::Body;
use crate::integrator::{self, CollisionPair};
use crate::sim_params::SimParams;
use crate::vecmath::Vec3;

/// Reusable two-stage synchronization point between the workers and the
/// driver. Workers signal completion of the velocity pass and the position
/// pass; the driver blocks until every worker has arrived at a stage.
///
/// Phase-2 jobs are only dispatched after `await_velocity` returns, which is
/// what guarantees no worker can start integrating positions for a tick
/// before all velocity work (and collision reconciliation) for that tick is
/// done.
pub struct PhaseBarrier {
    workers: usize,
    counts: Mutex<PhaseCounts>,
    cond: Condvar,
}

#[derive(Default)]
struct PhaseCounts {
    velocity_done: usize,
    position_done: usize,
}

impl PhaseBarrier {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            counts: Mutex::new(PhaseCounts::default()),
            cond: Condvar::new(),
        }
    }

    /// Marks one worker's velocity pass as complete.
    pub fn arrive_velocity(&self) {
        let mut counts = self.counts.lock().expect("phase barrier lock poisoned");
        counts.velocity_done += 1;
        if counts.velocity_done >= self.workers {
            self.cond.notify_all();
        }
    }

    /// Blocks until every worker has completed its velocity pass for the
    /// current tick, then rearms the stage for the next tick.
    pub fn await_velocity(&self) {
        let mut counts = self.counts.lock().expect("phase barrier lock poisoned");
        while counts.velocity_done < self.workers {
            counts = self.cond.wait(counts).expect("phase barrier lock poisoned");
        }
        counts.velocity_done = 0;
    }

    /// Marks one worker's position pass as complete.
    pub fn arrive_position(&self) {
        let mut counts = self.counts.lock().expect("phase barrier lock poisoned");
        counts.position_done += 1;
        if counts.position_done >= self.workers {
            self.cond.notify_all();
        }
    }

    /// Blocks until every worker has completed its position pass, then
    /// rearms the stage.
    pub fn await_position(&self) {
        let mut counts = self.counts.lock().expect("phase barrier lock poisoned");
        while counts.position_done < self.workers {
            counts = self.cond.wait(counts).expect("phase barrier lock poisoned");
        }
        counts.position_done = 0;
    }
}

/// Splits `[0, body_count)` into `worker_count` contiguous ranges of
/// `body_count / worker_count`, with the trailing remainder folded into the
/// last worker's range so every index is owned by exactly one worker.
pub fn partition_ranges(worker_count: usize, body_count: usize) -> Vec<Range<usize>> {
    let chunk = body_count / worker_count;
    (0..worker_count)
        .map(|i| {
            let start = i * chunk;
            let end = if i == worker_count - 1 { body_count } else { start + chunk };
            start..end
        })
        .collect()
}

enum Job {
    /// Phase 1: compute new velocities for the worker's range against a
    /// stable snapshot of the whole array.
    Velocity { snapshot: Arc<Vec<Body>> },
    /// Phase 2: integrate positions for the worker's own segment.
    Position { segment: Vec<Body>, tick: u64 },
}

struct VelocityResult {
    worker: usize,
    velocities: Vec<Vec3>,
    collisions: Vec<CollisionPair>,
}

struct PositionResult {
    worker: usize,
    segment: Vec<Body>,
}

/// Fixed set of persistent worker threads, each bound to one contiguous
/// index range for the lifetime of the pool. Workers park on their job
/// channel between phases; there is no work stealing or rebalancing.
pub struct WorkerPool {
    ranges: Vec<Range<usize>>,
    job_txs: Vec<Sender<Job>>,
    velocity_rx: Receiver<VelocityResult>,
    position_rx: Receiver<PositionResult>,
    barrier: Arc<PhaseBarrier>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the worker threads. Fails on a non-positive worker or body
    /// count; everything else about the partition is infallible.
    pub fn start(params: &SimParams) -> Result<Self> {
        if params.worker_count == 0 {
            anyhow::bail!("worker count must be greater than 0");
        }
        if params.body_count == 0 {
            anyhow::bail!("body count must be greater than 0");
        }

        let ranges = partition_ranges(params.worker_count, params.body_count);
        let barrier = Arc::new(PhaseBarrier::new(params.worker_count));
        let (velocity_tx, velocity_rx) = unbounded();
        let (position_tx, position_rx) = unbounded();

        let mut job_txs = Vec::with_capacity(params.worker_count);
        let mut handles = Vec::with_capacity(params.worker_count);

        for (worker, range) in ranges.iter().cloned().enumerate() {
            let (job_tx, job_rx) = unbounded();
            job_txs.push(job_tx);

            let params = params.clone();
            let velocity_tx = velocity_tx.clone();
            let position_tx = position_tx.clone();
            let barrier = Arc::clone(&barrier);

            debug!("worker {} bound to range {}..{}", worker, range.start, range.end);
            let handle = std::thread::Builder::new()
                .name(format!("sim-worker-{}", worker))
                .spawn(move || {
                    worker_loop(worker, range, params, job_rx, velocity_tx, position_tx, barrier)
                })?;
            handles.push(handle);
        }

        info!(
            "started {} workers over {} bodies ({} per range, remainder to last)",
            params.worker_count,
            params.body_count,
            params.body_count / params.worker_count
        );

        Ok(Self {
            ranges,
            job_txs,
            velocity_rx,
            position_rx,
            barrier,
            handles,
        })
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Broadcasts the phase-1 start signal with a quiescent snapshot of the
    /// body array. Returns immediately; workers compute concurrently.
    pub fn dispatch_velocity(&self, snapshot: &Arc<Vec<Body>>) -> Result<()> {
        for (worker, tx) in self.job_txs.iter().enumerate() {
            tx.send(Job::Velocity { snapshot: Arc::clone(snapshot) })
                .map_err(|_| anyhow::anyhow!("worker {} is gone; cannot dispatch velocity pass", worker))?;
        }
        Ok(())
    }

    /// Blocks at the phase-1 barrier, then writes every worker's velocities
    /// back into `bodies` and returns all recorded collision candidates.
    pub fn collect_velocity(&self, bodies: &mut [Body]) -> Result<Vec<CollisionPair>> {
        self.barrier.await_velocity();

        let mut collisions = Vec::new();
        for _ in 0..self.job_txs.len() {
            let mut result = self
                .velocity_rx
                .recv()
                .map_err(|_| anyhow::anyhow!("velocity channel closed mid-tick"))?;
            let range = self.ranges[result.worker].clone();
            for (body, velocity) in bodies[range].iter_mut().zip(result.velocities.iter()) {
                body.velocity = *velocity;
            }
            collisions.append(&mut result.collisions);
        }
        Ok(collisions)
    }

    /// Broadcasts the phase-2 start signal, handing each worker a copy of
    /// its own (post-reconciliation) segment.
    pub fn dispatch_position(&self, bodies: &[Body], tick: u64) -> Result<()> {
        for (worker, tx) in self.job_txs.iter().enumerate() {
            let segment = bodies[self.ranges[worker].clone()].to_vec();
            tx.send(Job::Position { segment, tick })
                .map_err(|_| anyhow::anyhow!("worker {} is gone; cannot dispatch position pass", worker))?;
        }
        Ok(())
    }

    /// Blocks at the phase-2 barrier and splices the integrated segments
    /// back into `bodies`, completing the tick.
    pub fn collect_position(&self, bodies: &mut [Body]) -> Result<()> {
        self.barrier.await_position();

        for _ in 0..self.job_txs.len() {
            let result = self
                .position_rx
                .recv()
                .map_err(|_| anyhow::anyhow!("position channel closed mid-tick"))?;
            let range = self.ranges[result.worker].clone();
            bodies[range].copy_from_slice(&result.segment);
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the job channels is the shutdown signal.
        self.job_txs.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("a simulation worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(
    worker: usize,
    range: Range<usize>,
    params: SimParams,
    job_rx: Receiver<Job>,
    velocity_tx: Sender<VelocityResult>,
    position_tx: Sender<PositionResult>,
    barrier: Arc<PhaseBarrier>,
) {
    while let Ok(job) = job_rx.recv() {
        match job {
            Job::Velocity { snapshot } => {
                let (velocities, collisions) =
                    integrator::velocity_pass(range.clone(), &snapshot, &params);
                // Results are queued before arrival, so once the driver's
                // await_velocity returns every result is already waiting.
                let _ = velocity_tx.send(VelocityResult { worker, velocities, collisions });
                barrier.arrive_velocity();
            }
            Job::Position { mut segment, tick } => {
                let seed = params
                    .seed
                    .wrapping_add((worker as u64).wrapping_mul(0x1F3A))
                    .wrapping_add(tick.wrapping_mul(0x58C7));
                let mut rng = StdRng::seed_from_u64(seed);
                if let Err(e) = integrator::position_pass(&mut segment, &params, &mut rng) {
                    error!("worker {} position pass failed: {}", worker, e);
                }
                let _ = position_tx.send(PositionResult { worker, segment });
                barrier.arrive_position();
            }
        }
    }
    debug!("worker {} shutting down", worker);
}
