use anyhow::Result;
use log::debug;

use crate::body::Body;
use crate::integrator;
use crate::sim_params::SimParams;

/// Token tying an `execute_phase1` call to a previous `upload`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UploadHandle(u64);

/// Optional offload target for the velocity pass. A backend is a strict
/// substitute for the built-in phase 1: given a quiescent snapshot it must
/// return the full body array with updated velocities (same count, same
/// order, collisions resolved) and positions untouched.
///
/// Backend failures abort only the affected tick; the driver retries once
/// and then falls back to the worker pool (see `Simulation`).
pub trait ComputeBackend: Send {
    fn name(&self) -> &str;

    /// Transfers a snapshot of the body array to the backend.
    fn upload(&mut self, bodies: &[Body]) -> Result<UploadHandle>;

    /// Runs the full velocity pass for a previously uploaded snapshot.
    fn execute_phase1(&mut self, handle: UploadHandle) -> Result<Vec<Body>>;
}

/// In-process reference backend. Runs the same integrator functions the
/// worker pool runs, serially over the whole array, so the offload path can
/// never drift from the built-in physics. Useful as a correctness oracle and
/// as the template for a real device backend.
pub struct ReferenceBackend {
    params: SimParams,
    staged: Option<(u64, Vec<Body>)>,
    next_handle: u64,
}

impl ReferenceBackend {
    pub fn new(params: SimParams) -> Result<Self> {
        if params.body_count == 0 {
            anyhow::bail!("reference backend requires a non-empty body array");
        }
        Ok(Self {
            params,
            staged: None,
            next_handle: 0,
        })
    }
}

impl ComputeBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference-cpu"
    }

    fn upload(&mut self, bodies: &[Body]) -> Result<UploadHandle> {
        self.next_handle += 1;
        self.staged = Some((self.next_handle, bodies.to_vec()));
        debug!("reference backend staged {} bodies", bodies.len());
        Ok(UploadHandle(self.next_handle))
    }

    fn execute_phase1(&mut self, handle: UploadHandle) -> Result<Vec<Body>> {
        let (id, mut bodies) = self
            .staged
            .take()
            .ok_or_else(|| anyhow::anyhow!("execute_phase1 called with nothing uploaded"))?;
        if id != handle.0 {
            anyhow::bail!("stale upload handle {} (current is {})", handle.0, id);
        }

        let (velocities, collisions) =
            integrator::velocity_pass(0..bodies.len(), &bodies, &self.params);
        for (body, velocity) in bodies.iter_mut().zip(velocities) {
            body.velocity = velocity;
        }
        integrator::apply_collisions(&mut bodies, collisions, &self.params);
        Ok(bodies)
    }
}
