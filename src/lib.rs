pub mod backend;
pub mod body;
pub mod config;
pub mod integrator;
pub mod pool;
pub mod sim_params;
pub mod simulation;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use backend::{ComputeBackend, ReferenceBackend, UploadHandle};
pub use body::Body;
pub use config::SimulationConfig;
pub use pool::{partition_ranges, PhaseBarrier, WorkerPool};
pub use sim_params::SimParams;
pub use simulation::{Frame, Simulation};
pub use vecmath::Vec3;
