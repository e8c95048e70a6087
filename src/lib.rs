//! Photo set to textured 3D mesh reconstruction.
//!
//! Umbrella crate over the workspace members; see [`pipeline::JobOrchestrator`]
//! for the entry point.

pub use recon_3d as mesh;
pub use recon_core as core;
pub use recon_features as features;
pub use recon_io as io;
pub use recon_pipeline as pipeline;
pub use recon_point_cloud as point_cloud;
pub use recon_sfm as sfm;

/// Initialize a single global Rayon thread pool for all CPU-parallel routines.
///
/// Call this once at application startup before submitting jobs.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `RECON_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    recon_core::init_global_thread_pool(num_threads)
}
