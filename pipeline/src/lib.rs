//! Reconstruction pipeline.
//!
//! A job takes raw image buffers plus an options record and yields a binary
//! glTF model with statistics:
//!
//! 1. [`JobOrchestrator`] validates the set, allocates a workspace and saves the images
//! 2. [`PipelineSelector`] tries the external tool when high quality is requested
//!    and the tool is installed, falling back once to the approximate path
//! 3. [`SurfaceReconstructor`] turns any point cloud into a bounded triangle mesh

pub mod config;
pub mod error;
pub mod job;
pub mod options;
pub mod selector;
pub mod stats;
pub mod surface;

pub use config::{PipelineConfig, WorkspacePolicy};
pub use error::{ErrorKind, PipelineError, Result};
pub use job::{job_token, HealthReport, JobOrchestrator, JobOutput, JobWorkspace};
pub use options::{Quality, ReconstructionOptions};
pub use selector::{JobInput, PipelineSelector};
pub use stats::{ReconstructionMethod, ReconstructionStats};
pub use surface::SurfaceReconstructor;
