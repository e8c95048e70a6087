//! Pipeline configuration.

use crate::SurfaceReconstructor;
use recon_features::FeatureMatcher;
use recon_sfm::{ApproximateConfig, ExternalToolConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const JOBS_DIR: &str = "photogrammetry";
pub const MIN_IMAGES: usize = 3;

/// What happens to a job directory once the job is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspacePolicy {
    #[default]
    Delete,
    /// Keep inputs and intermediates on disk, e.g. for debugging.
    Retain,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Jobs are created under `<temp_root>/photogrammetry/`.
    pub temp_root: PathBuf,
    pub workspace_policy: WorkspacePolicy,
    pub min_images: usize,
    pub features: FeatureMatcher,
    pub approximate: ApproximateConfig,
    pub surface: SurfaceReconstructor,
    pub external: ExternalToolConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
            workspace_policy: WorkspacePolicy::default(),
            min_images: MIN_IMAGES,
            features: FeatureMatcher::default(),
            approximate: ApproximateConfig::default(),
            surface: SurfaceReconstructor::default(),
            external: ExternalToolConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    pub fn with_workspace_policy(mut self, policy: WorkspacePolicy) -> Self {
        self.workspace_policy = policy;
        self
    }

    pub fn with_surface(mut self, surface: SurfaceReconstructor) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_external(mut self, external: ExternalToolConfig) -> Self {
        self.external = external;
        self
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.temp_root.join(JOBS_DIR)
    }
}
