//! Job lifecycle: identity, workspace, input persistence and output artifact.

use crate::{
    PipelineConfig, PipelineError, PipelineSelector, ReconstructionOptions, ReconstructionStats,
    Result, WorkspacePolicy,
};
use crate::selector::JobInput;
use image::DynamicImage;
use recon_sfm::ExternalPipeline;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const OUTPUT_FILENAME: &str = "reconstructed_model.glb";
pub const MODEL_FILE: &str = "model.glb";
pub const IMAGES_DIR: &str = "images";

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `job_<unix millis>_<process counter>_<random hex>`.
pub fn job_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let n = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("job_{}_{}_{:08x}", millis, n, rand::random::<u32>())
}

/// A job directory, deleted on drop unless the policy retains it.
#[derive(Debug)]
pub struct JobWorkspace {
    path: PathBuf,
    policy: WorkspacePolicy,
}

impl JobWorkspace {
    pub fn create(root: &Path, token: &str, policy: WorkspacePolicy) -> std::io::Result<Self> {
        let path = root.join(token);
        std::fs::create_dir_all(path.join(IMAGES_DIR))?;
        Ok(Self { path, policy })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn images_dir(&self) -> PathBuf {
        self.path.join(IMAGES_DIR)
    }

    pub fn model_path(&self) -> PathBuf {
        self.path.join(MODEL_FILE)
    }

    /// Save `bytes` as `images/image_NNNN.<ext>`, the extension sniffed from the content.
    pub fn save_image(&self, index: usize, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("jpg");
        let path = self.images_dir().join(format!("image_{:04}.{}", index, ext));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.policy == WorkspacePolicy::Retain {
            tracing::debug!(path = %self.path.display(), "workspace retained");
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "workspace removed"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "workspace cleanup failed"),
        }
    }
}

/// A finished job's artifact, already read into memory.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub token: String,
    pub bytes: Vec<u8>,
    pub filename: &'static str,
    pub mime: &'static str,
    pub stats: ReconstructionStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    #[serde(rename = "colmap_available")]
    pub external_tool_available: bool,
    #[serde(rename = "temp_dir")]
    pub temp_root: PathBuf,
}

pub struct JobOrchestrator {
    config: PipelineConfig,
    selector: PipelineSelector,
}

impl JobOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        let selector = PipelineSelector::new(&config);
        Self { config, selector }
    }

    pub fn with_external(config: PipelineConfig, external: Arc<dyn ExternalPipeline>) -> Self {
        let selector = PipelineSelector::with_external(&config, external);
        Self { config, selector }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            external_tool_available: self.selector.external_available(),
            temp_root: self.config.jobs_root(),
        }
    }

    /// Run one reconstruction job to completion. The job directory is gone
    /// (unless retained) by the time this returns, whatever the outcome.
    pub fn submit(&self, images: &[Vec<u8>], options: &ReconstructionOptions) -> Result<JobOutput> {
        if images.len() < self.config.min_images {
            return Err(PipelineError::TooFewImages {
                required: self.config.min_images,
                actual: images.len(),
            });
        }

        let token = job_token();
        let span = tracing::info_span!("job", token = %token);
        let _enter = span.enter();

        let started = Instant::now();
        tracing::info!(images = images.len(), quality = ?options.quality, "job started");

        match self.run(&token, images, options) {
            Ok(output) => {
                tracing::info!(
                    method = %output.stats.method,
                    vertices = output.stats.vertices,
                    faces = output.stats.faces,
                    points = output.stats.points,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job finished"
                );
                Ok(output)
            }
            Err(e) => {
                tracing::error!(error = %error_chain(&e), kind = ?e.kind(), "job failed");
                Err(e)
            }
        }
    }

    fn run(&self, token: &str, images: &[Vec<u8>], options: &ReconstructionOptions) -> Result<JobOutput> {
        let workspace = JobWorkspace::create(&self.config.jobs_root(), token, self.config.workspace_policy)?;

        let mut decoded = Vec::with_capacity(images.len());
        for (index, bytes) in images.iter().enumerate() {
            workspace.save_image(index, bytes)?;
            let image: DynamicImage = image::load_from_memory(bytes)
                .map_err(|source| PipelineError::ImageDecode { index, source })?;
            decoded.push(image);
        }

        let images_dir = workspace.images_dir();
        let input = JobInput {
            images: &decoded,
            images_dir: &images_dir,
            job_dir: workspace.path(),
        };
        let (mesh, stats) = self.selector.reconstruct(&input, options)?;

        let model_path = workspace.model_path();
        recon_io::save_glb(&model_path, &mesh)?;
        let bytes = std::fs::read(&model_path)?;

        Ok(JobOutput {
            token: token.to_string(),
            bytes,
            filename: OUTPUT_FILENAME,
            mime: recon_io::GLB_MIME_TYPE,
            stats,
        })
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
