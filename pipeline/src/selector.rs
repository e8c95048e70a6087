//! Choice between the external tool and the approximate path.
//!
//! ```text
//! quality == High && tool installed ──► external ──ok──► done (External)
//!          │                               │
//!          │                             error
//!          ▼                               ▼
//!      approximate ◄───────────────────────┘
//!          │
//!       ok / error ──► done (Approximate) / job failure
//! ```
//!
//! Each path runs at most once per job.

use crate::{
    PipelineConfig, Quality, ReconstructionMethod, ReconstructionOptions, ReconstructionStats,
    Result, SurfaceReconstructor,
};
use image::DynamicImage;
use recon_3d::{simplify_quadric_decimation, TriangleMesh};
use recon_features::FeatureMatcher;
use recon_sfm::{ApproximateSynthesizer, ExternalModel, ExternalPipeline, ExternalPipelineAdapter};
use std::path::Path;
use std::sync::Arc;

/// Everything a reconstruction path may read for one job.
pub struct JobInput<'a> {
    /// Decoded images, in submission order.
    pub images: &'a [DynamicImage],
    /// Directory holding the saved image files.
    pub images_dir: &'a Path,
    pub job_dir: &'a Path,
}

pub struct PipelineSelector {
    features: FeatureMatcher,
    synthesizer: ApproximateSynthesizer,
    surface: SurfaceReconstructor,
    external: Arc<dyn ExternalPipeline>,
}

impl PipelineSelector {
    pub fn new(config: &PipelineConfig) -> Self {
        let external = Arc::new(ExternalPipelineAdapter::new(config.external.clone()));
        Self::with_external(config, external)
    }

    pub fn with_external(config: &PipelineConfig, external: Arc<dyn ExternalPipeline>) -> Self {
        Self {
            features: config.features.clone(),
            synthesizer: ApproximateSynthesizer::new(config.approximate.clone()),
            surface: config.surface.clone(),
            external,
        }
    }

    pub fn external_available(&self) -> bool {
        self.external.is_available()
    }

    pub fn reconstruct(
        &self,
        input: &JobInput<'_>,
        options: &ReconstructionOptions,
    ) -> Result<(TriangleMesh, ReconstructionStats)> {
        let target = options.triangle_target(self.surface.surface.target_triangles);

        let mut fallback_reason = None;
        if options.quality == Quality::High {
            if self.external.is_available() {
                match self.run_external(input, target) {
                    Ok((mesh, points)) => {
                        let stats = ReconstructionStats::new(ReconstructionMethod::External, points, &mesh);
                        return Ok((mesh, stats));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "external pipeline failed, falling back to approximate");
                        fallback_reason = Some(e.to_string());
                    }
                }
            } else {
                tracing::info!("external tool not installed, using approximate path");
                fallback_reason = Some("external tool not installed".to_string());
            }
        }

        let (mesh, points) = self.run_approximate(input, target)?;
        let stats = ReconstructionStats::new(ReconstructionMethod::Approximate, points, &mesh)
            .with_fallback_reason(fallback_reason);
        Ok((mesh, stats))
    }

    fn run_external(&self, input: &JobInput<'_>, target: usize) -> Result<(TriangleMesh, usize)> {
        tracing::info!("running external pipeline");
        match self.external.reconstruct(input.images_dir, input.job_dir)? {
            ExternalModel::Mesh(mut mesh) => {
                let points = mesh.num_vertices();
                simplify_quadric_decimation(&mut mesh, target);
                if mesh.normals.is_none() {
                    mesh.compute_vertex_normals();
                }
                Ok((mesh, points))
            }
            ExternalModel::PointCloud(cloud) => {
                let mesh = self.surface.reconstruct(&cloud, target)?;
                Ok((mesh, cloud.len()))
            }
        }
    }

    fn run_approximate(&self, input: &JobInput<'_>, target: usize) -> Result<(TriangleMesh, usize)> {
        tracing::info!(images = input.images.len(), "running approximate pipeline");
        let gray: Vec<_> = input.images.iter().map(DynamicImage::to_luma8).collect();
        let rgb: Vec<_> = input.images.iter().map(DynamicImage::to_rgb8).collect();

        let tracks = self.features.run(&gray);
        tracing::debug!(matches = tracks.total_matches(), "feature tracks built");

        let cloud = self.synthesizer.synthesize(&tracks, &rgb)?;
        let mesh = self.surface.reconstruct(&cloud, target)?;
        Ok((mesh, cloud.len()))
    }
}
