//! Point cloud to bounded triangle mesh.

use crate::{PipelineError, Result};
use recon_3d::{
    reconstruct_implicit_surface, remove_low_density_vertices, simplify_quadric_decimation,
    SurfaceConfig, TriangleMesh,
};
use recon_core::PointCloud;
use recon_point_cloud::{compute_oriented_normals, filter_outliers, NormalConfig, OutlierConfig};
use recon_sfm::SfmError;

/// Outlier removal, normal estimation, implicit surface, density pruning and
/// quadric simplification, in that order.
#[derive(Debug, Clone, Default)]
pub struct SurfaceReconstructor {
    pub outliers: OutlierConfig,
    pub normals: NormalConfig,
    pub surface: SurfaceConfig,
}

impl SurfaceReconstructor {
    pub fn new(outliers: OutlierConfig, normals: NormalConfig, surface: SurfaceConfig) -> Self {
        Self {
            outliers,
            normals,
            surface,
        }
    }

    pub fn with_surface(mut self, surface: SurfaceConfig) -> Self {
        self.surface = surface;
        self
    }

    /// Mesh `cloud` with at most `target_triangles` faces (and never more than
    /// the configured surface target).
    pub fn reconstruct(&self, cloud: &PointCloud, target_triangles: usize) -> Result<TriangleMesh> {
        if cloud.is_empty() {
            return Err(SfmError::EmptyPointCloud.into());
        }

        let mut filtered = filter_outliers(cloud, &self.outliers);
        if filtered.is_empty() {
            return Err(SfmError::EmptyPointCloud.into());
        }
        tracing::debug!(input = cloud.len(), kept = filtered.len(), "outliers removed");

        compute_oriented_normals(&mut filtered, &self.normals);

        let (mut mesh, densities) =
            reconstruct_implicit_surface(&filtered, &self.surface).ok_or(PipelineError::EmptySurface)?;
        if mesh.is_empty() {
            return Err(PipelineError::EmptySurface);
        }

        remove_low_density_vertices(&mut mesh, &densities, self.surface.density_quantile);
        simplify_quadric_decimation(&mut mesh, target_triangles.min(self.surface.target_triangles));
        if mesh.is_empty() {
            return Err(PipelineError::EmptySurface);
        }

        tracing::debug!(
            vertices = mesh.num_vertices(),
            faces = mesh.num_faces(),
            "surface reconstructed"
        );
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use recon_3d::create_sphere_point_cloud;

    fn coarse() -> SurfaceReconstructor {
        SurfaceReconstructor::default().with_surface(SurfaceConfig::default().with_depth(6))
    }

    #[test]
    fn test_sphere_to_bounded_mesh() {
        let mut cloud = create_sphere_point_cloud(Point3::origin(), 1.0, 800);
        cloud.normals = None;
        let mesh = coarse().reconstruct(&cloud, 300).unwrap();
        assert!(mesh.num_faces() > 0);
        assert!(mesh.num_faces() <= 300);
        assert_eq!(mesh.normals.as_ref().map(Vec::len), Some(mesh.num_vertices()));
    }

    #[test]
    fn test_colors_carried_through() {
        let cloud = create_sphere_point_cloud(Point3::origin(), 1.0, 600);
        let n = cloud.len();
        let cloud = cloud.with_colors(vec![Point3::new(0.2, 0.4, 0.6); n]).unwrap();
        let mesh = coarse().reconstruct(&cloud, 50_000).unwrap();
        let colors = mesh.colors.unwrap();
        assert_eq!(colors.len(), mesh.vertices.len());
        assert!(colors.iter().all(|c| (c.y - 0.4).abs() < 1e-3));
    }

    #[test]
    fn test_empty_cloud() {
        let err = coarse().reconstruct(&PointCloud::default(), 100).unwrap_err();
        assert!(matches!(err, PipelineError::Sfm(SfmError::EmptyPointCloud)));
    }
}
