pub mod mesh;

pub use mesh::processing::{quantile, remove_low_density_vertices, simplify_quadric_decimation};
pub use mesh::reconstruction::{
    create_sphere_point_cloud, reconstruct_implicit_surface, SurfaceConfig,
};
pub use mesh::TriangleMesh;
pub use recon_core::PointCloud;
