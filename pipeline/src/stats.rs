use recon_3d::TriangleMesh;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which path produced a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionMethod {
    External,
    Approximate,
}

impl fmt::Display for ReconstructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructionMethod::External => f.write_str("external"),
            ReconstructionMethod::Approximate => f.write_str("approximate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionStats {
    pub vertices: usize,
    pub faces: usize,
    /// Size of the point cloud the surface was built from.
    pub points: usize,
    pub method: ReconstructionMethod,
    /// Why the external path was skipped or abandoned, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl ReconstructionStats {
    pub fn new(method: ReconstructionMethod, points: usize, mesh: &TriangleMesh) -> Self {
        Self {
            vertices: mesh.num_vertices(),
            faces: mesh.num_faces(),
            points,
            method,
            fallback_reason: None,
        }
    }

    pub fn with_fallback_reason(mut self, reason: Option<String>) -> Self {
        self.fallback_reason = reason;
        self
    }
}
