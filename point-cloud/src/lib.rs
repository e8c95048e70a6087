//! Point cloud operations used ahead of surface fitting.
//!
//! - `cpu::filtering`: statistical outlier removal
//! - `cpu::normals`: k-NN PCA normal estimation and consistent orientation

pub mod cpu;

pub use cpu::*;

/// Statistical outlier filter parameters.
#[derive(Debug, Clone, Copy)]
pub struct OutlierConfig {
    /// Neighbours considered per point (the point itself excluded).
    pub k: usize,
    /// Points whose mean neighbour distance exceeds `mean + std_ratio * std` are dropped.
    pub std_ratio: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            k: 20,
            std_ratio: 2.0,
        }
    }
}

impl OutlierConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_std_ratio(mut self, std_ratio: f64) -> Self {
        self.std_ratio = std_ratio;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalConfig {
    pub k: usize,
    /// Flip all normals so that, on average, they point away from the centroid.
    pub orient_outward: bool,
}

impl Default for NormalConfig {
    fn default() -> Self {
        Self {
            k: 30,
            orient_outward: true,
        }
    }
}

impl NormalConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}
