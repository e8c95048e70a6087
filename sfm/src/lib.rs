//! Structure from images.
//!
//! Two ways of turning an ordered image set into 3D structure:
//! - `approximate`: places ratio-tested matches on a synthetic camera ring
//! - `external`: drives an installed multi-view stereo tool and loads its fused output

pub mod approximate;
pub mod external;

pub use approximate::*;
pub use external::*;

use std::path::PathBuf;

/// Error type for SfM operations
#[derive(Debug, thiserror::Error)]
pub enum SfmError {
    #[error("No 3D points could be generated: empty point cloud")]
    EmptyPointCloud,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External tool '{0}' is not installed")]
    ToolNotInstalled(String),

    #[error("External stage '{stage}' failed ({status}): {stderr}")]
    StageFailed {
        stage: ExternalStage,
        status: String,
        stderr: String,
    },

    #[error("External reconstruction produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error(transparent)]
    Core(#[from] recon_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SfmError>;
