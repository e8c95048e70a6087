use recon_sfm::SfmError;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure classes reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request; rejected before any processing.
    Validation,
    /// A reconstruction path could not produce a model.
    PipelineStage,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("At least {required} images required, got {actual}")]
    TooFewImages { required: usize, actual: usize },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Image {index} could not be decoded: {source}")]
    ImageDecode {
        index: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("Surface reconstruction produced no triangles")]
    EmptySurface,

    #[error(transparent)]
    Sfm(#[from] SfmError),

    #[error("Model export failed: {0}")]
    Export(#[from] recon_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TooFewImages { .. }
            | PipelineError::InvalidOptions(_)
            | PipelineError::ImageDecode { .. } => ErrorKind::Validation,
            PipelineError::EmptySurface => ErrorKind::PipelineStage,
            PipelineError::Sfm(e) => match e {
                SfmError::EmptyPointCloud
                | SfmError::ToolNotInstalled(_)
                | SfmError::StageFailed { .. }
                | SfmError::MissingOutput(_) => ErrorKind::PipelineStage,
                SfmError::InvalidInput(_) | SfmError::Core(_) | SfmError::Io(_) => {
                    ErrorKind::Internal
                }
            },
            PipelineError::Export(_) | PipelineError::Io(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let too_few = PipelineError::TooFewImages {
            required: 3,
            actual: 2,
        };
        assert_eq!(too_few.kind(), ErrorKind::Validation);
        assert_eq!(too_few.to_string(), "At least 3 images required, got 2");

        let empty = PipelineError::from(SfmError::EmptyPointCloud);
        assert_eq!(empty.kind(), ErrorKind::PipelineStage);
        assert!(empty.to_string().contains("empty point cloud"));

        let io = PipelineError::from(std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Internal);
    }
}
