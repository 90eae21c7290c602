use std::path::PathBuf;

use thiserror::Error;

/// Environment errors: fatal for the project being processed.
///
/// Missing history is not represented here; the locator reports it as
/// `Located::NotFound` and the pipeline carries on without a comparison.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Export failed for {project}: {reason}")]
    Export { project: String, reason: String },

    #[error("Expected export output is missing: {0}")]
    MissingOutput(PathBuf),

    #[error("Image error for {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact store error: {0}")]
    Store(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
