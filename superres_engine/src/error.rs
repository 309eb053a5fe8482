use thiserror::Error;

/// Failures surfaced by the upscaling pipeline.
///
/// Cloneable so a failed model load can be reported again to every later
/// caller of `initialize`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("No super-resolution model is loaded")]
    ModelUnavailable,
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Upscaling failed: {0}")]
    Processing(String),
}

