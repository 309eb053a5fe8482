//! Single-image super-resolution: decoded bitmap in, enlarged bitmap out.

mod bitmap;
mod engine;
mod error;
mod model_service;
mod ort_service;
mod transform;

pub mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use bitmap::{Bitmap, PixelFormat};
pub use engine::{InferenceEngine, ModelInfo};
pub use error::PipelineError;
pub use model_service::{ModelLoader, SuperResolutionModel};
pub use ort_service::{OrtModel, OrtModelLoader};
