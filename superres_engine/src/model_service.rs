use crate::error::PipelineError;
use ndarray::{Array4, ArrayView4};
use std::sync::Arc;

/// A loaded super-resolution network.
///
/// Tensors are NCHW `f32` RGB with values in `[0, 1]`. Implementations are
/// shared across threads and must tolerate concurrent `infer` calls.
pub trait SuperResolutionModel: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Spatial input size `(width, height)` when the network only accepts one.
    fn fixed_input_size(&self) -> Option<(u32, u32)>;

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PipelineError>;
}

pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self) -> Result<Arc<dyn SuperResolutionModel>, PipelineError>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Arc<dyn SuperResolutionModel>, PipelineError> + Send + Sync + 'static,
{
    fn load(&self) -> Result<Arc<dyn SuperResolutionModel>, PipelineError> {
        self()
    }
}
