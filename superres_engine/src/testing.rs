//! In-process models for exercising the engine without an ONNX asset.

use crate::{
    error::PipelineError,
    model_service::{ModelLoader, SuperResolutionModel},
};
use ndarray::{Array4, ArrayView4};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Nearest-neighbour upscaler with a fixed integer ratio.
pub struct ScaleModel {
    ratio: usize,
    fixed_input: Option<(u32, u32)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScaleModel {
    pub fn new(ratio: usize) -> Self {
        Self {
            ratio,
            fixed_input: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Only accepts tensors of exactly `width x height`, like an exported
    /// network with static axes.
    pub fn with_fixed_input(mut self, width: u32, height: u32) -> Self {
        self.fixed_input = Some((width, height));
        self
    }

    /// Blocks for `delay` on every call, like a large network would.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SuperResolutionModel for ScaleModel {
    fn name(&self) -> &str {
        "scale-model"
    }

    fn fixed_input_size(&self) -> Option<(u32, u32)> {
        self.fixed_input
    }

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let (n, c, h, w) = input.dim();
        if let Some((fw, fh)) = self.fixed_input {
            if (w, h) != (fw as usize, fh as usize) {
                return Err(PipelineError::Processing(format!(
                    "model expects {}x{} input, got {}x{}",
                    fw, fh, w, h
                )));
            }
        }

        let r = self.ratio;
        Ok(Array4::from_shape_fn((n, c, h * r, w * r), |(b, ch, y, x)| {
            input[[b, ch, y / r, x / r]]
        }))
    }
}

/// Returns an output whose axes were scaled by different amounts.
pub struct SkewedModel;

impl SuperResolutionModel for SkewedModel {
    fn name(&self) -> &str {
        "skewed-model"
    }

    fn fixed_input_size(&self) -> Option<(u32, u32)> {
        None
    }

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PipelineError> {
        let (n, c, h, w) = input.dim();
        Ok(Array4::zeros((n, c, h * 2, w * 3)))
    }
}

/// Hands out one shared model and counts how often it was asked to.
pub struct StaticLoader {
    model: Arc<dyn SuperResolutionModel>,
    loads: Arc<AtomicUsize>,
}

impl StaticLoader {
    pub fn new(model: Arc<dyn SuperResolutionModel>) -> Self {
        Self {
            model,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        self.loads.clone()
    }
}

impl ModelLoader for StaticLoader {
    fn load(&self) -> Result<Arc<dyn SuperResolutionModel>, PipelineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.model.clone())
    }
}

/// Always fails, as a missing or corrupt asset would.
pub struct FailingLoader;

impl ModelLoader for FailingLoader {
    fn load(&self) -> Result<Arc<dyn SuperResolutionModel>, PipelineError> {
        Err(PipelineError::ModelLoad(
            "model asset is missing or malformed".to_string(),
        ))
    }
}
