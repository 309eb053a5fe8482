use crate::{
    bitmap::Bitmap,
    config::{EngineConfig, ModelConfig},
    error::PipelineError,
    model_service::{ModelLoader, SuperResolutionModel},
    ort_service::OrtModelLoader,
    transform::{prepare_input, reconstruct, upscale_ratio},
};
use once_cell::sync::OnceCell;
use std::{borrow::Borrow, sync::Arc, time::Instant};
use tracing::instrument;

enum ModelState {
    Ready(Arc<dyn SuperResolutionModel>),
    Unavailable(PipelineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub fixed_input_size: Option<(u32, u32)>,
}

/// Runs a single super-resolution model over bitmaps.
///
/// The model is loaded at most once, by the first call to
/// [`initialize`](Self::initialize). Concurrent first calls wait for that
/// single load instead of starting their own. After a failed load the engine
/// stays unavailable for the rest of its life.
pub struct InferenceEngine {
    loader: Box<dyn ModelLoader>,
    config: EngineConfig,
    state: OnceCell<ModelState>,
}

impl InferenceEngine {
    pub fn new(loader: impl ModelLoader, config: EngineConfig) -> Self {
        Self {
            loader: Box::new(loader),
            config,
            state: OnceCell::new(),
        }
    }

    /// An engine backed by ONNX Runtime, loading `model_config`'s asset.
    pub fn from_config(model_config: &ModelConfig, engine_config: &EngineConfig) -> Self {
        Self::new(
            OrtModelLoader::new(model_config.clone()),
            engine_config.clone(),
        )
    }

    pub fn initialize(&self) -> Result<(), PipelineError> {
        match self.state.get_or_init(|| self.load()) {
            ModelState::Ready(_) => Ok(()),
            ModelState::Unavailable(err) => Err(err.clone()),
        }
    }

    fn load(&self) -> ModelState {
        let started = Instant::now();
        match self.loader.load() {
            Ok(model) => {
                tracing::info!(
                    model = model.name(),
                    fixed_input = ?model.fixed_input_size(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Super-resolution model loaded"
                );
                ModelState::Ready(model)
            }
            Err(err) => {
                let err = match err {
                    PipelineError::ModelLoad(_) => err,
                    other => PipelineError::ModelLoad(other.to_string()),
                };
                tracing::error!("Engine unavailable: {}", err);
                ModelState::Unavailable(err)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state.get(), Some(ModelState::Ready(_)))
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.model().ok().map(|model| ModelInfo {
            name: model.name().to_string(),
            fixed_input_size: model.fixed_input_size(),
        })
    }

    fn model(&self) -> Result<&Arc<dyn SuperResolutionModel>, PipelineError> {
        match self.state.get() {
            Some(ModelState::Ready(model)) => Ok(model),
            _ => Err(PipelineError::ModelUnavailable),
        }
    }

    fn validate(&self, input: &Bitmap) -> Result<(), PipelineError> {
        if input.is_empty() {
            return Err(PipelineError::InvalidImage(format!(
                "image has zero size ({}x{})",
                input.width(),
                input.height()
            )));
        }
        if !input.format().is_supported() {
            return Err(PipelineError::InvalidImage(format!(
                "unsupported pixel format: {}",
                input.format().as_str()
            )));
        }
        if input.pixel_count() > self.config.max_input_pixels {
            return Err(PipelineError::InvalidImage(format!(
                "image has {} pixels (limit: {})",
                input.pixel_count(),
                self.config.max_input_pixels
            )));
        }
        Ok(())
    }

    /// Upscales `input` with the loaded model, blocking the calling thread
    /// for the duration of inference.
    ///
    /// The output keeps the input's pixel format. Its size is the input size
    /// (after fit-scaling, for fixed-size models) times the model's ratio.
    #[instrument(
        skip_all,
        fields(width = input.width(), height = input.height(), format = input.format().as_str())
    )]
    pub fn upscale(&self, input: &Bitmap) -> Result<Bitmap, PipelineError> {
        let model = self.model()?;
        self.validate(input)?;

        let started = Instant::now();
        let prepared = prepare_input(input, model.fixed_input_size())?;
        let output = model.infer(prepared.tensor.view())?;
        let ratio = upscale_ratio(prepared.tensor.shape(), output.shape())?;
        let bitmap = reconstruct(&output, ratio, prepared.content, input)?;

        tracing::info!(
            ratio,
            output_width = bitmap.width(),
            output_height = bitmap.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upscaled image"
        );

        Ok(bitmap)
    }

    /// [`upscale`](Self::upscale) on the blocking thread pool, so async
    /// callers are suspended rather than blocked while the model runs.
    pub async fn upscale_async<B>(self: &Arc<Self>, input: B) -> Result<Bitmap, PipelineError>
    where
        B: Borrow<Bitmap> + Send + 'static,
    {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.upscale(input.borrow()))
            .await
            .map_err(|e| PipelineError::Processing(format!("upscale task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bitmap::PixelFormat,
        testing::{FailingLoader, ScaleModel, SkewedModel, StaticLoader},
    };
    use ndarray::{Array4, ArrayView4};
    use std::sync::atomic::Ordering;

    fn engine_with(model: Arc<dyn SuperResolutionModel>) -> InferenceEngine {
        let engine = InferenceEngine::new(StaticLoader::new(model), EngineConfig::default());
        engine.initialize().unwrap();
        engine
    }

    fn red(width: u32, height: u32) -> Bitmap {
        Bitmap::filled(width, height, PixelFormat::Rgba8, &[255, 0, 0, 255]).unwrap()
    }

    /// Rejects mostly-white inputs, so failures depend only on the caller's image.
    struct RejectBrightModel;

    impl SuperResolutionModel for RejectBrightModel {
        fn name(&self) -> &str {
            "reject-bright"
        }

        fn fixed_input_size(&self) -> Option<(u32, u32)> {
            None
        }

        fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PipelineError> {
            if input.mean().unwrap_or(0.0) > 0.9 {
                return Err(PipelineError::Processing("input too bright".to_string()));
            }
            ScaleModel::new(2).infer(input)
        }
    }

    #[test]
    fn test_red_64_becomes_256_with_4x_model() {
        let engine = engine_with(Arc::new(ScaleModel::new(4)));
        let output = engine.upscale(&red(64, 64)).unwrap();

        assert_eq!(output.dimensions(), (256, 256));
        assert_eq!(output.format(), PixelFormat::Rgba8);
        assert!(output
            .as_bytes()
            .chunks_exact(4)
            .all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn test_upscale_before_initialize_is_unavailable() {
        let engine = InferenceEngine::new(
            StaticLoader::new(Arc::new(ScaleModel::new(4))),
            EngineConfig::default(),
        );

        assert!(!engine.is_available());
        assert_eq!(
            engine.upscale(&red(64, 64)),
            Err(PipelineError::ModelUnavailable)
        );
        assert_eq!(engine.model_info(), None);
    }

    #[test]
    fn test_failed_initialize_leaves_engine_unavailable() {
        let engine = InferenceEngine::new(FailingLoader, EngineConfig::default());

        assert!(matches!(
            engine.initialize(),
            Err(PipelineError::ModelLoad(_))
        ));
        assert!(!engine.is_available());
        assert_eq!(
            engine.upscale(&red(64, 64)),
            Err(PipelineError::ModelUnavailable)
        );
        // a later call reports the same failure without retrying the load
        assert!(matches!(
            engine.initialize(),
            Err(PipelineError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_non_load_errors_are_reported_as_model_load() {
        let engine = InferenceEngine::new(
            || -> Result<Arc<dyn SuperResolutionModel>, PipelineError> {
                Err(PipelineError::Processing("bad graph".to_string()))
            },
            EngineConfig::default(),
        );

        match engine.initialize() {
            Err(PipelineError::ModelLoad(msg)) => assert!(msg.contains("bad graph")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_sized_input_never_reaches_model() {
        let model = Arc::new(ScaleModel::new(4));
        let engine = engine_with(model.clone());

        let no_width = Bitmap::new(0, 64, PixelFormat::Rgba8, Vec::new()).unwrap();
        let no_height = Bitmap::new(64, 0, PixelFormat::Rgba8, Vec::new()).unwrap();

        assert!(matches!(
            engine.upscale(&no_width),
            Err(PipelineError::InvalidImage(_))
        ));
        assert!(matches!(
            engine.upscale(&no_height),
            Err(PipelineError::InvalidImage(_))
        ));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_unsupported_format_is_invalid() {
        let model = Arc::new(ScaleModel::new(4));
        let engine = engine_with(model.clone());
        let cmyk = Bitmap::filled(8, 8, PixelFormat::Cmyk8, &[0, 0, 0, 0]).unwrap();

        assert!(matches!(
            engine.upscale(&cmyk),
            Err(PipelineError::InvalidImage(_))
        ));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_oversized_input_is_invalid() {
        let engine = InferenceEngine::new(
            StaticLoader::new(Arc::new(ScaleModel::new(2))),
            EngineConfig {
                max_input_pixels: 100,
            },
        );
        engine.initialize().unwrap();

        assert!(matches!(
            engine.upscale(&red(11, 10)),
            Err(PipelineError::InvalidImage(_))
        ));
        assert!(engine.upscale(&red(10, 10)).is_ok());
    }

    #[test]
    fn test_input_is_not_mutated() {
        let engine = engine_with(Arc::new(ScaleModel::new(2)));
        let input = Bitmap::new(
            3,
            2,
            PixelFormat::Rgb8,
            (0..18).map(|v| v * 10).collect(),
        )
        .unwrap();
        let before = input.as_bytes().to_vec();

        let output = engine.upscale(&input).unwrap();

        assert_eq!(input.as_bytes(), before.as_slice());
        assert_ne!(output.dimensions(), input.dimensions());
    }

    #[test]
    fn test_fixed_input_model_is_fit_scaled_and_cropped() {
        let model = Arc::new(ScaleModel::new(2).with_fixed_input(32, 32));
        let engine = engine_with(model.clone());

        let output = engine.upscale(&red(64, 32)).unwrap();

        // 64x32 fits into 32x32 as 32x16, then doubles
        assert_eq!(output.dimensions(), (64, 32));
        let bottom_right = output.pixel(63, 31).unwrap();
        assert!(bottom_right[0] > 250);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_alpha_and_channel_order_survive() {
        let engine = engine_with(Arc::new(ScaleModel::new(2)));
        let input = Bitmap::filled(4, 4, PixelFormat::Bgra8, &[200, 100, 50, 128]).unwrap();

        let output = engine.upscale(&input).unwrap();

        assert_eq!(output.format(), PixelFormat::Bgra8);
        assert_eq!(output.dimensions(), (8, 8));
        let pixel = output.pixel(5, 5).unwrap();
        assert_eq!(&pixel[..3], &[200, 100, 50]);
        assert!(pixel[3].abs_diff(128) <= 1);
    }

    #[test]
    fn test_inconsistent_model_output_is_processing_error() {
        let engine = engine_with(Arc::new(SkewedModel));

        assert!(matches!(
            engine.upscale(&red(8, 8)),
            Err(PipelineError::Processing(_))
        ));
    }

    #[test]
    fn test_model_info() {
        let engine = engine_with(Arc::new(ScaleModel::new(4).with_fixed_input(128, 64)));

        assert_eq!(
            engine.model_info(),
            Some(ModelInfo {
                name: "scale-model".to_string(),
                fixed_input_size: Some((128, 64)),
            })
        );
    }

    #[test]
    fn test_concurrent_initialize_loads_once() {
        let loader = StaticLoader::new(Arc::new(ScaleModel::new(4)));
        let loads = loader.load_counter();
        let engine = InferenceEngine::new(loader, EngineConfig::default());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| engine.initialize().unwrap());
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(engine.is_available());
    }

    #[tokio::test]
    async fn test_concurrent_upscales_are_independent() {
        let engine = Arc::new(engine_with(Arc::new(RejectBrightModel)));

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let engine = engine.clone();
            let bright = i % 2 == 0;
            let pixel = if bright {
                [255, 255, 255, 255]
            } else {
                [255, 0, 0, 255]
            };
            let input = Bitmap::filled(16 + i, 16, PixelFormat::Rgba8, &pixel).unwrap();
            handles.push(tokio::spawn(async move {
                (bright, 16 + i, engine.upscale_async(input).await)
            }));
        }

        for handle in handles {
            let (bright, width, result) = handle.await.unwrap();
            if bright {
                assert!(matches!(result, Err(PipelineError::Processing(_))));
            } else {
                assert_eq!(result.unwrap().dimensions(), (width * 2, 32));
            }
        }
    }

    #[tokio::test]
    async fn test_upscale_async_accepts_shared_bitmap() {
        let engine = Arc::new(engine_with(Arc::new(ScaleModel::new(4))));
        let input = Arc::new(red(64, 64));

        let output = engine.upscale_async(input.clone()).await.unwrap();

        assert_eq!(output.dimensions(), (256, 256));
        assert_eq!(input.dimensions(), (64, 64));
    }

    #[tokio::test]
    async fn test_upscale_async_without_model() {
        let engine = Arc::new(InferenceEngine::new(FailingLoader, EngineConfig::default()));
        let _ = engine.initialize();

        assert_eq!(
            engine.upscale_async(red(64, 64)).await,
            Err(PipelineError::ModelUnavailable)
        );
    }
}
