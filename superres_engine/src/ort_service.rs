use crate::{
    config::{ModelConfig, Validatable},
    error::PipelineError,
    model_service::{ModelLoader, SuperResolutionModel},
};
use ndarray::{Array4, ArrayView4, CowArray, Ix4};
use ort::{
    execution_providers::ExecutionProviderDispatch,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[allow(unused_mut)]
fn execution_providers() -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    #[cfg(feature = "tensorrt")]
    providers.push(
        ort::execution_providers::TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build(),
    );
    #[cfg(feature = "cuda")]
    providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    providers
}

/// Reads the spatial size out of an NCHW input shape. Dynamic axes are
/// reported as non-positive values by ONNX Runtime. Height and width must be
/// both static or both dynamic.
fn spatial_size(dims: &[i64]) -> Result<Option<(u32, u32)>, String> {
    if dims.len() != 4 {
        return Err(format!("expected a 4-D NCHW input, got shape {:?}", dims));
    }
    if dims[1] > 0 && dims[1] != 3 {
        return Err(format!("expected 3 input channels, got {}", dims[1]));
    }

    match (dims[3], dims[2]) {
        (w, h) if w > 0 && h > 0 => {
            let w = u32::try_from(w).map_err(|_| format!("input width {} out of range", w))?;
            let h = u32::try_from(h).map_err(|_| format!("input height {} out of range", h))?;
            Ok(Some((w, h)))
        }
        (w, h) if w <= 0 && h <= 0 => Ok(None),
        (w, h) => Err(format!(
            "input mixes static and dynamic spatial axes (width {}, height {})",
            w, h
        )),
    }
}

/// Row-major copy of `input`, borrowed when it already is.
fn standard_layout(input: ArrayView4<'_, f32>) -> CowArray<'_, f32, Ix4> {
    if input.is_standard_layout() {
        CowArray::from(input)
    } else {
        CowArray::from(input.to_owned())
    }
}

/// ONNX Runtime backed model.
///
/// Sessions are pooled and picked round-robin so that concurrent callers
/// only contend when there are more of them than sessions.
pub struct OrtModel {
    name: String,
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    output_name: String,
    fixed_input: Option<(u32, u32)>,
}

impl OrtModel {
    pub fn new(model_config: &ModelConfig) -> Result<Self, PipelineError> {
        model_config.validate().map_err(PipelineError::ModelLoad)?;

        ort::init()
            .with_execution_providers(execution_providers())
            .commit()
            .map_err(|e| PipelineError::ModelLoad(format!("ONNX Runtime init failed: {}", e)))?;

        let model_path = model_config.get_path();
        let sessions = (0..model_config.num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(model_config.intra_threads)?
                    .commit_from_file(&model_path)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| PipelineError::ModelLoad(format!("{:?}: {}", model_path, e)))?;

        let (output_name, fixed_input) = {
            let session = sessions[0].lock();
            let input = session
                .inputs
                .first()
                .ok_or_else(|| PipelineError::ModelLoad("model declares no inputs".to_string()))?;
            let dims = input
                .input_type
                .tensor_shape()
                .map(|shape| shape.iter().copied().collect::<Vec<i64>>())
                .ok_or_else(|| {
                    PipelineError::ModelLoad(format!("input '{}' is not a tensor", input.name))
                })?;
            let fixed_input = spatial_size(&dims).map_err(PipelineError::ModelLoad)?;

            let output_name = session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| PipelineError::ModelLoad("model declares no outputs".to_string()))?;

            (output_name, fixed_input)
        };

        tracing::info!(
            "Created {} ONNX sessions for {:?}",
            model_config.num_instances,
            model_path
        );

        Ok(Self {
            name: model_config.onnx_file.clone(),
            sessions,
            counter: AtomicUsize::new(0),
            output_name,
            fixed_input,
        })
    }
}

impl SuperResolutionModel for OrtModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fixed_input_size(&self) -> Option<(u32, u32)> {
        self.fixed_input
    }

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PipelineError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Running inference with session {}", index);
        let input = standard_layout(input);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| PipelineError::Processing(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| PipelineError::Processing(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Processing(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| PipelineError::Processing(format!("invalid tensor shape: {}", e)))?
            .into_dimensionality::<Ix4>()
            .map_err(|e| PipelineError::Processing(format!("model output is not NCHW: {}", e)))
    }
}

/// Builds an [`OrtModel`] from configuration when the engine initializes.
#[derive(Debug, Clone)]
pub struct OrtModelLoader {
    config: ModelConfig,
}

impl OrtModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for OrtModelLoader {
    fn load(&self) -> Result<Arc<dyn SuperResolutionModel>, PipelineError> {
        let model = OrtModel::new(&self.config)?;
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_spatial_size_dynamic_axes() {
        assert_eq!(spatial_size(&[1, 3, -1, -1]), Ok(None));
        assert_eq!(spatial_size(&[-1, -1, -1, -1]), Ok(None));
    }

    #[test]
    fn test_spatial_size_fixed_axes() {
        assert_eq!(spatial_size(&[1, 3, 128, 96]), Ok(Some((96, 128))));
    }

    #[test]
    fn test_spatial_size_rejects_bad_layouts() {
        assert!(spatial_size(&[1, 1, 64, 64]).is_err());
        assert!(spatial_size(&[3, 64, 64]).is_err());
    }

    #[test]
    fn test_spatial_size_rejects_half_dynamic_input() {
        assert!(spatial_size(&[1, 3, 256, -1]).is_err());
        assert!(spatial_size(&[1, 3, -1, 256]).is_err());
    }

    #[test]
    fn test_standard_layout_borrows_or_copies() {
        let base = Array4::from_shape_fn((1, 3, 4, 2), |(_, c, y, x)| {
            (c * 100 + y * 10 + x) as f32
        });

        let contiguous = standard_layout(base.view());
        assert!(contiguous.is_view());

        let transposed = base.view().permuted_axes([0, 1, 3, 2]);
        let copied = standard_layout(transposed);
        assert!(copied.is_owned());
        assert!(copied.is_standard_layout());
        assert_eq!(copied.shape(), &[1, 3, 2, 4]);
        assert_eq!(copied[[0, 2, 1, 3]], 231.0);
    }

    #[test]
    fn test_loader_reports_missing_asset() {
        let loader = OrtModelLoader::new(ModelConfig {
            onnx_file: "missing.onnx".to_string(),
            model_dir: PathBuf::from("./no_models_here"),
            num_instances: 1,
            intra_threads: 1,
        });

        match loader.load() {
            Err(PipelineError::ModelLoad(msg)) => assert!(msg.contains("missing.onnx")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("loading a missing model must fail"),
        }
    }
}
