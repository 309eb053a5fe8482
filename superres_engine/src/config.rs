use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_model_instances() -> usize {
    1
}

fn default_intra_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

impl Validatable for ModelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.num_instances == 0 {
            return Err("num_instances must be at least 1".to_string());
        }
        if self.intra_threads == 0 {
            return Err("intra_threads must be at least 1".to_string());
        }
        if !self.get_path().is_file() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Inputs above this many pixels are rejected; large images are not tiled.
    #[serde(default = "default_max_input_pixels")]
    pub max_input_pixels: u64,
}

fn default_max_input_pixels() -> u64 {
    2048 * 2048
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_input_pixels: default_max_input_pixels(),
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_input_pixels == 0 {
            return Err("max_input_pixels must be greater than 0".to_string());
        }
        Ok(())
    }
}
