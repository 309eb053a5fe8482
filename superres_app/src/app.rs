use crate::config::Config;
use crate::shell::{AppShell, ShellError};

use std::{error::Error, path::Path, sync::Arc};
use superres_engine::InferenceEngine;

/// Builds the engine and shell. A model that fails to load is logged and
/// leaves the engine unavailable; the shell still comes up.
pub fn build_shell(config: &Config) -> AppShell {
    let engine = Arc::new(InferenceEngine::from_config(&config.model, &config.engine));

    match engine.initialize() {
        Ok(()) => {
            if let Some(info) = engine.model_info() {
                tracing::info!(
                    "Engine ready with {} (fixed input: {:?})",
                    info.name,
                    info.fixed_input_size
                );
            }
        }
        Err(e) => tracing::warn!("Continuing without a model: {}", e),
    }

    AppShell::new(
        engine,
        config.output.clone(),
        config.session.scale_factor,
    )
}

pub async fn run_session(shell: &AppShell, input: &Path, output: &Path) -> Result<(), ShellError> {
    shell.open_image(input)?;
    let upscaled = shell.upscale_current().await?;
    tracing::info!(
        "Upscaled {} to {}x{}",
        input.display(),
        upscaled.width(),
        upscaled.height()
    );
    shell.save_output(output)
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let shell = build_shell(&config);

    match (&config.session.input, &config.session.output) {
        (Some(input), Some(output)) => {
            if let Err(e) = run_session(&shell, input, output).await {
                tracing::error!("Session failed: {}", e);
                return Err(Box::new(e));
            }
        }
        _ => tracing::info!(
            "No session input configured, engine available: {}",
            shell.engine().is_available()
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, OutputConfig, SessionConfig};
    use superres_engine::{
        config::{EngineConfig, ModelConfig},
        PipelineError,
    };
    use tempfile::tempdir;

    fn config_without_model(session: SessionConfig) -> Config {
        Config {
            log_level: LogLevel::Info,
            model: ModelConfig {
                onnx_file: "absent.onnx".to_string(),
                model_dir: "./no_models_here".into(),
                num_instances: 1,
                intra_threads: 1,
            },
            engine: EngineConfig::default(),
            output: OutputConfig::default(),
            session,
        }
    }

    #[test]
    fn test_missing_model_still_builds_shell() {
        let shell = build_shell(&config_without_model(SessionConfig::default()));

        assert!(!shell.engine().is_available());
        assert_eq!(shell.snapshot().scale_factor(), 2.0);
    }

    #[tokio::test]
    async fn test_start_app_without_session_is_ok() {
        let result = start_app(config_without_model(SessionConfig::default())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_session_without_model_reports_unavailable() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("in.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 0, 0, 255]))
            .save(&input)
            .unwrap();

        let shell = build_shell(&config_without_model(SessionConfig::default()));
        let err = run_session(&shell, &input, &tmp.path().join("out.png"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ShellError::Pipeline(PipelineError::ModelUnavailable)
        ));
        assert!(!tmp.path().join("out.png").exists());
    }
}
