use crate::{
    codec,
    config::OutputConfig,
    state::{Ticket, UiState},
};
use parking_lot::Mutex;
use std::{path::Path, sync::Arc};
use superres_engine::{Bitmap, InferenceEngine, PipelineError};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("An upscale is already in progress")]
    Busy,
    #[error("No image selected")]
    NoInput,
    #[error("No upscaled image to save")]
    NoOutput,
    #[error("The selected image changed while it was being upscaled")]
    Superseded,
    #[error("Could not read image: {0}")]
    Decode(String),
    #[error("Could not write image: {0}")]
    Encode(String),
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the UI does with images, minus the widgets.
///
/// Every failure is returned to the caller and also stored as the state's
/// error message. The state lock is never held across an await.
pub struct AppShell {
    engine: Arc<InferenceEngine>,
    state: Mutex<UiState>,
    output: OutputConfig,
}

impl AppShell {
    pub fn new(engine: Arc<InferenceEngine>, output: OutputConfig, scale_factor: f32) -> Self {
        Self {
            engine,
            state: Mutex::new(UiState::new(scale_factor)),
            output,
        }
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn snapshot(&self) -> UiState {
        self.state.lock().clone()
    }

    pub fn select_image(&self, bitmap: Bitmap) {
        tracing::debug!(
            "Selected {}x{} {} image",
            bitmap.width(),
            bitmap.height(),
            bitmap.format().as_str()
        );
        self.state.lock().select(bitmap);
    }

    pub fn open_image(&self, path: impl AsRef<Path>) -> Result<(), ShellError> {
        match codec::decode_file(path.as_ref()) {
            Ok(bitmap) => {
                self.select_image(bitmap);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }

    pub fn set_scale_factor(&self, scale_factor: f32) -> f32 {
        self.state.lock().set_scale_factor(scale_factor)
    }

    /// Upscales the current input on the engine's worker pool.
    ///
    /// The scale factor is recorded but does not change the output size,
    /// which is fixed by the model.
    #[instrument(skip(self))]
    pub async fn upscale_current(&self) -> Result<Arc<Bitmap>, ShellError> {
        let (input, ticket, scale_factor) = {
            let mut state = self.state.lock();
            if state.is_busy() {
                return Err(ShellError::Busy);
            }
            let scale_factor = state.scale_factor();
            match state.begin() {
                Some((input, ticket)) => (input, ticket, scale_factor),
                None => {
                    state.report(ShellError::NoInput.to_string());
                    return Err(ShellError::NoInput);
                }
            }
        };

        tracing::info!(
            width = input.width(),
            height = input.height(),
            scale_factor,
            "Upscale requested"
        );

        let in_flight = InFlight {
            state: &self.state,
            ticket: Some(ticket),
        };
        let result = self.engine.upscale_async(input).await.map(Arc::new);

        let applied = in_flight.finish(result.clone());
        if !applied {
            tracing::info!("Discarding result for an image that is no longer selected");
            return Err(ShellError::Superseded);
        }

        result.map_err(|err| {
            tracing::warn!("Upscale failed: {}", err);
            ShellError::Pipeline(err)
        })
    }

    pub fn save_output(&self, path: impl AsRef<Path>) -> Result<(), ShellError> {
        let path = path.as_ref();
        let output = self.state.lock().output().cloned();
        let result = match output {
            Some(bitmap) => codec::encode_file(&bitmap, path, self.output.jpeg_quality),
            None => Err(ShellError::NoOutput),
        };

        match result {
            Ok(()) => {
                tracing::info!("Saved upscaled image to {}", path.display());
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&self, err: ShellError) -> ShellError {
        self.state.lock().report(err.to_string());
        err
    }
}

/// Releases the busy flag if `upscale_current` is dropped before the
/// engine answers.
struct InFlight<'a> {
    state: &'a Mutex<UiState>,
    ticket: Option<Ticket>,
}

impl InFlight<'_> {
    fn finish(mut self, result: Result<Arc<Bitmap>, PipelineError>) -> bool {
        match self.ticket.take() {
            Some(ticket) => self.state.lock().finish(ticket, result),
            None => false,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            tracing::warn!("Upscale dropped before completion");
            self.state.lock().abandon(ticket);
        }
    }
}
