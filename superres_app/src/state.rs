use std::sync::Arc;
use superres_engine::{Bitmap, PipelineError};

pub const MIN_SCALE_FACTOR: f32 = 1.0;
pub const MAX_SCALE_FACTOR: f32 = 4.0;

/// Ticket handed out when an upscale starts; results carrying a stale
/// ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// What the UI renders: the selected image, the result, the busy flag, the
/// last error message and the scale slider.
///
/// Bitmaps are held behind `Arc` so a worker can read the input while the UI
/// keeps displaying it; neither side can modify it.
#[derive(Debug, Clone)]
pub struct UiState {
    input: Option<Arc<Bitmap>>,
    output: Option<Arc<Bitmap>>,
    busy: bool,
    error: Option<String>,
    scale_factor: f32,
    generation: u64,
}

impl UiState {
    pub fn new(scale_factor: f32) -> Self {
        Self {
            input: None,
            output: None,
            busy: false,
            error: None,
            scale_factor: clamp_scale(scale_factor, MIN_SCALE_FACTOR),
            generation: 0,
        }
    }

    pub fn input(&self) -> Option<&Arc<Bitmap>> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Arc<Bitmap>> {
        self.output.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub(crate) fn select(&mut self, bitmap: Bitmap) {
        self.input = Some(Arc::new(bitmap));
        self.output = None;
        self.error = None;
        self.generation += 1;
    }

    pub(crate) fn clear(&mut self) {
        self.input = None;
        self.output = None;
        self.error = None;
        self.generation += 1;
    }

    /// Clamps into the slider range; non-finite values leave it unchanged.
    pub(crate) fn set_scale_factor(&mut self, scale_factor: f32) -> f32 {
        self.scale_factor = clamp_scale(scale_factor, self.scale_factor);
        self.scale_factor
    }

    pub(crate) fn report(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Marks the state busy and returns the input to process, or `None` when
    /// already busy or nothing is selected.
    pub(crate) fn begin(&mut self) -> Option<(Arc<Bitmap>, Ticket)> {
        if self.busy {
            return None;
        }
        let input = self.input.clone()?;
        self.busy = true;
        self.error = None;
        Some((input, Ticket(self.generation)))
    }

    /// Clears the busy flag and records the result, unless the image was
    /// replaced or cleared since `begin`. Returns whether it was applied.
    pub(crate) fn finish(
        &mut self,
        ticket: Ticket,
        result: Result<Arc<Bitmap>, PipelineError>,
    ) -> bool {
        self.busy = false;
        if ticket.0 != self.generation {
            return false;
        }
        match result {
            Ok(bitmap) => {
                self.output = Some(bitmap);
                self.error = None;
            }
            Err(err) => {
                self.output = None;
                self.error = Some(err.to_string());
            }
        }
        true
    }

    /// Clears the busy flag for a run whose result will never arrive.
    pub(crate) fn abandon(&mut self, ticket: Ticket) {
        self.busy = false;
        if ticket.0 == self.generation {
            self.error = Some("Upscale was cancelled".to_string());
        }
    }
}

fn clamp_scale(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(MIN_SCALE_FACTOR, MAX_SCALE_FACTOR)
    } else {
        fallback
    }
}
