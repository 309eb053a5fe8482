mod codec;
mod shell;
mod state;

pub mod app;
pub mod config;

pub use app::start_app;
pub use shell::{AppShell, ShellError};
pub use state::{UiState, MAX_SCALE_FACTOR, MIN_SCALE_FACTOR};
