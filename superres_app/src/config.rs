use crate::state::{MAX_SCALE_FACTOR, MIN_SCALE_FACTOR};
use serde::Deserialize;
use std::path::PathBuf;
use superres_engine::config::{EngineConfig, ModelConfig, Validatable};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    90
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Validatable for OutputConfig {
    fn validate(&self) -> Result<(), String> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        Ok(())
    }
}

/// One-shot job run by the binary: both paths set means open, upscale, save.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
}

fn default_scale_factor() -> f32 {
    2.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            scale_factor: default_scale_factor(),
        }
    }
}

impl Validatable for SessionConfig {
    fn validate(&self) -> Result<(), String> {
        if !(MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&self.scale_factor) {
            return Err(format!(
                "scale_factor must be within {}..={}, got {}",
                MIN_SCALE_FACTOR, MAX_SCALE_FACTOR, self.scale_factor
            ));
        }
        if self.input.is_some() != self.output.is_some() {
            return Err("session input and output must be set together".to_string());
        }
        Ok(())
    }
}

impl Validatable for Config {
    fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;
        self.output.validate()?;
        self.session.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

/// Loads `configuration/base.yaml`, then the file for `APP_ENVIRONMENT`
/// (default `local`), then `APP_`-prefixed environment variables.
///
/// The model asset is not checked here; a missing model leaves the engine
/// unavailable instead of stopping the app.
pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    parse(settings)
}

fn parse(settings: config::Config) -> Result<Config, config::ConfigError> {
    let config = settings.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }
    Ok(config)
}
