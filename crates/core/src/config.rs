use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::{
    conversation::{DEFAULT_MAX_MESSAGES, DEFAULT_MAX_TOKENS},
    model::ModelProvider,
    paths::AppDir,
};

/// Written to `moki.yml` on first run.
pub const DEFAULT_CONFIG: &str = include_str!("../data/config.yml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File system error: {0}")]
    IO(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YAMLError(#[from] serde_yaml::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_session_secs")]
    pub session_secs: u64,
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

fn default_session_secs() -> u64 {
    30 * 60
}

fn default_request_secs() -> u64 {
    60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            session_secs: default_session_secs(),
            request_secs: default_request_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn session(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: ModelProvider,
    #[serde(default)]
    pub model: String,
    /// Overrides the provider's default endpoint, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_resources")]
    pub resources: bool,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_provider() -> ModelProvider {
    ModelProvider::Openai
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_resources() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            base_url: None,
            temperature: default_temperature(),
            max_messages: default_max_messages(),
            max_tokens: default_max_tokens(),
            resources: default_resources(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Config(format!(
                "Temperature must be between 0.0 and 1.0, got {}",
                self.temperature
            )));
        }
        if self.timeouts.request_secs == 0 || self.timeouts.session_secs == 0 {
            return Err(ConfigError::Config(
                "Timeouts must be greater than zero".to_string(),
            ));
        }
        if self.timeouts.request_secs > self.timeouts.session_secs {
            return Err(ConfigError::Config(format!(
                "Request timeout ({}s) exceeds session timeout ({}s)",
                self.timeouts.request_secs, self.timeouts.session_secs
            )));
        }
        self.provider
            .resolve_model(&self.model)
            .map_err(|e| ConfigError::Config(e.to_string()))?;
        Ok(())
    }
}

#[instrument(skip(config_path))]
pub fn create_or_get_config_file(
    config_path: Option<PathBuf>,
) -> Result<(bool, PathBuf), ConfigError> {
    let actual_path = config_path.unwrap_or_else(|| AppDir::Config.path().join("moki.yml"));

    let parent_dir = actual_path.parent().ok_or_else(|| {
        ConfigError::IO(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Config path has no parent directory",
        ))
    })?;

    if !parent_dir.exists() {
        fs::create_dir_all(parent_dir)?;
    }

    if actual_path.exists() {
        Ok((true, actual_path))
    } else {
        File::create(&actual_path)?.write_all(DEFAULT_CONFIG.as_bytes())?;
        Ok((false, actual_path))
    }
}

#[instrument(skip(config_path))]
pub fn get_config(config_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let (_, config_file) = create_or_get_config_file(config_path)?;
    let content = fs::read_to_string(&config_file)?;
    // An empty file is a valid config with every default.
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&content)?
    };
    config.validate()?;
    Ok(config)
}
