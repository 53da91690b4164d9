//! Configuration management for the HAPI prediction core

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ModelId;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing model artifacts
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    /// Models the registry manages, in registry order
    #[serde(default = "default_enabled")]
    pub enabled: Vec<ModelId>,
    /// Fit a synthetic stand-in when no artifact loads
    #[serde(default = "default_true")]
    pub synthetic_fallback: bool,
    /// Seed for synthetic stand-ins
    #[serde(default = "default_synthetic_seed")]
    pub synthetic_seed: u64,
    /// Intra-op threads per ONNX session
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_enabled() -> Vec<ModelId> {
    ModelId::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_synthetic_seed() -> u64 {
    42
}

fn default_onnx_threads() -> usize {
    1
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            enabled: default_enabled(),
            synthetic_fallback: true,
            synthetic_seed: default_synthetic_seed(),
            onnx_threads: default_onnx_threads(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl AppConfig {
    /// Load `config/config.toml` if present, then `HAPI__*` overrides.
    pub fn load() -> Result<Self> {
        Self::build(File::with_name("config/config").required(false))
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("HAPI")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("models.enabled")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
