//! Configuration management for medreason.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub mod constants;
mod sub_configs;

pub use sub_configs::{GenerationConfig, LoggingConfig, ModelConfig, Precision, ServerConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order:
    /// 1. config/default.toml (base settings)
    /// 2. config/{MEDREASON_ENV}.toml (environment-specific)
    /// 3. Environment variables with MEDREASON__ prefix (`MEDREASON__MODEL__CACHE_ROOT`)
    pub fn load() -> CoreResult<Self> {
        let env = std::env::var("MEDREASON_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = ::config::Config::builder()
            .add_source(::config::File::with_name("config/default").required(false))
            .add_source(::config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                ::config::Environment::with_prefix("MEDREASON")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file, then apply `MEDREASON__` environment
    /// overrides on top.
    pub fn load_from(path: &Path) -> CoreResult<Self> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::from(path).required(true))
            .add_source(
                ::config::Environment::with_prefix("MEDREASON")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> CoreResult<()> {
        if self.server.port == 0 {
            return Err(CoreError::validation("server.port", "must be greater than 0"));
        }
        if self.server.max_payload_size == 0 {
            return Err(CoreError::validation(
                "server.max_payload_size",
                "must be greater than 0",
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(CoreError::validation(
                "server.request_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.model.base_model_id.trim().is_empty() {
            return Err(CoreError::validation("model.base_model_id", "must not be empty"));
        }
        if self.model.adapter_id.trim().is_empty() {
            return Err(CoreError::validation("model.adapter_id", "must not be empty"));
        }
        if self.generation.max_new_tokens == 0 {
            return Err(CoreError::validation(
                "generation.max_new_tokens",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
