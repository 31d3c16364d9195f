//! # medreason-core
//!
//! Shared foundation for the medreason workspace:
//!
//! - [`config`]: layered configuration (TOML files, `MEDREASON__*` environment)
//! - [`error`]: configuration and validation errors
//! - [`types`]: conversation and parsed-answer types passed between the
//!   generation service and the HTTP adapter

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, GenerationConfig, LoggingConfig, ModelConfig, Precision, ServerConfig};
pub use error::{CoreError, CoreResult};
pub use types::{ChatMessage, ConversationRequest, ParsedAnswer};
