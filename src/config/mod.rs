//! Layered configuration for the image pipeline (spec §6.4).
//!
//! Settings load from, in increasing priority:
//! 1. Defaults embedded in each struct's `Default` impl
//! 2. A TOML file (`IMAGEPIPE_CONFIG`, default `config/imagepipe.toml`)
//! 3. `.env` (via `dotenvy`) and `IMAGEPIPE__SECTION__KEY` environment
//!    variables
//!
//! Secrets (`webhook_secret`, object-store credentials) are read only from
//! the process environment, never from the TOML file — see
//! `sources::load_secrets`.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    AdmissionConfig, Config, Environment, ProcessorConfig, ProviderKind, ProvidersConfig,
    RetentionConfig, ServerConfig, StorageConfig, StorageProvider, TelemetryConfig, WebhookConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment) and
    /// validate cross-field invariants (§6.4).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load from a specific TOML path, bypassing the secrets carve-out.
    /// Useful for tests.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
