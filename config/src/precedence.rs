//! # Configuration Precedence
//!
//! Layers configuration as env > file > defaults, then validates the result.

use std::path::Path;

use tracing::debug;
use validator::Validate;

use crate::config::PipelineConfig;
use crate::file_loader::{ConfigFileError, load_from_file};
use crate::loader::{EnvError, apply_env_overrides};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors)
}

/// Loads the effective configuration.
///
/// ## Usage
/// ```rust,no_run
/// use std::path::Path;
///
/// let config = config::load(Some(Path::new("capture.toml"))).unwrap();
/// println!("Vault: {}", config.vault.root.display());
/// ```
pub fn load(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration file");
            load_from_file(path)?
        }
        None => PipelineConfig::default()
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}
