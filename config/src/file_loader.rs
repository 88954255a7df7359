//! # Configuration File
//!
//! Reads the pipeline's settings file. The extension picks the format
//! (`.toml`, `.yaml` or `.yml`, any case); keys the file leaves out keep
//! their defaults.

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::config::PipelineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error
    },

    #[error("Invalid {format} in config file {path}: {message}")]
    Parse {
        path: String,
        format: ConfigFormat,
        message: String
    },

    #[error("Config file {path} must end in .toml, .yaml or .yml")]
    UnsupportedFormat { path: String }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None
        }
    }

    fn parse(self, contents: &str) -> Result<PipelineConfig, String> {
        match self {
            Self::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string())
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toml => f.write_str("TOML"),
            Self::Yaml => f.write_str("YAML")
        }
    }
}

/// Reads and parses a settings file. Environment overrides and validation
/// happen later, in [`crate::load`].
///
/// ## Usage
/// ```rust,no_run
/// use std::path::Path;
///
/// let config = config::load_from_file(Path::new("capture.toml")).unwrap();
/// println!("Ledger: {}", config.ledger.database_url);
/// ```
pub fn load_from_file(path: &Path) -> Result<PipelineConfig, ConfigFileError> {
    let shown = path.display().to_string();
    let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigFileError::UnsupportedFormat {
        path: shown.clone()
    })?;
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: shown.clone(),
        source
    })?;

    let config = format
        .parse(&contents)
        .map_err(|message| ConfigFileError::Parse {
            path: shown.clone(),
            format,
            message
        })?;
    debug!(path = %shown, format = %format, "Configuration file parsed");
    Ok(config)
}
