//! # Environment Variable Loader
//!
//! Applies `CAPTURE_*` environment variables on top of a configuration.
//!
//! ## Environment Variables
//! - `CAPTURE_DATABASE_URL`: ledger SQLite URL
//! - `CAPTURE_VAULT_DIR`: export destination directory
//! - `CAPTURE_BREAKER_COOLDOWN_SECS`: breaker cooldown in seconds
//! - `CAPTURE_FINGERPRINT_BYTES`: audio fingerprint prefix length
//! - `CAPTURE_LOG_LEVEL`: trace/debug/info/warn/error
//! - `CAPTURE_JSON_LOGS`: true/false

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::PipelineConfig;

#[derive(Debug, thiserror::Error)]
#[error("Invalid value {value:?} for {key}")]
pub struct EnvError {
    pub key: &'static str,
    pub value: String
}

/// Overrides fields of `config` from the environment. Unset variables leave
/// the field untouched; unparsable ones are an error.
pub fn apply_env_overrides(config: &mut PipelineConfig) -> Result<(), EnvError> {
    if let Some(url) = read_env("CAPTURE_DATABASE_URL") {
        config.ledger.database_url = url;
    }
    if let Some(dir) = read_env("CAPTURE_VAULT_DIR") {
        config.vault.root = PathBuf::from(dir);
    }
    if let Some(cooldown) = parse_env("CAPTURE_BREAKER_COOLDOWN_SECS")? {
        config.breaker.cooldown_seconds = cooldown;
    }
    if let Some(bytes) = parse_env("CAPTURE_FINGERPRINT_BYTES")? {
        config.identity.fingerprint_bytes = bytes;
    }
    if let Some(level) = read_env("CAPTURE_LOG_LEVEL") {
        config.observability.logging_level = level.to_lowercase();
    }
    if let Some(json) = parse_env::<bool>("CAPTURE_JSON_LOGS")? {
        config.observability.json_logs = json;
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, EnvError> {
    match read_env(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EnvError { key, value }),
        None => Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        for key in [
            "CAPTURE_DATABASE_URL",
            "CAPTURE_VAULT_DIR",
            "CAPTURE_BREAKER_COOLDOWN_SECS",
            "CAPTURE_FINGERPRINT_BYTES",
            "CAPTURE_LOG_LEVEL",
            "CAPTURE_JSON_LOGS"
        ] {
            // SAFETY: env-mutating tests are serialized with #[serial].
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_env_overrides_fields() {
        clear();
        unsafe {
            env::set_var("CAPTURE_DATABASE_URL", "sqlite://other.db");
            env::set_var("CAPTURE_BREAKER_COOLDOWN_SECS", "5");
            env::set_var("CAPTURE_LOG_LEVEL", "DEBUG");
        }

        let mut config = PipelineConfig::default();
        apply_env_overrides(&mut config).unwrap();
        clear();

        assert_eq!(config.ledger.database_url, "sqlite://other.db");
        assert_eq!(config.breaker.cooldown_seconds, 5);
        assert_eq!(config.observability.logging_level, "debug");
        assert_eq!(config.vault.file_extension, "md");
    }

    #[test]
    #[serial]
    fn test_unset_env_leaves_defaults() {
        clear();
        let mut config = PipelineConfig::default();
        apply_env_overrides(&mut config).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    #[serial]
    fn test_unparsable_env_is_an_error() {
        clear();
        unsafe { env::set_var("CAPTURE_FINGERPRINT_BYTES", "lots") };

        let mut config = PipelineConfig::default();
        let err = apply_env_overrides(&mut config).unwrap_err();
        clear();

        assert_eq!(err.key, "CAPTURE_FINGERPRINT_BYTES");
        assert_eq!(err.value, "lots");
    }
}
