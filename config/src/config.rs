//! # Configuration Structures
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization, every field defaulted
//! - Use `validator` for input validation

use std::path::PathBuf;
use std::time::Duration;

use capture_core::PolicyTable;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Main configuration structure for the capture pipeline.
///
/// ## Usage
/// ```rust,no_run
/// use config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// println!("Ledger: {}", config.ledger.database_url);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct PipelineConfig {
    /// Staging ledger storage
    #[serde(default)]
    #[validate(nested)]
    pub ledger: LedgerConfig,

    /// Export destination
    #[serde(default)]
    #[validate(nested)]
    pub vault: VaultConfig,

    /// Per-kind retry policy overrides
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,

    #[serde(default)]
    #[validate(nested)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub identity: IdentityConfig,

    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig
}

/// Staging ledger configuration.
///
/// ## Fields
/// - `database_url`: sqlx SQLite URL (default: `sqlite://capture-ledger.db?mode=rwc`)
/// - `busy_timeout_seconds`: how long a statement waits on a locked file
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LedgerConfig {
    #[serde(default = "default_database_url")]
    #[validate(length(min = 1), custom(function = "validate_sqlite_url"))]
    pub database_url: String,

    #[serde(default = "default_busy_timeout_seconds")]
    #[validate(range(min = 1, max = 300))]
    pub busy_timeout_seconds: u64
}

fn default_database_url() -> String {
    "sqlite://capture-ledger.db?mode=rwc".to_string()
}

fn default_busy_timeout_seconds() -> u64 {
    5
}

fn validate_sqlite_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("sqlite:") {
        Ok(())
    } else {
        Err(ValidationError::new("database_url must be a sqlite: URL"))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            busy_timeout_seconds: default_busy_timeout_seconds()
        }
    }
}

/// Export destination configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct VaultConfig {
    /// Directory exported notes are written to
    #[serde(default = "default_vault_root")]
    pub root: PathBuf,

    /// Extension of exported files, without the dot
    #[serde(default = "default_file_extension")]
    #[validate(length(min = 1, max = 16), custom(function = "validate_file_extension"))]
    pub file_extension: String
}

fn default_vault_root() -> PathBuf {
    PathBuf::from("vault/inbox")
}

fn default_file_extension() -> String {
    "md".to_string()
}

fn validate_file_extension(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::new("file_extension must be alphanumeric"))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_vault_root(),
            file_extension: default_file_extension()
        }
    }
}

/// Retry policy overrides keyed by error kind.
///
/// ```toml
/// [retry.policies.RateLimited]
/// retriable = true
/// max_attempts = 4
/// base_delay_ms = 2000
/// max_delay_ms = 60000
/// multiplier = 2.0
/// jitter_fraction = 0.2
/// circuit_breaker_threshold = 3
/// escalation_action = "open_circuit"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    #[validate(custom(function = "validate_policies"))]
    pub policies: PolicyTable
}

fn validate_policies(table: &PolicyTable) -> Result<(), ValidationError> {
    for (kind, policy) in table.overrides() {
        if policy.validate().is_err() {
            let mut error = ValidationError::new("invalid_retry_policy");
            error.add_param("kind".into(), &kind.to_string());
            return Err(error);
        }
    }
    Ok(())
}

/// Circuit breaker configuration shared by every dependency.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct BreakerConfig {
    /// Time an open breaker waits before letting one probe through
    #[serde(default = "default_cooldown_seconds")]
    #[validate(range(min = 1, max = 86400))]
    pub cooldown_seconds: u64
}

fn default_cooldown_seconds() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds()
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

/// Content identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct IdentityConfig {
    /// Leading bytes of an audio payload mixed into its fingerprint
    #[serde(default = "default_fingerprint_bytes")]
    #[validate(range(min = 4096))]
    pub fingerprint_bytes: usize
}

fn default_fingerprint_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            fingerprint_bytes: default_fingerprint_bytes()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    /// Emit logs as JSON lines instead of the human format
    #[serde(default)]
    pub json_logs: bool
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn validate_logging_level(value: &str) -> Result<(), ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("Invalid logging level"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging_level: default_logging_level(),
            json_logs: false
        }
    }
}
