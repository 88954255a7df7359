//! # Configuration System
//!
//! Centralized configuration management for the capture pipeline.
//!
//! This crate provides:
//! - Configuration structures for the ledger, vault, retry policies, circuit
//!   breakers, content identity and observability
//! - Configuration file loading (TOML/YAML)
//! - Environment variable overrides (12-factor app principles)
//! - Configuration precedence (env > file > defaults)
//! - Configuration validation
//!
//! # Best Practices
//!
//! - Uses `validator` crate for input validation
//! - Provides clear error messages for invalid configuration

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod precedence;

pub use config::{
    BreakerConfig, IdentityConfig, LedgerConfig, ObservabilityConfig, PipelineConfig, RetryConfig,
    VaultConfig
};
pub use file_loader::{ConfigFileError, ConfigFormat, load_from_file};
pub use loader::{EnvError, apply_env_overrides};
pub use precedence::{ConfigError, load};
pub use validator::Validate;
