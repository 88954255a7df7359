use errors::{ExportError, IntegrityError};
use storage::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Attempt journal failed: {reason}")]
    Journal { reason: String },

    #[error("Vault error: {0}")]
    Vault(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError)
}

pub type Result<T> = std::result::Result<T, PipelineError>;
