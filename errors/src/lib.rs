//! # Capture Pipeline Errors
//!
//! Cross-crate error definitions for the capture pipeline.
//!
//! Follows Microsoft Pragmatic Rust Guidelines:
//! - Uses `thiserror` for structured error definitions
//! - Named fields instead of positional ones
//! - Includes error context for debugging

use thiserror::Error;

/// Violations of the ledger's integrity rules. None of these auto-resolve.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Invalid status transition: {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Capture {capture_id} already bound to {existing}, refusing {proposed}")]
    IdentityMismatch {
        capture_id: String,
        existing: String,
        proposed: String
    },

    #[error("Capture not found: {capture_id}")]
    UnknownCapture { capture_id: String },

    #[error("Export target {path} for {capture_id} exists with different content")]
    ExportCollision { capture_id: String, path: String }
}

impl IntegrityError {
    /// Collisions of identity or export target; these are quarantine-worthy.
    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            IntegrityError::IdentityMismatch { .. } | IntegrityError::ExportCollision { .. }
        )
    }
}

/// Atomic export writer errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Export {operation} on {path} failed: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Capture {capture_id} is {status}, expected processed")]
    NotExportable { capture_id: String, status: String },

    #[error("Ledger update after export failed: {reason}")]
    Ledger { reason: String }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_error_display() {
        let errors = vec![
            (
                IntegrityError::InvalidTransition {
                    from: "staged".to_string(),
                    to: "exported".to_string()
                },
                "Invalid status transition: staged to exported"
            ),
            (
                IntegrityError::UnknownCapture {
                    capture_id: "c-9".to_string()
                },
                "Capture not found: c-9"
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_collision_detection() {
        assert!(
            IntegrityError::ExportCollision {
                capture_id: "c".to_string(),
                path: "/v/c.md".to_string()
            }
            .is_collision()
        );
        assert!(
            !IntegrityError::UnknownCapture {
                capture_id: "c".to_string()
            }
            .is_collision()
        );
    }

    #[test]
    fn test_export_io_error_keeps_source() {
        let err = ExportError::Io {
            operation: "rename",
            path: "/vault/a.md".to_string(),
            source: std::io::Error::from_raw_os_error(28)
        };
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().len() > 0);
        assert!(err.to_string().starts_with("Export rename on /vault/a.md failed"));
    }
}
