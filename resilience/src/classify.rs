//! Rule-based failure classification.
//!
//! Rules are tried in a fixed order: an explicit kind pinned by the
//! collaborator, then status codes, OS error codes, `io::ErrorKind`, and
//! finally lowercase message substrings. The first match wins.

use std::io;

use capture_core::{CaptureId, ErrorKind, Failure, Stage};
use tracing::warn;

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub capture_id: CaptureId,
    pub stage: Stage,
    /// Breaker key, e.g. `"mail_api"` or `"vault"`.
    pub dependency: String,
    pub metadata: serde_json::Value
}

impl ErrorContext {
    pub fn new(capture_id: CaptureId, stage: Stage, dependency: impl Into<String>) -> Self {
        Self {
            capture_id,
            stage,
            dependency: dependency.into(),
            metadata: serde_json::Value::Null
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retriable: bool
}

impl Classification {
    fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            retriable: kind.is_transient()
        }
    }
}

const MESSAGE_RULES: &[(&str, ErrorKind)] = &[
    ("rate limit", ErrorKind::RateLimited),
    ("too many requests", ErrorKind::RateLimited),
    ("quota exceeded", ErrorKind::RateLimited),
    ("token expired", ErrorKind::AuthExpired),
    ("invalid_grant", ErrorKind::AuthExpired),
    ("unauthorized", ErrorKind::AuthExpired),
    ("permission denied", ErrorKind::PermissionDenied),
    ("access denied", ErrorKind::PermissionDenied),
    ("no space left", ErrorKind::StorageFull),
    ("disk full", ErrorKind::StorageFull),
    ("out of memory", ErrorKind::OutOfMemoryOrCapacity),
    ("capacity", ErrorKind::OutOfMemoryOrCapacity),
    ("corrupt", ErrorKind::ResourceCorrupt),
    ("invalid audio", ErrorKind::ResourceCorrupt),
    ("unsupported format", ErrorKind::ResourceCorrupt),
    ("not yet downloaded", ErrorKind::ResourceTemporarilyUnavailable),
    ("not synced", ErrorKind::ResourceTemporarilyUnavailable),
    ("placeholder file", ErrorKind::ResourceTemporarilyUnavailable),
    ("identity collision", ErrorKind::IdentityCollision),
    ("timed out", ErrorKind::NetworkTransient),
    ("timeout", ErrorKind::NetworkTransient),
    ("connection reset", ErrorKind::NetworkTransient),
    ("connection refused", ErrorKind::NetworkTransient),
    ("temporarily unavailable", ErrorKind::NetworkTransient),
    ("dns", ErrorKind::NetworkTransient)
];

/// Stateless, deterministic classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, failure: &Failure, context: &ErrorContext) -> Classification {
        if let Some(kind) = failure.kind {
            return Classification::of(kind);
        }

        let matched = failure
            .status
            .and_then(kind_for_status)
            .or_else(|| failure.os_code.and_then(kind_for_os_code))
            .or_else(|| failure.io_kind.and_then(kind_for_io_kind))
            .or_else(|| kind_for_message(&failure.message));

        match matched {
            Some(kind) => Classification::of(kind),
            None => {
                warn!(
                    unclassified = true,
                    capture_id = %context.capture_id,
                    stage = %context.stage,
                    dependency = %context.dependency,
                    error = %failure.message,
                    "Unclassified failure, retrying conservatively"
                );
                Classification::of(ErrorKind::Unknown)
            }
        }
    }
}

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimited),
        401 => Some(ErrorKind::AuthExpired),
        403 => Some(ErrorKind::PermissionDenied),
        404 => Some(ErrorKind::ResourceTemporarilyUnavailable),
        413 => Some(ErrorKind::OutOfMemoryOrCapacity),
        400 | 422 => Some(ErrorKind::ResourceCorrupt),
        507 => Some(ErrorKind::StorageFull),
        408 | 500..=599 => Some(ErrorKind::NetworkTransient),
        _ => None
    }
}

/// POSIX errno values as reported by Linux and macOS.
fn kind_for_os_code(code: i32) -> Option<ErrorKind> {
    match code {
        28 | 122 => Some(ErrorKind::StorageFull),
        1 | 13 => Some(ErrorKind::PermissionDenied),
        12 => Some(ErrorKind::OutOfMemoryOrCapacity),
        2 => Some(ErrorKind::ResourceTemporarilyUnavailable),
        17 => Some(ErrorKind::IdentityCollision),
        11 | 16 | 101 | 104 | 110 | 111 => Some(ErrorKind::NetworkTransient),
        _ => None
    }
}

fn kind_for_io_kind(kind: io::ErrorKind) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => Some(ErrorKind::StorageFull),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            Some(ErrorKind::PermissionDenied)
        }
        io::ErrorKind::OutOfMemory => Some(ErrorKind::OutOfMemoryOrCapacity),
        io::ErrorKind::NotFound => Some(ErrorKind::ResourceTemporarilyUnavailable),
        io::ErrorKind::AlreadyExists => Some(ErrorKind::IdentityCollision),
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            Some(ErrorKind::ResourceCorrupt)
        }
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Some(ErrorKind::NetworkTransient),
        _ => None
    }
}

fn kind_for_message(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_lowercase();
    MESSAGE_RULES
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ErrorContext {
        ErrorContext::new(CaptureId::new("c-1"), Stage::Fetch, "cloud_files")
    }

    fn classify(failure: &Failure) -> Classification {
        ErrorClassifier::new().classify(failure, &context())
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (429, ErrorKind::RateLimited, true),
            (401, ErrorKind::AuthExpired, false),
            (403, ErrorKind::PermissionDenied, false),
            (503, ErrorKind::NetworkTransient, true),
            (507, ErrorKind::StorageFull, false),
            (422, ErrorKind::ResourceCorrupt, false)
        ];
        for (status, kind, retriable) in cases {
            let result = classify(&Failure::status(status, "boom"));
            assert_eq!(result.kind, kind, "status {status}");
            assert_eq!(result.retriable, retriable, "status {status}");
        }
    }

    #[test]
    fn test_os_errors() {
        let full = classify(&Failure::from(io::Error::from_raw_os_error(28)));
        assert_eq!(full.kind, ErrorKind::StorageFull);
        assert!(!full.retriable);

        let denied = classify(&Failure::from(io::Error::from_raw_os_error(13)));
        assert_eq!(denied.kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_io_kind_without_os_code() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify(&Failure::from(err)).kind, ErrorKind::NetworkTransient);
    }

    #[test]
    fn test_message_substrings() {
        let result = classify(&Failure::message("Mail API: Rate Limit exceeded"));
        assert_eq!(result.kind, ErrorKind::RateLimited);

        let result = classify(&Failure::message("file is corrupt"));
        assert_eq!(result.kind, ErrorKind::ResourceCorrupt);
        assert!(!result.retriable);
    }

    #[test]
    fn test_explicit_kind_wins_over_status() {
        let failure = Failure::status(503, "busy").with_kind(ErrorKind::ResourceCorrupt);
        assert_eq!(classify(&failure).kind, ErrorKind::ResourceCorrupt);
    }

    #[test]
    fn test_status_wins_over_message() {
        let failure = Failure::status(429, "permission denied");
        assert_eq!(classify(&failure).kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_unmatched_is_unknown_and_retriable() {
        let result = classify(&Failure::message("the gremlins did it"));
        assert_eq!(result.kind, ErrorKind::Unknown);
        assert!(result.retriable);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let failure = Failure::status(418, "teapot");
        assert_eq!(classify(&failure), classify(&failure));
    }
}
