//! Raw failure values reported by collaborators.

use std::io;

use crate::policy::ErrorKind;

/// A failed attempt as reported by a collaborator, before classification.
///
/// Collaborators fill whatever they know: an HTTP-like status code, an OS
/// error code, an `io::ErrorKind`, or only a message. A collaborator that
/// already knows the taxonomy can pin the kind with [`Failure::with_kind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
    pub message: String,
    pub status: Option<u16>,
    pub os_code: Option<i32>,
    pub io_kind: Option<io::ErrorKind>,
    pub kind: Option<ErrorKind>
}

impl Failure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            os_code: None,
            io_kind: None,
            kind: None
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::message(message)
        }
    }

    pub fn io(err: &io::Error) -> Self {
        Self {
            os_code: err.raw_os_error(),
            io_kind: Some(err.kind()),
            ..Self::message(err.to_string())
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl From<io::Error> for Failure {
    fn from(err: io::Error) -> Self {
        Failure::io(&err)
    }
}
