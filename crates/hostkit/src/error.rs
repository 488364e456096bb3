//! Error taxonomy shared by the validator, the dispatcher and the backends.
//!
//! Every failure that reaches a caller carries an [`ErrorKind`]. Kinds fall
//! into two classes: validation errors are produced before any backend is
//! touched, execution errors are produced while (or after) a backend runs.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which stage produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Execution,
}

/// Flat list of every error kind a tool call can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownTool,
    TypeMismatch,
    MissingRequired,
    PathEscape,
    OutOfRange,
    DangerousOperation,
    Timeout,
    ConnectionError,
    PermissionError,
    NotFound,
    BackendError,
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::UnknownTool
            | Self::TypeMismatch
            | Self::MissingRequired
            | Self::PathEscape
            | Self::OutOfRange
            | Self::DangerousOperation => ErrorClass::Validation,
            Self::Timeout
            | Self::ConnectionError
            | Self::PermissionError
            | Self::NotFound
            | Self::BackendError => ErrorClass::Execution,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Why the validator refused a request. Never reaches a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("parameter '{param}': {detail}")]
    TypeMismatch { param: String, detail: String },
    #[error("missing required parameter '{0}'")]
    MissingRequired(String),
    #[error("parameter '{param}': path '{}' is outside the sandbox roots", .path.display())]
    PathEscape { param: String, path: PathBuf },
    #[error("parameter '{param}': {detail}")]
    OutOfRange { param: String, detail: String },
    #[error("parameter '{param}': {detail}")]
    DangerousOperation { param: String, detail: String },
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::MissingRequired(_) => ErrorKind::MissingRequired,
            Self::PathEscape { .. } => ErrorKind::PathEscape,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::DangerousOperation { .. } => ErrorKind::DangerousOperation,
        }
    }

    pub(crate) fn type_mismatch(param: &str, detail: impl Into<String>) -> Self {
        Self::TypeMismatch {
            param: param.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn out_of_range(param: &str, detail: impl Into<String>) -> Self {
        Self::OutOfRange {
            param: param.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn dangerous(param: &str, detail: impl Into<String>) -> Self {
        Self::DangerousOperation {
            param: param.to_string(),
            detail: detail.into(),
        }
    }
}

// ── Execution ──────────────────────────────────────────────────────

/// A backend failure. Spawned processes and sockets are already released
/// by the time one of these is returned.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("operation exceeded {secs}s")]
    Timeout { secs: u64 },
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Permission(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Backend(String),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::ConnectionError,
            Self::Permission(_) => ErrorKind::PermissionError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Backend(_) => ErrorKind::BackendError,
        }
    }

    /// A required external program is missing from `PATH`.
    pub fn unavailable(program: &str) -> Self {
        Self::Backend(format!("backend unavailable: `{program}` not found"))
    }

    /// Wrap an I/O error with the operation that produced it, keeping the
    /// classification of [`From<io::Error>`].
    pub fn io(context: impl std::fmt::Display, err: io::Error) -> Self {
        let message = format!("{context}: {err}");
        match Self::from(err) {
            Self::Connection(_) => Self::Connection(message),
            Self::Permission(_) => Self::Permission(message),
            Self::NotFound(_) => Self::NotFound(message),
            Self::Timeout { secs } => Self::Timeout { secs },
            Self::Backend(_) => Self::Backend(message),
        }
    }
}

impl From<io::Error> for ExecError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind as K;
        let message = err.to_string();
        match err.kind() {
            K::NotFound => Self::NotFound(message),
            K::PermissionDenied => Self::Permission(message),
            K::ConnectionRefused
            | K::ConnectionReset
            | K::ConnectionAborted
            | K::NotConnected
            | K::AddrNotAvailable
            | K::HostUnreachable
            | K::NetworkUnreachable
            | K::BrokenPipe
            | K::TimedOut => Self::Connection(message),
            _ => Self::Backend(message),
        }
    }
}

// ── Configuration ──────────────────────────────────────────────────

/// Startup failure while loading or checking the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("sandbox root {} is unusable: {source}", .path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sandbox root {} is not a directory", .0.display())]
    RootNotDirectory(PathBuf),
    #[error("at least one sandbox root must be configured")]
    NoRoots,
    #[error("[{0}] timeout_secs must be at least 1")]
    ZeroTimeout(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_split_into_two_classes() {
        assert_eq!(ErrorKind::PathEscape.class(), ErrorClass::Validation);
        assert_eq!(ErrorKind::DangerousOperation.class(), ErrorClass::Validation);
        assert_eq!(ErrorKind::Timeout.class(), ErrorClass::Execution);
        assert_eq!(ErrorKind::BackendError.class(), ErrorClass::Execution);
    }

    #[test]
    fn io_errors_are_classified() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ExecError::from(refused).kind(), ErrorKind::ConnectionError);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(ExecError::from(denied).kind(), ErrorKind::PermissionError);

        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = ExecError::io("reading /x", missing);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("reading /x"));
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let err = ExecError::Timeout { secs: 7 };
        assert_eq!(err.to_string(), "operation exceeded 7s");
    }

    #[test]
    fn error_kind_serializes_by_name() {
        let json = serde_json::to_string(&ErrorKind::OutOfRange).unwrap();
        assert_eq!(json, "\"OutOfRange\"");
    }
}
