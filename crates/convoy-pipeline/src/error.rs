//! # Design
//!
//! - Provide structured, constant-message errors for the conversion pipeline.
//! - Capture operation context (paths, states) so failures are reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::PathBuf;

use convoy_core::CoreError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors produced by the conversion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// IO failures while interacting with the filesystem.
    #[error("pipeline io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Zip archive failures.
    #[error("pipeline zip failure")]
    Zip {
        /// Operation that triggered the archive failure.
        operation: &'static str,
        /// Bundle involved in the archive failure.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// Shared contract failure (converter, submission, listener).
    #[error("pipeline contract failure")]
    Core {
        /// Underlying contract error.
        #[from]
        source: CoreError,
    },
    /// The file stayed locked for the whole retry budget.
    #[error("source file lock not acquired")]
    LockTimeout {
        /// Locked file.
        path: PathBuf,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// The owning watcher is shutting down.
    #[error("source watcher is disposing")]
    Disposing {
        /// Source name.
        source_name: String,
    },
    /// Operation is not allowed in the watcher's current state.
    #[error("operation not allowed in current watcher state")]
    InvalidState {
        /// Source name.
        source_name: String,
        /// Current run state.
        state: &'static str,
    },
    /// A background task failed to run to completion.
    #[error("pipeline background task failed")]
    Task {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying join failure.
        source: tokio::task::JoinError,
    },
    /// No Tokio runtime was available to host workers.
    #[error("pipeline requires an async runtime")]
    Runtime {
        /// Underlying runtime lookup failure.
        source: tokio::runtime::TryCurrentError,
    },
}

impl PipelineError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Zip {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is an access-denied IO error.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }

    /// Whether the failure means the file no longer exists.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn io_helper_classifies_kinds() {
        let denied = PipelineError::io(
            "delete",
            "/data/a.json",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(denied.is_permission_denied());
        assert!(!denied.is_not_found());
        assert!(denied.source().is_some());
        assert_eq!(denied.to_string(), "pipeline io failure");

        let missing = PipelineError::io("open", "/data/a.json", io::Error::from(io::ErrorKind::NotFound));
        assert!(missing.is_not_found());
    }

    #[test]
    fn core_errors_convert() {
        let err: PipelineError = CoreError::UnknownConverter { name: "csv".into() }.into();
        assert!(matches!(err, PipelineError::Core { .. }));
    }
}
