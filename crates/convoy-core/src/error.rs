//! # Design
//!
//! - Constant error messages; context lives in structured fields.
//! - Plugin and collector failures are boxed so adapters can surface their own error types.

use std::error::Error;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for core contract operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the shared contracts.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A conversion plugin failed while importing a source file.
    #[error("report conversion failed")]
    Conversion {
        /// Converter identifier.
        converter: String,
        /// Underlying plugin failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// No converter is registered under the requested name.
    #[error("unknown converter")]
    UnknownConverter {
        /// Name requested by configuration.
        name: String,
    },
    /// A converter with the same name is already registered.
    #[error("duplicate converter registration")]
    DuplicateConverter {
        /// Name that was registered twice.
        name: String,
    },
    /// The post-process action text could not be parsed.
    #[error("invalid post-process action")]
    InvalidPostProcessAction {
        /// Offending value.
        value: String,
    },
    /// Report payload failed local validation.
    #[error("invalid report")]
    InvalidReport {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Report (de)serialisation failed.
    #[error("report serialization failed")]
    Serialization {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying serde failure.
        source: serde_json::Error,
    },
    /// Submission was refused or failed.
    #[error("report submission failed")]
    Submission {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Submission is not allowed in the current API status.
    #[error("submission not allowed in current api status")]
    SubmissionNotAllowed {
        /// Status at the time of the call.
        status: &'static str,
    },
    /// IO failures while interacting with the filesystem.
    #[error("core io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory change listener could not be attached.
    #[error("directory watch failed")]
    Watch {
        /// Directory being watched.
        path: PathBuf,
        /// Underlying notify error.
        source: notify::Error,
    },
    /// A background listener was requested outside a Tokio runtime.
    #[error("no async runtime available")]
    Runtime {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying runtime lookup failure.
        source: tokio::runtime::TryCurrentError,
    },
}

impl CoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Wrap a plugin failure for the named converter.
    pub fn conversion(
        converter: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Conversion {
            converter: converter.into(),
            source: source.into(),
        }
    }

    /// Wrap a submission failure raised by a transport.
    pub fn submission(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Submission {
            operation,
            source: source.into(),
        }
    }
}
