//! # Design
//!
//! - Queue failures carry the operation and the file involved; messages stay constant.
//! - Collector failures are classified by the response, since each class drives a different
//!   queue transition and API status.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use convoy_core::CoreError;
use thiserror::Error;

/// Result type for queue and submission operations.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Errors produced by the durable report queue and the submitter.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// IO failures while interacting with the reports directory.
    #[error("report queue io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A queue file could not be encoded or decoded.
    #[error("report queue serialization failure")]
    Serialization {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Queue file involved.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// A queue file name does not follow `<id>.<State>`.
    #[error("report queue file name not recognised")]
    UnrecognisedFile {
        /// Offending path.
        path: PathBuf,
    },
    /// The collector refused or failed the request.
    #[error("collector request failed")]
    Collector {
        /// Underlying classified failure.
        #[from]
        source: CollectorError,
    },
    /// Shared contract failure.
    #[error("submission contract failure")]
    Core {
        /// Underlying contract error.
        #[from]
        source: CoreError,
    },
}

impl SubmitError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Serialization {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Classified collector failure.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The collector refused the report content (HTTP 400).
    #[error("collector rejected the report")]
    Rejected {
        /// HTTP status returned.
        status: u16,
        /// Response body, when one was returned.
        detail: Option<String>,
    },
    /// The collector asked the client to back off (HTTP 429).
    #[error("collector throttled the request")]
    Throttled,
    /// The collector answered with an unexpected status.
    #[error("collector returned an unexpected status")]
    Status {
        /// HTTP status returned.
        status: u16,
    },
    /// The collector could not be reached.
    #[error("collector unreachable")]
    Unreachable {
        /// Underlying transport failure.
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl CollectorError {
    /// Wrap a transport failure.
    pub fn unreachable(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Unreachable {
            source: source.into(),
        }
    }
}

impl From<SubmitError> for CoreError {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::Core { source } => source,
            other => Self::submission("report_queue", other),
        }
    }
}
