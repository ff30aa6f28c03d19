//! Errors surfaced by agent bootstrap, supervision, and the collector client.
//!
//! Messages are fixed strings; the failing step travels in `operation` and the cause in `source`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for agent operations.
pub type AppResult<T> = Result<T, AppError>;

/// Failure of an agent-level operation.
#[derive(Debug, Error)]
pub enum AppError {
    /// Loading or watching the agent configuration failed.
    #[error("agent configuration unavailable")]
    Config {
        /// Step that failed.
        operation: &'static str,
        /// Loader or validation failure.
        source: convoy_config::ConfigError,
    },
    /// Logging or metrics setup failed.
    #[error("telemetry setup failed")]
    Telemetry {
        /// Step that failed.
        operation: &'static str,
        /// Telemetry failure.
        source: convoy_telemetry::TelemetryError,
    },
    /// Conversion pipeline operations failed.
    #[error("conversion pipeline operation failed")]
    Pipeline {
        /// Step that failed.
        operation: &'static str,
        /// Pipeline failure.
        source: convoy_pipeline::PipelineError,
    },
    /// Report queue operations failed.
    #[error("report submission operation failed")]
    Submit {
        /// Step that failed.
        operation: &'static str,
        /// Queue or submitter failure.
        source: convoy_submit::SubmitError,
    },
    /// Talking to the collector over HTTP failed.
    #[error("collector request failed")]
    Http {
        /// Step that failed.
        operation: &'static str,
        /// Collector endpoint.
        url: String,
        /// Transport failure.
        source: reqwest::Error,
    },
    /// Reading or writing an agent file failed.
    #[error("agent file access failed")]
    Io {
        /// Step that failed.
        operation: &'static str,
        /// File involved, when known.
        path: Option<PathBuf>,
        /// Filesystem failure.
        source: io::Error,
    },
    /// Status snapshot could not be encoded.
    #[error("status serialization failed")]
    Serialization {
        /// Step that failed.
        operation: &'static str,
        /// Encoder failure.
        source: serde_json::Error,
    },
    /// A setting was present but unusable.
    #[error("unusable agent setting")]
    InvalidConfig {
        /// Setting name.
        field: &'static str,
        /// Short reason code such as `unsupported_scheme`.
        reason: &'static str,
        /// Offending value.
        value: Option<String>,
    },
    /// The service supervisor refused a lifecycle transition.
    #[error("invalid service state transition")]
    InvalidTransition {
        /// State the service was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: convoy_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: convoy_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn pipeline(
        operation: &'static str,
        source: convoy_pipeline::PipelineError,
    ) -> Self {
        Self::Pipeline { operation, source }
    }

    pub(crate) const fn submit(operation: &'static str, source: convoy_submit::SubmitError) -> Self {
        Self::Submit { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.into()),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            convoy_config::ConfigError::InvalidField {
                section: "agent".to_string(),
                field: "max_workers",
                value: Some("0".to_string()),
                reason: "out_of_range",
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert_eq!(config.to_string(), "agent configuration unavailable");
        assert!(config.source().is_some());

        let submit = AppError::submit(
            "queue.counts",
            convoy_submit::SubmitError::UnrecognisedFile {
                path: PathBuf::from("/reports/x"),
            },
        );
        assert!(matches!(submit, AppError::Submit { .. }));

        let io = AppError::io("status.write", "/var/convoy/status.json", io::Error::other("disk"));
        assert!(matches!(io, AppError::Io { path: Some(_), .. }));
    }

    #[test]
    fn transition_errors_carry_both_states() {
        let err = AppError::InvalidTransition {
            from: "stopped",
            to: "paused",
        };
        assert_eq!(err.to_string(), "invalid service state transition");
    }
}
