//! Failures raised while installing logging or maintaining the metrics registry.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::string::FromUtf8Error;

use prometheus::Error as PrometheusError;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Step of metric setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricStage {
    /// Constructing the collector from its options.
    Build,
    /// Adding the collector to the registry.
    Register,
}

impl MetricStage {
    const fn message(self) -> &'static str {
        match self {
            Self::Build => "metric definition rejected",
            Self::Register => "metric registration rejected",
        }
    }
}

/// Errors raised by telemetry helpers.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    SubscriberInstall {
        /// Error reported by `tracing-subscriber`.
        source: TryInitError,
    },
    /// A metric could not be defined or registered.
    Metric {
        /// Metric name.
        name: &'static str,
        /// Failing step.
        stage: MetricStage,
        /// Error reported by Prometheus.
        source: PrometheusError,
    },
    /// The text exposition could not be produced.
    Render {
        /// Error reported by the Prometheus encoder.
        source: PrometheusError,
    },
    /// The encoder produced bytes that are not UTF-8.
    RenderEncoding {
        /// Conversion error.
        source: FromUtf8Error,
    },
}

impl TelemetryError {
    /// Name of the metric involved, if any.
    #[must_use]
    pub const fn metric_name(&self) -> Option<&'static str> {
        match self {
            Self::Metric { name, .. } => Some(*name),
            _ => None,
        }
    }
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::SubscriberInstall { .. } => "tracing subscriber already installed",
            Self::Metric { stage, .. } => stage.message(),
            Self::Render { .. } => "metrics exposition failed",
            Self::RenderEncoding { .. } => "metrics exposition is not utf-8",
        };
        formatter.write_str(message)
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SubscriberInstall { source } => Some(source),
            Self::Metric { source, .. } | Self::Render { source } => Some(source),
            Self::RenderEncoding { source } => Some(source),
        }
    }
}
