//! Tracing subscriber installation for the agent process.
//!
//! Filter directives are taken from `CONVOY_LOG`, then `RUST_LOG`, then the configured level.
//! A configured level that does not parse falls back to [`DEFAULT_LOG_LEVEL`] and is reported
//! once the subscriber is live.

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::error::{Result, TelemetryError};

/// Level used when neither the environment nor the configuration supplies a usable filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "CONVOY_LOG";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Install the process-wide subscriber described by `config`.
///
/// The build identifier is recorded on the first call only.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] when a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    let _ = BUILD_SHA.set(config.build_sha.to_owned());

    let (filter, rejected_level) = resolve_filter(config.level);
    tracing_subscriber::registry()
        .with(output_layer(config.format, filter))
        .try_init()
        .map_err(|source| TelemetryError::SubscriberInstall { source })?;

    if let Some(level) = rejected_level {
        tracing::warn!(
            level = %level,
            fallback = DEFAULT_LOG_LEVEL,
            "configured log level is not a valid filter"
        );
    }
    tracing::debug!(format = config.format.as_str(), build_sha = build_sha(), "logging ready");
    Ok(())
}

/// Build identifier recorded by [`init_logging`], or `dev` before it ran.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Subscriber settings taken from the agent configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Filter directive such as `info` or `convoy_pipeline=debug,info`.
    pub level: &'a str,
    /// Line format.
    pub format: LogFormat,
    /// Build identifier attached to the agent span.
    pub build_sha: &'a str,
}

/// Line format written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened to the top level.
    Json,
    /// Compact human-readable lines.
    Pretty,
}

impl LogFormat {
    /// JSON for release builds, pretty lines for debug builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Map a configured format name; unknown or missing names fall back to [`Self::infer`].
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            Some(value) if value.eq_ignore_ascii_case("pretty") => Self::Pretty,
            _ => Self::infer(),
        }
    }

    /// Configuration name of the format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

fn output_layer(format: LogFormat, filter: EnvFilter) -> OutputLayer {
    let base = fmt::layer().with_target(false);
    match format {
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => base.compact().with_filter(filter).boxed(),
    }
}

/// Returns the filter to install and, when the configured level was unusable, that level.
fn resolve_filter(level: &str) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return (filter, None);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(DEFAULT_LOG_LEVEL), Some(level.to_owned())),
    }
}
