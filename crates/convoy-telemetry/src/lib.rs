//! Telemetry primitives shared across the convoy agent.
//!
//! # Design
//! - Logging: one entry point installing a JSON or pretty `tracing-subscriber` stack.
//! - Context: a process-wide `agent` span carrying service state and build identifier.
//! - Metrics: a Prometheus registry with a serialisable snapshot for status files.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::{GlobalContextGuard, record_service_state};
pub use error::{MetricStage, Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LOG_ENV_VAR, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
