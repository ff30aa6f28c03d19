//! Configuration for the convoy agent.
//!
//! The agent reads a single YAML document describing the worker pool, the durable report
//! queue, the collector endpoint and every watched source. Documents are validated as a whole
//! before use; [`ConfigWatcher`] delivers new revisions when the file changes.
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

pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    CONFIG_PATH_ENV, ConfigWatcher, DEFAULT_CONFIG_PATH, config_path_from_env, load, parse,
};
pub use model::{
    AgentConfig, CollectorConfig, ConfigSnapshot, LoggingSettings, MAX_WORKER_CEILING,
    SourceConfig,
};
pub use validate::validate;
