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

//! Convoy agent wiring.
//!
//! Layout: `bootstrap.rs` (environment and service wiring), `supervisor.rs` (host lifecycle and
//! scheduled tasks), `runtime.rs` (dispatcher and watchers per configuration revision),
//! `status.rs` (status snapshot), `collector.rs` (HTTP collector client).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// HTTP collector transport.
pub mod collector;
/// Application error type.
pub mod error;
/// Conversion runtime assembled from configuration.
pub mod runtime;
/// Status snapshot persistence.
pub mod status;
/// Service lifecycle state machine.
pub mod supervisor;

pub use bootstrap::{BootstrapDependencies, run_app, serve};
pub use collector::HttpCollectorClient;
pub use error::{AppError, AppResult};
pub use runtime::{ConversionRuntime, RuntimeDeps};
pub use status::{ClientStatus, SourceStatus, StatusSnapshot, write_snapshot};
pub use supervisor::{ServiceState, Supervisor, SupervisorSettings};
