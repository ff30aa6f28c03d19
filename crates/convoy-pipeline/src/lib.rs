//! Durable conversion pipeline: discovered files flow from source watchers through the global
//! dispatcher to an elastic worker pool, then to their post-process disposition.
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

pub mod archive;
pub mod dispatcher;
pub mod disposition;
pub mod error;
pub mod lock;
pub mod retry;
pub mod signals;
pub mod watcher;
pub mod worker;

pub use archive::{AUTO_FLUSH_THRESHOLD, ArchiveBatcher, ArchiveGate, BATCH_SIZE, FlushOutcome};
pub use dispatcher::{
    ConversionDispatcher, ConversionItem, ConversionTarget, DispatcherSettings, ITEMS_PER_WORKER,
    ItemState, WORKER_CEILING, desired_workers,
};
pub use disposition::{DONE_DIR, ERROR_DIR};
pub use error::{PipelineError, PipelineResult};
pub use retry::RetryPolicy;
pub use signals::Signals;
pub use watcher::{RunState, SourceSettings, SourceStatistics, SourceWatcher, WatcherDeps};
pub use worker::WorkerTuning;
