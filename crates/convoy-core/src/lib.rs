//! Domain contracts shared by the convoy agent crates.
//!
//! Holds the report model, the conversion plugin contract with its registry, the submission API
//! contract and the directory change abstraction. Nothing here knows about the dispatcher or
//! the durable queue.
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

pub mod converter;
pub mod error;
pub mod model;
pub mod submission;
pub mod watch;

pub use converter::{ConversionContext, ConverterFactory, ConverterRegistry, ReportConverter};
pub use error::{CoreError, CoreResult};
pub use model::{ApiStatus, Parameters, PostProcessAction, Report, SubmitMethod};
pub use submission::SubmissionApi;
pub use watch::{ChangeEvent, ChangeSource, ChangeSubscription, NotifyChangeSource, PollChangeSource};
