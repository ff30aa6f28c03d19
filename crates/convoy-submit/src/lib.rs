//! Durable delivery of converted reports: the file-backed report queue, the queueing
//! submission API and the retry loop that drains it.
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

pub mod collector;
pub mod error;
pub mod queue;
pub mod retry;
pub mod submitter;

pub use collector::CollectorClient;
pub use error::{CollectorError, SubmitError, SubmitResult};
pub use queue::{
    ERROR_RETRY_AFTER, PASS_LIMIT, PendingCounts, PendingReportFile, ReportQueue,
    TRANSFER_TIMEOUT, TransferState,
};
pub use retry::{AttemptOutcome, DEFAULT_RETRY_INTERVAL, SubmissionRetryLoop};
pub use submitter::{PendingPass, ReportSubmitter};
