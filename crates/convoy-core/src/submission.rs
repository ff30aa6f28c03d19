//! Contract between the conversion pipeline and whatever delivers reports.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{ApiStatus, Report, SubmitMethod};

/// Report delivery API consumed by source watchers and the retry loop.
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    /// Deliver or queue a report according to `method`.
    ///
    /// Returns `true` when the report was delivered or durably queued.
    ///
    /// # Errors
    ///
    /// Returns an error when the report cannot be accepted in the current API status or an
    /// online delivery fails.
    async fn submit(&self, method: SubmitMethod, report: &Report) -> CoreResult<bool>;

    /// Load a serialised report from disk and submit it.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or when submission fails.
    async fn submit_from_file(&self, method: SubmitMethod, path: &Path) -> CoreResult<bool>;

    /// Probe collector connectivity, updating the cached status.
    async fn ping(&self) -> bool;

    /// Last known connectivity status.
    fn status(&self) -> ApiStatus;
}
