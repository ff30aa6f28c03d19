//! Transport contract for the remote report collector.

use async_trait::async_trait;
use convoy_core::Report;

use crate::error::CollectorError;

/// Client for the remote collector. Authentication and wire format live behind this trait.
#[async_trait]
pub trait CollectorClient: Send + Sync {
    /// Deliver one report.
    ///
    /// # Errors
    ///
    /// Returns a classified [`CollectorError`] when the report was not accepted.
    async fn upload(&self, report: &Report) -> Result<(), CollectorError>;

    /// Check the collector is reachable and accepts this client.
    ///
    /// # Errors
    ///
    /// Returns a classified [`CollectorError`] when it is not.
    async fn ping(&self) -> Result<(), CollectorError>;
}
