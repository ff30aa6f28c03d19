//! Event payload types carried across the agent.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the agent.
pub type EventId = u64;

/// Envelopes retained for replay unless a capacity is given.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Everything the agent announces on its event bus.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A source watcher changed run state.
    SourceStateChanged {
        /// Configured source name.
        source: String,
        /// New run state.
        state: String,
    },
    /// A file was registered with the dispatcher for the first time.
    FileRegistered {
        /// Source that discovered the file.
        source: String,
        /// Absolute file path.
        path: String,
    },
    /// A worker started converting a file.
    ConversionStarted {
        /// Owning source.
        source: String,
        /// Absolute file path.
        path: String,
    },
    /// A file reached its final disposition.
    ConversionCompleted {
        /// Owning source.
        source: String,
        /// Absolute file path before post-processing.
        path: String,
        /// Post-process action applied.
        disposition: String,
    },
    /// Conversion of a file raised an error; the file is routed to `Error/`.
    ConversionFailed {
        /// Owning source.
        source: String,
        /// Absolute file path.
        path: String,
        /// Human-readable failure summary.
        message: String,
    },
    /// The worker pool size changed.
    WorkersResized {
        /// Workers running after the resize.
        active: usize,
        /// Target derived from the pending count.
        desired: usize,
    },
    /// Archive batch committed to a monthly bundle.
    ArchiveFlushed {
        /// Owning source.
        source: String,
        /// Bundle path.
        bundle: String,
        /// Files added by this flush.
        files: usize,
    },
    /// A report was persisted to the durable queue.
    ReportQueued {
        /// Report identifier.
        report_id: Uuid,
    },
    /// A report was accepted by the collector.
    ReportSubmitted {
        /// Report identifier.
        report_id: Uuid,
    },
    /// A report could not be delivered and was parked.
    ReportRejected {
        /// Report identifier.
        report_id: Uuid,
        /// Queue state the report was moved to.
        reason: String,
    },
    /// Collector connectivity status changed.
    ConnectivityChanged {
        /// New API status.
        status: String,
    },
    /// Service supervisor changed state.
    ServiceStateChanged {
        /// New service state.
        state: String,
    },
    /// Configuration was reloaded.
    SettingsChanged {
        /// Summary of the change.
        description: String,
    },
    /// The set of degraded components changed.
    HealthChanged {
        /// Names of degraded components; empty once all recovered.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for log and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SourceStateChanged { .. } => "source_state_changed",
            Self::FileRegistered { .. } => "file_registered",
            Self::ConversionStarted { .. } => "conversion_started",
            Self::ConversionCompleted { .. } => "conversion_completed",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::WorkersResized { .. } => "workers_resized",
            Self::ArchiveFlushed { .. } => "archive_flushed",
            Self::ReportQueued { .. } => "report_queued",
            Self::ReportSubmitted { .. } => "report_submitted",
            Self::ReportRejected { .. } => "report_rejected",
            Self::ConnectivityChanged { .. } => "connectivity_changed",
            Self::ServiceStateChanged { .. } => "service_state_changed",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Event stamped with its bus sequence number and publication time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequence number, starting at 1.
    pub id: EventId,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: Event,
}
