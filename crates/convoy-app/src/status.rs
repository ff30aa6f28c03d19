//! Status snapshot persisted for operators and local tooling.
//!
//! # Design
//! - The snapshot is rewritten whole on every housekeeping or ping tick and on lifecycle
//!   changes; readers never observe a partial file (temp file + rename).
//! - Client status folds the service state and the API status into the single label shown to
//!   operators.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use convoy_core::ApiStatus;
use convoy_pipeline::SourceStatistics;
use convoy_submit::PendingCounts;
use convoy_telemetry::MetricsSnapshot;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::supervisor::ServiceState;

/// Label summarising connectivity for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientStatus {
    /// Service running and the collector reachable.
    Online,
    /// Service running without collector connectivity.
    Offline,
    /// No collector configured.
    #[serde(rename = "Not Registered")]
    NotRegistered,
    /// Service not running.
    Stopped,
    /// Service paused.
    Paused,
}

impl ClientStatus {
    /// Derive the label from the service state and API status.
    #[must_use]
    pub const fn derive(service: ServiceState, api: ApiStatus) -> Self {
        match service {
            ServiceState::Paused | ServiceState::Pausing => Self::Paused,
            ServiceState::Stopped | ServiceState::Stopping => Self::Stopped,
            ServiceState::Starting | ServiceState::Running => match api {
                ApiStatus::Online => Self::Online,
                ApiStatus::NotRegistered => Self::NotRegistered,
                ApiStatus::Unknown
                | ApiStatus::Offline
                | ApiStatus::Error
                | ApiStatus::Disposing => Self::Offline,
            },
        }
    }
}

/// One source in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    /// Source name.
    pub name: String,
    /// Watcher run state.
    pub state: &'static str,
    /// Converter plugin name.
    pub converter: String,
    /// Converter plugin version.
    pub converter_version: String,
    /// Matching files waiting in the watched directory.
    pub waiting_files: usize,
    /// Files parked in `Error/`.
    pub error_files: usize,
}

impl From<SourceStatistics> for SourceStatus {
    fn from(stats: SourceStatistics) -> Self {
        Self {
            name: stats.name,
            state: stats.state.as_str(),
            converter: stats.converter,
            converter_version: stats.version,
            waiting_files: stats.waiting_files,
            error_files: stats.error_files,
        }
    }
}

/// Whole status document.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Supervisor state.
    pub service_state: ServiceState,
    /// Cached collector API status.
    pub api_status: ApiStatus,
    /// Operator-facing connectivity label.
    pub client_status: ClientStatus,
    /// Report queue counts.
    pub pending: PendingCounts,
    /// Per-source statistics.
    pub sources: Vec<SourceStatus>,
    /// Selected metrics.
    pub metrics: MetricsSnapshot,
}

/// Write `snapshot` to `path` atomically.
///
/// # Errors
///
/// Returns an error when the snapshot cannot be encoded or the file cannot be replaced.
pub fn write_snapshot(path: &Path, snapshot: &StatusSnapshot) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| AppError::io("status.create_dir", parent, err))?;
    }
    let body = serde_json::to_vec_pretty(snapshot).map_err(|source| AppError::Serialization {
        operation: "status.encode",
        source,
    })?;
    let staging = staging_path(path);
    fs::write(&staging, body).map_err(|err| AppError::io("status.write", &staging, err))?;
    fs::rename(&staging, path).map_err(|err| AppError::io("status.rename", path, err))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
