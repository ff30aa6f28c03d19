//! Domain types shared by the conversion pipeline and the submission queue.
//!
//! # Design
//! - Reports stay format-agnostic: the structured body is an opaque JSON document.
//! - Enumerations render the same names used on disk and in status snapshots.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Free-form key/value parameters handed to converters.
pub type Parameters = BTreeMap<String, String>;

/// Structured report produced by a converter and delivered to the collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Unique report identifier; also names the queue file.
    pub id: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Path of the source file the report was converted from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Report body.
    pub payload: Value,
}

impl Report {
    /// Build a report with a fresh identifier.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            origin: None,
            payload,
        }
    }

    /// Attach the originating source path.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Check the report is fit for submission.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidReport`] when the payload is not a non-empty object.
    pub fn validate(&self) -> CoreResult<()> {
        match &self.payload {
            Value::Object(map) if !map.is_empty() => Ok(()),
            Value::Object(_) => Err(CoreError::InvalidReport {
                field: "payload",
                reason: "empty",
            }),
            _ => Err(CoreError::InvalidReport {
                field: "payload",
                reason: "not_an_object",
            }),
        }
    }
}

/// Delivery policy requested by the caller of [`crate::SubmissionApi::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMethod {
    /// Deliver now or fail.
    Online,
    /// Always persist to the durable queue.
    Offline,
    /// Deliver when online, otherwise persist.
    Automatic,
}

/// Connectivity status of the submission API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiStatus {
    /// No probe has completed yet.
    Unknown,
    /// The collector answered the last probe.
    Online,
    /// The collector is unreachable or throttling.
    Offline,
    /// The last delivery failed unexpectedly.
    Error,
    /// No collector endpoint is configured.
    NotRegistered,
    /// The API is shutting down.
    Disposing,
}

impl ApiStatus {
    /// Stable name used in logs and snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Online => "Online",
            Self::Offline => "Offline",
            Self::Error => "Error",
            Self::NotRegistered => "NotRegistered",
            Self::Disposing => "Disposing",
        }
    }
}

impl Display for ApiStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Action applied to a source file once conversion has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PostProcessAction {
    /// Move into the `Done` folder.
    Move,
    /// Move into `Done`, then bundle into the monthly archive.
    Archive,
    /// Move into the `Error` folder.
    Error,
    /// Remove the source file.
    #[default]
    Delete,
}

impl PostProcessAction {
    /// Stable name used in logs, metrics and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "Move",
            Self::Archive => "Archive",
            Self::Error => "Error",
            Self::Delete => "Delete",
        }
    }

    /// Resolve an optional configured value; a missing value means [`Self::Delete`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPostProcessAction`] for unrecognised text.
    pub fn from_config(value: Option<&str>) -> CoreResult<Self> {
        value.map_or(Ok(Self::Delete), str::parse)
    }
}

impl Display for PostProcessAction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for PostProcessAction {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "move" => Ok(Self::Move),
            "archive" | "zip" => Ok(Self::Archive),
            "error" => Ok(Self::Error),
            "delete" | "" => Ok(Self::Delete),
            _ => Err(CoreError::InvalidPostProcessAction {
                value: value.to_string(),
            }),
        }
    }
}
