//! Durable report queue kept as files in the reports directory.
//!
//! # Design
//! - A report lives in exactly one file, `<report-id>.<State>`; the suffix is its state.
//! - State changes are renames. A stale file already holding the target name is removed first.
//! - Every transition stamps the file's access and modification times so timeouts measure how
//!   long the file has sat in its current state.

use std::fmt;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use convoy_core::Report;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{SubmitError, SubmitResult};

/// Age after which a `Transfering` file is returned to `Queued`.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Age after which an `Error` file is returned to `Queued`.
pub const ERROR_RETRY_AFTER: Duration = Duration::from_secs(5 * 60);
/// Most files handled by one pass over the queue.
pub const PASS_LIMIT: usize = 10_000;

/// Transfer state encoded in a queue file's suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Being written.
    InMemory,
    /// Waiting for delivery.
    Queued,
    /// Held by an in-flight delivery.
    Transfering,
    /// Last delivery attempt failed.
    Error,
    /// Unreadable or refused by the collector. Terminal.
    InvalidReport,
}

impl TransferState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::InMemory,
        Self::Queued,
        Self::Transfering,
        Self::Error,
        Self::InvalidReport,
    ];

    /// File name suffix.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::InMemory => "InMemory",
            Self::Queued => "Queued",
            Self::Transfering => "Transfering",
            Self::Error => "Error",
            Self::InvalidReport => "InvalidReport",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for TransferState {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.suffix() == value)
            .ok_or(())
    }
}

/// One report file in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReportFile {
    id: String,
    state: TransferState,
    path: PathBuf,
}

impl PendingReportFile {
    /// Parse a queue path of the form `<id>.<State>`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::UnrecognisedFile`] for any other name.
    pub fn parse(path: &Path) -> SubmitResult<Self> {
        let unrecognised = || SubmitError::UnrecognisedFile {
            path: path.to_path_buf(),
        };
        let name = path.file_name().and_then(|name| name.to_str()).ok_or_else(unrecognised)?;
        let (id, suffix) = name.rsplit_once('.').ok_or_else(unrecognised)?;
        if id.is_empty() {
            return Err(unrecognised());
        }
        let state = suffix.parse().map_err(|()| unrecognised())?;
        Ok(Self {
            id: id.to_string(),
            state,
            path: path.to_path_buf(),
        })
    }

    /// Report identifier (the file stem).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TransferState {
        self.state
    }

    /// Current path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Files per state, as shown in status snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// All queue files.
    pub total: usize,
    /// Waiting or in flight (`Queued` + `Transfering`).
    pub current: usize,
    /// Written but never queued (`InMemory`).
    pub unprocessed: usize,
    /// Last delivery failed (`Error`).
    pub send_error: usize,
    /// Unreadable or refused (`InvalidReport`).
    pub load_error: usize,
}

/// Handle to the reports directory.
#[derive(Debug, Clone)]
pub struct ReportQueue {
    dir: PathBuf,
}

impl ReportQueue {
    /// Queue rooted at `dir`; the directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reports directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a report would occupy in `state`.
    #[must_use]
    pub fn path_for(&self, id: &str, state: TransferState) -> PathBuf {
        self.dir.join(format!("{id}.{}", state.suffix()))
    }

    /// Persist a report as `InMemory`, then publish it as `Queued`.
    ///
    /// # Errors
    ///
    /// Returns an error when the report cannot be written or renamed.
    pub fn save(&self, report: &Report) -> SubmitResult<PendingReportFile> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| SubmitError::io("queue.create_dir", &self.dir, err))?;
        let id = report.id.to_string();
        let path = self.path_for(&id, TransferState::InMemory);
        let body = serde_json::to_vec_pretty(report)
            .map_err(|err| SubmitError::serialization("queue.encode", &path, err))?;
        fs::write(&path, body).map_err(|err| SubmitError::io("queue.write", &path, err))?;
        let written = PendingReportFile {
            id,
            state: TransferState::InMemory,
            path,
        };
        self.transition(&written, TransferState::Queued)
    }

    /// Files in `state`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be listed. A missing directory is empty.
    pub fn list(&self, state: TransferState) -> SubmitResult<Vec<PendingReportFile>> {
        let mut files: Vec<(SystemTime, PendingReportFile)> = self
            .entries()?
            .into_iter()
            .filter(|file| file.state == state)
            .map(|file| (last_accessed(&file.path).unwrap_or(SystemTime::UNIX_EPOCH), file))
            .collect();
        files.sort_by_key(|(stamp, _)| *stamp);
        Ok(files.into_iter().map(|(_, file)| file).collect())
    }

    /// Rename `file` into `to`, replacing any stale file of that name, and stamp it.
    ///
    /// # Errors
    ///
    /// Returns an error when the rename fails.
    pub fn transition(
        &self,
        file: &PendingReportFile,
        to: TransferState,
    ) -> SubmitResult<PendingReportFile> {
        let target = self.path_for(&file.id, to);
        if target != file.path {
            match fs::remove_file(&target) {
                Ok(()) => debug!(path = %target.display(), "stale queue file replaced"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(SubmitError::io("queue.replace", &target, err)),
            }
            fs::rename(&file.path, &target)
                .map_err(|err| SubmitError::io("queue.rename", &file.path, err))?;
        }
        touch(&target)?;
        Ok(PendingReportFile {
            id: file.id.clone(),
            state: to,
            path: target,
        })
    }

    /// Decode the report stored in `file`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(&self, file: &PendingReportFile) -> SubmitResult<Report> {
        let bytes = fs::read(&file.path).map_err(|err| SubmitError::io("queue.read", &file.path, err))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| SubmitError::serialization("queue.decode", &file.path, err))
    }

    /// Delete a delivered report.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be removed.
    pub fn remove(&self, file: &PendingReportFile) -> SubmitResult<()> {
        match fs::remove_file(&file.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SubmitError::io("queue.remove", &file.path, err)),
        }
    }

    /// Files per state.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be listed.
    pub fn counts(&self) -> SubmitResult<PendingCounts> {
        let mut counts = PendingCounts::default();
        for file in self.entries()? {
            counts.total += 1;
            match file.state {
                TransferState::Queued | TransferState::Transfering => counts.current += 1,
                TransferState::InMemory => counts.unprocessed += 1,
                TransferState::Error => counts.send_error += 1,
                TransferState::InvalidReport => counts.load_error += 1,
            }
        }
        Ok(counts)
    }

    /// Return timed-out `Transfering` and `Error` files to `Queued`; returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns the first listing or rename failure.
    pub fn rescue_timeouts(&self, now: SystemTime) -> SubmitResult<usize> {
        let mut rescued = 0;
        for file in self.entries()? {
            let limit = match file.state {
                TransferState::Transfering => TRANSFER_TIMEOUT,
                TransferState::Error => ERROR_RETRY_AFTER,
                TransferState::InMemory | TransferState::Queued | TransferState::InvalidReport => {
                    continue;
                }
            };
            let Some(stamp) = last_accessed(&file.path) else {
                continue;
            };
            let age = now.duration_since(stamp).unwrap_or_default();
            if age > limit {
                self.transition(&file, TransferState::Queued)?;
                info!(report = %file.id, from = %file.state, age_secs = age.as_secs(), "timed-out report requeued");
                rescued += 1;
            }
        }
        Ok(rescued)
    }

    fn entries(&self) -> SubmitResult<Vec<PendingReportFile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SubmitError::io("queue.list", &self.dir, err)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SubmitError::io("queue.list", &self.dir, err))?;
            if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
                continue;
            }
            if let Ok(file) = PendingReportFile::parse(&entry.path()) {
                files.push(file);
            }
        }
        Ok(files)
    }
}

/// Last access stamp; the modification stamp stands in where the platform reports no atime.
fn last_accessed(path: &Path) -> Option<SystemTime> {
    let metadata = fs::metadata(path).ok()?;
    metadata.accessed().or_else(|_| metadata.modified()).ok()
}

fn touch(path: &Path) -> SubmitResult<()> {
    let now = SystemTime::now();
    let file = File::options()
        .write(true)
        .open(path)
        .map_err(|err| SubmitError::io("queue.stamp", path, err))?;
    file.set_times(FileTimes::new().set_accessed(now).set_modified(now))
        .map_err(|err| SubmitError::io("queue.stamp", path, err))
}
