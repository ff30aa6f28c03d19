//! One watched directory: discovery, conversion and post-processing.
//!
//! # Design
//! - A watcher owns a (directory, glob, converter, post-process action) tuple and registers every
//!   matching file with the shared [`ConversionDispatcher`]; workers call back into
//!   [`ConversionTarget::convert`].
//! - Run state: `Created -> Running -> (FailedToStart | Failed) -> Disposing`. `Disposing` is
//!   terminal; in-flight work observes it cooperatively and abandons the item without side
//!   effects.
//! - Conversion failures never escape: they route the file to `Error/`. Only a permission error
//!   while deleting, or a folder that became unreadable, moves the watcher to `Failed`.
//! - Post-process steps that fail are retried on the blocking pool; an exhausted retry leaves the
//!   item tracked so stale rescue hands it out again.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use convoy_core::{
    ChangeEvent, ChangeSource, ChangeSubscription, ConversionContext, ConverterFactory, CoreResult,
    Parameters, PostProcessAction, Report, ReportConverter, SubmissionApi, SubmitMethod,
};
use convoy_events::Event;
use globset::GlobMatcher;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveBatcher, ArchiveGate};
use crate::disposition::{self, DONE_DIR, ERROR_DIR, random_suffix, retry_blocking};
use crate::dispatcher::{ConversionDispatcher, ConversionItem, ConversionTarget, ItemState};
use crate::error::{PipelineError, PipelineResult};
use crate::lock;
use crate::retry::RetryPolicy;
use crate::signals::{HealthFlag, Signals};

/// Locally tracked items at which a scan is skipped.
pub const SCAN_BACKPRESSURE: usize = 10;
/// Most files registered by a single scan.
pub const SCAN_LIMIT: usize = 10_000;

/// Watcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Constructed, never started.
    Created,
    /// Self-test passed; discovering and converting files.
    Running,
    /// Start failed; retried by health checks.
    FailedToStart,
    /// Folder access was lost while running.
    Failed,
    /// Shutting down. Terminal.
    Disposing,
}

impl RunState {
    /// Stable name used in events and status snapshots.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::FailedToStart => "failed_to_start",
            Self::Failed => "failed",
            Self::Disposing => "disposing",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static configuration of one watched source.
#[derive(Clone)]
pub struct SourceSettings {
    /// Unique source name.
    pub name: String,
    /// Watched directory.
    pub path: PathBuf,
    /// File name filter.
    pub matcher: GlobMatcher,
    /// Converter plugin resolved from the registry.
    pub factory: Arc<dyn ConverterFactory>,
    /// Disposition applied after a successful conversion.
    pub action: PostProcessAction,
    /// Parameters describing the source.
    pub source_params: Parameters,
    /// Parameters passed to the converter and merged into reports.
    pub destination_params: Parameters,
    /// Budget for acquiring the source file lock.
    pub lock_policy: RetryPolicy,
    /// Budget for retrying a failed post-process step.
    pub post_process_policy: RetryPolicy,
    /// Quiet period between a change notification and the scan it triggers.
    pub settle: Duration,
}

impl SourceSettings {
    /// Settings with default retry budgets and a five second settle period.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        path: PathBuf,
        matcher: GlobMatcher,
        factory: Arc<dyn ConverterFactory>,
        action: PostProcessAction,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            matcher,
            factory,
            action,
            source_params: Parameters::new(),
            destination_params: Parameters::new(),
            lock_policy: RetryPolicy::DEFAULT,
            post_process_policy: RetryPolicy::DEFAULT,
            settle: Duration::from_secs(5),
        }
    }
}

/// Shared collaborators handed to every watcher.
#[derive(Clone)]
pub struct WatcherDeps {
    /// Global item registry and worker pool.
    pub dispatcher: ConversionDispatcher,
    /// Report delivery.
    pub api: Arc<dyn SubmissionApi>,
    /// Directory change notifications.
    pub changes: Arc<dyn ChangeSource>,
    /// Process-wide archive flush lock.
    pub gate: ArchiveGate,
    /// Events and metrics.
    pub signals: Signals,
}

/// Point-in-time view of a watcher for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatistics {
    /// Source name.
    pub name: String,
    /// Current run state.
    pub state: RunState,
    /// Converter plugin name.
    pub converter: String,
    /// Converter plugin version.
    pub version: String,
    /// Matching files waiting in the watched directory.
    pub waiting_files: usize,
    /// Files parked in `Error/`.
    pub error_files: usize,
    /// Items this source currently has registered.
    pub tracked_items: usize,
}

/// Watches one directory and converts the files it discovers.
pub struct SourceWatcher {
    settings: SourceSettings,
    deps: WatcherDeps,
    state: Mutex<RunState>,
    local: Mutex<HashMap<PathBuf, Arc<ConversionItem>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    scan_gate: tokio::sync::Mutex<()>,
    archive: ArchiveBatcher,
    health: HealthFlag,
    me: Weak<Self>,
}

impl SourceWatcher {
    /// Create a watcher and attach it to the dispatcher. Nothing is scanned until [`start`].
    ///
    /// [`start`]: Self::start
    #[must_use]
    pub fn new(settings: SourceSettings, deps: WatcherDeps) -> Arc<Self> {
        let watcher = Arc::new_cyclic(|me| Self {
            archive: ArchiveBatcher::new(
                settings.name.clone(),
                settings.path.join(DONE_DIR),
                deps.gate.clone(),
                deps.signals.clone(),
            ),
            health: HealthFlag::new(format!("source:{}", settings.name)),
            settings,
            deps,
            state: Mutex::new(RunState::Created),
            local: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            scan_gate: tokio::sync::Mutex::new(()),
            me: me.clone(),
        });
        let target: Arc<dyn ConversionTarget> = watcher.clone();
        watcher.deps.dispatcher.attach(Arc::downgrade(&target));
        watcher
    }

    /// Source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Watched directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.settings.path
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_disposing(&self) -> bool {
        self.state() == RunState::Disposing
    }

    /// Whether this watcher or the shared dispatcher is shutting down.
    fn stopping(&self) -> bool {
        self.is_disposing() || self.deps.dispatcher.is_shutting_down()
    }

    /// Whether a change listener is attached and alive.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.lock_listener()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Files waiting in the archive queue.
    #[must_use]
    pub fn archive_backlog(&self) -> usize {
        self.archive.len()
    }

    /// Self-test the folder, scan it once and attach the change listener.
    ///
    /// # Errors
    ///
    /// Any failure leaves the watcher in `FailedToStart` and is returned.
    pub async fn start(&self) -> PipelineResult<()> {
        match self.state() {
            RunState::Disposing => {
                return Err(PipelineError::InvalidState {
                    source_name: self.settings.name.clone(),
                    state: RunState::Disposing.as_str(),
                });
            }
            RunState::Running => return self.reattach_and_scan().await,
            RunState::Created | RunState::FailedToStart | RunState::Failed => {}
        }

        match self.try_start().await {
            Ok(()) => {
                self.set_state(RunState::Running);
                self.health.mark_recovered(&self.deps.signals);
                info!(source = %self.settings.name, path = %self.settings.path.display(), "source watcher started");
                Ok(())
            }
            Err(err) => {
                self.stop_listening();
                self.set_state(RunState::FailedToStart);
                self.health
                    .mark_degraded(&self.deps.signals, "source watcher failed to start");
                warn!(source = %self.settings.name, error = %err, "source watcher failed to start");
                Err(err)
            }
        }
    }

    async fn try_start(&self) -> PipelineResult<()> {
        let root = self.settings.path.clone();
        tokio::task::spawn_blocking(move || self_test(&root))
            .await
            .map_err(|source| PipelineError::Task {
                operation: "watcher.self_test",
                source,
            })??;
        self.scan().await?;
        self.attach_listener()
    }

    /// Reattach the listener if needed and rescan. Starts the watcher when it is not running.
    ///
    /// # Errors
    ///
    /// Returns listener or scan failures.
    pub async fn resume(&self) -> PipelineResult<()> {
        if self.state() == RunState::Running {
            self.reattach_and_scan().await
        } else {
            self.start().await
        }
    }

    async fn reattach_and_scan(&self) -> PipelineResult<()> {
        if !self.is_listening() {
            self.attach_listener()?;
        }
        self.scan().await.map(drop)
    }

    /// Detach the change listener; tracked items keep being converted.
    pub fn stop_listening(&self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
            debug!(source = %self.settings.name, "change listener detached");
        }
    }

    /// Enter the terminal `Disposing` state and release pending items.
    pub fn dispose(&self) {
        self.set_state(RunState::Disposing);
        self.stop_listening();
        let items: Vec<_> = self.lock_local().drain().map(|(_, item)| item).collect();
        for item in items {
            if item.state() == ItemState::Pending {
                self.deps.dispatcher.remove_file(item.path());
            }
        }
        info!(source = %self.settings.name, "source watcher disposed");
    }

    /// Periodic self-healing: restart a failed start, reattach a dead listener and rescan.
    pub async fn check_health(&self) {
        match self.state() {
            RunState::FailedToStart => {
                // Failure already logged and surfaced by start().
                let _ = self.start().await;
            }
            RunState::Running => {
                if !self.is_listening() {
                    info!(source = %self.settings.name, "change listener lost; reattaching");
                    if let Err(err) = self.attach_listener() {
                        warn!(source = %self.settings.name, error = %err, "change listener could not be reattached");
                    }
                }
                match self.scan().await {
                    Ok(_) => {}
                    Err(err) if err.is_permission_denied() => {
                        self.fail("watched folder access denied");
                    }
                    Err(err) => {
                        warn!(source = %self.settings.name, error = %err, "scan failed");
                    }
                }
            }
            RunState::Created | RunState::Failed | RunState::Disposing => {}
        }
    }

    /// Register matching files with the dispatcher; returns the number of new registrations.
    ///
    /// Skipped while [`SCAN_BACKPRESSURE`] or more of this source's items are still tracked.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the directory cannot be listed.
    pub async fn scan(&self) -> PipelineResult<usize> {
        if self.is_disposing() {
            return Ok(0);
        }
        let Some(me) = self.me.upgrade() else {
            return Ok(0);
        };

        let tracked = {
            let mut local = self.lock_local();
            local.retain(|_, item| self.deps.dispatcher.is_tracked(item));
            local.len()
        };
        if tracked >= SCAN_BACKPRESSURE {
            debug!(source = %self.settings.name, tracked, "scan skipped; backlog pending");
            return Ok(0);
        }

        let root = self.settings.path.clone();
        let matcher = self.settings.matcher.clone();
        let candidates = tokio::task::spawn_blocking(move || list_candidates(&root, &matcher))
            .await
            .map_err(|source| PipelineError::Task {
                operation: "watcher.scan",
                source,
            })??;

        let owner: Arc<dyn ConversionTarget> = me;
        let mut registered = 0;
        for candidate in candidates.into_iter().take(SCAN_LIMIT) {
            if self.is_disposing() {
                break;
            }
            let item =
                self.deps
                    .dispatcher
                    .register_file(candidate.path.clone(), candidate.modified, &owner);
            if self.lock_local().insert(candidate.path, item).is_none() {
                registered += 1;
            }
        }
        if registered > 0 {
            debug!(source = %self.settings.name, registered, "scan registered files");
        }
        Ok(registered)
    }

    /// Settle, then scan, unless a triggered scan is already in flight.
    pub async fn check_folder_single(&self) {
        let Ok(_guard) = self.scan_gate.try_lock() else {
            return;
        };
        tokio::time::sleep(self.settings.settle).await;
        if let Err(err) = self.scan().await {
            warn!(source = %self.settings.name, error = %err, "triggered scan failed");
        }
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn statistics(&self) -> SourceStatistics {
        let waiting_files = list_candidates(&self.settings.path, &self.settings.matcher)
            .map_or(0, |files| files.len());
        let error_files = fs::read_dir(self.settings.path.join(ERROR_DIR)).map_or(0, |entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
                .count()
        });
        SourceStatistics {
            name: self.settings.name.clone(),
            state: self.state(),
            converter: self.settings.factory.name().to_string(),
            version: self.settings.factory.version().to_string(),
            waiting_files,
            error_files,
            tracked_items: self.deps.dispatcher.pending_for(&self.settings.name),
        }
    }

    fn attach_listener(&self) -> PipelineResult<()> {
        let subscription = self.deps.changes.open(&self.settings.path)?;
        let handle = tokio::spawn(listen(self.me.clone(), subscription));
        if let Some(previous) = self.lock_listener().replace(handle) {
            previous.abort();
        }
        debug!(source = %self.settings.name, "change listener attached");
        Ok(())
    }

    fn matches(&self, path: &Path) -> bool {
        path.parent() == Some(self.settings.path.as_path())
            && path
                .file_name()
                .is_some_and(|name| self.settings.matcher.is_match(name))
    }

    fn fail(&self, detail: &str) {
        if self.set_state(RunState::Failed) {
            error!(source = %self.settings.name, detail, "source watcher failed");
        }
        self.health.mark_degraded(&self.deps.signals, detail);
    }

    /// Returns `true` when the state changed.
    fn set_state(&self, next: RunState) -> bool {
        let mut state = self.lock_state();
        if *state == next || *state == RunState::Disposing {
            return false;
        }
        *state = next;
        drop(state);
        self.deps.signals.publish(Event::SourceStateChanged {
            source: self.settings.name.clone(),
            state: next.as_str().to_string(),
        });
        true
    }

    async fn convert_item(&self, item: &Arc<ConversionItem>) -> PipelineResult<()> {
        let dispatcher = &self.deps.dispatcher;
        match self.state() {
            RunState::Disposing => return Ok(()),
            RunState::Failed => {
                dispatcher.remove_file(item.path());
                return Ok(());
            }
            RunState::Created | RunState::Running | RunState::FailedToStart => {}
        }

        self.lock_local().remove(item.path());
        let path_label = item.path().display().to_string();
        self.deps.signals.publish(Event::ConversionStarted {
            source: self.settings.name.clone(),
            path: path_label.clone(),
        });

        let file = match lock::acquire(item, self.settings.lock_policy, || self.stopping()).await
        {
            Ok(file) => file,
            Err(err) if err.is_not_found() => {
                debug!(source = %self.settings.name, path = %path_label, "source file vanished before conversion");
                dispatcher.remove_file(item.path());
                return Ok(());
            }
            Err(PipelineError::Disposing { .. }) => return Ok(()),
            Err(err) => {
                warn!(source = %self.settings.name, path = %path_label, error = %err, "source file lock not acquired; left for stale rescue");
                return Ok(());
            }
        };

        let action = self.run_conversion(item, file, &path_label).await;
        if self.stopping() {
            return Ok(());
        }

        match self.apply(item.path(), action).await {
            Ok(()) => {
                self.finish(item, action, path_label);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!(source = %self.settings.name, path = %path_label, "source file vanished before post-processing");
                dispatcher.remove_file(item.path());
                Ok(())
            }
            Err(err) if action == PostProcessAction::Delete && err.is_permission_denied() => {
                dispatcher.remove_file(item.path());
                self.fail("source file delete denied");
                Ok(())
            }
            Err(err @ PipelineError::Task { .. }) => Err(err),
            Err(err) => {
                warn!(source = %self.settings.name, path = %path_label, action = %action, error = %err, "post-process failed; left for stale rescue");
                Ok(())
            }
        }
    }

    async fn run_conversion(
        &self,
        item: &ConversionItem,
        file: File,
        path_label: &str,
    ) -> PostProcessAction {
        let factory = Arc::clone(&self.settings.factory);
        let context = ConversionContext::new(
            item.path().to_path_buf(),
            self.settings.source_params.clone(),
            self.settings.destination_params.clone(),
        );
        let outcome = tokio::task::spawn_blocking(move || import(factory.as_ref(), &context, file)).await;
        item.set_state(ItemState::PostProcessing);

        let failure = match outcome {
            Ok(Ok(None)) => return self.settings.action,
            Ok(Ok(Some(report))) => match self.deps.api.submit(SubmitMethod::Automatic, &report).await {
                Ok(true) => return self.settings.action,
                Ok(false) => "report submission refused".to_string(),
                Err(err) => format!("report submission failed: {err}"),
            },
            Ok(Err(err)) => match std::error::Error::source(&err) {
                Some(cause) => format!("{err}: {cause}"),
                None => err.to_string(),
            },
            Err(join_err) => format!("converter aborted: {join_err}"),
        };

        warn!(source = %self.settings.name, path = %path_label, failure = %failure, "conversion failed; routing to error folder");
        self.deps.signals.publish(Event::ConversionFailed {
            source: self.settings.name.clone(),
            path: path_label.to_string(),
            message: failure,
        });
        PostProcessAction::Error
    }

    async fn apply(&self, path: &Path, action: PostProcessAction) -> PipelineResult<()> {
        let policy = self.settings.post_process_policy;
        let path = path.to_path_buf();
        match action {
            PostProcessAction::Delete => {
                retry_blocking(
                    policy,
                    move || disposition::delete(&path),
                    PipelineError::is_permission_denied,
                    || self.stopping(),
                )
                .await
            }
            PostProcessAction::Move => self.move_with_retry(path, DONE_DIR).await.map(drop),
            PostProcessAction::Error => self.move_with_retry(path, ERROR_DIR).await.map(drop),
            PostProcessAction::Archive => {
                let archived = self.move_with_retry(path, DONE_DIR).await?;
                if self.archive.push(archived) {
                    self.flush_archive().await;
                }
                Ok(())
            }
        }
    }

    async fn move_with_retry(&self, path: PathBuf, folder: &'static str) -> PipelineResult<PathBuf> {
        retry_blocking(
            self.settings.post_process_policy,
            move || disposition::move_into(&path, folder),
            PipelineError::is_not_found,
            || self.stopping(),
        )
        .await
    }

    fn finish(&self, item: &ConversionItem, action: PostProcessAction, path: String) {
        self.deps.dispatcher.remove_file(item.path());
        self.deps
            .signals
            .metrics
            .inc_conversion(&self.settings.name, action.as_str());
        info!(source = %self.settings.name, path = %path, disposition = %action, "file processed");
        self.deps.signals.publish(Event::ConversionCompleted {
            source: self.settings.name.clone(),
            path,
            disposition: action.as_str().to_string(),
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_local(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<ConversionItem>>> {
        self.local
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ConversionTarget for SourceWatcher {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn convert(&self, item: Arc<ConversionItem>) -> PipelineResult<()> {
        self.convert_item(&item).await
    }

    async fn flush_archive(&self) {
        if self.archive.is_empty() {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        match tokio::task::spawn_blocking(move || me.archive.flush()).await {
            Ok(Ok(outcome)) => debug!(source = %self.settings.name, ?outcome, "archive flush finished"),
            Ok(Err(err)) => debug!(source = %self.settings.name, error = %err, "archive flush deferred"),
            Err(err) => error!(source = %self.settings.name, error = %err, "archive flush task failed"),
        }
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_listener().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("name", &self.settings.name)
            .field("path", &self.settings.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn listen(watcher: Weak<SourceWatcher>, mut subscription: ChangeSubscription) {
    while let Some(event) = subscription.next().await {
        let Some(watcher) = watcher.upgrade() else {
            return;
        };
        match event {
            ChangeEvent::Changed(path) if watcher.matches(&path) => trigger_check(watcher),
            ChangeEvent::Changed(_) | ChangeEvent::Removed(_) => {}
            ChangeEvent::Failed(message) => {
                warn!(source = %watcher.settings.name, message = %message, "change listener reported an error; rescanning");
                trigger_check(watcher);
            }
        }
    }
    debug!("change listener stopped");
}

/// Run a settle-then-scan off the listener; triggers arriving while one is in flight are dropped.
fn trigger_check(watcher: Arc<SourceWatcher>) {
    tokio::spawn(async move { watcher.check_folder_single().await });
}

struct CleanupGuard(Box<dyn ReportConverter>);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.0.clean_up();
    }
}

fn import(
    factory: &dyn ConverterFactory,
    context: &ConversionContext,
    mut file: File,
) -> CoreResult<Option<Report>> {
    let mut converter = CleanupGuard(factory.create(context.destination_params())?);
    let report = converter.0.import_report(context, &mut file);
    drop(file);
    report
}

/// Write, read back and delete a probe file, then make sure `Error/` exists.
fn self_test(root: &Path) -> PipelineResult<()> {
    let probe = root.join(format!(".convoy-probe-{}", random_suffix()));
    let payload = b"convoy";
    let mut file =
        File::create(&probe).map_err(|err| PipelineError::io("watcher.probe_write", &probe, err))?;
    file.write_all(payload)
        .map_err(|err| PipelineError::io("watcher.probe_write", &probe, err))?;
    drop(file);

    let mut read_back = Vec::new();
    File::open(&probe)
        .and_then(|mut file| file.read_to_end(&mut read_back))
        .map_err(|err| PipelineError::io("watcher.probe_read", &probe, err))?;
    fs::remove_file(&probe).map_err(|err| PipelineError::io("watcher.probe_delete", &probe, err))?;
    if read_back != payload {
        return Err(PipelineError::io(
            "watcher.probe_read",
            &probe,
            io::Error::from(io::ErrorKind::InvalidData),
        ));
    }

    let errors = root.join(ERROR_DIR);
    fs::create_dir_all(&errors).map_err(|err| PipelineError::io("watcher.error_dir", &errors, err))
}

struct Candidate {
    path: PathBuf,
    modified: SystemTime,
    created: SystemTime,
}

/// Matching regular files directly under `root`, oldest creation time first.
fn list_candidates(root: &Path, matcher: &GlobMatcher) -> PipelineResult<Vec<Candidate>> {
    let entries = fs::read_dir(root).map_err(|err| PipelineError::io("watcher.list", root, err))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::io("watcher.list", root, err))?;
        if !matcher.is_match(entry.file_name()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push(Candidate {
            path: entry.path(),
            modified,
            created: metadata.created().unwrap_or(modified),
        });
    }
    candidates.sort_by_key(|candidate| candidate.created);
    Ok(candidates)
}
