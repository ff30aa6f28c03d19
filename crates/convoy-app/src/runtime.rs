//! Conversion runtime built from one configuration revision.
//!
//! A runtime owns the dispatcher and one watcher per configured source. Configuration reloads
//! dispose the running instance and build a fresh one, so nothing here is mutated in place.

use std::sync::Arc;

use convoy_config::{AgentConfig, SourceConfig};
use convoy_core::{ChangeSource, ConverterRegistry, SubmissionApi};
use convoy_pipeline::{
    ArchiveGate, ConversionDispatcher, DispatcherSettings, Signals, SourceSettings,
    SourceStatistics, SourceWatcher, WatcherDeps,
};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Dispatcher plus the watchers feeding it.
pub struct ConversionRuntime {
    dispatcher: ConversionDispatcher,
    watchers: Vec<Arc<SourceWatcher>>,
}

/// Collaborators shared by every runtime the supervisor builds.
#[derive(Clone)]
pub struct RuntimeDeps {
    /// Converter plugins by name.
    pub registry: Arc<ConverterRegistry>,
    /// Report delivery.
    pub api: Arc<dyn SubmissionApi>,
    /// Directory change notifications.
    pub changes: Arc<dyn ChangeSource>,
    /// Process-wide archive flush lock, kept across reloads.
    pub gate: ArchiveGate,
    /// Events and metrics.
    pub signals: Signals,
    /// Base dispatcher tuning; `max_workers` is taken from the configuration.
    pub dispatcher: DispatcherSettings,
}

impl ConversionRuntime {
    /// Build watchers for every source whose converter is registered.
    ///
    /// Sources naming an unknown converter, or whose filter or action no longer parse, are
    /// logged and skipped. Nothing is started.
    ///
    /// # Errors
    ///
    /// Returns an error when the dispatcher cannot be created.
    pub fn build(config: &AgentConfig, deps: &RuntimeDeps) -> AppResult<Self> {
        let settings = DispatcherSettings {
            max_workers: config.max_workers,
            ..deps.dispatcher
        };
        let dispatcher = ConversionDispatcher::new(settings, deps.signals.clone())
            .map_err(|err| AppError::pipeline("runtime.dispatcher", err))?;
        let watcher_deps = WatcherDeps {
            dispatcher: dispatcher.clone(),
            api: Arc::clone(&deps.api),
            changes: Arc::clone(&deps.changes),
            gate: deps.gate.clone(),
            signals: deps.signals.clone(),
        };

        let watchers = config
            .sources
            .iter()
            .filter_map(|source| match source_settings(source, &deps.registry) {
                Ok(settings) => Some(SourceWatcher::new(settings, watcher_deps.clone())),
                Err(err) => {
                    warn!(source = %source.name, converter = %source.converter, error = %err, "source skipped");
                    None
                }
            })
            .collect::<Vec<_>>();
        info!(
            sources = watchers.len(),
            max_workers = config.max_workers,
            "conversion runtime built"
        );
        Ok(Self {
            dispatcher,
            watchers,
        })
    }

    /// Shared dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &ConversionDispatcher {
        &self.dispatcher
    }

    /// Watchers in configuration order.
    #[must_use]
    pub fn watchers(&self) -> &[Arc<SourceWatcher>] {
        &self.watchers
    }

    /// Start every watcher. A failure leaves that watcher `FailedToStart` for health checks to
    /// retry; returns how many started.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for watcher in &self.watchers {
            match watcher.start().await {
                Ok(()) => started += 1,
                Err(err) => warn!(source = %watcher.name(), error = %err, "source watcher did not start"),
            }
        }
        started
    }

    /// Restart or reattach every watcher after a pause.
    pub async fn resume_all(&self) {
        for watcher in &self.watchers {
            if let Err(err) = watcher.resume().await {
                warn!(source = %watcher.name(), error = %err, "source watcher did not resume");
            }
        }
    }

    /// Detach every change listener; queued work keeps draining.
    pub fn stop_listening(&self) {
        for watcher in &self.watchers {
            watcher.stop_listening();
        }
    }

    /// Periodic pass: watcher health checks, then dispatcher housekeeping.
    pub async fn housekeeping(&self) {
        for watcher in &self.watchers {
            watcher.check_health().await;
        }
        self.dispatcher.housekeeping();
    }

    /// Per-source statistics for the status snapshot.
    #[must_use]
    pub fn statistics(&self) -> Vec<SourceStatistics> {
        self.watchers.iter().map(|watcher| watcher.statistics()).collect()
    }

    /// Stop the runtime: detach listeners, wait for workers, flush archives, release items.
    ///
    /// Returns `true` when every worker exited within the grace period.
    pub async fn dispose(self) -> bool {
        self.stop_listening();
        let drained = self.dispatcher.shutdown().await;
        self.dispatcher.flush_archives().await;
        for watcher in &self.watchers {
            watcher.dispose();
        }
        info!(drained, "conversion runtime disposed");
        drained
    }
}

impl std::fmt::Debug for ConversionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionRuntime")
            .field("sources", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

fn source_settings(
    source: &SourceConfig,
    registry: &ConverterRegistry,
) -> AppResult<SourceSettings> {
    let factory = registry
        .resolve(&source.converter)
        .map_err(|err| AppError::pipeline("runtime.resolve_converter", err.into()))?;
    let matcher = source
        .matcher()
        .map_err(|err| AppError::config("runtime.source_filter", err))?;
    let action = source
        .post_process_action()
        .map_err(|err| AppError::config("runtime.source_action", err))?;
    let mut settings = SourceSettings::new(
        source.name.clone(),
        source.path.clone(),
        matcher,
        factory,
        action,
    );
    settings.source_params = source.source_params.clone();
    settings.destination_params = source.destination_params.clone();
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::PollChangeSource;
    use convoy_events::EventBus;
    use convoy_pipeline::RunState;
    use convoy_telemetry::Metrics;
    use convoy_test_support::mocks::RecordingSubmissionApi;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    fn source(name: &str, path: PathBuf, converter: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            path,
            filter: "*.json".to_string(),
            converter: converter.to_string(),
            post_process_action: Some("move".to_string()),
            source_params: Default::default(),
            destination_params: Default::default(),
        }
    }

    fn deps() -> TestResult<RuntimeDeps> {
        Ok(RuntimeDeps {
            registry: Arc::new(ConverterRegistry::with_builtins()),
            api: Arc::new(RecordingSubmissionApi::accepting()),
            changes: Arc::new(PollChangeSource::new(Duration::from_millis(50))),
            gate: ArchiveGate::new(),
            signals: Signals::new(EventBus::new(), Metrics::new()?),
            dispatcher: DispatcherSettings::default(),
        })
    }

    #[tokio::test]
    async fn unknown_converters_are_skipped_and_missing_folders_fail_to_start() -> TestResult<()> {
        let dir = TempDir::new()?;
        let config = AgentConfig {
            max_workers: 2,
            reports_dir: dir.path().join("reports"),
            status_path: dir.path().join("status.json"),
            collector: None,
            logging: Default::default(),
            sources: vec![
                source("present", dir.path().to_path_buf(), "json"),
                source("absent", dir.path().join("missing"), "json"),
                source("exotic", dir.path().to_path_buf(), "xml-v9"),
            ],
        };

        let runtime = ConversionRuntime::build(&config, &deps()?)?;
        let names: Vec<_> = runtime.watchers().iter().map(|w| w.name().to_string()).collect();
        assert_eq!(names, vec!["present", "absent"]);

        assert_eq!(runtime.start_all().await, 1);
        let states: Vec<_> = runtime.statistics().into_iter().map(|s| s.state).collect();
        assert_eq!(states, vec![RunState::Running, RunState::FailedToStart]);

        assert!(runtime.dispose().await);
        Ok(())
    }
}
