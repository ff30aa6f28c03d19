use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use convoy_config::{AgentConfig, ConfigSnapshot, ConfigWatcher, config_path_from_env};
use convoy_core::{ChangeSource, ConverterFactory, ConverterRegistry, NotifyChangeSource};
use convoy_events::{Event, EventBus};
use convoy_pipeline::{ArchiveGate, DispatcherSettings, Signals};
use convoy_submit::{
    CollectorClient, DEFAULT_RETRY_INTERVAL, ReportQueue, ReportSubmitter, SubmissionRetryLoop,
};
use convoy_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collector::HttpCollectorClient;
use crate::error::{AppError, AppResult};
use crate::runtime::RuntimeDeps;
use crate::supervisor::{Supervisor, SupervisorSettings};

const CONFIG_HEALTH_COMPONENT: &str = "config_watcher";

/// Dependencies required to bootstrap the agent.
pub struct BootstrapDependencies {
    snapshot: ConfigSnapshot,
    watcher: ConfigWatcher,
    registry: ConverterRegistry,
    changes: Arc<dyn ChangeSource>,
    events: EventBus,
    metrics: Metrics,
    dispatcher: DispatcherSettings,
    supervisor: SupervisorSettings,
    retry_interval: Duration,
}

impl BootstrapDependencies {
    /// Load the configuration named by `CONVOY_CONFIG` (or `convoy.yaml`).
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is unreadable or invalid.
    pub async fn from_env() -> AppResult<Self> {
        Self::load(config_path_from_env()).await
    }

    /// Load the configuration at `path` with production defaults for everything else.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is unreadable or invalid, or metrics cannot be
    /// registered.
    pub async fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let (snapshot, watcher) = ConfigWatcher::open(path)
            .await
            .map_err(|err| AppError::config("config_watcher.open", err))?;
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            snapshot,
            watcher,
            registry: ConverterRegistry::with_builtins(),
            changes: Arc::new(NotifyChangeSource),
            events: EventBus::new(),
            metrics,
            dispatcher: DispatcherSettings::default(),
            supervisor: SupervisorSettings::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        })
    }

    /// Register an additional converter plugin.
    ///
    /// # Errors
    ///
    /// Returns an error when a converter with the same name is already registered.
    pub fn with_converter(mut self, factory: Arc<dyn ConverterFactory>) -> AppResult<Self> {
        self.registry
            .register(factory)
            .map_err(|err| AppError::pipeline("registry.register", err.into()))?;
        Ok(self)
    }

    /// Replace the directory change source used by watchers and the retry loop.
    #[must_use]
    pub fn with_change_source(mut self, changes: Arc<dyn ChangeSource>) -> Self {
        self.changes = changes;
        self
    }

    /// Override dispatcher tuning; `max_workers` still comes from the configuration.
    #[must_use]
    pub const fn with_dispatcher_settings(mut self, settings: DispatcherSettings) -> Self {
        self.dispatcher = settings;
        self
    }

    /// Override scheduled task periods and the submission retry interval.
    #[must_use]
    pub const fn with_schedule(mut self, settings: SupervisorSettings, retry: Duration) -> Self {
        self.supervisor = settings;
        self.retry_interval = retry;
        self
    }

    /// Override how often the configuration file is polled and how long edits settle.
    #[must_use]
    pub fn with_reload_intervals(mut self, poll: Duration, settle: Duration) -> Self {
        self.watcher = self.watcher.with_intervals(poll, settle);
        self
    }

    /// Shared event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.snapshot.config
    }
}

/// Entry point for the agent boot sequence; runs until Ctrl-C.
///
/// # Errors
///
/// Returns an error if dependency construction, logging setup, or startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    let logging = &dependencies.config().logging;
    convoy_telemetry::init_logging(&LoggingConfig {
        level: &logging.level,
        format: LogFormat::from_name(logging.format.as_deref()),
        build_sha: option_env!("CONVOY_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("agent");

    serve(dependencies, shutdown_signal()).await
}

/// Start the supervisor, follow configuration changes, and stop once `shutdown` resolves.
///
/// # Errors
///
/// Returns an error when the service cannot be assembled or started.
pub async fn serve<F>(dependencies: BootstrapDependencies, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send,
{
    info!("convoy agent starting");
    let BootstrapDependencies {
        snapshot,
        watcher,
        registry,
        changes,
        events,
        metrics,
        dispatcher,
        supervisor: schedule,
        retry_interval,
    } = dependencies;
    let config = snapshot.config;
    let signals = Signals::new(events.clone(), metrics.clone());

    let client = match &config.collector {
        Some(collector) => {
            let client: Arc<dyn CollectorClient> = Arc::new(HttpCollectorClient::new(collector)?);
            Some(client)
        }
        None => {
            warn!("no collector configured; reports will stay queued");
            None
        }
    };
    let submitter = Arc::new(ReportSubmitter::new(
        ReportQueue::new(config.reports_dir.clone()),
        client,
        events,
        metrics.clone(),
    ));
    let retry = Arc::new(SubmissionRetryLoop::new(
        Arc::clone(&submitter),
        Arc::clone(&changes),
        retry_interval,
    ));
    let deps = RuntimeDeps {
        registry: Arc::new(registry),
        api: submitter.clone(),
        changes,
        gate: ArchiveGate::new(),
        signals: signals.clone(),
        dispatcher,
    };

    let supervisor = Supervisor::new(config, retry, deps, schedule);
    supervisor.start().await?;
    let config_task = spawn_config_watch_task(watcher, Arc::downgrade(&supervisor), signals);

    shutdown.await;
    info!("shutdown requested");

    config_task.abort();
    if let Err(err) = config_task.await
        && !err.is_cancelled()
    {
        warn!(error = %err, "config watcher task join failed");
    }
    supervisor.stop().await?;
    submitter.dispose();
    info!("convoy agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "ctrl-c handler unavailable; shutting down");
    }
}

fn spawn_config_watch_task(
    mut watcher: ConfigWatcher,
    supervisor: Weak<Supervisor>,
    signals: Signals,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut config_degraded = false;
        loop {
            let outcome = match watcher.next().await {
                Ok(snapshot) => {
                    let Some(supervisor) = supervisor.upgrade() else {
                        return;
                    };
                    let revision = snapshot.revision;
                    supervisor.reload(snapshot).await.map(|()| revision)
                }
                Err(err) => Err(AppError::config("config_watcher.next", err)),
            };
            match outcome {
                Ok(revision) => {
                    info!(revision, "applied configuration update from watcher");
                    set_config_degraded(&signals, &mut config_degraded, false);
                }
                Err(err) => {
                    signals.metrics().inc_config_reload_failure();
                    warn!(
                        path = %watcher.path().display(),
                        error = %err,
                        "configuration update rejected"
                    );
                    set_config_degraded(&signals, &mut config_degraded, true);
                }
            }
        }
    })
}

fn set_config_degraded(signals: &Signals, config_degraded: &mut bool, degraded: bool) {
    if *config_degraded == degraded {
        return;
    }
    let degraded_list = if degraded {
        vec![CONFIG_HEALTH_COMPONENT.to_string()]
    } else {
        Vec::new()
    };
    signals.publish(Event::HealthChanged {
        degraded: degraded_list,
    });
    *config_degraded = degraded;
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn config_health_is_published_only_on_change() -> TestResult<()> {
        let events = EventBus::with_capacity(8);
        let signals = Signals::new(events.clone(), Metrics::new()?);
        let mut degraded = false;

        set_config_degraded(&signals, &mut degraded, false);
        set_config_degraded(&signals, &mut degraded, true);
        set_config_degraded(&signals, &mut degraded, true);
        set_config_degraded(&signals, &mut degraded, false);

        let published: Vec<_> = events
            .backlog_since(0)
            .into_iter()
            .map(|envelope| envelope.event)
            .collect();
        assert_eq!(
            published,
            vec![
                Event::HealthChanged {
                    degraded: vec![CONFIG_HEALTH_COMPONENT.to_string()]
                },
                Event::HealthChanged { degraded: vec![] },
            ]
        );
        Ok(())
    }
}
